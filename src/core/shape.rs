use glam::{Mat3, Vec3};

use crate::core::database::ShapeDatabase;
use crate::core::types::Transform;
use crate::utils::allocator::{Pool, NIL};

/// Preset values for attaching a shape instance to a body.
#[derive(Debug, Clone, Copy)]
pub struct ShapePrefab {
    /// Collision shape handle in the shape database.
    pub shape: u32,
    /// kg/m³.
    pub density: f32,
    /// Range [0, 1]: bounciness.
    pub restitution: f32,
    /// Range [0, 1]: bounds tangent impulses by `μ · normal impulse`.
    pub friction: f32,
    /// Bounding box margin for dynamic BVH proxies.
    pub margin: f32,
}

/// A collision shape attached to a rigid body by a local-frame transform.
/// Instances form an intrusive list per body and feed mass aggregation.
#[derive(Debug, Clone)]
pub struct ShapeInstance {
    pub body: u32,
    pub shape: u32,
    pub density: f32,
    pub restitution: f32,
    pub friction: f32,
    pub margin: f32,
    pub local_transform: Transform,
    pub next: u32,
    pub prev: u32,
}

impl ShapeInstance {
    pub fn from_prefab(prefab: &ShapePrefab, local_transform: Transform, body: u32) -> Self {
        Self {
            body,
            shape: prefab.shape,
            density: prefab.density,
            restitution: prefab.restitution,
            friction: prefab.friction,
            margin: prefab.margin,
            local_transform,
            next: NIL,
            prev: NIL,
        }
    }
}

/// Aggregated mass statics of a shape-instance list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassProperties {
    pub mass: f32,
    pub local_center_of_mass: Vec3,
    /// Body-frame inertia about the aggregated center of mass.
    pub inertia_tensor: Mat3,
}

/// Walks a body's shape list and aggregates mass, the mass-weighted centroid,
/// and the parallel-axis inertia sum. Each shape's unit-density tensor is
/// scaled by its density and rotated into the body frame first.
pub fn aggregate_mass_properties(
    instances: &Pool<ShapeInstance>,
    shapes: &ShapeDatabase,
    first: u32,
) -> MassProperties {
    let mut mass = 0.0f32;
    let mut weighted_com = Vec3::ZERO;

    let mut per_shape: Vec<(f32, Vec3, Mat3)> = Vec::new();
    let mut index = first;
    while index != NIL {
        let instance = instances.at(index);
        let shape = shapes.address(instance.shape);

        let m = instance.density * shape.volume;
        let rot = Mat3::from_quat(instance.local_transform.rotation);
        let com = instance.local_transform.point(shape.center_of_mass);
        let inertia = rot * (shape.unit_inertia * instance.density) * rot.transpose();

        mass += m;
        weighted_com += com * m;
        per_shape.push((m, com, inertia));
        index = instance.next;
    }

    if mass <= f32::EPSILON {
        return MassProperties {
            mass: 0.0,
            local_center_of_mass: Vec3::ZERO,
            inertia_tensor: Mat3::IDENTITY,
        };
    }

    let center = weighted_com / mass;
    let mut inertia = Mat3::ZERO;
    for (m, com, shape_inertia) in per_shape {
        let d = com - center;
        let shift = Mat3::IDENTITY * (m * d.dot(d)) - outer(d, d) * m;
        inertia += shape_inertia + shift;
    }

    MassProperties {
        mass,
        local_center_of_mass: center,
        inertia_tensor: inertia,
    }
}

fn outer(a: Vec3, b: Vec3) -> Mat3 {
    Mat3::from_cols(a * b.x, a * b.y, a * b.z)
}

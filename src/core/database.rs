use std::collections::HashMap;

use glam::{Mat3, Vec3};

use crate::collision::shapes::{CollisionShape, ShapeType};
use crate::utils::allocator::Pool;

/// String-keyed, reference-counted store of immutable collision shapes.
/// Shapes outlive any body referring to them; a shape is reclaimed only when
/// its count returns to zero.
#[derive(Default)]
pub struct ShapeDatabase {
    entries: Pool<ShapeEntry>,
    by_name: HashMap<String, u32>,
}

struct ShapeEntry {
    name: String,
    refcount: u32,
    shape: CollisionShape,
}

impl ShapeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shape under a unique name; the caller holds the initial
    /// reference.
    pub fn insert(&mut self, name: &str, shape: CollisionShape) -> u32 {
        assert!(
            !self.by_name.contains_key(name),
            "duplicate collision shape name {name:?}"
        );
        let handle = self.entries.insert(ShapeEntry {
            name: name.to_string(),
            refcount: 1,
            shape,
        });
        self.by_name.insert(name.to_string(), handle);
        handle
    }

    pub fn reference(&mut self, name: &str) -> Option<u32> {
        let handle = *self.by_name.get(name)?;
        self.entries.at_mut(handle).refcount += 1;
        Some(handle)
    }

    pub fn retain(&mut self, handle: u32) {
        self.entries.at_mut(handle).refcount += 1;
    }

    pub fn dereference(&mut self, handle: u32) {
        let entry = self.entries.at_mut(handle);
        entry.refcount -= 1;
        if entry.refcount == 0 {
            let name = std::mem::take(&mut entry.name);
            self.by_name.remove(&name);
            self.entries.remove(handle);
        }
    }

    pub fn address(&self, handle: u32) -> &CollisionShape {
        &self.entries.at(handle).shape
    }

    pub fn shape_type(&self, handle: u32) -> ShapeType {
        self.entries.at(handle).shape.shape_type()
    }

    pub fn len(&self) -> u32 {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reusable preset for creating rigid bodies: shape reference, material
/// values, and mass statics precomputed for that shape and density.
#[derive(Debug, Clone, Copy)]
pub struct BodyPrefab {
    pub shape: u32,
    pub density: f32,
    pub restitution: f32,
    pub friction: f32,
    pub dynamic: bool,
    pub mass: f32,
    pub local_center_of_mass: Vec3,
    pub inertia_tensor: Mat3,
    pub inv_inertia_tensor: Mat3,
}

impl BodyPrefab {
    /// Computes mass statics from the referenced shape; takes over one shape
    /// reference which the prefab database releases on removal.
    pub fn new(
        shapes: &ShapeDatabase,
        shape: u32,
        density: f32,
        restitution: f32,
        friction: f32,
        dynamic: bool,
    ) -> Self {
        let cs = shapes.address(shape);
        let mass = cs.volume * density;
        let inertia = cs.unit_inertia * density;
        let inv_inertia = if dynamic && inertia.determinant().abs() > f32::EPSILON {
            inertia.inverse()
        } else {
            Mat3::ZERO
        };
        Self {
            shape,
            density,
            restitution,
            friction,
            dynamic,
            mass,
            local_center_of_mass: cs.center_of_mass,
            inertia_tensor: inertia,
            inv_inertia_tensor: inv_inertia,
        }
    }
}

/// String-keyed, reference-counted store of body prefabs.
#[derive(Default)]
pub struct PrefabDatabase {
    entries: Pool<PrefabEntry>,
    by_name: HashMap<String, u32>,
}

struct PrefabEntry {
    name: String,
    refcount: u32,
    prefab: BodyPrefab,
}

impl PrefabDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, prefab: BodyPrefab) -> u32 {
        assert!(
            !self.by_name.contains_key(name),
            "duplicate body prefab name {name:?}"
        );
        let handle = self.entries.insert(PrefabEntry {
            name: name.to_string(),
            refcount: 1,
            prefab,
        });
        self.by_name.insert(name.to_string(), handle);
        handle
    }

    pub fn reference(&mut self, name: &str) -> Option<u32> {
        let handle = *self.by_name.get(name)?;
        self.entries.at_mut(handle).refcount += 1;
        Some(handle)
    }

    pub fn dereference(&mut self, handle: u32) {
        let entry = self.entries.at_mut(handle);
        entry.refcount -= 1;
        if entry.refcount == 0 {
            let name = std::mem::take(&mut entry.name);
            self.by_name.remove(&name);
            self.entries.remove(handle);
        }
    }

    pub fn address(&self, handle: u32) -> &BodyPrefab {
        &self.entries.at(handle).prefab
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn shape_database_refcount_lifecycle() {
        let mut db = ShapeDatabase::new();
        let handle = db.insert("unit_sphere", CollisionShape::sphere(1.0));
        assert_eq!(db.reference("unit_sphere"), Some(handle));
        db.dereference(handle);
        assert_eq!(db.len(), 1);
        db.dereference(handle);
        assert!(db.is_empty());
        assert_eq!(db.reference("unit_sphere"), None);
    }

    #[test]
    fn prefab_statics_scale_with_density() {
        let mut shapes = ShapeDatabase::new();
        let handle = shapes.insert("ball", CollisionShape::sphere(0.5));
        let prefab = BodyPrefab::new(&shapes, handle, 2.0, 0.1, 0.4, true);
        let volume = 4.0 / 3.0 * std::f32::consts::PI * 0.125;
        assert_relative_eq!(prefab.mass, 2.0 * volume, epsilon = 1e-5);
        let i = prefab.inertia_tensor.x_axis.x;
        assert_relative_eq!(i, 0.4 * prefab.mass * 0.25, epsilon = 1e-5);
        assert_relative_eq!(
            prefab.inv_inertia_tensor.x_axis.x,
            1.0 / i,
            epsilon = 1e-3
        );
    }
}

use glam::{Mat3, Quat, Vec3};

use crate::utils::allocator::NIL;
use crate::utils::math::Aabb;

/// Bit flags of a rigid body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BodyFlags(u32);

impl BodyFlags {
    pub const ACTIVE: u32 = 1 << 0;
    pub const DYNAMIC: u32 = 1 << 1;
    pub const AWAKE: u32 = 1 << 2;
    pub const MARKED_FOR_REMOVAL: u32 = 1 << 3;

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(&self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn insert(&mut self, bits: u32) {
        self.0 |= bits;
    }

    pub fn remove(&mut self, bits: u32) {
        self.0 &= !bits;
    }

    pub fn is_active(&self) -> bool {
        self.contains(Self::ACTIVE)
    }

    pub fn is_dynamic(&self) -> bool {
        self.contains(Self::DYNAMIC)
    }

    pub fn is_awake(&self) -> bool {
        self.contains(Self::AWAKE)
    }

    pub fn is_marked(&self) -> bool {
        self.contains(Self::MARKED_FOR_REMOVAL)
    }
}

/// Island membership of a body. Static bodies never materialize an island;
/// hot paths branch on the tag before touching the island pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IslandRef {
    #[default]
    None,
    Static,
    Handle(u32),
}

impl IslandRef {
    pub fn handle(&self) -> Option<u32> {
        match self {
            IslandRef::Handle(index) => Some(*index),
            _ => None,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, IslandRef::Static)
    }
}

/// Intrusive list head (first/last/count) over pool indices.
#[derive(Debug, Clone, Copy)]
pub struct ListHead {
    pub first: u32,
    pub last: u32,
    pub count: u32,
}

impl Default for ListHead {
    fn default() -> Self {
        Self {
            first: NIL,
            last: NIL,
            count: 0,
        }
    }
}

/// Simulated entity. The body exclusively owns its pose, velocities and
/// aggregated mass data; collision geometry is shared through the shape
/// database.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub flags: BodyFlags,
    pub entity: u32,

    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,

    /// Local-frame center of mass (aggregated over the shape list).
    pub local_center_of_mass: Vec3,
    /// Local AABB under the current rotation, relative to `position`.
    pub local_bbox: Aabb,
    /// Proxy inflation margin for the dynamic BVH.
    pub margin: f32,

    pub mass: f32,
    pub inv_mass: f32,
    /// Body-frame inertia about the center of mass.
    pub inertia_tensor: Mat3,
    pub inv_inertia_tensor: Mat3,

    pub restitution: f32,
    pub friction: f32,

    /// Primary collision shape handle (shape database).
    pub shape: u32,
    /// Shape-instance list driving mass aggregation.
    pub shape_list: ListHead,

    pub island: IslandRef,
    /// Island body-list links.
    pub island_next: u32,
    pub island_prev: u32,
    /// Head of this body's contact net-list.
    pub contact_first: u32,

    /// Dynamic BVH leaf index.
    pub proxy: u32,

    /// Uninterrupted time spent below the sleep velocity limits.
    pub low_velocity_time: f32,
}

impl RigidBody {
    pub fn world_center_of_mass(&self) -> Vec3 {
        self.position + self.rotation * self.local_center_of_mass
    }

    /// World-frame inverse inertia `R·I⁻¹·Rᵀ`; zero for non-dynamic bodies.
    pub fn world_inv_inertia(&self) -> Mat3 {
        if !self.flags.is_dynamic() {
            return Mat3::ZERO;
        }
        let r = Mat3::from_quat(self.rotation);
        r * self.inv_inertia_tensor * r.transpose()
    }

    pub fn world_bbox(&self) -> Aabb {
        self.local_bbox.translated(self.position)
    }
}

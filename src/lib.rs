//! Impulse Engine – island-based rigid body physics core.
//!
//! The crate simulates 3D rigid bodies under gravity and mutual contact with
//! a fixed timestep. A dynamic AABB tree drives broadphase, a shape-pair
//! narrowphase with persistent SAT caches feeds a contact database, islands
//! track connectivity across ticks, and a warm-started sequential-impulse
//! solver integrates each island independently.

pub mod collision;
pub mod config;
pub mod core;
pub mod dynamics;
pub mod events;
pub mod pipeline;
pub mod utils;

pub use glam::{Mat3, Quat, Vec3};

pub use crate::collision::{
    broadphase::DynamicBvh,
    contact::{ContactManifold, SatCacheKind},
    narrowphase::ShapePose,
    shapes::{CollisionShape, Dcel, ShapeGeometry, ShapeType, TriMesh},
};
pub use crate::config::{SolverSettings, COLLISION_MARGIN_DEFAULT, GRAVITY_CONSTANT_DEFAULT};
pub use crate::core::{
    body::{BodyFlags, IslandRef, RigidBody},
    database::{BodyPrefab, PrefabDatabase, ShapeDatabase},
    shape::ShapePrefab,
    types::Transform,
};
pub use crate::events::{PhysicsEvent, PhysicsEventKind};
pub use crate::pipeline::{PhysicsPipeline, PhysicsPipelineBuilder, RayHit};
pub use crate::utils::math::{Aabb, Ray};

pub mod broadphase;
pub mod clipping;
pub mod contact;
pub mod gjk;
pub mod narrowphase;
pub mod shapes;

mod entity;
mod interpolation;
mod world;

pub use entity::{EntityId, PlayerSnapshot, ProjectileState, Transform, WeaponState};
pub use interpolation::{
    DEFAULT_INTERPOLATION_DELAY_TICKS, InterpolatedWorld, InterpolationConfig,
    InterpolationState, SnapshotInterpolator, interpolate_deg, interpolation_alpha,
    interpolation_weight,
};
pub use world::Snapshot;

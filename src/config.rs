use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Default gravity magnitude (standard gravity, m/s²).
pub const GRAVITY_CONSTANT_DEFAULT: f32 = 9.80665;

/// Default collision margin fed to narrowphase (5 mm).
pub const COLLISION_MARGIN_DEFAULT: f32 = 0.005;

/// Proxy inflation margin for the dynamic BVH fat boxes.
pub const BODY_PROXY_MARGIN: f32 = 0.25;

/// Numerical parameters of the velocity constraint solver. Plain data so the
/// host can serialize presets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Velocity solver iteration count.
    pub iteration_count: u32,
    /// Use the coupled block solver for multi-point manifolds when the
    /// normal mass is well conditioned.
    pub block_solver: bool,
    /// Warm start accumulated impulses from the previous tick.
    pub warmup_solver: bool,
    pub gravity: Vec3,
    /// Range [0, 1]: how quickly penetration is steered out, 1.0 max speed.
    pub baumgarte_constant: f32,
    /// Max condition number of the block normal mass before falling back to
    /// the scalar path.
    pub max_condition: f32,
    /// Coefficient in dv/dt = -c·v.
    pub linear_dampening: f32,
    pub angular_dampening: f32,
    /// Allowed penetration before velocity steering sets in.
    pub linear_slop: f32,
    /// Approach speed above which restitution applies.
    pub restitution_threshold: f32,
    pub sleep_enabled: bool,
    /// Uninterrupted low-velocity time before an island may sleep.
    pub sleep_time_threshold: f32,
    pub sleep_linear_velocity_sq_limit: f32,
    pub sleep_angular_velocity_sq_limit: f32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            iteration_count: 10,
            block_solver: false,
            warmup_solver: true,
            gravity: Vec3::new(0.0, -GRAVITY_CONSTANT_DEFAULT, 0.0),
            baumgarte_constant: 0.1,
            max_condition: 1000.0,
            linear_dampening: 0.1,
            angular_dampening: 0.1,
            linear_slop: 1e-3,
            restitution_threshold: 1e-3,
            sleep_enabled: true,
            sleep_time_threshold: 0.5,
            sleep_linear_velocity_sq_limit: 1e-6,
            sleep_angular_velocity_sq_limit: (0.01 * std::f32::consts::TAU)
                * (0.01 * std::f32::consts::TAU),
        }
    }
}

/// Active settings plus the pending copy edited by the host. Pending values
/// take effect at the start of the next tick so a running tick never sees a
/// mixed configuration.
#[derive(Debug, Clone, Default)]
pub struct SolverConfig {
    active: SolverSettings,
    pending: SolverSettings,
}

/// Sleep transition requested by a pending-config apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTransition {
    Unchanged,
    Enable,
    Disable,
}

impl SolverConfig {
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            active: settings,
            pending: settings,
        }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.active
    }

    /// Edit point for hot reloads; written values apply next tick.
    pub fn pending_mut(&mut self) -> &mut SolverSettings {
        &mut self.pending
    }

    /// Applies every pending field except the sleep flag, which is reported
    /// back so the pipeline can run the body/island wake bookkeeping.
    pub(crate) fn apply_pending(&mut self) -> SleepTransition {
        let transition = match (self.active.sleep_enabled, self.pending.sleep_enabled) {
            (false, true) => SleepTransition::Enable,
            (true, false) => SleepTransition::Disable,
            _ => SleepTransition::Unchanged,
        };
        let sleep_enabled = self.active.sleep_enabled;
        self.active = self.pending;
        self.active.sleep_enabled = sleep_enabled;
        self.pending.sleep_enabled = sleep_enabled;
        transition
    }

    /// Immediate sleep toggle used by the pipeline's enable/disable calls.
    pub(crate) fn force_sleep_enabled(&mut self, enabled: bool) {
        self.active.sleep_enabled = enabled;
        self.pending.sleep_enabled = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_changes_apply_atomically() {
        let mut config = SolverConfig::new(SolverSettings::default());
        config.pending_mut().iteration_count = 4;
        config.pending_mut().sleep_enabled = false;
        assert_eq!(config.settings().iteration_count, 10);
        assert!(config.settings().sleep_enabled);

        let transition = config.apply_pending();
        assert_eq!(transition, SleepTransition::Disable);
        assert_eq!(config.settings().iteration_count, 4);
    }
}

use log::{log_enabled, trace, warn, Level};
use std::time::{Duration, Instant};

/// Wall-clock watch over one simulation tick. The pipeline runs a fixed
/// step, so a tick that takes longer than `ns_tick` to compute can never
/// keep up with real time; dropping the watch warns when that happens and
/// otherwise traces the measured duration.
pub struct TickTimer {
    frame: u64,
    budget: Duration,
    start: Instant,
}

impl TickTimer {
    pub fn begin(frame: u64, ns_tick: u64) -> Self {
        Self {
            frame,
            budget: Duration::from_nanos(ns_tick),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if elapsed > self.budget {
            warn!(
                "tick {} overran the fixed step: {:.2} ms > {:.2} ms",
                self.frame,
                elapsed.as_secs_f64() * 1000.0,
                self.budget.as_secs_f64() * 1000.0
            );
        } else if log_enabled!(Level::Trace) {
            trace!("tick {} took {} µs", self.frame, elapsed.as_micros());
        }
    }
}

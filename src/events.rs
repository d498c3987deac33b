use std::collections::VecDeque;

use glam::Vec3;

/// Lifecycle event emitted by the pipeline, timestamped with the simulation
/// clock (`ns_start + frames_completed * ns_tick`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicsEvent {
    pub ns: u64,
    pub kind: PhysicsEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsEventKind {
    BodyNew { body: u32 },
    BodyRemoved { body: u32 },
    BodyOrientation { body: u32 },
    IslandNew { island: u32 },
    IslandExpanded { island: u32 },
    IslandRemoved { island: u32 },
    IslandAwake { island: u32 },
    IslandAsleep { island: u32 },
    ContactNew { body1: u32, body2: u32 },
    ContactRemoved { body1: u32, body2: u32 },
}

/// Event queue drained by the host once per tick (or less often).
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<PhysicsEvent>,
    ns_now: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timestamp applied to subsequently pushed events.
    pub fn stamp(&mut self, ns: u64) {
        self.ns_now = ns;
    }

    pub fn push(&mut self, kind: PhysicsEventKind) {
        self.events.push_back(PhysicsEvent {
            ns: self.ns_now,
            kind,
        });
    }

    pub fn drain(&mut self) -> impl Iterator<Item = PhysicsEvent> + '_ {
        self.events.drain(..)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Colored line segment captured during narrowphase or solve for an external
/// debug renderer.
#[derive(Debug, Clone, Copy)]
pub struct VisualSegment {
    pub start: Vec3,
    pub end: Vec3,
    pub color: [f32; 4],
}

#[cfg(feature = "debug-draw")]
static DEBUG_SEGMENTS: parking_lot::Mutex<Vec<VisualSegment>> =
    parking_lot::Mutex::new(Vec::new());

/// Records a debug segment. Compiles to nothing without `debug-draw`; with
/// the feature on, worker threads funnel into a shared mutex-guarded sink.
#[inline]
#[allow(unused_variables)]
pub fn debug_segment(start: Vec3, end: Vec3, color: [f32; 4]) {
    #[cfg(feature = "debug-draw")]
    DEBUG_SEGMENTS.lock().push(VisualSegment { start, end, color });
}

/// Drains all captured segments; the renderer calls this once per tick.
#[cfg(feature = "debug-draw")]
pub fn drain_debug_segments() -> Vec<VisualSegment> {
    std::mem::take(&mut *DEBUG_SEGMENTS.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_stamps_and_drains_in_order() {
        let mut queue = EventQueue::new();
        queue.stamp(100);
        queue.push(PhysicsEventKind::BodyNew { body: 1 });
        queue.stamp(200);
        queue.push(PhysicsEventKind::BodyRemoved { body: 1 });

        let events: Vec<PhysicsEvent> = queue.drain().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].ns, 100);
        assert_eq!(events[1].ns, 200);
        assert!(queue.is_empty());
    }
}

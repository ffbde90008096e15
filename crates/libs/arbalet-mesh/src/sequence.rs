//! Staleness filter for COLOR and COLOR_ENTRY sequence numbers.

/// A candidate this far below the current value is taken as a wrapped
/// counter rather than a stale one.
pub const WRAP_THRESHOLD: u16 = 65000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceGuard {
    current: u16,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u16 {
        self.current
    }

    /// Accepts `candidate` when it is newer than the last accepted value,
    /// and records it.
    pub fn accept(&mut self, candidate: u16) -> bool {
        let newer = candidate > self.current || self.current - candidate > WRAP_THRESHOLD;
        if newer {
            self.current = candidate;
        }
        newer
    }

    /// Forget the last accepted value, e.g. after a full re-discovery.
    pub fn reset(&mut self) {
        self.current = 0;
    }
}

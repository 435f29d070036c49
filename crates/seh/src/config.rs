use serde::{Deserialize, Serialize};

use crate::{
    fail_fast::Termination,
    resource::{LimitedTracker, ResourceLimits},
};

/// Default number of pre-allocated out-of-memory exceptions.
pub const DEFAULT_EMERGENCY_BUFFERS: usize = 4;

/// Engine construction parameters.
///
/// Built with `EngineConfig::default()` plus the builder methods, or deserialized:
///
/// ```
/// use seh::{EngineConfig, Termination};
///
/// let config = EngineConfig::default().emergency_buffers(2).termination(Termination::Exit(70));
/// assert_eq!(config.emergency_buffers, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Limits for engines built with [`Engine::limited`](crate::Engine::limited).
    pub limits: ResourceLimits,
    /// Out-of-memory exceptions reserved up front. Always at least one.
    pub emergency_buffers: usize,
    /// What happens after an unhandled exception is reported.
    pub termination: Termination,
    /// Initial number of heap slots.
    pub heap_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            emergency_buffers: DEFAULT_EMERGENCY_BUFFERS,
            termination: Termination::default(),
            heap_capacity: 64,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the reserve size; zero is raised to one.
    #[must_use]
    pub fn emergency_buffers(mut self, count: usize) -> Self {
        self.emergency_buffers = count.max(1);
        self
    }

    #[must_use]
    pub fn termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    #[must_use]
    pub fn heap_capacity(mut self, capacity: usize) -> Self {
        self.heap_capacity = capacity;
        self
    }

    /// A tracker enforcing `limits`.
    #[must_use]
    pub fn tracker(&self) -> LimitedTracker {
        LimitedTracker::new(self.limits.clone())
    }
}

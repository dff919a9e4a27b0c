//! Component health status shared by all guards.

use serde::{Deserialize, Serialize};

/// Health of a single guard, rolled up worst-of by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentHealth {
    Healthy,
    Warning,
    Unhealthy,
}

impl ComponentHealth {
    /// Combine two statuses, keeping the worse one.
    pub fn worst(self, other: ComponentHealth) -> ComponentHealth {
        self.max(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_of_prefers_degradation() {
        assert_eq!(
            ComponentHealth::Healthy.worst(ComponentHealth::Warning),
            ComponentHealth::Warning
        );
        assert_eq!(
            ComponentHealth::Unhealthy.worst(ComponentHealth::Healthy),
            ComponentHealth::Unhealthy
        );
    }
}

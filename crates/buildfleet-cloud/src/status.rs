//! Build-agent instance lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle state of a cloud build-agent instance as the orchestrator
/// tracks it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Unknown,
    ScheduledToStart,
    Starting,
    Running,
    Restarting,
    ScheduledToStop,
    Stopping,
    Stopped,
    Error,
}

impl InstanceStatus {
    /// True while the orchestrator has asked for a transition the provider
    /// has not begun reporting yet. Status polling treats failures in these
    /// windows as transient.
    pub fn is_scheduled(&self) -> bool {
        matches!(
            self,
            InstanceStatus::ScheduledToStart | InstanceStatus::ScheduledToStop
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstanceStatus::Unknown => "unknown",
            InstanceStatus::ScheduledToStart => "scheduled to start",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Restarting => "restarting",
            InstanceStatus::ScheduledToStop => "scheduled to stop",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
        };
        write!(f, "{name}")
    }
}

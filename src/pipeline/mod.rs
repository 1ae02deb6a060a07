//! Queue pipeline stages: scan → storage (+ dispatch) → price.

pub mod price;
pub mod scan;
pub mod storage;

use serde::Serialize;

/// Lifecycle shared by the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Stopped,
    Running,
    Paused,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Stopped => "stopped",
            StageState::Running => "running",
            StageState::Paused => "paused",
        }
    }
}

/// Minimal typed subscription interface; listeners are invoked
/// synchronously from the stage's own task.
pub trait StageListener: Send + Sync {
    fn on_task_start(&self, _stage: &str, _label: &str) {}
    fn on_task_complete(&self, _stage: &str, _label: &str, _duration_ms: u64) {}
    fn on_task_error(&self, _stage: &str, _label: &str, _error: &str) {}
}

//! Task records and their lifecycle
//!
//! A record is created when a task is dispatched and moves through
//! `Dispatched -> (Succeeded | Failed | TimedOut) -> RewardComputed ->
//! RatingApplied`. The reward, once computed, is immutable; the optional
//! human rating is settable exactly once and is tracked next to the reward
//! rather than folded into it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::routing::ArmKey;

/// Terminal outcome of a dispatched task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskOutcome {
    /// Success indicator term of the composite reward
    pub fn success_indicator(&self) -> f64 {
        match self {
            Self::Succeeded => 1.0,
            Self::Failed | Self::TimedOut => 0.0,
        }
    }
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Lifecycle state of a task record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, outcome not yet observed
    Dispatched,
    /// Outcome observed, reward not yet folded into arm statistics
    Completed,
    /// Reward computed and applied; terminal unless a rating arrives
    RewardComputed,
    /// Human rating applied; fully terminal
    RatingApplied,
}

/// Record of one dispatched task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub input: String,
    /// Arm the terminal outcome is attributed to
    pub arm: ArmKey,
    pub dispatched_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<TaskOutcome>,
    pub latency_ms: Option<u64>,
    /// Composite reward; never mutated after it is set
    pub reward: Option<f64>,
    /// Human rating, settable once via feedback
    pub rating: Option<f64>,
    pub state: TaskState,
}

impl TaskRecord {
    pub fn new(task_id: impl Into<String>, input: impl Into<String>, arm: ArmKey) -> Self {
        Self {
            task_id: task_id.into(),
            input: input.into(),
            arm,
            dispatched_at: Utc::now(),
            completed_at: None,
            outcome: None,
            latency_ms: None,
            reward: None,
            rating: None,
            state: TaskState::Dispatched,
        }
    }

    /// Mark the task's terminal outcome
    pub fn complete(&mut self, outcome: TaskOutcome, latency_ms: u64) {
        self.outcome = Some(outcome);
        self.latency_ms = Some(latency_ms);
        self.completed_at = Some(Utc::now());
        self.state = TaskState::Completed;
    }

    /// Record the computed reward; a no-op if one was already set.
    pub fn set_reward(&mut self, reward: f64) {
        if self.reward.is_none() {
            self.reward = Some(reward);
            self.state = TaskState::RewardComputed;
        }
    }

    /// Record the human rating; a no-op if one was already set.
    pub fn set_rating(&mut self, rating: f64) {
        if self.rating.is_none() {
            self.rating = Some(rating);
            self.state = TaskState::RatingApplied;
        }
    }

    /// Whether feedback for this task has already been applied
    pub fn has_rating(&self) -> bool {
        self.rating.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lifecycle() {
        let mut record = TaskRecord::new("t1", "summarize this", ArmKey::new("mentor", "default"));
        assert_eq!(record.state, TaskState::Dispatched);

        record.complete(TaskOutcome::Succeeded, 420);
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.latency_ms, Some(420));

        record.set_reward(1.25);
        assert_eq!(record.state, TaskState::RewardComputed);

        record.set_rating(0.9);
        assert_eq!(record.state, TaskState::RatingApplied);
    }

    #[test]
    fn test_reward_is_immutable_once_set() {
        let mut record = TaskRecord::new("t1", "q", ArmKey::new("mentor", "default"));
        record.complete(TaskOutcome::Succeeded, 100);
        record.set_reward(1.0);
        record.set_reward(5.0);
        assert_eq!(record.reward, Some(1.0));
    }

    #[test]
    fn test_success_indicator() {
        assert_eq!(TaskOutcome::Succeeded.success_indicator(), 1.0);
        assert_eq!(TaskOutcome::Failed.success_indicator(), 0.0);
        assert_eq!(TaskOutcome::TimedOut.success_indicator(), 0.0);
    }
}

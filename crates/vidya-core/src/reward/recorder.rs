//! Reward computation and the replay buffer
//!
//! The recorder turns a task's terminal outcome into a scalar reward
//! (`w_success * success + w_speed * normalized_speed + w_rating * rating`,
//! rating neutral until feedback arrives) and folds it into the shared arm
//! statistics. A bounded ring buffer retains recent task records so the
//! feedback channel can apply a rating retroactively; eviction of the oldest
//! record is the only deletion path.

use std::collections::VecDeque;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RewardWeights;
use crate::error::{Error, Result};
use crate::routing::{ArmKey, ArmStatsTable};

use super::record::{TaskOutcome, TaskRecord};

/// Recorder of task outcomes and human feedback
pub struct RewardRecorder {
    weights: RewardWeights,
    latency_ceiling_ms: u64,
    stats: ArmStatsTable,
    buffer: Mutex<VecDeque<TaskRecord>>,
    capacity: usize,
}

impl RewardRecorder {
    pub fn new(
        stats: ArmStatsTable,
        weights: RewardWeights,
        latency_ceiling_ms: u64,
        capacity: usize,
    ) -> Self {
        Self {
            weights,
            latency_ceiling_ms: latency_ceiling_ms.max(1),
            stats,
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// The shared statistics table this recorder writes to
    pub fn stats(&self) -> &ArmStatsTable {
        &self.stats
    }

    /// Speed term of the composite reward: 1.0 at zero latency, falling
    /// linearly to 0.0 at the configured ceiling.
    fn normalized_speed(&self, latency_ms: u64) -> f64 {
        (1.0 - latency_ms as f64 / self.latency_ceiling_ms as f64).clamp(0.0, 1.0)
    }

    /// Composite reward at completion time; the rating term contributes
    /// zero until feedback arrives.
    pub fn compute_reward(&self, outcome: TaskOutcome, latency_ms: u64) -> f64 {
        self.weights.success * outcome.success_indicator()
            + self.weights.speed * self.normalized_speed(latency_ms)
    }

    /// Record a task's terminal outcome: computes the reward, updates the
    /// attributed arm's statistics (skipped for the emergency sentinel), and
    /// retains the record in the replay buffer.
    pub async fn record_outcome(
        &self,
        task_id: &str,
        input: &str,
        arm: ArmKey,
        outcome: TaskOutcome,
        latency_ms: u64,
    ) -> f64 {
        let reward = self.compute_reward(outcome, latency_ms);

        let mut record = TaskRecord::new(task_id, input, arm.clone());
        record.complete(outcome, latency_ms);
        record.set_reward(reward);

        if arm.is_emergency() {
            debug!(task_id, "Emergency outcome, arm statistics unchanged");
        } else {
            let stats = self.stats.record(&arm, reward).await;
            info!(
                task_id,
                arm = %arm,
                outcome = %outcome,
                reward,
                pulls = stats.pulls,
                mean = stats.mean_reward,
                "Recorded task outcome"
            );
        }

        let mut buffer = self.buffer.lock().await;
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(record);

        reward
    }

    /// Apply a human rating to a completed task, exactly once per task id.
    ///
    /// The rating shifts the attributed arm's statistics by the rating term
    /// only (`w_rating * rating`) without consuming a pull, so one task can
    /// update statistics at most twice. Returns the applied delta.
    pub async fn record_feedback(&self, task_id: &str, rating: f64) -> Result<f64> {
        if !(0.0..=1.0).contains(&rating) {
            return Err(Error::InvalidRating(rating));
        }

        let mut buffer = self.buffer.lock().await;
        let record = buffer
            .iter_mut()
            .find(|r| r.task_id == task_id)
            .ok_or_else(|| Error::UnknownTask(task_id.to_string()))?;

        if record.has_rating() {
            warn!(task_id, "Rejected duplicate feedback");
            return Err(Error::DuplicateFeedback(task_id.to_string()));
        }

        record.set_rating(rating);
        let arm = record.arm.clone();
        drop(buffer);

        let delta = self.weights.rating * rating;
        if !arm.is_emergency() {
            self.stats.apply_delta(&arm, delta).await;
        }
        info!(task_id, arm = %arm, rating, delta, "Applied feedback rating");
        Ok(delta)
    }

    /// Look up a retained record by task id
    pub async fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.buffer
            .lock()
            .await
            .iter()
            .find(|r| r.task_id == task_id)
            .cloned()
    }

    /// Snapshot of retained records, oldest first
    pub async fn recent(&self) -> Vec<TaskRecord> {
        self.buffer.lock().await.iter().cloned().collect()
    }
}

//! Types for bandit-driven arm selection

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Reserved agent id used when a task terminated on the emergency path
/// without any candidate arm to attribute.
const EMERGENCY_AGENT: &str = "emergency";

/// The unit the selector reasons about: one (agent, model) choice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArmKey {
    pub agent_id: String,
    pub model_id: String,
}

impl ArmKey {
    pub fn new(agent_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Sentinel arm for tasks that never reached a real agent. Statistics
    /// are never recorded against it.
    pub fn emergency() -> Self {
        Self::new(EMERGENCY_AGENT, "none")
    }

    pub fn is_emergency(&self) -> bool {
        self.agent_id == EMERGENCY_AGENT
    }
}

impl std::fmt::Display for ArmKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.agent_id, self.model_id)
    }
}

/// Per-arm statistics maintained by the reward recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmStatistics {
    /// Number of completed tasks recorded against this arm
    pub pulls: u64,
    /// Cumulative reward, including rating corrections
    pub reward_sum: f64,
    /// Running mean reward; defined whenever pulls > 0
    pub mean_reward: f64,
    /// Time of the most recent update
    pub last_updated: DateTime<Utc>,
}

impl Default for ArmStatistics {
    fn default() -> Self {
        Self {
            pulls: 0,
            reward_sum: 0.0,
            mean_reward: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl ArmStatistics {
    /// Record a completed task's reward: increments the pull count and
    /// folds the reward into the running mean incrementally.
    pub fn record(&mut self, reward: f64) {
        self.pulls += 1;
        self.reward_sum += reward;
        self.mean_reward += (reward - self.mean_reward) / self.pulls as f64;
        self.last_updated = Utc::now();
    }

    /// Apply a rating-driven correction without consuming a pull: the
    /// task's contribution to the cumulative reward grows by `delta`, so
    /// the mean shifts by `delta / pulls`.
    pub fn apply_delta(&mut self, delta: f64) {
        if self.pulls == 0 {
            return;
        }
        self.reward_sum += delta;
        self.mean_reward += delta / self.pulls as f64;
        self.last_updated = Utc::now();
    }
}

/// Shared per-arm statistics table.
///
/// Mutated exclusively by the reward recorder under a short write lock;
/// the selector's read path only ever takes a snapshot, so selection never
/// blocks task completions for long.
#[derive(Debug, Clone, Default)]
pub struct ArmStatsTable {
    inner: Arc<RwLock<HashMap<ArmKey, ArmStatistics>>>,
}

impl ArmStatsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone the statistics for a candidate list, in candidate order.
    /// Arms with no history yet read as zero-pull defaults.
    pub async fn snapshot_for(&self, candidates: &[ArmKey]) -> Vec<ArmStatistics> {
        let table = self.inner.read().await;
        candidates
            .iter()
            .map(|arm| table.get(arm).cloned().unwrap_or_default())
            .collect()
    }

    /// Full snapshot for observability surfaces
    pub async fn snapshot(&self) -> HashMap<ArmKey, ArmStatistics> {
        self.inner.read().await.clone()
    }

    /// Record a reward for an arm (first update for a task)
    pub async fn record(&self, arm: &ArmKey, reward: f64) -> ArmStatistics {
        let mut table = self.inner.write().await;
        let stats = table.entry(arm.clone()).or_default();
        stats.record(reward);
        stats.clone()
    }

    /// Apply a rating correction to an arm (second update for a task)
    pub async fn apply_delta(&self, arm: &ArmKey, delta: f64) -> Option<ArmStatistics> {
        let mut table = self.inner.write().await;
        let stats = table.get_mut(arm)?;
        stats.apply_delta(delta);
        Some(stats.clone())
    }

    /// Replace the table contents (e.g., loaded from the store)
    pub async fn import(&self, stats: HashMap<ArmKey, ArmStatistics>) {
        *self.inner.write().await = stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_updates_running_mean() {
        let mut stats = ArmStatistics::default();
        stats.record(1.0);
        stats.record(0.0);
        stats.record(0.5);

        assert_eq!(stats.pulls, 3);
        assert!((stats.mean_reward - 0.5).abs() < 1e-9);
        assert!((stats.reward_sum - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_apply_delta_shifts_mean_without_pull() {
        let mut stats = ArmStatistics::default();
        stats.record(0.6);
        stats.record(0.6);

        stats.apply_delta(0.4);

        assert_eq!(stats.pulls, 2);
        assert!((stats.mean_reward - 0.8).abs() < 1e-9);
        assert!((stats.reward_sum - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_apply_delta_is_ignored_before_first_pull() {
        let mut stats = ArmStatistics::default();
        stats.apply_delta(0.4);
        assert_eq!(stats.pulls, 0);
        assert_eq!(stats.reward_sum, 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_for_preserves_candidate_order() {
        let table = ArmStatsTable::new();
        let a = ArmKey::new("agent-a", "m1");
        let b = ArmKey::new("agent-b", "m1");
        table.record(&b, 0.9).await;

        let snapshot = table.snapshot_for(&[a.clone(), b.clone()]).await;
        assert_eq!(snapshot[0].pulls, 0);
        assert_eq!(snapshot[1].pulls, 1);
    }

    #[test]
    fn test_emergency_arm() {
        assert!(ArmKey::emergency().is_emergency());
        assert!(!ArmKey::new("knowledge", "default").is_emergency());
    }
}

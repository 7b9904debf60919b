//! UCB1 multi-armed bandit for arm selection
//!
//! For each candidate arm the selector computes
//! `mean_reward + sqrt(2 * ln(total_pulls) / pulls)`, where `total_pulls`
//! is summed across the candidate set. Arms that have never been pulled
//! score infinite and are selected in candidate order until every candidate
//! has at least one pull (forced exploration); this takes precedence over
//! the epsilon draw. Ties resolve to the lowest
//! candidate index, so selection is deterministic for a given statistics
//! snapshot; the only randomness is the explicit epsilon-greedy draw
//! controlled by `exploration_rate`.

use std::sync::Mutex;

use rand::prelude::*;
use tracing::debug;

use super::types::{ArmKey, ArmStatistics, ArmStatsTable};

/// Outcome of one selection
#[derive(Debug, Clone)]
pub struct Selection {
    /// Index into the candidate slice
    pub index: usize,
    /// The chosen arm
    pub arm: ArmKey,
    /// UCB score of the chosen arm (infinite for forced exploration)
    pub score: f64,
    /// Whether the choice came from forced exploration or the epsilon draw
    pub exploratory: bool,
}

struct ExploreState {
    rate: f64,
    rng: StdRng,
}

/// UCB1 selector over the shared arm-statistics table
pub struct UcbSelector {
    stats: ArmStatsTable,
    explore: Mutex<ExploreState>,
}

impl UcbSelector {
    /// Create a selector with entropy-seeded randomness for the epsilon draw
    pub fn new(stats: ArmStatsTable, exploration_rate: f64) -> Self {
        Self {
            stats,
            explore: Mutex::new(ExploreState {
                rate: exploration_rate.clamp(0.0, 1.0),
                rng: StdRng::from_entropy(),
            }),
        }
    }

    /// Create a selector with a fixed seed (for reproducibility in tests)
    pub fn with_seed(stats: ArmStatsTable, exploration_rate: f64, seed: u64) -> Self {
        Self {
            stats,
            explore: Mutex::new(ExploreState {
                rate: exploration_rate.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    /// The shared statistics table this selector reads from
    pub fn stats(&self) -> &ArmStatsTable {
        &self.stats
    }

    /// Current epsilon-greedy rate
    pub fn exploration_rate(&self) -> f64 {
        self.explore.lock().expect("selector rng poisoned").rate
    }

    /// Decay the epsilon-greedy rate toward a floor. Called once per
    /// recorded outcome so exploration tapers as evidence accumulates.
    pub fn decay_exploration(&self, decay: f64, floor: f64) {
        let mut explore = self.explore.lock().expect("selector rng poisoned");
        explore.rate = (explore.rate * decay).max(floor);
    }

    /// Select an arm among the candidates. Returns `None` for an empty
    /// candidate set; the dispatcher turns that into the emergency path.
    pub async fn select(&self, candidates: &[ArmKey]) -> Option<Selection> {
        if candidates.is_empty() {
            return None;
        }

        let snapshot = self.stats.snapshot_for(candidates).await;

        // Forced exploration is unconditional: a never-pulled arm wins
        // outright, ahead of the epsilon draw, so every candidate has at
        // least one pull after N selections.
        if let Some(index) = snapshot.iter().position(|s| s.pulls == 0) {
            debug!(arm = %candidates[index], "Forced exploration of never-pulled arm");
            return Some(Selection {
                index,
                arm: candidates[index].clone(),
                score: f64::INFINITY,
                exploratory: true,
            });
        }

        // Epsilon-greedy floor: even a well-explored arm set keeps a
        // configured chance of a uniform draw.
        {
            let mut explore = self.explore.lock().expect("selector rng poisoned");
            if explore.rate > 0.0 && explore.rng.gen_range(0.0..1.0) < explore.rate {
                let index = explore.rng.gen_range(0..candidates.len());
                debug!(arm = %candidates[index], "Epsilon-greedy exploration draw");
                return Some(Selection {
                    index,
                    arm: candidates[index].clone(),
                    score: snapshot[index].mean_reward,
                    exploratory: true,
                });
            }
        }

        Some(Self::ucb_argmax(candidates, &snapshot))
    }

    /// Pure UCB1 argmax over a statistics snapshot where every arm has at
    /// least one pull
    fn ucb_argmax(candidates: &[ArmKey], snapshot: &[ArmStatistics]) -> Selection {
        let total_pulls: u64 = snapshot.iter().map(|s| s.pulls).sum();
        let ln_total = (total_pulls as f64).ln();

        let mut best_index = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (index, stats) in snapshot.iter().enumerate() {
            let score = stats.mean_reward + (2.0 * ln_total / stats.pulls as f64).sqrt();
            // Strict comparison keeps ties on the lowest index.
            if score > best_score {
                best_score = score;
                best_index = index;
            }
        }

        Selection {
            index: best_index,
            arm: candidates[best_index].clone(),
            score: best_score,
            exploratory: false,
        }
    }
}

//! Bandit-driven arm selection
//!
//! The selector chooses which (agent, model) arm handles a task, using
//! observed rewards to improve future choices:
//!
//! - **UCB1 policy**: deterministic upper-confidence-bound comparison with
//!   forced exploration of never-pulled arms and an optional epsilon-greedy
//!   floor (`exploration_rate`).
//!
//! - **Shared statistics table**: one `ArmStatistics` entry per arm, written
//!   by the reward recorder under a short lock and read by the selector as a
//!   snapshot, so selection never blocks task completions.
//!
//! - **Selector store**: SQLite persistence for learning across sessions.

mod bandit;
mod store;
mod types;

pub use bandit::{Selection, UcbSelector};
pub use store::{CREATE_ARM_STATS_TABLE_SQL, SelectorStore};
pub use types::{ArmKey, ArmStatistics, ArmStatsTable};

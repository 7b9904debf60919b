//! Reward and replay recording
//!
//! Converts task outcomes (success flag, latency, optional human rating)
//! into scalar rewards and updates the selector's arm statistics:
//!
//! - **Composite reward**: success indicator, normalized speed, and human
//!   rating, combined under configurable weights. The rating contributes
//!   nothing until feedback arrives, at which point the arm is corrected by
//!   the rating delta alone without consuming a second pull.
//!
//! - **Replay buffer**: a bounded ring of recent task records for inspection
//!   and retroactive feedback. Evicting the oldest record is the only
//!   deletion path; long-term retention belongs to external collaborators.

mod record;
mod recorder;

pub use record::{TaskOutcome, TaskRecord, TaskState};
pub use recorder::RewardRecorder;

//! Vidya Core Library
//!
//! This crate provides the adaptive routing and knowledge-retrieval engine,
//! including:
//! - Capability registry (agent descriptors, health probing)
//! - Bandit selector (UCB1 arm selection, persisted statistics)
//! - Retrieval cascade (tiered fan-out, weighted merge, escalation)
//! - Dispatcher and fallback chain (retry, secondary arm, emergency response)
//! - Reward and replay recorder (composite rewards, feedback channel)

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod registry;
pub mod retrieval;
pub mod reward;
pub mod routing;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::dispatch::DispatchResponse;
    pub use crate::engine::{Engine, EngineBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::registry::{AgentDescriptor, InputType};
    pub use crate::retrieval::{KnowledgeSourceDescriptor, RetrievedItem, Tier};
    pub use crate::routing::{ArmKey, ArmStatistics};
}

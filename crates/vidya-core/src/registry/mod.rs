//! Capability Registry
//!
//! Catalog of the agents the engine can dispatch to. Descriptors are loaded
//! at configuration time and are never deleted at runtime; health-check
//! results are the only mutation path (agents are marked unavailable, not
//! removed). Lookup filters by accepted input type and ranks candidates by
//! tag overlap with the request, then declared priority.

mod prober;

pub use prober::{AgentProbe, HealthProber};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Health of an agent as observed by the prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    #[default]
    Healthy,
    Degraded,
    Unavailable,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Input types an agent can accept
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    #[default]
    Text,
    Pdf,
    Image,
    Audio,
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Pdf => write!(f, "pdf"),
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

impl std::str::FromStr for InputType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "pdf" => Ok(Self::Pdf),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            _ => Err(format!("Unknown input type: {}", s)),
        }
    }
}

/// How to reach an agent. Opaque to the core: the dispatcher hands it to a
/// transport adapter and does not interpret it further.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ConnectionDescriptor {
    /// Handler registered in-process on the agent client
    #[default]
    InProcess,
    /// Remote agent reachable over HTTP
    Http { endpoint: String },
}

/// Descriptor for a registered agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Agent identifier (e.g., "knowledge")
    pub id: String,
    /// Capability tags (e.g., "summarize", "semantic_search")
    pub tags: BTreeSet<String>,
    /// Input types this agent accepts
    pub input_types: BTreeSet<InputType>,
    /// Models the agent can run; each (agent, model) pair is a selector arm
    pub models: Vec<String>,
    /// Declared priority used as a ranking tie-break (0.0 to 1.0)
    pub priority: f64,
    /// Whether tasks routed here should be enriched by the retrieval cascade
    pub needs_retrieval: bool,
    /// Current health, mutated only by health-check results
    #[serde(default)]
    pub health: Health,
    /// Transport descriptor, opaque to the core
    #[serde(default)]
    pub connection: ConnectionDescriptor,
}

impl AgentDescriptor {
    /// Create a descriptor with defaults: text input, one "default" model,
    /// in-process transport.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tags: BTreeSet::new(),
            input_types: BTreeSet::from([InputType::Text]),
            models: vec!["default".to_string()],
            priority: 0.5,
            needs_retrieval: false,
            health: Health::Healthy,
            connection: ConnectionDescriptor::InProcess,
        }
    }

    /// Set capability tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set accepted input types
    pub fn with_input_types(mut self, types: impl IntoIterator<Item = InputType>) -> Self {
        self.input_types = types.into_iter().collect();
        self
    }

    /// Set the models this agent can run
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Set the transport descriptor
    pub fn with_connection(mut self, connection: ConnectionDescriptor) -> Self {
        self.connection = connection;
        self
    }

    /// Set the declared priority
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority.clamp(0.0, 1.0);
        self
    }

    /// Mark this agent as knowledge-seeking
    pub fn with_retrieval(mut self, needs_retrieval: bool) -> Self {
        self.needs_retrieval = needs_retrieval;
        self
    }

    /// Number of requested tags present in this agent's capability tags
    fn tag_overlap(&self, requested: &[String]) -> usize {
        requested.iter().filter(|t| self.tags.contains(*t)).count()
    }
}

/// Registry of agent descriptors with health tracking
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    agents: RwLock<BTreeMap<String, AgentDescriptor>>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with descriptors
    pub async fn with_agents(descriptors: impl IntoIterator<Item = AgentDescriptor>) -> Self {
        let registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor).await;
        }
        registry
    }

    /// Register an agent descriptor. Re-registering an id replaces the
    /// previous descriptor.
    pub async fn register(&self, descriptor: AgentDescriptor) {
        info!(agent = %descriptor.id, tags = ?descriptor.tags, "Registered agent");
        self.agents
            .write()
            .await
            .insert(descriptor.id.clone(), descriptor);
    }

    /// Look up candidate agents for a request.
    ///
    /// Candidates must accept `input_type` and not be marked unavailable.
    /// Matches are ordered by tag-overlap count with `tags` (descending),
    /// then declared priority (descending), then id (ascending) so the
    /// ordering is deterministic. An empty result is a configuration error,
    /// not something to retry.
    pub async fn lookup(&self, tags: &[String], input_type: InputType) -> Result<Vec<AgentDescriptor>> {
        let agents = self.agents.read().await;

        let mut matches: Vec<&AgentDescriptor> = agents
            .values()
            .filter(|a| a.health != Health::Unavailable && a.input_types.contains(&input_type))
            .collect();

        if matches.is_empty() {
            return Err(Error::NoCandidate {
                input_type: input_type.to_string(),
                tags: tags.to_vec(),
            });
        }

        matches.sort_by(|a, b| {
            b.tag_overlap(tags)
                .cmp(&a.tag_overlap(tags))
                .then_with(|| b.priority.total_cmp(&a.priority))
                .then_with(|| a.id.cmp(&b.id))
        });

        debug!(
            input_type = %input_type,
            candidates = matches.len(),
            "Resolved candidate agents"
        );

        Ok(matches.into_iter().cloned().collect())
    }

    /// Get a descriptor by id
    pub async fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// Update the health of an agent. Called by the health prober; all other
    /// components treat health as read-only.
    pub async fn mark_health(&self, agent_id: &str, health: Health) -> Result<()> {
        let mut agents = self.agents.write().await;
        let descriptor = agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;

        if descriptor.health != health {
            info!(agent = %agent_id, from = %descriptor.health, to = %health, "Agent health changed");
        }
        descriptor.health = health;
        Ok(())
    }

    /// Snapshot of all registered descriptors
    pub async fn all(&self) -> Vec<AgentDescriptor> {
        self.agents.read().await.values().cloned().collect()
    }
}

//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::registry::{AgentDescriptor, InputType};
use crate::retrieval::{KnowledgeSourceDescriptor, Tier};

/// Vidya configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub routing: RoutingConfig,
    pub retrieval: RetrievalConfig,
    pub dispatch: DispatchConfig,
    /// Agent descriptors loaded into the capability registry at startup
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentDescriptor>,
    /// Knowledge sources available to the retrieval cascade
    #[serde(default = "default_sources")]
    pub sources: Vec<KnowledgeSourceDescriptor>,
}

/// Selector and reward tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Probability of a uniform epsilon-greedy draw per selection.
    /// Guarantees a floor of exploration even after many pulls.
    pub exploration_rate: f64,
    /// Lower bound the exploration rate may decay to
    pub min_exploration_rate: f64,
    /// Multiplicative decay applied per recorded outcome
    pub exploration_decay: f64,
    /// Whether arm statistics are persisted across sessions
    pub persist_stats: bool,
    /// Latency at or above which the speed term of the reward reaches zero
    pub latency_ceiling_ms: u64,
    /// Capacity of the replay ring buffer of recent task records
    pub replay_capacity: usize,
    /// Reward composition weights
    pub reward: RewardWeights,
}

/// Weights of the composite reward:
/// `reward = success * w_success + speed * w_speed + rating * w_rating`.
///
/// The defaults keep the success term dominant so a failed task can never
/// out-score a successful one on speed alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardWeights {
    pub success: f64,
    pub speed: f64,
    pub rating: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            success: 1.0,
            speed: 0.5,
            rating: 0.5,
        }
    }
}

/// Retrieval cascade tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Result cap for merged cascade output
    pub top_k: usize,
    /// Minimum best weighted score that stops escalation
    pub confidence_threshold: f64,
    /// Timeout applied to each knowledge-source call
    pub per_source_timeout_ms: u64,
    /// Margin added on top of the per-source timeout for the per-tier deadline
    pub tier_margin_ms: u64,
}

/// Dispatcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Timeout for a single agent invocation
    pub agent_timeout_secs: u64,
    /// Retries after an invocation timeout (timeouts only; application
    /// errors move straight to the secondary arm)
    pub timeout_retries: u32,
    /// Backoff between a timeout and its retry
    pub retry_backoff_ms: u64,
    /// Global per-task deadline; on expiry all outstanding calls are
    /// abandoned and the emergency response is returned
    pub task_deadline_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routing: RoutingConfig {
                exploration_rate: 0.2,
                min_exploration_rate: 0.05,
                exploration_decay: 0.995,
                persist_stats: true,
                latency_ceiling_ms: 10_000,
                replay_capacity: 1000,
                reward: RewardWeights::default(),
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                confidence_threshold: 0.3,
                per_source_timeout_ms: 1_000,
                tier_margin_ms: 250,
            },
            dispatch: DispatchConfig {
                agent_timeout_secs: 120,
                timeout_retries: 1,
                retry_backoff_ms: 200,
                task_deadline_secs: 300,
            },
            agents: default_agents(),
            sources: default_sources(),
        }
    }
}

fn default_agents() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new("mentor")
            .with_tags(["summarize", "text"])
            .with_input_types([InputType::Text, InputType::Pdf])
            .with_models(["llama-3.1-8b-instant", "llama-3.3-70b-versatile"])
            .with_priority(0.8),
        AgentDescriptor::new("archive")
            .with_tags(["archive", "search", "pdf"])
            .with_input_types([InputType::Text, InputType::Pdf])
            .with_models(["llama-3.1-8b-instant"])
            .with_priority(0.7),
        AgentDescriptor::new("knowledge")
            .with_tags(["semantic_search", "search", "qna"])
            .with_models(["llama-3.1-8b-instant", "llama-3.3-70b-versatile"])
            .with_priority(0.9)
            .with_retrieval(true),
    ]
}

fn default_sources() -> Vec<KnowledgeSourceDescriptor> {
    vec![
        KnowledgeSourceDescriptor::new("vector_new", Tier::Vector, 1.0),
        KnowledgeSourceDescriptor::new("vector_fourth", Tier::Vector, 0.9),
        KnowledgeSourceDescriptor::new("vector_data", Tier::Vector, 0.8),
        KnowledgeSourceDescriptor::new("vector_legacy", Tier::Alternate, 0.7),
        KnowledgeSourceDescriptor::new("local_index", Tier::LocalIndex, 0.6),
        KnowledgeSourceDescriptor::new("keyword_scan", Tier::Keyword, 0.5),
    ]
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("VIDYA_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("vidya")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate parameter ranges
    pub fn validate(&self) -> anyhow::Result<()> {
        let r = &self.routing;
        if !(0.0..=1.0).contains(&r.exploration_rate) {
            return Err(anyhow!("routing.exploration_rate must be in [0, 1]"));
        }
        if r.min_exploration_rate > r.exploration_rate {
            return Err(anyhow!(
                "routing.min_exploration_rate must not exceed routing.exploration_rate"
            ));
        }
        if !(0.0..=1.0).contains(&r.exploration_decay) || r.exploration_decay == 0.0 {
            return Err(anyhow!("routing.exploration_decay must be in (0, 1]"));
        }
        if r.reward.success <= 0.0 || r.reward.speed < 0.0 || r.reward.rating < 0.0 {
            return Err(anyhow!(
                "routing.reward weights must be non-negative with success > 0"
            ));
        }
        if r.replay_capacity == 0 {
            return Err(anyhow!("routing.replay_capacity must be positive"));
        }

        let rt = &self.retrieval;
        if !(0.0..=1.0).contains(&rt.confidence_threshold) {
            return Err(anyhow!("retrieval.confidence_threshold must be in [0, 1]"));
        }
        if rt.top_k == 0 {
            return Err(anyhow!("retrieval.top_k must be positive"));
        }

        for source in &self.sources {
            if !(0.0..=1.0).contains(&source.weight) {
                return Err(anyhow!(
                    "source '{}' weight must be in [0, 1]",
                    source.id
                ));
            }
        }

        Ok(())
    }
}

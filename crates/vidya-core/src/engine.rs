//! Engine service object
//!
//! Owns the registry, selector, cascade, and recorder behind one explicit
//! construction/teardown lifecycle. Callers get the narrow surface of
//! `dispatch`, `record_feedback`, and `arm_statistics`; nothing is reachable
//! through ambient global state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::{AgentClient, AgentHandler, AgentInvoker, DispatchResponse, Dispatcher};
use crate::error::Result;
use crate::registry::{CapabilityRegistry, HealthProber, InputType};
use crate::retrieval::{KnowledgeSource, KnowledgeSourceDescriptor, RetrievalCascade};
use crate::reward::{RewardRecorder, TaskRecord};
use crate::routing::{ArmKey, ArmStatistics, ArmStatsTable, SelectorStore, UcbSelector};

/// Builder for the engine
pub struct EngineBuilder {
    config: Config,
    handlers: Vec<(String, Arc<dyn AgentHandler>)>,
    sources: Vec<(KnowledgeSourceDescriptor, Arc<dyn KnowledgeSource>)>,
    invoker: Option<Arc<dyn AgentInvoker>>,
    store: Option<SelectorStore>,
    selector_seed: Option<u64>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            handlers: Vec::new(),
            sources: Vec::new(),
            invoker: None,
            store: None,
            selector_seed: None,
        }
    }

    /// Register an in-process handler for one of the configured agents
    pub fn with_handler(mut self, agent_id: impl Into<String>, handler: Arc<dyn AgentHandler>) -> Self {
        self.handlers.push((agent_id.into(), handler));
        self
    }

    /// Attach a knowledge-source backend for the retrieval cascade
    pub fn with_source(
        mut self,
        descriptor: KnowledgeSourceDescriptor,
        backend: Arc<dyn KnowledgeSource>,
    ) -> Self {
        self.sources.push((descriptor, backend));
        self
    }

    /// Replace the transport client with a custom invoker. Registered
    /// in-process handlers and health probing are ignored in that case.
    pub fn with_invoker(mut self, invoker: Arc<dyn AgentInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Attach a store so arm statistics survive restarts
    pub fn with_store(mut self, store: SelectorStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Fix the selector's epsilon-draw seed (for reproducibility)
    pub fn with_selector_seed(mut self, seed: u64) -> Self {
        self.selector_seed = Some(seed);
        self
    }

    pub async fn build(self) -> Engine {
        let registry = Arc::new(CapabilityRegistry::with_agents(self.config.agents.clone()).await);

        let stats = ArmStatsTable::new();
        let selector = Arc::new(match self.selector_seed {
            Some(seed) => {
                UcbSelector::with_seed(stats.clone(), self.config.routing.exploration_rate, seed)
            }
            None => UcbSelector::new(stats.clone(), self.config.routing.exploration_rate),
        });

        let mut cascade = RetrievalCascade::new(self.config.retrieval.clone());
        for (descriptor, backend) in self.sources {
            cascade.add_source(descriptor, backend);
        }
        let cascade = Arc::new(cascade);

        let recorder = Arc::new(RewardRecorder::new(
            stats,
            self.config.routing.reward.clone(),
            self.config.routing.latency_ceiling_ms,
            self.config.routing.replay_capacity,
        ));

        let (invoker, probe): (Arc<dyn AgentInvoker>, Option<Arc<AgentClient>>) =
            match self.invoker {
                Some(invoker) => (invoker, None),
                None => {
                    let mut client = AgentClient::new();
                    for (agent_id, handler) in self.handlers {
                        client = client.with_handler(agent_id, handler);
                    }
                    let client = Arc::new(client);
                    (client.clone(), Some(client))
                }
            };

        let dispatcher = Dispatcher::new(
            registry.clone(),
            selector.clone(),
            cascade.clone(),
            invoker,
            recorder.clone(),
            self.config.dispatch.clone(),
        );

        info!(
            agents = registry.all().await.len(),
            sources = cascade.source_descriptors().len(),
            "Engine built"
        );

        Engine {
            config: self.config,
            registry,
            selector,
            cascade,
            recorder,
            dispatcher,
            store: self.store,
            probe,
        }
    }
}

/// The adaptive routing and knowledge-retrieval engine
pub struct Engine {
    config: Config,
    registry: Arc<CapabilityRegistry>,
    selector: Arc<UcbSelector>,
    cascade: Arc<RetrievalCascade>,
    recorder: Arc<RewardRecorder>,
    dispatcher: Dispatcher,
    store: Option<SelectorStore>,
    probe: Option<Arc<AgentClient>>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Execute a task under a fresh task id
    pub async fn dispatch(
        &self,
        input: &str,
        input_type: InputType,
        tags: &[String],
    ) -> DispatchResponse {
        let task_id = Uuid::new_v4().to_string();
        self.dispatch_with_id(&task_id, input, input_type, tags).await
    }

    /// Execute a task under a caller-supplied task id. Always returns a
    /// response; total exhaustion yields the emergency response.
    pub async fn dispatch_with_id(
        &self,
        task_id: &str,
        input: &str,
        input_type: InputType,
        tags: &[String],
    ) -> DispatchResponse {
        let response = self.dispatcher.dispatch(task_id, input, input_type, tags).await;
        self.selector.decay_exploration(
            self.config.routing.exploration_decay,
            self.config.routing.min_exploration_rate,
        );
        response
    }

    /// Apply a human rating to a completed task, exactly once per task id
    pub async fn record_feedback(&self, task_id: &str, rating: f64) -> Result<f64> {
        self.recorder.record_feedback(task_id, rating).await
    }

    /// Read-only snapshot of every arm's statistics
    pub async fn arm_statistics(&self) -> HashMap<ArmKey, ArmStatistics> {
        self.selector.stats().snapshot().await
    }

    /// Recently completed task records, oldest first
    pub async fn recent_tasks(&self) -> Vec<TaskRecord> {
        self.recorder.recent().await
    }

    /// The capability registry (for health marks and introspection)
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// The retrieval cascade (for source health marks and introspection)
    pub fn cascade(&self) -> &Arc<RetrievalCascade> {
        &self.cascade
    }

    /// Build the periodic agent health prober. Unavailable when a custom
    /// invoker replaced the built-in transport client.
    pub fn health_prober(&self, interval: Duration) -> Option<HealthProber> {
        let probe = self.probe.clone()?;
        Some(HealthProber::new(self.registry.clone(), probe, interval))
    }

    /// Load persisted arm statistics into the selector, replacing the
    /// in-memory table. No-op without a store or when persistence is off.
    pub async fn load_stats(&self) -> Result<()> {
        if !self.config.routing.persist_stats {
            return Ok(());
        }
        if let Some(store) = &self.store {
            store.init().await?;
            let stats = store.load_all_stats().await?;
            info!(arms = stats.len(), "Loaded arm statistics");
            self.selector.stats().import(stats).await;
        }
        Ok(())
    }

    /// Persist the current arm statistics. No-op without a store or when
    /// persistence is off.
    pub async fn save_stats(&self) -> Result<()> {
        if !self.config.routing.persist_stats {
            return Ok(());
        }
        if let Some(store) = &self.store {
            store.init().await?;
            let stats = self.selector.stats().snapshot().await;
            store.save_all_stats(&stats).await?;
        }
        Ok(())
    }
}

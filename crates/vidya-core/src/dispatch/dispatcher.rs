//! Task dispatch and the fallback chain
//!
//! Executes a task end to end: candidate lookup, bandit selection, optional
//! retrieval enrichment, bounded invocation with one retry on timeout, then
//! a single escalation to the next-best arm. Dispatch is total: when the
//! secondary also fails it returns the deterministic emergency response with
//! `degraded = true` instead of surfacing an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::error::Error;
use crate::registry::{AgentDescriptor, CapabilityRegistry, InputType};
use crate::retrieval::{RetrievalCascade, RetrievalOutcome, RetrievedItem};
use crate::reward::{RewardRecorder, TaskOutcome};
use crate::routing::{ArmKey, UcbSelector};

use super::invoker::{AgentInvoker, InvokeRequest};

/// Deterministic output of the emergency path; no external call is made.
const EMERGENCY_OUTPUT: &str =
    "Service is temporarily degraded: no processing agent could complete this \
     request. Please try again shortly.";

/// Terminal result of one dispatched task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub task_id: String,
    pub agent_used: String,
    pub model_used: String,
    pub output: String,
    /// Best retrieval score when the cascade ran, otherwise agent-reported
    /// or 1.0 for a plain success; 0.0 on the emergency path.
    pub confidence: f64,
    pub latency_ms: u64,
    /// True only for the emergency response
    pub degraded: bool,
    /// Snippets the cascade supplied to the agent, for presentation
    pub retrieved: Vec<RetrievedItem>,
    /// True when the cascade exhausted every tier below threshold
    pub low_confidence: bool,
}

/// Dispatcher owning the fallback chain
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    selector: Arc<UcbSelector>,
    cascade: Arc<RetrievalCascade>,
    invoker: Arc<dyn AgentInvoker>,
    recorder: Arc<RewardRecorder>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        selector: Arc<UcbSelector>,
        cascade: Arc<RetrievalCascade>,
        invoker: Arc<dyn AgentInvoker>,
        recorder: Arc<RewardRecorder>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            selector,
            cascade,
            invoker,
            recorder,
            config,
        }
    }

    /// Execute a task. Always returns a response; the all-agents-failed case
    /// is the emergency response, not an error.
    pub async fn dispatch(
        &self,
        task_id: &str,
        input: &str,
        input_type: InputType,
        tags: &[String],
    ) -> DispatchResponse {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.task_deadline_secs);

        let candidates = match self.registry.lookup(tags, input_type).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(task_id, code = e.code(), error = %e, "Dispatch has no candidate agent");
                return self
                    .terminate_degraded(task_id, input, None, TaskOutcome::Failed, started)
                    .await;
            }
        };

        let by_id: HashMap<String, AgentDescriptor> = candidates
            .iter()
            .map(|a| (a.id.clone(), a.clone()))
            .collect();

        // One arm per (agent, model) pair, in candidate order so forced
        // exploration follows the registry's ranking.
        let mut arms: Vec<ArmKey> = candidates
            .iter()
            .flat_map(|a| a.models.iter().map(|m| ArmKey::new(&a.id, m)))
            .collect();

        let mut first_attempted: Option<ArmKey> = None;
        let mut last_outcome = TaskOutcome::Failed;
        let mut attempted_arms = 0;

        // The chain is exactly primary then secondary; a second failure
        // terminates on the emergency response.
        while attempted_arms < 2 {
            let Some(selection) = self.selector.select(&arms).await else {
                break;
            };

            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                warn!(task_id, "Task deadline reached, abandoning fallback chain");
                last_outcome = TaskOutcome::TimedOut;
                break;
            }

            let arm = selection.arm.clone();
            arms.remove(selection.index);
            first_attempted.get_or_insert_with(|| arm.clone());

            // lookup() produced the arm, so the descriptor is present.
            let Some(descriptor) = by_id.get(&arm.agent_id) else {
                continue;
            };
            attempted_arms += 1;

            debug!(task_id, arm = %arm, exploratory = selection.exploratory, "Selected arm");

            // Retrieval runs under the remaining task deadline so a stalled
            // cascade cannot outlive the global budget.
            let retrieval = if descriptor.needs_retrieval {
                let query = self.cascade.retrieve(input, self.cascade.top_k());
                match tokio::time::timeout(remaining, query).await {
                    Ok(outcome) => Some(outcome),
                    Err(_) => {
                        warn!(task_id, "Task deadline reached during retrieval");
                        last_outcome = TaskOutcome::TimedOut;
                        break;
                    }
                }
            } else {
                None
            };

            match self
                .attempt(task_id, input, input_type, &arm, descriptor, &retrieval, started, deadline)
                .await
            {
                Ok(response) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.recorder
                        .record_outcome(task_id, input, arm.clone(), TaskOutcome::Succeeded, latency_ms)
                        .await;
                    info!(task_id, arm = %arm, latency_ms, "Task dispatched successfully");
                    return response;
                }
                Err(e) => {
                    warn!(task_id, arm = %arm, code = e.code(), error = %e, "Arm failed, escalating");
                    last_outcome = match e {
                        Error::AgentTimeout(_) => TaskOutcome::TimedOut,
                        _ => TaskOutcome::Failed,
                    };
                }
            }
        }

        self.terminate_degraded(task_id, input, first_attempted, last_outcome, started)
            .await
    }

    /// Invoke one arm with the per-call timeout, retrying once on timeout
    /// only. Application-level failures move straight to the next arm.
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        task_id: &str,
        input: &str,
        input_type: InputType,
        arm: &ArmKey,
        descriptor: &AgentDescriptor,
        retrieval: &Option<RetrievalOutcome>,
        started: Instant,
        deadline: Duration,
    ) -> crate::error::Result<DispatchResponse> {
        let context: Vec<String> = retrieval
            .as_ref()
            .map(|r| r.items.iter().map(|i| i.content.clone()).collect())
            .unwrap_or_default();

        let request = InvokeRequest {
            agent_id: arm.agent_id.clone(),
            model_id: arm.model_id.clone(),
            input: input.to_string(),
            input_type,
            context,
        };

        let agent_timeout = Duration::from_secs(self.config.agent_timeout_secs);
        let mut timeouts_left = self.config.timeout_retries;

        loop {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(Error::AgentTimeout(arm.agent_id.clone()));
            }
            let per_call = agent_timeout.min(remaining);

            match self
                .invoker
                .invoke(descriptor, request.clone(), per_call)
                .await
            {
                Ok(reply) => {
                    let confidence = match retrieval {
                        Some(r) => r.best_score,
                        None => reply.confidence.unwrap_or(1.0),
                    };
                    return Ok(DispatchResponse {
                        task_id: task_id.to_string(),
                        agent_used: arm.agent_id.clone(),
                        model_used: arm.model_id.clone(),
                        output: reply.output,
                        confidence,
                        latency_ms: started.elapsed().as_millis() as u64,
                        degraded: false,
                        retrieved: retrieval
                            .as_ref()
                            .map(|r| r.items.clone())
                            .unwrap_or_default(),
                        low_confidence: retrieval
                            .as_ref()
                            .map(|r| r.low_confidence)
                            .unwrap_or(false),
                    });
                }
                Err(Error::AgentTimeout(agent_id)) if timeouts_left > 0 => {
                    timeouts_left -= 1;
                    warn!(task_id, agent = %agent_id, "Invocation timed out, retrying once");
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Terminal emergency path: record the outcome and return the canned
    /// degraded response. The record is attributed to the first attempted
    /// arm so the selector still learns from the failure; when no arm was
    /// ever attempted the emergency sentinel is used and statistics are
    /// left untouched.
    async fn terminate_degraded(
        &self,
        task_id: &str,
        input: &str,
        attempted: Option<ArmKey>,
        outcome: TaskOutcome,
        started: Instant,
    ) -> DispatchResponse {
        let latency_ms = started.elapsed().as_millis() as u64;
        let arm = attempted.unwrap_or_else(ArmKey::emergency);
        self.recorder
            .record_outcome(task_id, input, arm, outcome, latency_ms)
            .await;

        error!(task_id, outcome = %outcome, latency_ms, "Returning emergency response");
        DispatchResponse {
            task_id: task_id.to_string(),
            agent_used: "emergency".to_string(),
            model_used: "none".to_string(),
            output: EMERGENCY_OUTPUT.to_string(),
            confidence: 0.0,
            latency_ms,
            degraded: true,
            retrieved: Vec::new(),
            low_confidence: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::{RetrievalConfig, RewardWeights};
    use crate::dispatch::invoker::AgentReply;
    use crate::registry::Health;
    use crate::retrieval::{KnowledgeSource, KnowledgeSourceDescriptor, RawHit, Tier};
    use crate::routing::ArmStatsTable;

    use super::*;

    /// Invoker scripted per agent id: "ok" succeeds, "flaky" times out,
    /// anything else reports an application failure.
    struct ScriptedInvoker {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            descriptor: &AgentDescriptor,
            request: InvokeRequest,
            _timeout: Duration,
        ) -> crate::error::Result<AgentReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match descriptor.id.as_str() {
                "ok" => Ok(AgentReply {
                    output: format!("handled: {}", request.input),
                    confidence: Some(0.95),
                }),
                "flaky" => Err(Error::AgentTimeout(descriptor.id.clone())),
                _ => Err(Error::AgentApplication {
                    agent_id: descriptor.id.clone(),
                    message: "boom".to_string(),
                }),
            }
        }
    }

    struct StaticSource(Vec<RawHit>);

    #[async_trait]
    impl KnowledgeSource for StaticSource {
        async fn search(
            &self,
            _query: &str,
            top_k: usize,
            _timeout: Duration,
        ) -> crate::error::Result<Vec<RawHit>> {
            Ok(self.0.iter().take(top_k).cloned().collect())
        }
    }

    fn dispatch_config() -> DispatchConfig {
        DispatchConfig {
            agent_timeout_secs: 5,
            timeout_retries: 1,
            retry_backoff_ms: 0,
            task_deadline_secs: 30,
        }
    }

    async fn build_dispatcher(
        agents: Vec<AgentDescriptor>,
        cascade: RetrievalCascade,
    ) -> (Dispatcher, Arc<RewardRecorder>, Arc<ScriptedInvoker>) {
        let registry = Arc::new(CapabilityRegistry::with_agents(agents).await);
        let stats = ArmStatsTable::new();
        let selector = Arc::new(UcbSelector::with_seed(stats.clone(), 0.0, 7));
        let recorder = Arc::new(RewardRecorder::new(
            stats,
            RewardWeights::default(),
            10_000,
            100,
        ));
        let invoker = Arc::new(ScriptedInvoker {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(
            registry,
            selector,
            Arc::new(cascade),
            invoker.clone(),
            recorder.clone(),
            dispatch_config(),
        );
        (dispatcher, recorder, invoker)
    }

    fn empty_cascade() -> RetrievalCascade {
        RetrievalCascade::new(RetrievalConfig {
            top_k: 5,
            confidence_threshold: 0.3,
            per_source_timeout_ms: 500,
            tier_margin_ms: 100,
        })
    }

    #[tokio::test]
    async fn test_successful_dispatch_records_outcome() {
        let (dispatcher, recorder, _) =
            build_dispatcher(vec![AgentDescriptor::new("ok")], empty_cascade()).await;

        let response = dispatcher.dispatch("t1", "hello", InputType::Text, &[]).await;

        assert!(!response.degraded);
        assert_eq!(response.agent_used, "ok");
        assert_eq!(response.output, "handled: hello");
        assert!((response.confidence - 0.95).abs() < 1e-9);

        let record = recorder.get("t1").await.unwrap();
        assert_eq!(record.outcome, Some(TaskOutcome::Succeeded));
        assert_eq!(record.arm, ArmKey::new("ok", "default"));
    }

    #[tokio::test]
    async fn test_fallback_to_secondary_on_application_error() {
        // "broken" ranks first on priority; the dispatcher must fall back to
        // "ok" without retrying the broken arm.
        let agents = vec![
            AgentDescriptor::new("broken").with_priority(0.9),
            AgentDescriptor::new("ok").with_priority(0.1),
        ];
        let (dispatcher, recorder, invoker) = build_dispatcher(agents, empty_cascade()).await;

        let response = dispatcher.dispatch("t1", "hello", InputType::Text, &[]).await;

        assert!(!response.degraded);
        assert_eq!(response.agent_used, "ok");
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            recorder.get("t1").await.unwrap().arm,
            ArmKey::new("ok", "default")
        );
    }

    #[tokio::test]
    async fn test_timeout_gets_one_retry_before_fallback() {
        let agents = vec![
            AgentDescriptor::new("flaky").with_priority(0.9),
            AgentDescriptor::new("ok").with_priority(0.1),
        ];
        let (dispatcher, _, invoker) = build_dispatcher(agents, empty_cascade()).await;

        let response = dispatcher.dispatch("t1", "hello", InputType::Text, &[]).await;

        assert_eq!(response.agent_used, "ok");
        // flaky invoked twice (original + retry), then ok once.
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_all_agents_failed_returns_emergency() {
        let agents = vec![
            AgentDescriptor::new("broken").with_priority(0.9),
            AgentDescriptor::new("also-broken").with_priority(0.1),
        ];
        let (dispatcher, recorder, _) = build_dispatcher(agents, empty_cascade()).await;

        let response = dispatcher.dispatch("t1", "hello", InputType::Text, &[]).await;

        assert!(response.degraded);
        assert_eq!(response.agent_used, "emergency");
        assert_eq!(response.confidence, 0.0);

        // The failure is attributed to the first attempted arm so the
        // selector learns to avoid it.
        let record = recorder.get("t1").await.unwrap();
        assert_eq!(record.outcome, Some(TaskOutcome::Failed));
        assert!(!record.arm.is_emergency());
    }

    #[tokio::test]
    async fn test_fallback_chain_stops_after_secondary() {
        // Three failing candidates: only the primary and secondary arms may
        // be invoked before the emergency response.
        let agents = vec![
            AgentDescriptor::new("broken").with_priority(0.9),
            AgentDescriptor::new("also-broken").with_priority(0.5),
            AgentDescriptor::new("still-broken").with_priority(0.1),
        ];
        let (dispatcher, _, invoker) = build_dispatcher(agents, empty_cascade()).await;

        let response = dispatcher.dispatch("t1", "hello", InputType::Text, &[]).await;

        assert!(response.degraded);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_candidates_is_emergency_with_sentinel_arm() {
        let agents = vec![AgentDescriptor::new("ok")];
        let (dispatcher, recorder, _) = build_dispatcher(agents, empty_cascade()).await;

        // No agent accepts audio input.
        let response = dispatcher.dispatch("t1", "hello", InputType::Audio, &[]).await;

        assert!(response.degraded);
        assert!(recorder.get("t1").await.unwrap().arm.is_emergency());
        assert!(recorder.stats().snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_primary_is_skipped_entirely() {
        let agents = vec![
            AgentDescriptor::new("broken").with_priority(0.9),
            AgentDescriptor::new("ok").with_priority(0.1),
        ];
        let (dispatcher, _, invoker) = build_dispatcher(agents, empty_cascade()).await;
        dispatcher
            .registry
            .mark_health("broken", Health::Unavailable)
            .await
            .unwrap();

        let response = dispatcher.dispatch("t1", "hello", InputType::Text, &[]).await;

        assert_eq!(response.agent_used, "ok");
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    }

    struct StalledSource;

    #[async_trait]
    impl KnowledgeSource for StalledSource {
        async fn search(
            &self,
            _query: &str,
            _top_k: usize,
            _timeout: Duration,
        ) -> crate::error::Result<Vec<RawHit>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("the task deadline fires first")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_retrieval_bounded_by_task_deadline() {
        // Per-source timeout far beyond the task deadline: the global budget
        // must cut the cascade off and force the emergency path without ever
        // invoking the agent.
        let mut cascade = RetrievalCascade::new(RetrievalConfig {
            top_k: 5,
            confidence_threshold: 0.3,
            per_source_timeout_ms: 600_000,
            tier_margin_ms: 1_000,
        });
        cascade.add_source(
            KnowledgeSourceDescriptor::new("stalled", Tier::Vector, 1.0),
            Arc::new(StalledSource),
        );

        let registry = Arc::new(
            CapabilityRegistry::with_agents([AgentDescriptor::new("ok").with_retrieval(true)])
                .await,
        );
        let stats = ArmStatsTable::new();
        let selector = Arc::new(UcbSelector::with_seed(stats.clone(), 0.0, 7));
        let recorder = Arc::new(RewardRecorder::new(
            stats,
            RewardWeights::default(),
            10_000,
            100,
        ));
        let invoker = Arc::new(ScriptedInvoker {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(
            registry,
            selector,
            Arc::new(cascade),
            invoker.clone(),
            recorder.clone(),
            DispatchConfig {
                agent_timeout_secs: 5,
                timeout_retries: 1,
                retry_backoff_ms: 0,
                task_deadline_secs: 2,
            },
        );

        let response = dispatcher.dispatch("t1", "question", InputType::Text, &[]).await;

        assert!(response.degraded);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            recorder.get("t1").await.unwrap().outcome,
            Some(TaskOutcome::TimedOut)
        );
    }

    #[tokio::test]
    async fn test_knowledge_agent_gets_retrieval_snippets() {
        let mut cascade = empty_cascade();
        cascade.add_source(
            KnowledgeSourceDescriptor::new("vec", Tier::Vector, 1.0),
            Arc::new(StaticSource(vec![RawHit {
                content: "relevant snippet".to_string(),
                score: 0.8,
            }])),
        );

        let agents = vec![AgentDescriptor::new("ok").with_retrieval(true)];
        let (dispatcher, _, _) = build_dispatcher(agents, cascade).await;

        let response = dispatcher.dispatch("t1", "question", InputType::Text, &[]).await;

        assert_eq!(response.retrieved.len(), 1);
        assert_eq!(response.retrieved[0].content, "relevant snippet");
        // Confidence comes from the cascade's best weighted score.
        assert!((response.confidence - 0.8).abs() < 1e-9);
        assert!(!response.low_confidence);
    }
}

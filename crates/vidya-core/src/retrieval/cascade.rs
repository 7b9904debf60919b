//! Retrieval cascade
//!
//! Fans a query out to every healthy source of a tier in parallel, merges
//! weighted results, and escalates to the next tier while the merged set is
//! empty or its best weighted score sits below the confidence threshold.
//! Tier 4 (keyword scan) is terminal: its output is returned regardless,
//! tagged `low_confidence` when the threshold was never met.
//!
//! Per-source failures are absorbed: a failing source contributes zero items
//! for the round and is marked degraded until a probe restores it. Items from
//! earlier tiers are never discarded on escalation; a low-confidence tier-1
//! hit may still outrank anything tier 2 produces.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;

use super::source::KnowledgeSource;
use super::types::{KnowledgeSourceDescriptor, RetrievalOutcome, RetrievedItem, Tier};

struct SourceHandle {
    descriptor: KnowledgeSourceDescriptor,
    healthy: AtomicBool,
    backend: Arc<dyn KnowledgeSource>,
}

/// Multi-tier retrieval cascade over a configured set of knowledge sources
pub struct RetrievalCascade {
    config: RetrievalConfig,
    sources: Vec<SourceHandle>,
}

impl RetrievalCascade {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
        }
    }

    /// Attach a source backend under a descriptor. Source order within a tier
    /// determines insertion order in the merge, so it is part of the
    /// deterministic-output contract.
    pub fn add_source(
        &mut self,
        descriptor: KnowledgeSourceDescriptor,
        backend: Arc<dyn KnowledgeSource>,
    ) {
        let healthy = descriptor.healthy;
        self.sources.push(SourceHandle {
            descriptor,
            healthy: AtomicBool::new(healthy),
            backend,
        });
    }

    /// Update a source's health flag. Called by periodic probes; the cascade
    /// itself only ever downgrades the flag on observed failures.
    pub fn mark_source_health(&self, source_id: &str, healthy: bool) {
        for handle in &self.sources {
            if handle.descriptor.id == source_id {
                handle.healthy.store(healthy, Ordering::Relaxed);
            }
        }
    }

    /// Snapshot of configured source descriptors with current health
    pub fn source_descriptors(&self) -> Vec<KnowledgeSourceDescriptor> {
        self.sources
            .iter()
            .map(|h| {
                let mut d = h.descriptor.clone();
                d.healthy = h.healthy.load(Ordering::Relaxed);
                d
            })
            .collect()
    }

    /// Configured default result cap
    pub fn top_k(&self) -> usize {
        self.config.top_k
    }

    /// Run the cascade for a query, returning up to `top_k` merged items.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> RetrievalOutcome {
        let per_source = Duration::from_millis(self.config.per_source_timeout_ms);
        // Overall per-tier deadline: the max of the per-source timeouts plus
        // a small margin. Sources share one timeout, so max == per_source.
        let tier_deadline = per_source + Duration::from_millis(self.config.tier_margin_ms);

        let mut pool: Vec<RetrievedItem> = Vec::new();
        let mut merged: Vec<RetrievedItem> = Vec::new();
        let mut deepest = Tier::Vector;

        for tier in Tier::ALL {
            deepest = tier;
            self.fan_out_tier(tier, query, top_k, per_source, tier_deadline, &mut pool)
                .await;

            merged = merged_top_k(&pool, top_k);
            let best = merged.first().map(|i| i.weighted_score).unwrap_or(0.0);

            if !merged.is_empty() && best >= self.config.confidence_threshold {
                debug!(
                    tier = %tier,
                    best_score = best,
                    items = merged.len(),
                    "Confidence threshold met, stopping escalation"
                );
                return RetrievalOutcome {
                    items: merged,
                    best_score: best,
                    low_confidence: false,
                    deepest_tier: tier,
                };
            }

            if tier.is_terminal() {
                break;
            }
            debug!(tier = %tier, best_score = best, "Escalating to next tier");
        }

        let best = merged.first().map(|i| i.weighted_score).unwrap_or(0.0);
        RetrievalOutcome {
            items: merged,
            best_score: best,
            low_confidence: true,
            deepest_tier: deepest,
        }
    }

    /// Query every healthy source of one tier in parallel and append whatever
    /// responded to the pool, preserving source order.
    async fn fan_out_tier(
        &self,
        tier: Tier,
        query: &str,
        top_k: usize,
        per_source: Duration,
        tier_deadline: Duration,
        pool: &mut Vec<RetrievedItem>,
    ) {
        let active: Vec<&SourceHandle> = self
            .sources
            .iter()
            .filter(|h| h.descriptor.tier == tier && h.healthy.load(Ordering::Relaxed))
            .collect();

        if active.is_empty() {
            return;
        }

        let futures = active.iter().map(|handle| {
            let backend = handle.backend.clone();
            async move { tokio::time::timeout(per_source, backend.search(query, top_k, per_source)).await }
        });

        let results = match tokio::time::timeout(tier_deadline, join_all(futures)).await {
            Ok(results) => results,
            Err(_) => {
                warn!(tier = %tier, "Tier deadline elapsed, continuing with later tiers");
                return;
            }
        };

        for (handle, result) in active.iter().zip(results) {
            match result {
                Ok(Ok(hits)) => {
                    debug!(source = %handle.descriptor.id, hits = hits.len(), "Source responded");
                    pool.extend(
                        hits.into_iter()
                            .map(|hit| RetrievedItem::new(hit, &handle.descriptor)),
                    );
                }
                Ok(Err(e)) => {
                    warn!(source = %handle.descriptor.id, error = %e, "Source failed, marking degraded");
                    handle.healthy.store(false, Ordering::Relaxed);
                }
                Err(_) => {
                    warn!(source = %handle.descriptor.id, "Source timed out, marking degraded");
                    handle.healthy.store(false, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Merge the accumulated pool: dedup by content hash keeping the
/// highest-scored duplicate, stable-sort descending by weighted score with
/// tie-breaks on source weight then insertion order, truncate to `k`.
fn merged_top_k(pool: &[RetrievedItem], k: usize) -> Vec<RetrievedItem> {
    let mut best_idx: HashMap<[u8; 32], usize> = HashMap::new();
    for (idx, item) in pool.iter().enumerate() {
        match best_idx.entry(item.content_hash()) {
            Entry::Occupied(mut entry) => {
                if item.weighted_score > pool[*entry.get()].weighted_score {
                    entry.insert(idx);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(idx);
            }
        }
    }

    let mut kept: Vec<usize> = best_idx.into_values().collect();
    // Restore insertion order so the stable sort below can use it as the
    // final tie-break.
    kept.sort_unstable();

    let mut merged: Vec<RetrievedItem> = kept.into_iter().map(|i| pool[i].clone()).collect();
    merged.sort_by(|a, b| {
        b.weighted_score
            .total_cmp(&a.weighted_score)
            .then_with(|| b.source_weight.total_cmp(&a.source_weight))
    });
    merged.truncate(k);
    merged
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::error::{Error, Result};
    use crate::retrieval::types::RawHit;

    use super::*;

    struct StaticSource {
        hits: Vec<RawHit>,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl StaticSource {
        fn new(hits: Vec<(&str, f64)>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    hits: hits
                        .into_iter()
                        .map(|(content, score)| RawHit {
                            content: content.to_string(),
                            score,
                        })
                        .collect(),
                    calls: calls.clone(),
                    fail: false,
                },
                calls,
            )
        }

        fn failing() -> Self {
            Self {
                hits: Vec::new(),
                calls: Arc::new(AtomicUsize::new(0)),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl KnowledgeSource for StaticSource {
        async fn search(
            &self,
            _query: &str,
            top_k: usize,
            _timeout: Duration,
        ) -> Result<Vec<RawHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::SourceUnavailable {
                    source_id: "failing".to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(self.hits.iter().take(top_k).cloned().collect())
        }
    }

    fn test_config() -> RetrievalConfig {
        RetrievalConfig {
            top_k: 5,
            confidence_threshold: 0.5,
            per_source_timeout_ms: 500,
            tier_margin_ms: 100,
        }
    }

    #[tokio::test]
    async fn test_weighted_merge_picks_expected_top_hit() {
        // Three tier-1 sources with weights [1.0, 0.8, 0.5] returning scores
        // [0.4, 0.9, 0.95]: expected top-1 weighted score is 0.72 from the
        // second source, and with threshold 0.5 tier 2 is never queried.
        let mut cascade = RetrievalCascade::new(test_config());

        let (s1, _) = StaticSource::new(vec![("answer one", 0.4)]);
        let (s2, _) = StaticSource::new(vec![("answer two", 0.9)]);
        let (s3, _) = StaticSource::new(vec![("answer three", 0.95)]);
        let (t2, t2_calls) = StaticSource::new(vec![("tier two answer", 0.99)]);

        cascade.add_source(
            KnowledgeSourceDescriptor::new("s1", Tier::Vector, 1.0),
            Arc::new(s1),
        );
        cascade.add_source(
            KnowledgeSourceDescriptor::new("s2", Tier::Vector, 0.8),
            Arc::new(s2),
        );
        cascade.add_source(
            KnowledgeSourceDescriptor::new("s3", Tier::Vector, 0.5),
            Arc::new(s3),
        );
        cascade.add_source(
            KnowledgeSourceDescriptor::new("t2", Tier::Alternate, 1.0),
            Arc::new(t2),
        );

        let outcome = cascade.retrieve("X", 5).await;

        assert!(!outcome.low_confidence);
        assert_eq!(outcome.deepest_tier, Tier::Vector);
        assert!((outcome.best_score - 0.72).abs() < 1e-9);
        assert_eq!(outcome.items[0].source_id, "s2");
        assert_eq!(t2_calls.load(Ordering::SeqCst), 0, "tier 2 must not be queried");
    }

    #[tokio::test]
    async fn test_escalation_keeps_earlier_tier_items() {
        let mut cascade = RetrievalCascade::new(test_config());

        // Tier-1 hit below threshold, tier-2 hit that scores lower after
        // weighting: the tier-1 item must still rank first.
        let (t1, _) = StaticSource::new(vec![("tier one", 0.45)]);
        let (t2, t2_calls) = StaticSource::new(vec![("tier two", 0.5)]);

        cascade.add_source(
            KnowledgeSourceDescriptor::new("t1", Tier::Vector, 1.0),
            Arc::new(t1),
        );
        cascade.add_source(
            KnowledgeSourceDescriptor::new("t2", Tier::Alternate, 0.8),
            Arc::new(t2),
        );

        let outcome = cascade.retrieve("X", 5).await;

        assert_eq!(t2_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.items[0].content, "tier one");
        assert_eq!(outcome.items[1].content, "tier two");
        // 0.45 and 0.40 both sit below the 0.5 threshold: the cascade walked
        // every tier and flags the result.
        assert!(outcome.low_confidence);
        assert_eq!(outcome.deepest_tier, Tier::Keyword);
    }

    #[tokio::test]
    async fn test_failing_source_is_absorbed_and_marked_degraded() {
        let mut cascade = RetrievalCascade::new(test_config());

        let (ok, _) = StaticSource::new(vec![("good answer", 0.9)]);
        cascade.add_source(
            KnowledgeSourceDescriptor::new("bad", Tier::Vector, 1.0),
            Arc::new(StaticSource::failing()),
        );
        cascade.add_source(
            KnowledgeSourceDescriptor::new("ok", Tier::Vector, 1.0),
            Arc::new(ok),
        );

        let outcome = cascade.retrieve("X", 5).await;

        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].source_id, "ok");

        let descriptors = cascade.source_descriptors();
        let bad = descriptors.iter().find(|d| d.id == "bad").unwrap();
        assert!(!bad.healthy);
    }

    #[tokio::test]
    async fn test_dedup_keeps_highest_scored_duplicate() {
        let mut cascade = RetrievalCascade::new(test_config());

        let (s1, _) = StaticSource::new(vec![("shared content", 0.6)]);
        let (s2, _) = StaticSource::new(vec![("shared content", 0.9)]);

        cascade.add_source(
            KnowledgeSourceDescriptor::new("s1", Tier::Vector, 1.0),
            Arc::new(s1),
        );
        cascade.add_source(
            KnowledgeSourceDescriptor::new("s2", Tier::Vector, 1.0),
            Arc::new(s2),
        );

        let outcome = cascade.retrieve("X", 5).await;

        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].source_id, "s2");
        assert!((outcome.items[0].weighted_score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_identical_inputs_give_identical_ordering() {
        let build = || {
            let mut cascade = RetrievalCascade::new(test_config());
            let (s1, _) = StaticSource::new(vec![("alpha", 0.8), ("beta", 0.6)]);
            let (s2, _) = StaticSource::new(vec![("gamma", 0.8), ("delta", 0.7)]);
            cascade.add_source(
                KnowledgeSourceDescriptor::new("s1", Tier::Vector, 1.0),
                Arc::new(s1),
            );
            cascade.add_source(
                KnowledgeSourceDescriptor::new("s2", Tier::Vector, 1.0),
                Arc::new(s2),
            );
            cascade
        };

        let first = build().retrieve("X", 5).await;
        let second = build().retrieve("X", 5).await;

        let order = |o: &RetrievalOutcome| {
            o.items.iter().map(|i| i.content.clone()).collect::<Vec<_>>()
        };
        assert_eq!(order(&first), order(&second));
        // alpha and gamma tie on weighted score and source weight; insertion
        // order (s1 before s2) breaks the tie.
        assert_eq!(first.items[0].content, "alpha");
        assert_eq!(first.items[1].content, "gamma");
    }

    #[tokio::test]
    async fn test_no_sources_returns_empty_low_confidence() {
        let cascade = RetrievalCascade::new(test_config());
        let outcome = cascade.retrieve("X", 5).await;
        assert!(outcome.items.is_empty());
        assert!(outcome.low_confidence);
        assert_eq!(outcome.best_score, 0.0);
    }

    #[tokio::test]
    async fn test_terminal_tier_output_returned_below_threshold() {
        let mut cascade = RetrievalCascade::new(test_config());
        let (t4, _) = StaticSource::new(vec![("keyword match", 0.2)]);
        cascade.add_source(
            KnowledgeSourceDescriptor::new("scan", Tier::Keyword, 1.0),
            Arc::new(t4),
        );

        let outcome = cascade.retrieve("X", 5).await;

        assert_eq!(outcome.items.len(), 1);
        assert!(outcome.low_confidence);
        assert_eq!(outcome.deepest_tier, Tier::Keyword);
    }
}

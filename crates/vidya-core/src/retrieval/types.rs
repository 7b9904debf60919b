//! Types for the multi-tier retrieval cascade

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One stage of the retrieval cascade, ordered by expected quality/cost.
///
/// Tier 1 is the primary vector-search set; escalation walks down to the
/// terminal keyword scan at tier 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Primary vector-search instances
    Vector,
    /// Alternate vector store
    Alternate,
    /// Local approximate index
    LocalIndex,
    /// Keyword/file scan; terminal, its output is returned even below threshold
    Keyword,
}

impl Tier {
    /// All tiers in escalation order
    pub const ALL: [Tier; 4] = [Tier::Vector, Tier::Alternate, Tier::LocalIndex, Tier::Keyword];

    /// Numeric rank (1..=4)
    pub fn rank(self) -> u8 {
        match self {
            Self::Vector => 1,
            Self::Alternate => 2,
            Self::LocalIndex => 3,
            Self::Keyword => 4,
        }
    }

    /// Whether escalation stops at this tier regardless of confidence
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Keyword)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier{}", self.rank())
    }
}

/// Configured knowledge-source instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSourceDescriptor {
    /// Instance identifier (e.g., "qdrant_new_data")
    pub id: String,
    /// Cascade tier this instance belongs to
    pub tier: Tier,
    /// Priority weight applied to raw scores (0.0 to 1.0)
    pub weight: f64,
    /// Health flag, updated by periodic probes and by observed failures
    #[serde(default = "default_healthy")]
    pub healthy: bool,
}

fn default_healthy() -> bool {
    true
}

impl KnowledgeSourceDescriptor {
    pub fn new(id: impl Into<String>, tier: Tier, weight: f64) -> Self {
        Self {
            id: id.into(),
            tier,
            weight: weight.clamp(0.0, 1.0),
            healthy: true,
        }
    }
}

/// A raw hit as returned by a single knowledge source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHit {
    pub content: String,
    /// Cosine-similarity-like score in [0, 1]
    pub score: f64,
}

/// A merged, weighted retrieval result. Ephemeral: created per query and
/// never persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub content: String,
    /// Identifier of the source that produced this item
    pub source_id: String,
    /// Raw similarity score as reported by the source
    pub raw_score: f64,
    /// Configured weight of the originating source (dedup/sort tie-break)
    pub source_weight: f64,
    /// Tier the item came from
    pub tier: Tier,
    /// `raw_score * source_weight`
    pub weighted_score: f64,
}

impl RetrievedItem {
    pub fn new(hit: RawHit, source: &KnowledgeSourceDescriptor) -> Self {
        let weighted_score = hit.score * source.weight;
        Self {
            content: hit.content,
            source_id: source.id.clone(),
            raw_score: hit.score,
            source_weight: source.weight,
            tier: source.tier,
            weighted_score,
        }
    }

    /// Content hash used for deduplication across sources
    pub fn content_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        hasher.finalize().into()
    }
}

/// Result of a full cascade run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Merged items, sorted descending by weighted score
    pub items: Vec<RetrievedItem>,
    /// Best weighted score in the merged set (0.0 when empty)
    pub best_score: f64,
    /// Set when the terminal tier was reached without meeting the
    /// confidence threshold; callers decide how to present such results
    pub low_confidence: bool,
    /// Deepest tier that was queried
    pub deepest_tier: Tier,
}

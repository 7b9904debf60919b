//! Multi-tier knowledge retrieval
//!
//! The cascade fans a query out to the configured vector-search instances
//! (tier 1), escalating through an alternate store (tier 2), a local
//! approximate index (tier 3), and a keyword scan (tier 4) whenever earlier
//! tiers come back empty or below the confidence threshold. Results are
//! merged under weighted scores and deduplicated by content hash; the final
//! ordering is deterministic for identical inputs and source healths.

mod cascade;
mod source;
mod types;

pub use cascade::RetrievalCascade;
pub use source::{HttpVectorSource, KeywordScanSource, KnowledgeSource};
pub use types::{KnowledgeSourceDescriptor, RawHit, RetrievalOutcome, RetrievedItem, Tier};

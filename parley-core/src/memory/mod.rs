//! Conversational memory.
//!
//! Derives summaries, decisions, proposals and per-speaker rollups from the
//! message stream and keeps each category under a hard cap.

pub mod ingest;
pub mod patterns;
pub mod snapshot;
pub mod store;
pub mod summarizer;
pub mod types;

pub use ingest::MemoryIngestor;
pub use patterns::{Classification, ContentClassifier, ContentTag, PatternMatcher};
pub use snapshot::MemorySnapshot;
pub use store::MemoryStore;
pub use summarizer::{build_summary_prompt, fallback_summary, Summarizer};
pub use types::{
    AgentMemoryState, CategoryUsage, EntryKind, MemoryEntry, MemoryStats, MemoryUsage,
    MessageRange, ProposalStatus, Reaction, ReactionKind, ReactionTally,
};

//! Memory data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a derived memory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Summary,
    Decision,
    Proposal,
    Insight,
}

/// Lifecycle of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Active,
    Accepted,
    Rejected,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionKind {
    Support,
    Oppose,
    Neutral,
}

/// One speaker's reaction to a proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub speaker_id: String,
    pub reaction: ReactionKind,
    pub timestamp: DateTime<Utc>,
}

impl Reaction {
    pub fn new(speaker_id: impl Into<String>, reaction: ReactionKind) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            reaction,
            timestamp: Utc::now(),
        }
    }
}

/// Half-open range `[start, end)` of global message indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRange {
    pub start: usize,
    pub end: usize,
}

/// Support/oppose/neutral counts for a proposal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionTally {
    pub support: usize,
    pub oppose: usize,
    pub neutral: usize,
}

/// A structured fact extracted from the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub kind: EntryKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_range: Option<MessageRange>,
    /// Only set for proposals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProposalStatus>,
    /// Only used by proposals; at most one per speaker
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
}

impl MemoryEntry {
    fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            topic: None,
            speaker_id: None,
            timestamp: Utc::now(),
            message_range: None,
            status: None,
            reactions: Vec::new(),
        }
    }

    pub fn summary(content: impl Into<String>, range: MessageRange) -> Self {
        let mut entry = Self::new(EntryKind::Summary, content);
        entry.message_range = Some(range);
        entry
    }

    pub fn decision(content: impl Into<String>, speaker_id: impl Into<String>) -> Self {
        let mut entry = Self::new(EntryKind::Decision, content);
        entry.speaker_id = Some(speaker_id.into());
        entry
    }

    pub fn proposal(content: impl Into<String>, speaker_id: impl Into<String>) -> Self {
        let mut entry = Self::new(EntryKind::Proposal, content);
        entry.speaker_id = Some(speaker_id.into());
        entry.status = Some(ProposalStatus::Active);
        entry
    }

    pub fn insight(content: impl Into<String>, speaker_id: Option<String>) -> Self {
        let mut entry = Self::new(EntryKind::Insight, content);
        entry.speaker_id = speaker_id;
        entry
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn is_active_proposal(&self) -> bool {
        self.kind == EntryKind::Proposal && self.status == Some(ProposalStatus::Active)
    }

    /// Record a reaction, replacing any earlier one from the same speaker
    pub fn set_reaction(&mut self, reaction: Reaction) {
        self.reactions.retain(|r| r.speaker_id != reaction.speaker_id);
        self.reactions.push(reaction);
    }

    pub fn tally(&self) -> ReactionTally {
        self.reactions
            .iter()
            .fold(ReactionTally::default(), |mut tally, r| {
                match r.reaction {
                    ReactionKind::Support => tally.support += 1,
                    ReactionKind::Oppose => tally.oppose += 1,
                    ReactionKind::Neutral => tally.neutral += 1,
                }
                tally
            })
    }
}

/// Per-speaker rollup, created lazily on a speaker's first message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMemoryState {
    pub speaker_id: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub positions: Vec<String>,
    #[serde(default)]
    pub agreements: Vec<String>,
    #[serde(default)]
    pub disagreements: Vec<String>,
    pub message_count: usize,
    pub last_active: DateTime<Utc>,
}

impl AgentMemoryState {
    pub fn new(speaker_id: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            key_points: Vec::new(),
            positions: Vec::new(),
            agreements: Vec::new(),
            disagreements: Vec::new(),
            message_count: 0,
            last_active: Utc::now(),
        }
    }

    /// Trim every list to `cap`, dropping the oldest items
    pub fn trim(&mut self, cap: usize) -> usize {
        [
            &mut self.key_points,
            &mut self.positions,
            &mut self.agreements,
            &mut self.disagreements,
        ]
        .into_iter()
        .map(|list| trim_oldest(list, cap))
        .sum()
    }
}

/// Drop items from the front until `list.len() <= cap`; returns how many went
pub(crate) fn trim_oldest<T>(list: &mut Vec<T>, cap: usize) -> usize {
    let excess = list.len().saturating_sub(cap);
    list.drain(..excess);
    excess
}

/// Counts reported by [`super::MemoryStore::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub summary_count: usize,
    pub decision_count: usize,
    pub proposal_count: usize,
    pub active_proposal_count: usize,
    pub insight_count: usize,
    pub speaker_count: usize,
    pub total_messages: usize,
    pub last_summarized_index: usize,
}

/// Count against cap for one category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryUsage {
    pub count: usize,
    pub cap: usize,
    pub ratio: f64,
}

impl CategoryUsage {
    pub fn new(count: usize, cap: usize) -> Self {
        let ratio = if cap == 0 {
            0.0
        } else {
            count as f64 / cap as f64
        };
        Self { count, cap, ratio }
    }
}

/// Fill levels reported by [`super::MemoryStore::usage`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub summaries: CategoryUsage,
    pub decisions: CategoryUsage,
    pub proposals: CategoryUsage,
    pub insights: CategoryUsage,
    /// Fullest per-speaker list across all speakers
    pub speaker_items: CategoryUsage,
}

impl MemoryUsage {
    /// Highest ratio across categories
    pub fn peak_ratio(&self) -> f64 {
        [
            self.summaries.ratio,
            self.decisions.ratio,
            self.proposals.ratio,
            self.insights.ratio,
            self.speaker_items.ratio,
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }
}

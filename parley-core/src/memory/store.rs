//! Bounded conversational memory

use super::patterns::ContentClassifier;
use super::snapshot::MemorySnapshot;
use super::summarizer::{build_summary_prompt, fallback_summary, Summarizer};
use super::types::{
    trim_oldest, AgentMemoryState, CategoryUsage, EntryKind, MemoryEntry, MemoryStats,
    MemoryUsage, MessageRange, ProposalStatus, Reaction, ReactionKind,
};
use crate::bus::Message;
use crate::config::{MemoryConfig, RetentionLimits};
use crate::utils::{first_sentence, normalize_whitespace, truncate};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest message body copied into a memory entry
const ENTRY_CONTENT_MAX: usize = 280;

/// Longest fragment kept in a per-speaker list
const SPEAKER_ITEM_MAX: usize = 160;

/// Digest of a conversation that stays within its retention limits.
///
/// Every mutating call enforces the limits before it returns, so the store is
/// never observably over capacity.
pub struct MemoryStore {
    config: MemoryConfig,
    summaries: Vec<MemoryEntry>,
    decisions: Vec<MemoryEntry>,
    proposals: Vec<MemoryEntry>,
    insights: Vec<MemoryEntry>,
    speakers: BTreeMap<String, AgentMemoryState>,
    total_messages: usize,
    last_summarized: usize,
    classifier: ContentClassifier,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            summaries: Vec::new(),
            decisions: Vec::new(),
            proposals: Vec::new(),
            insights: Vec::new(),
            speakers: BTreeMap::new(),
            total_messages: 0,
            last_summarized: 0,
            classifier: ContentClassifier::default(),
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_classifier(mut self, classifier: ContentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn limits(&self) -> RetentionLimits {
        self.config.limits
    }

    /// Swap the retention limits and enforce them immediately
    pub fn set_limits(&mut self, limits: RetentionLimits) -> usize {
        self.config.limits = limits;
        self.enforce_retention_limits()
    }

    /// Ingest one message.
    ///
    /// `history` is the retained message log up to and including `message`;
    /// its last element is taken to be the newest message ever seen. Returns
    /// the summary entry if this message closed a summarization slice.
    pub async fn process_message(
        &mut self,
        message: &Message,
        history: &[Message],
    ) -> Option<MemoryEntry> {
        self.total_messages += 1;

        if !message.is_system() {
            self.absorb(message);
        }
        self.enforce_retention_limits();

        if self.total_messages - self.last_summarized < self.config.summary_interval {
            return None;
        }
        let entry = self.summarize_slice(history).await;
        self.enforce_retention_limits();
        Some(entry)
    }

    fn absorb(&mut self, message: &Message) {
        let content = normalize_whitespace(&message.content);
        let fragment = truncate(first_sentence(&content), SPEAKER_ITEM_MAX);
        let found = self.classifier.classify(&content);
        let speaker_id = message.speaker_id.as_str();

        let state = self
            .speakers
            .entry(speaker_id.to_string())
            .or_insert_with(|| AgentMemoryState::new(speaker_id));
        state.message_count += 1;
        state.last_active = message.timestamp;

        if found.proposal {
            state.key_points.push(fragment.clone());
        }
        if found.position {
            state.positions.push(fragment.clone());
        }
        match found.reaction {
            ReactionKind::Support => state.agreements.push(fragment.clone()),
            ReactionKind::Oppose => state.disagreements.push(fragment.clone()),
            ReactionKind::Neutral => {}
        }

        if found.proposal {
            let entry = MemoryEntry::proposal(truncate(&content, ENTRY_CONTENT_MAX), speaker_id);
            debug!(speaker_id, proposal_id = %entry.id, "Recorded proposal");
            self.proposals.push(entry);
        } else if found.reaction != ReactionKind::Neutral {
            // A reaction in a message that is not itself a proposal counts
            // towards the newest proposal made by somebody else.
            if let Some(latest) = self
                .proposals
                .iter_mut()
                .rev()
                .find(|p| p.speaker_id.as_deref() != Some(speaker_id))
            {
                latest.set_reaction(Reaction::new(speaker_id, found.reaction));
            }
        }

        if found.decision {
            let entry = MemoryEntry::decision(truncate(&content, ENTRY_CONTENT_MAX), speaker_id);
            debug!(speaker_id, decision_id = %entry.id, "Recorded decision");
            self.decisions.push(entry);
        }
    }

    async fn summarize_slice(&mut self, history: &[Message]) -> MemoryEntry {
        let start = self.last_summarized;
        let end = start + self.config.summary_interval;
        // Global index of history[0]
        let offset = self.total_messages.saturating_sub(history.len());
        let local_start = start.saturating_sub(offset).min(history.len());
        let local_end = end.saturating_sub(offset).min(history.len());
        let slice = &history[local_start..local_end];

        let content = match &self.summarizer {
            Some(summarizer) => {
                let prompt = build_summary_prompt(slice, self.config.summary_sentence_budget);
                match summarizer.summarize(&prompt).await {
                    Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
                    Ok(_) => {
                        warn!(start, end, "Summarizer returned nothing, using fallback");
                        fallback_summary(slice, self.config.fallback_summary_messages)
                    }
                    Err(e) => {
                        warn!(start, end, "Summarizer failed, using fallback: {}", e);
                        fallback_summary(slice, self.config.fallback_summary_messages)
                    }
                }
            }
            None => fallback_summary(slice, self.config.fallback_summary_messages),
        };

        self.last_summarized = end;
        let entry = MemoryEntry::summary(content, MessageRange { start, end });
        info!(start, end, summary_id = %entry.id, "Created summary");
        self.summaries.push(entry.clone());
        entry
    }

    /// Trim every category to its cap; returns the number of evicted items
    pub fn enforce_retention_limits(&mut self) -> usize {
        let limits = self.config.limits;
        let mut evicted = trim_oldest(&mut self.summaries, limits.max_summaries)
            + trim_oldest(&mut self.decisions, limits.max_decisions)
            + trim_oldest(&mut self.insights, limits.max_insights)
            + prune_proposals(&mut self.proposals, limits.max_proposals);
        for state in self.speakers.values_mut() {
            evicted += state.trim(limits.max_speaker_items);
        }

        if evicted > 0 {
            debug!(evicted, "Enforced retention limits");
        }
        evicted
    }

    /// Halve every current count using the ordinary eviction priorities.
    ///
    /// Odd counts round up, so a category holding one entry keeps it.
    pub fn compact(&mut self) -> usize {
        let summaries = self.summaries.len().div_ceil(2);
        let decisions = self.decisions.len().div_ceil(2);
        let insights = self.insights.len().div_ceil(2);
        let proposals = self.proposals.len().div_ceil(2);

        let mut evicted = trim_oldest(&mut self.summaries, summaries)
            + trim_oldest(&mut self.decisions, decisions)
            + trim_oldest(&mut self.insights, insights)
            + prune_proposals(&mut self.proposals, proposals);

        for state in self.speakers.values_mut() {
            for list in [
                &mut state.key_points,
                &mut state.positions,
                &mut state.agreements,
                &mut state.disagreements,
            ] {
                let target = list.len().div_ceil(2);
                evicted += trim_oldest(list, target);
            }
        }

        info!(evicted, "Compacted memory");
        evicted
    }

    /// Record an insight that did not come from pattern extraction
    pub fn record_insight(
        &mut self,
        content: impl Into<String>,
        speaker_id: Option<String>,
    ) -> String {
        let entry = MemoryEntry::insight(content, speaker_id);
        let id = entry.id.clone();
        self.insights.push(entry);
        self.enforce_retention_limits();
        id
    }

    pub fn update_status(&mut self, proposal_id: &str, status: ProposalStatus) -> bool {
        match self.proposals.iter_mut().find(|p| p.id == proposal_id) {
            Some(proposal) => {
                proposal.status = Some(status);
                debug!(proposal_id, ?status, "Proposal status updated");
                true
            }
            None => false,
        }
    }

    pub fn add_reaction(&mut self, proposal_id: &str, reaction: Reaction) -> bool {
        match self.proposals.iter_mut().find(|p| p.id == proposal_id) {
            Some(proposal) => {
                proposal.set_reaction(reaction);
                true
            }
            None => false,
        }
    }

    pub fn latest_proposal(&self) -> Option<&MemoryEntry> {
        self.proposals.last()
    }

    /// Classify `content` and apply the result to the newest proposal
    pub fn track_reaction_to_latest(&mut self, speaker_id: &str, content: &str) -> bool {
        let reaction = self.classifier.reaction(content);
        match self.proposals.last_mut() {
            Some(proposal) => {
                proposal.set_reaction(Reaction::new(speaker_id, reaction));
                true
            }
            None => false,
        }
    }

    pub fn proposal(&self, proposal_id: &str) -> Option<&MemoryEntry> {
        self.proposals.iter().find(|p| p.id == proposal_id)
    }

    pub fn proposals_by_status(&self, status: ProposalStatus) -> Vec<&MemoryEntry> {
        self.proposals
            .iter()
            .filter(|p| p.status == Some(status))
            .collect()
    }

    /// Drop per-speaker state for everyone not in `active_ids`
    pub fn cleanup_inactive_speakers<S: AsRef<str>>(&mut self, active_ids: &[S]) -> usize {
        let active: HashSet<&str> = active_ids.iter().map(|s| s.as_ref()).collect();
        let before = self.speakers.len();
        self.speakers.retain(|id, _| active.contains(id.as_str()));
        let removed = before - self.speakers.len();
        if removed > 0 {
            info!(removed, "Removed inactive speakers");
        }
        removed
    }

    pub fn summaries(&self) -> &[MemoryEntry] {
        &self.summaries
    }

    pub fn decisions(&self) -> &[MemoryEntry] {
        &self.decisions
    }

    pub fn proposals(&self) -> &[MemoryEntry] {
        &self.proposals
    }

    pub fn insights(&self) -> &[MemoryEntry] {
        &self.insights
    }

    pub fn speaker_state(&self, speaker_id: &str) -> Option<&AgentMemoryState> {
        self.speakers.get(speaker_id)
    }

    pub fn total_messages(&self) -> usize {
        self.total_messages
    }

    /// Render the full digest handed to a speaker before it replies
    pub fn memory_context(&self, speaker_id: Option<&str>) -> String {
        let mut out = String::new();

        if !self.summaries.is_empty() {
            out.push_str("## Discussion so far\n");
            for summary in &self.summaries {
                let _ = writeln!(out, "- {}{}", range_label(summary), summary.content);
            }
        }

        let decisions = tail(&self.decisions, self.config.context_decisions);
        if !decisions.is_empty() {
            out.push_str("## Decisions\n");
            for decision in decisions {
                let _ = writeln!(out, "- {}", decision.content);
            }
        }

        let proposals = self.context_proposals();
        if !proposals.is_empty() {
            out.push_str("## Proposals\n");
            for proposal in proposals {
                let tally = proposal.tally();
                let _ = writeln!(
                    out,
                    "- [{}] {} (by {}; +{} -{} ={})",
                    status_label(proposal.status),
                    proposal.content,
                    proposal.speaker_id.as_deref().unwrap_or("unknown"),
                    tally.support,
                    tally.oppose,
                    tally.neutral
                );
            }
        }

        if let Some(state) = speaker_id.and_then(|id| self.speakers.get(id)) {
            let items = self.config.context_speaker_items;
            let key_points = tail(&state.key_points, items);
            let agreements = tail(&state.agreements, items);
            if !key_points.is_empty() || !agreements.is_empty() {
                let _ = writeln!(out, "## Your notes ({})", state.speaker_id);
                for point in key_points {
                    let _ = writeln!(out, "- point: {}", point);
                }
                for agreement in agreements {
                    let _ = writeln!(out, "- agreed: {}", agreement);
                }
            }
        }

        if out.is_empty() {
            out.push_str("## Discussion so far\n- nothing yet\n");
        }
        out
    }

    /// Short digest for deciding whether to speak at all.
    ///
    /// Carries the latest summary and the newest decisions as bare lines, a
    /// subset of [`MemoryStore::memory_context`] without its section headers.
    pub fn eval_context(&self) -> String {
        let mut out = String::new();
        if let Some(summary) = self.summaries.last() {
            let _ = writeln!(out, "{}{}", range_label(summary), summary.content);
        }
        let count = self.config.eval_decisions.min(self.config.context_decisions);
        for decision in tail(&self.decisions, count) {
            let _ = writeln!(out, "- {}", decision.content);
        }
        out
    }

    /// Active proposals first (newest first), then the rest (newest first)
    fn context_proposals(&self) -> Vec<&MemoryEntry> {
        let (active, settled): (Vec<&MemoryEntry>, Vec<&MemoryEntry>) = self
            .proposals
            .iter()
            .rev()
            .partition(|p| p.is_active_proposal());
        active
            .into_iter()
            .chain(settled)
            .take(self.config.context_proposals)
            .collect()
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            summary_count: self.summaries.len(),
            decision_count: self.decisions.len(),
            proposal_count: self.proposals.len(),
            active_proposal_count: self
                .proposals
                .iter()
                .filter(|p| p.is_active_proposal())
                .count(),
            insight_count: self.insights.len(),
            speaker_count: self.speakers.len(),
            total_messages: self.total_messages,
            last_summarized_index: self.last_summarized,
        }
    }

    pub fn usage(&self) -> MemoryUsage {
        let limits = self.config.limits;
        let fullest = self
            .speakers
            .values()
            .flat_map(|s| {
                [
                    s.key_points.len(),
                    s.positions.len(),
                    s.agreements.len(),
                    s.disagreements.len(),
                ]
            })
            .max()
            .unwrap_or(0);

        MemoryUsage {
            summaries: CategoryUsage::new(self.summaries.len(), limits.max_summaries),
            decisions: CategoryUsage::new(self.decisions.len(), limits.max_decisions),
            proposals: CategoryUsage::new(self.proposals.len(), limits.max_proposals),
            insights: CategoryUsage::new(self.insights.len(), limits.max_insights),
            speaker_items: CategoryUsage::new(fullest, limits.max_speaker_items),
        }
    }

    /// Capture the whole store as a plain value
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            config: self.config,
            summaries: self.summaries.clone(),
            decisions: self.decisions.clone(),
            proposals: self.proposals.clone(),
            insights: self.insights.clone(),
            speakers: self.speakers.clone(),
            total_messages: self.total_messages,
            last_summarized: self.last_summarized,
        }
    }

    /// Rebuild a store from a snapshot and enforce limits at once.
    ///
    /// `limits` replaces the snapshot's saved limits when given. The
    /// summarizer and classifier are not part of a snapshot; attach them
    /// again with the builder methods.
    pub fn restore(snapshot: MemorySnapshot, limits: Option<RetentionLimits>) -> Self {
        let mut config = snapshot.config;
        if let Some(limits) = limits {
            config.limits = limits;
        }

        let mut store = Self::new(config);
        store.summaries = snapshot.summaries;
        store.decisions = snapshot.decisions;
        store.proposals = snapshot.proposals;
        store.insights = snapshot.insights;
        store.speakers = snapshot.speakers;
        store.total_messages = snapshot.total_messages;
        store.last_summarized = snapshot.last_summarized.min(snapshot.total_messages);

        let evicted = store.enforce_retention_limits();
        info!(
            evicted,
            total_messages = store.total_messages,
            "Restored memory snapshot"
        );
        store
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("stats", &self.stats())
            .field("summarizer", &self.summarizer.is_some())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

/// Evict proposals down to `cap`, oldest first, settled ones before active ones
fn prune_proposals(proposals: &mut Vec<MemoryEntry>, cap: usize) -> usize {
    let excess = proposals.len().saturating_sub(cap);
    if excess == 0 {
        return 0;
    }

    let settled = proposals.iter().filter(|p| !p.is_active_proposal()).count();
    let mut drop_settled = excess.min(settled);
    let mut drop_active = excess - drop_settled;
    proposals.retain(|p| {
        let budget = if p.is_active_proposal() {
            &mut drop_active
        } else {
            &mut drop_settled
        };
        if *budget > 0 {
            *budget -= 1;
            false
        } else {
            true
        }
    });
    excess
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

fn range_label(entry: &MemoryEntry) -> String {
    match (entry.kind, entry.message_range) {
        (EntryKind::Summary, Some(range)) => format!("[{}-{}) ", range.start, range.end),
        _ => String::new(),
    }
}

fn status_label(status: Option<ProposalStatus>) -> &'static str {
    match status {
        Some(ProposalStatus::Active) | None => "active",
        Some(ProposalStatus::Accepted) => "accepted",
        Some(ProposalStatus::Rejected) => "rejected",
        Some(ProposalStatus::Modified) => "modified",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(speaker: &str, content: &str) -> Message {
        Message::new(speaker, MessageKind::Statement, content)
    }

    /// Feed messages through the store the way the ingestor does
    async fn feed(store: &mut MemoryStore, history: &mut Vec<Message>, messages: Vec<Message>) {
        for message in messages {
            history.push(message.clone());
            store.process_message(&message, history).await;
        }
    }

    fn chatter(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| msg(["alice", "bob", "carol"][i % 3], &format!("Point number {}. More detail.", i)))
            .collect()
    }

    fn limits(max_proposals: usize) -> RetentionLimits {
        RetentionLimits {
            max_proposals,
            ..RetentionLimits::default()
        }
    }

    struct CannedSummarizer;

    #[async_trait]
    impl Summarizer for CannedSummarizer {
        async fn summarize(&self, _prompt: &str) -> crate::Result<String> {
            Ok("They discussed caching.".to_string())
        }
    }

    struct BrokenSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for BrokenSummarizer {
        async fn summarize(&self, _prompt: &str) -> crate::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(crate::Error::Collaborator("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_summary_cadence() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();

        feed(&mut store, &mut history, chatter(11)).await;
        assert_eq!(store.stats().summary_count, 0);

        feed(&mut store, &mut history, chatter(1)).await;
        assert_eq!(store.stats().summary_count, 1);
        assert_eq!(
            store.summaries()[0].message_range,
            Some(MessageRange { start: 0, end: 12 })
        );

        feed(&mut store, &mut history, chatter(13)).await;
        assert!(store.stats().summary_count >= 2);
        assert_eq!(store.stats().last_summarized_index, 24);
    }

    #[tokio::test]
    async fn test_fallback_summary_covers_slice() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        feed(&mut store, &mut history, chatter(12)).await;

        assert_eq!(
            store.summaries()[0].content,
            "alice: Point number 0. | bob: Point number 1. | carol: Point number 2."
        );
        assert!(store.summaries()[0].speaker_id.is_none());
    }

    #[tokio::test]
    async fn test_summarizer_used_when_present() {
        let mut store = MemoryStore::default().with_summarizer(Arc::new(CannedSummarizer));
        let mut history = Vec::new();
        feed(&mut store, &mut history, chatter(12)).await;

        assert_eq!(store.summaries()[0].content, "They discussed caching.");
    }

    #[tokio::test]
    async fn test_failing_summarizer_does_not_stall() {
        let summarizer = Arc::new(BrokenSummarizer {
            calls: AtomicUsize::new(0),
        });
        let mut store = MemoryStore::default().with_summarizer(summarizer.clone());
        let mut history = Vec::new();
        feed(&mut store, &mut history, chatter(36)).await;

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.stats().summary_count, 3);
        assert_eq!(store.stats().last_summarized_index, 36);
        assert!(store.summaries()[2].content.starts_with("alice: Point number 24."));
    }

    #[tokio::test]
    async fn test_summary_slice_after_history_pruned() {
        let mut store = MemoryStore::default();
        let mut history: Vec<Message> = Vec::new();
        for message in chatter(12) {
            history.push(message.clone());
            // Keep only the last five messages, like a bounded window would
            if history.len() > 5 {
                history.remove(0);
            }
            store.process_message(&message, &history).await;
        }

        // Only messages 7..12 were still available
        assert_eq!(
            store.summaries()[0].content,
            "bob: Point number 7. | carol: Point number 8. | alice: Point number 9."
        );
    }

    #[tokio::test]
    async fn test_system_messages_count_but_have_no_state() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        feed(
            &mut store,
            &mut history,
            vec![Message::system("[Decision] ignored"), msg("alice", "Hello.")],
        )
        .await;

        assert_eq!(store.total_messages(), 2);
        assert!(store.speaker_state("system").is_none());
        assert_eq!(store.speaker_state("alice").unwrap().message_count, 1);
        assert!(store.decisions().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_and_reactions() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        feed(
            &mut store,
            &mut history,
            vec![
                msg("alice", "I propose we use SQLite. It is simple."),
                msg("bob", "Good point, I agree."),
                msg("carol", "I disagree, it won't scale."),
                msg("bob", "[Decision] SQLite for the prototype."),
            ],
        )
        .await;

        let proposal = store.latest_proposal().unwrap();
        assert_eq!(proposal.speaker_id.as_deref(), Some("alice"));
        let tally = proposal.tally();
        assert_eq!((tally.support, tally.oppose), (1, 1));

        assert_eq!(store.decisions().len(), 1);
        let alice = store.speaker_state("alice").unwrap();
        assert_eq!(alice.key_points, vec!["I propose we use SQLite."]);
        assert_eq!(store.speaker_state("bob").unwrap().agreements.len(), 1);
        assert_eq!(store.speaker_state("carol").unwrap().disagreements.len(), 1);
    }

    #[tokio::test]
    async fn test_proposal_count_never_exceeds_cap() {
        let mut store = MemoryStore::new(MemoryConfig {
            limits: limits(3),
            ..MemoryConfig::default()
        });
        let mut history = Vec::new();
        for i in 0..10 {
            let message = msg("alice", &format!("I propose option {}.", i));
            history.push(message.clone());
            store.process_message(&message, &history).await;
            assert!(store.stats().proposal_count <= 3);
        }
        // All still active, so the newest three survive
        let contents: Vec<&str> = store.proposals().iter().map(|p| p.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["I propose option 7.", "I propose option 8.", "I propose option 9."]
        );
    }

    #[tokio::test]
    async fn test_active_proposals_outlive_settled_ones() {
        let mut store = MemoryStore::new(MemoryConfig {
            limits: limits(5),
            ..MemoryConfig::default()
        });
        let mut history = Vec::new();
        feed(
            &mut store,
            &mut history,
            (0..5).map(|i| msg("alice", &format!("I propose plan {}.", i))).collect(),
        )
        .await;

        let ids: Vec<String> = store.proposals().iter().map(|p| p.id.clone()).collect();
        for id in [&ids[0], &ids[2], &ids[4]] {
            assert!(store.update_status(id, ProposalStatus::Accepted));
        }
        let still_active = [ids[1].clone(), ids[3].clone()];

        for i in 0..3 {
            feed(
                &mut store,
                &mut history,
                vec![msg("bob", &format!("I suggest variant {}.", i))],
            )
            .await;
            assert_eq!(store.stats().proposal_count, 5);
            for id in &still_active {
                assert!(store.proposal(id).is_some(), "active proposal evicted early");
            }
        }
        assert!(store.proposals_by_status(ProposalStatus::Accepted).is_empty());

        // Only now do actives alone exceed the cap; the oldest active goes
        feed(&mut store, &mut history, vec![msg("bob", "I suggest variant 3.")]).await;
        assert_eq!(store.stats().proposal_count, 5);
        assert!(store.proposal(&still_active[0]).is_none());
        assert!(store.proposal(&still_active[1]).is_some());
    }

    #[test]
    fn test_missing_ids_report_false() {
        let mut store = MemoryStore::default();
        assert!(!store.update_status("nope", ProposalStatus::Rejected));
        assert!(!store.add_reaction("nope", Reaction::new("a", ReactionKind::Support)));
        assert!(!store.track_reaction_to_latest("a", "I agree"));
        assert!(store.latest_proposal().is_none());
    }

    #[tokio::test]
    async fn test_track_reaction_to_latest() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        feed(&mut store, &mut history, vec![msg("alice", "I propose tabs.")]).await;

        assert!(store.track_reaction_to_latest("bob", "I don't agree"));
        assert!(store.track_reaction_to_latest("bob", "Fine, I agree"));
        let tally = store.latest_proposal().unwrap().tally();
        assert_eq!((tally.support, tally.oppose), (1, 0));
    }

    #[tokio::test]
    async fn test_speaker_lists_bounded() {
        let mut store = MemoryStore::new(MemoryConfig {
            limits: RetentionLimits {
                max_speaker_items: 2,
                ..RetentionLimits::default()
            },
            ..MemoryConfig::default()
        });
        let mut history = Vec::new();
        feed(
            &mut store,
            &mut history,
            (0..5).map(|i| msg("bob", &format!("I agree with {}.", i))).collect(),
        )
        .await;

        assert_eq!(
            store.speaker_state("bob").unwrap().agreements,
            vec!["I agree with 3.", "I agree with 4."]
        );
    }

    #[tokio::test]
    async fn test_memory_context_rendering() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        let mut messages = vec![
            msg("alice", "I propose a weekly sync."),
            msg("bob", "I agree, weekly works."),
            msg("carol", "We have agreed on Mondays."),
        ];
        messages.extend(chatter(9));
        feed(&mut store, &mut history, messages).await;

        let context = store.memory_context(Some("bob"));
        assert!(context.contains("## Discussion so far\n- [0-12) alice: I propose a weekly sync."));
        assert!(context.contains("## Decisions\n- We have agreed on Mondays."));
        assert!(context.contains("- [active] I propose a weekly sync. (by alice; +2 -0 =0)"));
        assert!(context.contains("## Your notes (bob)\n- agreed: I agree, weekly works."));
        assert_eq!(context, store.memory_context(Some("bob")));

        let eval = store.eval_context();
        assert!(eval.len() < context.len());
        assert!(eval.starts_with("[0-12) "));
        assert!(eval.contains("- We have agreed on Mondays.\n"));
    }

    #[tokio::test]
    async fn test_eval_context_shorter_with_only_decisions() {
        let mut store = MemoryStore::default();
        assert_eq!(store.eval_context(), "");
        assert!(store.eval_context().len() < store.memory_context(None).len());

        let mut history = Vec::new();
        let decisions = (0..3).map(|i| msg("alice", &format!("[Decision] d{}", i))).collect();
        feed(&mut store, &mut history, decisions).await;
        assert_eq!(store.stats().decision_count, 3);
        assert_eq!(store.stats().proposal_count, 0);

        let full = store.memory_context(None);
        let eval = store.eval_context();
        assert_eq!(eval, "- [Decision] d0\n- [Decision] d1\n- [Decision] d2\n");
        assert!(eval.len() < full.len());
        assert!(full.contains(&eval));
    }

    #[tokio::test]
    async fn test_compact_halves_counts() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        feed(
            &mut store,
            &mut history,
            (0..6).map(|i| msg("alice", &format!("I propose item {}.", i))).collect(),
        )
        .await;
        let ids: Vec<String> = store.proposals().iter().map(|p| p.id.clone()).collect();
        store.update_status(&ids[4], ProposalStatus::Rejected);
        store.record_insight("People want short meetings", None);
        store.record_insight("Budget is fixed", Some("carol".to_string()));

        store.compact();
        let stats = store.stats();
        assert_eq!(stats.proposal_count, 3);
        assert_eq!(stats.insight_count, 1);
        // The rejected proposal goes first even though it is newer
        assert!(store.proposal(&ids[4]).is_none());
        assert!(store.proposal(&ids[5]).is_some());
        assert_eq!(store.speaker_state("alice").unwrap().key_points.len(), 3);
    }

    #[tokio::test]
    async fn test_compact_keeps_single_entries() {
        let mut store = MemoryStore::new(MemoryConfig {
            summary_interval: 3,
            ..MemoryConfig::default()
        });
        let mut history = Vec::new();
        feed(&mut store, &mut history, chatter(3)).await;
        store.record_insight("Only one", None);
        assert_eq!(store.stats().summary_count, 1);

        store.compact();
        let stats = store.stats();
        assert_eq!(stats.summary_count, 1);
        assert_eq!(stats.insight_count, 1);
        assert!(store.eval_context().starts_with("[0-3) "));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        let mut messages = vec![msg("alice", "I propose Rust."), msg("bob", "[Decision] Rust it is.")];
        messages.extend(chatter(20));
        feed(&mut store, &mut history, messages).await;

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let snapshot: MemorySnapshot = serde_json::from_str(&json).unwrap();
        let restored = MemoryStore::restore(snapshot, None);

        assert_eq!(restored.stats(), store.stats());
        assert_eq!(restored.memory_context(Some("alice")), store.memory_context(Some("alice")));
    }

    #[tokio::test]
    async fn test_restore_under_stricter_limits() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        feed(
            &mut store,
            &mut history,
            (0..8)
                .map(|i| msg("alice", &format!("I propose x{}. [decision] y{}", i, i)))
                .collect(),
        )
        .await;
        assert_eq!(store.stats().proposal_count, 8);

        let strict = RetentionLimits {
            max_proposals: 2,
            max_decisions: 3,
            max_speaker_items: 1,
            ..RetentionLimits::default()
        };
        let restored = MemoryStore::restore(store.snapshot(), Some(strict));
        let stats = restored.stats();
        assert_eq!(stats.proposal_count, 2);
        assert_eq!(stats.decision_count, 3);
        assert_eq!(restored.limits(), strict);
        assert_eq!(restored.speaker_state("alice").unwrap().key_points.len(), 1);
    }

    #[tokio::test]
    async fn test_set_limits_enforces_immediately() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        feed(
            &mut store,
            &mut history,
            (0..4).map(|i| msg("a", &format!("[decision] d{}", i))).collect(),
        )
        .await;

        let evicted = store.set_limits(RetentionLimits {
            max_decisions: 1,
            ..RetentionLimits::default()
        });
        assert_eq!(evicted, 3);
        assert_eq!(store.decisions()[0].content, "[decision] d3");
        assert!(store.usage().decisions.ratio <= 1.0);
    }

    #[tokio::test]
    async fn test_cleanup_inactive_speakers() {
        let mut store = MemoryStore::default();
        let mut history = Vec::new();
        feed(&mut store, &mut history, chatter(3)).await;

        assert_eq!(store.cleanup_inactive_speakers(&["alice"]), 2);
        assert_eq!(store.stats().speaker_count, 1);
        assert!(store.speaker_state("alice").is_some());
    }
}

//! Scripted speakers that take turns through the bus

use anyhow::Result;
use async_trait::async_trait;
use parley_core::bus::{
    DenyReason, Event, EventBus, EventKind, Message, MessageKind, SpeakRequest, Subscription,
    Urgency,
};
use parley_core::floor::{release_floor, request_floor};
use parley_core::memory::{ContentClassifier, MemoryStore, ReactionKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Produces a speaker's next message from its memory context
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reply(&self, speaker_id: &str, turn: usize, context: &str) -> Result<String>;
}

const SCRIPT: &[&str] = &[
    "I think we should start by pinning down what {goal} really requires.",
    "I propose we split {goal} into two milestones.",
    "Good point, I agree with splitting the work.",
    "I disagree, two milestones will slow {goal} down.",
    "What if we timebox the first milestone to one week?",
    "Makes sense to me, a week is enough for a first cut.",
    "[Decision] We go with a one-week first milestone for {goal}.",
    "Who owns the follow-up review?",
];

/// Deterministic stand-in for a language model
pub struct ScriptedReasoner {
    goal: String,
    speakers: Vec<String>,
}

impl ScriptedReasoner {
    pub fn new(goal: impl Into<String>, speakers: &[String]) -> Self {
        Self {
            goal: goal.into(),
            speakers: speakers.to_vec(),
        }
    }

    fn line(&self, speaker_id: &str, turn: usize) -> String {
        let index = self
            .speakers
            .iter()
            .position(|s| s == speaker_id)
            .unwrap_or(0);
        SCRIPT[(turn + index * 3) % SCRIPT.len()].replace("{goal}", &self.goal)
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reply(&self, speaker_id: &str, turn: usize, _context: &str) -> Result<String> {
        Ok(self.line(speaker_id, turn))
    }
}

/// Shared count of turns left in a session
pub struct TurnBudget {
    total: usize,
    remaining: AtomicUsize,
    completed: AtomicUsize,
    done: Notify,
}

impl TurnBudget {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            remaining: AtomicUsize::new(total),
            completed: AtomicUsize::new(0),
            done: Notify::new(),
        }
    }

    /// Claim one turn; false once the budget is spent
    fn take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn has_turns(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) > 0
    }

    fn complete(&self) {
        if self.completed.fetch_add(1, Ordering::SeqCst) + 1 >= self.total {
            self.done.notify_one();
        }
    }

    /// Wait until every claimed turn has finished
    pub async fn finished(&self) {
        if self.total == 0 {
            return;
        }
        self.done.notified().await;
    }
}

/// One participant: asks for the floor, speaks when granted, retries after cooldown
pub struct Speaker {
    id: String,
    index: usize,
    bus: EventBus,
    store: Arc<Mutex<MemoryStore>>,
    reasoner: Arc<dyn Reasoner>,
    budget: Arc<TurnBudget>,
    classifier: ContentClassifier,
    cooldown: Duration,
    spoken: AtomicUsize,
}

impl Speaker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        index: usize,
        bus: EventBus,
        store: Arc<Mutex<MemoryStore>>,
        reasoner: Arc<dyn Reasoner>,
        budget: Arc<TurnBudget>,
        cooldown: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            index,
            bus,
            store,
            reasoner,
            budget,
            classifier: ContentClassifier::default(),
            cooldown,
            spoken: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribe to floor decisions and ask for the floor once
    pub fn join(self: &Arc<Self>) -> Vec<Subscription> {
        let speaker = Arc::clone(self);
        let grants = self
            .bus
            .subscribe(EventKind::FloorGranted, self.id.clone(), move |event| {
                let speaker = Arc::clone(&speaker);
                async move {
                    if let Event::FloorGranted { speaker_id, .. } = event {
                        if speaker_id == speaker.id {
                            speaker.take_turn().await;
                        }
                    }
                    Ok(())
                }
            });

        let speaker = Arc::clone(self);
        let denials = self
            .bus
            .subscribe(EventKind::FloorDenied, self.id.clone(), move |event| {
                let speaker = Arc::clone(&speaker);
                async move {
                    if let Event::FloorDenied { speaker_id, reason } = event {
                        if speaker_id == speaker.id {
                            speaker.retry_after_denial(reason).await;
                        }
                    }
                    Ok(())
                }
            });

        self.request();
        vec![grants, denials]
    }

    fn request(&self) {
        if !self.budget.has_turns() {
            return;
        }
        let spoken = self.spoken.load(Ordering::SeqCst);
        let urgency = [Urgency::High, Urgency::Medium, Urgency::Low][(self.index + spoken) % 3];
        let reason = format!("{} has something to add", self.id);
        request_floor(&self.bus, SpeakRequest::new(self.id.clone(), urgency, reason));
    }

    async fn retry_after_denial(&self, reason: DenyReason) {
        debug!(speaker_id = %self.id, ?reason, "Floor denied, retrying later");
        // Just past the cooldown so the retry is not denied again
        tokio::time::sleep(self.cooldown + Duration::from_millis(10)).await;
        self.request();
    }

    async fn take_turn(&self) {
        if !self.budget.take() {
            release_floor(&self.bus, self.id.clone());
            return;
        }

        let context = self.store.lock().await.memory_context(Some(&self.id));
        let turn = self.spoken.fetch_add(1, Ordering::SeqCst);
        match self.reasoner.reply(&self.id, turn, &context).await {
            Ok(text) => {
                let kind = self.message_kind(&text);
                self.bus
                    .append_message(Message::new(self.id.clone(), kind, text));
            }
            Err(e) => warn!(speaker_id = %self.id, "Reasoner failed: {}", e),
        }

        release_floor(&self.bus, self.id.clone());
        self.budget.complete();
        self.request();
    }

    fn message_kind(&self, text: &str) -> MessageKind {
        let found = self.classifier.classify(text);
        if found.decision {
            MessageKind::Decision
        } else if found.proposal {
            MessageKind::Proposal
        } else if found.reaction == ReactionKind::Oppose {
            MessageKind::Rebuttal
        } else if text.trim_end().ends_with('?') {
            MessageKind::Question
        } else {
            MessageKind::Statement
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_offsets_by_speaker() {
        let speakers = vec!["a".to_string(), "b".to_string()];
        let reasoner = ScriptedReasoner::new("the launch", &speakers);

        assert_eq!(
            reasoner.line("a", 1),
            "I propose we split the launch into two milestones."
        );
        assert_eq!(
            reasoner.line("b", 0),
            "I disagree, two milestones will slow the launch down."
        );
    }

    #[tokio::test]
    async fn test_turn_budget() {
        let budget = TurnBudget::new(2);
        assert!(budget.take());
        assert!(budget.take());
        assert!(!budget.take());

        budget.complete();
        budget.complete();
        budget.finished().await;
    }

    #[tokio::test]
    async fn test_message_kind_from_content() {
        let bus = EventBus::default();
        let speaker = Speaker::new(
            "a",
            0,
            bus,
            Arc::new(Mutex::new(MemoryStore::default())),
            Arc::new(ScriptedReasoner::new("x", &[])),
            Arc::new(TurnBudget::new(1)),
            Duration::from_millis(10),
        );

        assert_eq!(speaker.message_kind("[Decision] ship it"), MessageKind::Decision);
        assert_eq!(speaker.message_kind("I propose tabs."), MessageKind::Proposal);
        assert_eq!(speaker.message_kind("I disagree."), MessageKind::Rebuttal);
        assert_eq!(speaker.message_kind("Who owns it?"), MessageKind::Question);
        assert_eq!(speaker.message_kind("Fine."), MessageKind::Statement);
    }
}

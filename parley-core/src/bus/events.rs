//! Event types for the event bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Speaker id reserved for messages produced by the system itself
pub const SYSTEM_SPEAKER: &str = "system";

/// What a message is doing in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Statement,
    Question,
    Rebuttal,
    Proposal,
    Decision,
    Summary,
    System,
}

/// A single utterance in the conversation.
///
/// Messages are never mutated after they reach the bus; corrections are new
/// messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub speaker_id: String,
    pub kind: MessageKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Create a new message with a fresh id and the current time
    pub fn new(
        speaker_id: impl Into<String>,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            speaker_id: speaker_id.into(),
            kind,
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Create a message attributed to the system speaker
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(SYSTEM_SPEAKER, MessageKind::System, content)
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_system(&self) -> bool {
        self.speaker_id == SYSTEM_SPEAKER || self.kind == MessageKind::System
    }
}

/// Priority attached to a floor request. Declaration order is grant order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

/// A speaker asking for the floor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub speaker_id: String,
    pub urgency: Urgency,
    pub reason: String,
    /// What the speaker intends to produce once granted
    pub response_kind: MessageKind,
    pub requested_at: DateTime<Utc>,
}

impl SpeakRequest {
    pub fn new(speaker_id: impl Into<String>, urgency: Urgency, reason: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            urgency,
            reason: reason.into(),
            response_kind: MessageKind::Statement,
            requested_at: Utc::now(),
        }
    }

    pub fn with_response_kind(mut self, kind: MessageKind) -> Self {
        self.response_kind = kind;
        self
    }
}

/// Why a floor request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Cooldown,
    QueueFull,
}

/// Why the floor was given back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseCause {
    Voluntary,
    Timeout,
    Forced,
}

/// Everything that travels over the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    SessionStarted {
        session_id: String,
        goal: String,
    },
    SessionPaused {
        reason: String,
    },
    SessionResumed,
    SessionEnded {
        reason: String,
    },
    MessageAppended {
        message: Message,
        source_id: String,
    },
    FloorRequested(SpeakRequest),
    FloorGranted {
        speaker_id: String,
        reason: String,
    },
    FloorDenied {
        speaker_id: String,
        reason: DenyReason,
    },
    FloorReleased {
        speaker_id: String,
        cause: ReleaseCause,
    },
    SummaryCreated {
        entry_id: String,
        start: usize,
        end: usize,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::SessionStarted { .. } => EventKind::SessionStarted,
            Event::SessionPaused { .. } => EventKind::SessionPaused,
            Event::SessionResumed => EventKind::SessionResumed,
            Event::SessionEnded { .. } => EventKind::SessionEnded,
            Event::MessageAppended { .. } => EventKind::MessageAppended,
            Event::FloorRequested(_) => EventKind::FloorRequested,
            Event::FloorGranted { .. } => EventKind::FloorGranted,
            Event::FloorDenied { .. } => EventKind::FloorDenied,
            Event::FloorReleased { .. } => EventKind::FloorReleased,
            Event::SummaryCreated { .. } => EventKind::SummaryCreated,
        }
    }
}

/// Discriminant of [`Event`], used as the subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStarted,
    SessionPaused,
    SessionResumed,
    SessionEnded,
    MessageAppended,
    FloorRequested,
    FloorGranted,
    FloorDenied,
    FloorReleased,
    SummaryCreated,
}

impl EventKind {
    /// Lifecycle events are delivered even while the bus is inactive
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            EventKind::SessionStarted
                | EventKind::SessionPaused
                | EventKind::SessionResumed
                | EventKind::SessionEnded
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session_started",
            EventKind::SessionPaused => "session_paused",
            EventKind::SessionResumed => "session_resumed",
            EventKind::SessionEnded => "session_ended",
            EventKind::MessageAppended => "message_appended",
            EventKind::FloorRequested => "floor_requested",
            EventKind::FloorGranted => "floor_granted",
            EventKind::FloorDenied => "floor_denied",
            EventKind::FloorReleased => "floor_released",
            EventKind::SummaryCreated => "summary_created",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("alice", MessageKind::Statement, "Hello");
        assert_eq!(msg.speaker_id, "alice");
        assert!(!msg.id.is_empty());
        assert!(!msg.is_system());
        assert!(Message::system("Session opened").is_system());
    }

    #[test]
    fn test_urgency_order() {
        assert!(Urgency::High < Urgency::Medium);
        assert!(Urgency::Medium < Urgency::Low);
    }

    #[test]
    fn test_event_wire_shape() {
        let event = Event::FloorDenied {
            speaker_id: "bob".to_string(),
            reason: DenyReason::QueueFull,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "floor_denied");
        assert_eq!(value["payload"]["reason"], "queue_full");
        assert_eq!(value["type"], event.kind().as_str());
    }

    #[test]
    fn test_lifecycle_kinds() {
        assert!(EventKind::SessionEnded.is_lifecycle());
        assert!(!EventKind::MessageAppended.is_lifecycle());
        assert!(Event::SessionResumed.kind().is_lifecycle());
    }
}

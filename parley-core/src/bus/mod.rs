//! Event bus for decoupled coordination
//!
//! Every component of a session talks through one [`EventBus`]: speakers
//! publish floor requests and messages, the floor arbitrator answers with
//! grants and denials, and the memory store ingests appended messages.

pub mod events;
pub mod queue;

pub use events::{
    DenyReason, Event, EventKind, Message, MessageKind, ReleaseCause, SpeakRequest, Urgency,
    SYSTEM_SPEAKER,
};
pub use queue::{EventBus, EventHandler, Subscription};

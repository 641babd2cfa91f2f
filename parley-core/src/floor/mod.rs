//! Floor arbitration
//!
//! The floor is the exclusive right to produce the next message. Speakers ask
//! for it with `floor_requested`, give it back with `floor_released`, and learn
//! the outcome from `floor_granted` / `floor_denied`.

pub mod arbitrator;
pub mod queue;

pub use arbitrator::{FloorArbitrator, QueueStatus};
pub use queue::{QueuedRequest, RequestQueue, SpeakerHistory, SpeakerRecord};

use crate::bus::{Event, EventBus, ReleaseCause, SpeakRequest};

/// Publish a floor request on behalf of a speaker
pub fn request_floor(bus: &EventBus, request: SpeakRequest) {
    bus.publish(Event::FloorRequested(request));
}

/// Publish a voluntary release on behalf of a speaker
pub fn release_floor(bus: &EventBus, speaker_id: impl Into<String>) {
    bus.publish(Event::FloorReleased {
        speaker_id: speaker_id.into(),
        cause: ReleaseCause::Voluntary,
    });
}

//! Pending floor requests and recent speakers

use crate::bus::{SpeakRequest, Urgency};
use std::collections::VecDeque;
use tokio::time::Instant;

/// A speak request waiting for the floor
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub request: SpeakRequest,
    pub queued_at: Instant,
}

impl QueuedRequest {
    pub fn new(request: SpeakRequest) -> Self {
        Self {
            request,
            queued_at: Instant::now(),
        }
    }

    pub fn speaker_id(&self) -> &str {
        &self.request.speaker_id
    }

    pub fn urgency(&self) -> Urgency {
        self.request.urgency
    }
}

/// Single queue ordered by urgency, then by arrival.
///
/// Holds at most one request per speaker.
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: VecDeque<QueuedRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert behind every request of equal or higher urgency.
    ///
    /// If the queue then holds more than `max_len` entries the tail is evicted
    /// and returned; that may be the request just inserted.
    pub fn insert(&mut self, entry: QueuedRequest, max_len: usize) -> Option<QueuedRequest> {
        let position = self
            .entries
            .iter()
            .position(|queued| queued.urgency() > entry.urgency())
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);

        if self.entries.len() > max_len {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Drop any pending request from `speaker_id`
    pub fn remove(&mut self, speaker_id: &str) -> Option<QueuedRequest> {
        let position = self
            .entries
            .iter()
            .position(|queued| queued.speaker_id() == speaker_id)?;
        self.entries.remove(position)
    }

    pub fn pop(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    pub fn speaker_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|queued| queued.speaker_id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// When a speaker last gave the floor back
#[derive(Debug, Clone)]
pub struct SpeakerRecord {
    pub speaker_id: String,
    pub last_spoke_at: Instant,
}

/// Bounded record of past speakers, used only for cooldown
#[derive(Debug)]
pub struct SpeakerHistory {
    records: VecDeque<SpeakerRecord>,
    cap: usize,
}

impl SpeakerHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn record(&mut self, speaker_id: impl Into<String>, at: Instant) {
        self.records.push_back(SpeakerRecord {
            speaker_id: speaker_id.into(),
            last_spoke_at: at,
        });
        while self.records.len() > self.cap {
            self.records.pop_front();
        }
    }

    pub fn last_spoke(&self, speaker_id: &str) -> Option<Instant> {
        self.records
            .iter()
            .rev()
            .find(|record| record.speaker_id == speaker_id)
            .map(|record| record.last_spoke_at)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

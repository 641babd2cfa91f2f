//! Floor arbitrator: decides who may speak next

use super::queue::{QueuedRequest, RequestQueue, SpeakerHistory};
use crate::bus::{DenyReason, Event, EventBus, EventKind, ReleaseCause, SpeakRequest, Subscription};
use crate::config::FloorConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Snapshot of who holds the floor and who is waiting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub current: Option<String>,
    pub queued: Vec<String>,
}

#[derive(Debug)]
struct Holder {
    speaker_id: String,
    /// Distinguishes successive grants so a stale timer cannot release a later holder
    grant: u64,
    timeout: CancellationToken,
}

#[derive(Debug)]
struct FloorState {
    holder: Option<Holder>,
    queue: RequestQueue,
    history: SpeakerHistory,
    grants: u64,
    regrant: Option<CancellationToken>,
}

struct ArbitratorInner {
    bus: EventBus,
    config: FloorConfig,
    state: Mutex<FloorState>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Serializes access to the floor across competing speakers.
///
/// Driven by `floor_requested` / `floor_released` events once attached to a
/// bus; the `handle_*` methods are the same entry points without the bus
/// round-trip and return the events they emitted.
#[derive(Clone)]
pub struct FloorArbitrator {
    inner: Arc<ArbitratorInner>,
}

impl FloorArbitrator {
    /// Create a new arbitrator that publishes its decisions on `bus`
    pub fn new(bus: EventBus, config: FloorConfig) -> Self {
        Self {
            inner: Arc::new(ArbitratorInner {
                bus,
                state: Mutex::new(FloorState {
                    holder: None,
                    queue: RequestQueue::new(),
                    history: SpeakerHistory::new(config.history_cap),
                    grants: 0,
                    regrant: None,
                }),
                config,
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Subscribe to floor requests and voluntary releases on the bus
    pub fn attach(&self) {
        let bus = &self.inner.bus;

        // Handlers act before returning so requests and releases are applied
        // in publish order.
        let arbitrator = self.clone();
        let requests = bus.subscribe(EventKind::FloorRequested, "floor", move |event| {
            if let Event::FloorRequested(request) = event {
                arbitrator.handle_request(request);
            }
            async { Ok(()) }
        });

        let arbitrator = self.clone();
        let releases = bus.subscribe(EventKind::FloorReleased, "floor", move |event| {
            // Timeout and forced releases originate here; only speakers' own
            // releases need handling.
            if let Event::FloorReleased {
                speaker_id,
                cause: ReleaseCause::Voluntary,
            } = event
            {
                arbitrator.handle_release(&speaker_id);
            }
            async { Ok(()) }
        });

        self.inner.subscriptions.lock().extend([requests, releases]);
    }

    /// Drop the bus subscriptions made by [`FloorArbitrator::attach`]
    pub fn detach(&self) {
        for subscription in self.inner.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
    }

    /// Handle a floor request: deny, or queue and possibly grant.
    pub fn handle_request(&self, request: SpeakRequest) -> Vec<Event> {
        let mut emitted = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let speaker_id = request.speaker_id.clone();

            if state.holder.as_ref().map(|h| h.speaker_id.as_str()) == Some(speaker_id.as_str()) {
                debug!(speaker_id = %speaker_id, "Holder re-requested the floor, ignoring");
                return emitted;
            }

            let cooldown = Duration::from_millis(self.inner.config.cooldown_ms);
            if let Some(last) = state.history.last_spoke(&speaker_id) {
                if Instant::now().duration_since(last) < cooldown {
                    debug!(speaker_id = %speaker_id, "Floor denied: cooldown");
                    emitted.push(Event::FloorDenied {
                        speaker_id,
                        reason: DenyReason::Cooldown,
                    });
                    drop(state);
                    self.publish_all(&emitted);
                    return emitted;
                }
            }

            state.queue.remove(&speaker_id);
            let max_queue = self.inner.config.max_queue;
            if let Some(evicted) = state.queue.insert(QueuedRequest::new(request), max_queue) {
                warn!(speaker_id = %evicted.speaker_id(), "Floor denied: queue full");
                emitted.push(Event::FloorDenied {
                    speaker_id: evicted.speaker_id().to_string(),
                    reason: DenyReason::QueueFull,
                });
            }

            // While a regrant is pending it picks the best queued request itself
            if state.holder.is_none() && state.regrant.is_none() {
                self.grant_next(&mut state, &mut emitted);
            }
        }

        self.publish_all(&emitted);
        emitted
    }

    /// Handle a voluntary release. Ignored unless `speaker_id` holds the floor.
    pub fn handle_release(&self, speaker_id: &str) -> bool {
        self.release(speaker_id, ReleaseCause::Voluntary, None)
    }

    /// Administrative release; a no-op unless `speaker_id` holds the floor
    pub fn force_release(&self, speaker_id: &str) -> bool {
        self.release(speaker_id, ReleaseCause::Forced, None)
    }

    pub fn current_speaker(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .holder
            .as_ref()
            .map(|h| h.speaker_id.clone())
    }

    pub fn has_floor(&self, speaker_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .holder
            .as_ref()
            .is_some_and(|h| h.speaker_id == speaker_id)
    }

    pub fn queue_status(&self) -> QueueStatus {
        let state = self.inner.state.lock();
        QueueStatus {
            current: state.holder.as_ref().map(|h| h.speaker_id.clone()),
            queued: state.queue.speaker_ids(),
        }
    }

    /// Clear holder, queue and history, cancelling any pending timer
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        if let Some(holder) = state.holder.take() {
            holder.timeout.cancel();
        }
        if let Some(regrant) = state.regrant.take() {
            regrant.cancel();
        }
        state.queue.clear();
        state.history.clear();
        debug!("Floor reset");
    }

    pub fn config(&self) -> FloorConfig {
        self.inner.config
    }

    fn release(&self, speaker_id: &str, cause: ReleaseCause, grant: Option<u64>) -> bool {
        {
            let mut state = self.inner.state.lock();
            let matches = state.holder.as_ref().is_some_and(|h| {
                h.speaker_id == speaker_id && grant.map_or(true, |g| g == h.grant)
            });
            if !matches {
                debug!(speaker_id = %speaker_id, ?cause, "Stale release ignored");
                return false;
            }

            if let Some(holder) = state.holder.take() {
                holder.timeout.cancel();
            }
            state.history.record(speaker_id, Instant::now());
            info!(speaker_id = %speaker_id, ?cause, "Floor released");
            self.schedule_regrant(&mut state);
        }

        if cause != ReleaseCause::Voluntary {
            self.inner.bus.publish(Event::FloorReleased {
                speaker_id: speaker_id.to_string(),
                cause,
            });
        }
        true
    }

    fn grant_next(&self, state: &mut FloorState, emitted: &mut Vec<Event>) {
        let Some(next) = state.queue.pop() else {
            return;
        };

        state.grants += 1;
        let grant = state.grants;
        let speaker_id = next.request.speaker_id;
        let timeout = CancellationToken::new();

        info!(speaker_id = %speaker_id, urgency = ?next.request.urgency, "Floor granted");
        self.arm_timeout(speaker_id.clone(), grant, timeout.clone());
        state.holder = Some(Holder {
            speaker_id: speaker_id.clone(),
            grant,
            timeout,
        });
        emitted.push(Event::FloorGranted {
            speaker_id,
            reason: next.request.reason,
        });
    }

    fn arm_timeout(&self, speaker_id: String, grant: u64, token: CancellationToken) {
        let arbitrator = self.clone();
        let limit = Duration::from_millis(self.inner.config.floor_timeout_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    warn!(speaker_id = %speaker_id, "Floor timed out");
                    arbitrator.release(&speaker_id, ReleaseCause::Timeout, Some(grant));
                }
            }
        });
    }

    /// Grant the next request after a short delay so competing requests can land
    fn schedule_regrant(&self, state: &mut FloorState) {
        if let Some(previous) = state.regrant.take() {
            previous.cancel();
        }

        let delay = Duration::from_millis(self.inner.config.regrant_delay_ms);
        if delay.is_zero() {
            let mut emitted = Vec::new();
            self.grant_next(state, &mut emitted);
            self.publish_all(&emitted);
            return;
        }

        let token = CancellationToken::new();
        state.regrant = Some(token.clone());
        let arbitrator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => arbitrator.regrant(),
            }
        });
    }

    fn regrant(&self) {
        let mut emitted = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.regrant = None;
            if state.holder.is_none() {
                self.grant_next(&mut state, &mut emitted);
            }
        }
        self.publish_all(&emitted);
    }

    fn publish_all(&self, events: &[Event]) {
        for event in events {
            self.inner.bus.publish(event.clone());
        }
    }
}

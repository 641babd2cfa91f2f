//! Feeds bus messages into a memory store, one at a time

use super::store::MemoryStore;
use crate::bus::{Event, EventBus, EventKind, Message, Subscription};
use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const SUBSCRIBER_ID: &str = "memory";

/// Ordered consumer of `message_appended` events.
///
/// The bus handler only forwards messages into a channel; a single task
/// drains it, keeps a bounded window of recent messages and calls
/// [`MemoryStore::process_message`], so messages are ingested strictly in the
/// order they were appended.
pub struct MemoryIngestor {
    subscription: SyncMutex<Option<Subscription>>,
    processed: watch::Receiver<usize>,
    task: JoinHandle<()>,
}

impl MemoryIngestor {
    pub fn attach(bus: &EventBus, store: Arc<Mutex<MemoryStore>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let subscription = bus.subscribe(EventKind::MessageAppended, SUBSCRIBER_ID, move |event| {
            if let Event::MessageAppended { message, .. } = event {
                let _ = tx.send(message);
            }
            async { Ok(()) }
        });

        let (processed_tx, processed) = watch::channel(0usize);
        let publisher = bus.clone();
        let task = tokio::spawn(async move {
            let mut window: VecDeque<Message> = VecDeque::new();
            let mut count = 0usize;

            while let Some(message) = rx.recv().await {
                let mut store = store.lock().await;
                let cap = store.limits().max_message_history.max(1);
                window.push_back(message);
                while window.len() > cap {
                    window.pop_front();
                }

                let Some(newest) = window.back().cloned() else {
                    continue;
                };
                let summary = store
                    .process_message(&newest, window.make_contiguous())
                    .await;
                drop(store);

                if let Some(entry) = summary {
                    if let Some(range) = entry.message_range {
                        publisher.publish(Event::SummaryCreated {
                            entry_id: entry.id,
                            start: range.start,
                            end: range.end,
                        });
                    }
                }

                count += 1;
                let _ = processed_tx.send(count);
            }
            debug!(processed = count, "Memory ingestor stopped");
        });

        info!("Memory ingestor attached");
        Self {
            subscription: SyncMutex::new(Some(subscription)),
            processed,
            task,
        }
    }

    /// Number of messages ingested so far
    pub fn processed(&self) -> usize {
        *self.processed.borrow()
    }

    /// Wait until at least `count` messages have been ingested.
    ///
    /// Returns the number processed, which is lower than `count` only if the
    /// ingestor stopped first.
    pub async fn wait_for(&self, count: usize) -> usize {
        let mut processed = self.processed.clone();
        let result = processed.wait_for(|n| *n >= count).await.map(|n| *n);
        result.unwrap_or_else(|_| *processed.borrow())
    }

    /// Stop receiving messages; already queued ones are still ingested
    pub fn detach(&self) -> bool {
        match self.subscription.lock().take() {
            Some(subscription) => subscription.unsubscribe(),
            None => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

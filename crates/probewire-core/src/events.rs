//! Observer notifications published by the engine and streamer.
//!
//! Publishing never blocks and never fails: with no subscribers the event is
//! dropped, and a subscriber that falls behind by more than the configured
//! capacity receives `RecvError::Lagged` instead of slowing requests down.

use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::paging::Strategy;
use crate::request::Content;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A request is about to be sent. `url` has its secrets redacted.
    Request { endpoint: String, url: String },
    /// A transient failure occurred; the engine will sleep `delay` and try again.
    /// `url` is the redacted request URL, so concurrent pages stay distinguishable.
    Retry {
        endpoint: String,
        url: String,
        attempt: u32,
        max_retries: u32,
        delay: Duration,
        error: String,
    },
    /// The streamer switched to serial mode because the result set is large.
    StrategySwitch {
        session: Uuid,
        content: Content,
        total: usize,
        threshold: usize,
        strategy: Strategy,
    },
    /// A serial stream ended on an empty page before the reported total.
    EarlyStop {
        session: Uuid,
        content: Content,
        yielded: usize,
        reported_total: usize,
    },
    /// A parallel stream faulted; these pages were cancelled unread.
    PagesAbandoned {
        session: Uuid,
        failed_page: usize,
        abandoned: Vec<usize>,
    },
}

/// Broadcast fan-out of [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ClientEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

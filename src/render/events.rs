//! Render notifications published for UI consumers

use flume::{Receiver, Sender};

use super::page::PageId;
use super::request::RenderError;

/// Events the render core publishes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderEvent {
    /// A page finished rendering and is displayable
    PageRendered { page: PageId },
    /// A page failed to render and stays blank until retried
    PageRenderFailed { page: PageId, error: RenderError },
    /// A running render was abandoned
    PageCancelled { page: PageId },
    /// All rendered output was released
    RenderCleanup,
    /// Nothing left to render for the current snapshot
    Idle,
}

/// Fan-out of render events to any number of subscribers
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<RenderEvent>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber
    pub fn subscribe(&mut self) -> Receiver<RenderEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, dropping disconnected ones
    pub fn publish(&mut self, event: RenderEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

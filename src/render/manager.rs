//! Render manager - ties visibility updates, the page buffer and the worker together

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::buffer::Buffer;
use super::events::{EventBus, RenderEvent};
use super::page::{Document, PageHandle, PageId, RenderingState};
use super::queue::{Completion, RenderingQueue};
use super::request::{RenderError, RenderRequest, RenderResponse};
use super::visibility::{VisibilityTracker, VisibleSet};
use super::worker::{RenderBackend, spawn_worker};
use super::{DEFAULT_CACHE_SIZE, DEFAULT_IDLE_CLEANUP_TIMEOUT};

/// Tunables for the render manager
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderConfig {
    /// Lower bound for the page buffer capacity
    pub base_cache_size: usize,
    /// Speculatively render one extra neighbour (spread layouts)
    pub pre_render_extra: bool,
    /// How long the scheduler must stay idle before unfinished pages and
    /// engine caches are released
    pub idle_cleanup_timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            base_cache_size: DEFAULT_CACHE_SIZE,
            pre_render_extra: false,
            idle_cleanup_timeout: DEFAULT_IDLE_CLEANUP_TIMEOUT,
        }
    }
}

/// Buffer capacity for a snapshot showing `visible` pages
#[must_use]
pub fn buffer_capacity(base_cache_size: usize, visible: usize) -> usize {
    base_cache_size.max(2 * visible + 1)
}

/// Orchestrates page rendering for one viewer.
///
/// All page state lives on the thread that owns the manager. Renders run on a
/// worker thread; their results are applied by [`RenderManager::poll_responses`]
/// or [`RenderManager::wait_for_response`].
pub struct RenderManager<P, O> {
    config: RenderConfig,
    document: Document<P, O>,
    next_epoch: u64,
    buffer: Buffer<PageHandle<P, O>>,
    queue: RenderingQueue,
    request_tx: Sender<RenderRequest<P>>,
    response_rx: Receiver<RenderResponse<P, O>>,
    events: EventBus,
    tracker: Option<Box<dyn VisibilityTracker>>,
    last_visible: VisibleSet,
    idle_since: Option<Instant>,
    worker: Option<JoinHandle<()>>,
}

impl<P, O> RenderManager<P, O>
where
    P: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// Create a manager with a worker thread running `backend`
    pub fn new<B>(config: RenderConfig, backend: B) -> std::io::Result<Self>
    where
        B: RenderBackend<Page = P, Output = O>,
    {
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();
        let worker = spawn_worker(backend, request_rx, response_tx)?;

        let mut manager = Self::with_channels(config, request_tx, response_rx);
        manager.worker = Some(worker);
        Ok(manager)
    }
}

impl<P, O> RenderManager<P, O> {
    /// Create a manager talking to whatever serves the other end of the channels
    #[must_use]
    pub fn with_channels(
        config: RenderConfig,
        request_tx: Sender<RenderRequest<P>>,
        response_rx: Receiver<RenderResponse<P, O>>,
    ) -> Self {
        let buffer = Buffer::new(config.base_cache_size);
        Self {
            config,
            document: Document::empty(0),
            next_epoch: 1,
            buffer,
            queue: RenderingQueue::new(),
            request_tx,
            response_rx,
            events: EventBus::new(),
            tracker: None,
            last_visible: VisibleSet::empty(),
            idle_since: None,
            worker: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Source used by [`RenderManager::force_rendering`] when no snapshot is given
    pub fn set_visibility_tracker(&mut self, tracker: Box<dyn VisibilityTracker>) {
        self.tracker = Some(tracker);
    }

    /// Replace the current document with a fresh one of `page_count` pages
    pub fn set_document(&mut self, page_count: u32) {
        if self.document.page_count() > 0 {
            self.cleanup();
        }
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.document = Document::new(epoch, page_count);
        self.last_visible = VisibleSet::empty();
        self.queue.clear_active();
        self.queue.begin_pass();
        self.idle_since = None;
        info!("Loaded document with {page_count} pages (epoch {epoch})");
    }

    /// Tear down the current document
    pub fn close_document(&mut self) {
        self.cleanup();
        self.document = Document::empty(self.document.epoch());
        self.last_visible = VisibleSet::empty();
        info!("Document closed");
    }

    /// Apply a new visibility snapshot and start rendering what it needs
    pub fn update(&mut self, visible: VisibleSet) -> bool {
        self.queue.begin_pass();

        let keep: HashSet<PageId> = visible.ids().collect();
        let capacity = buffer_capacity(self.config.base_cache_size, visible.len());
        self.buffer.resize(capacity, &keep);

        let priority: HashSet<PageId> =
            RenderingQueue::priority_order(&visible, &self.document, self.config.pre_render_extra)
                .into_iter()
                .collect();
        for page in self.queue.cancel_outside(&priority, &self.document) {
            self.events.publish(RenderEvent::PageCancelled { page });
        }

        self.last_visible = visible;
        self.pump()
    }

    /// Render the highest-priority page if nothing is rendering yet.
    ///
    /// Without a snapshot the visibility tracker is asked, falling back to the
    /// last snapshot seen. Returns `false` once everything is caught up.
    pub fn force_rendering(&mut self, visible: Option<VisibleSet>) -> bool {
        if let Some(visible) = visible {
            self.last_visible = visible;
        } else if let Some(tracker) = &self.tracker {
            self.last_visible = tracker.visible_pages();
        }
        self.pump()
    }

    fn pump(&mut self) -> bool {
        if self.queue.is_printing() {
            return false;
        }
        if self.queue.is_busy() {
            return true;
        }

        let Some(id) = self.queue.highest_priority(
            &self.last_visible,
            &self.document,
            self.config.pre_render_extra,
        ) else {
            self.mark_idle();
            return false;
        };

        let Some(page) = self.document.page(id) else {
            return false;
        };
        let Some((task, token)) = self.queue.start(page, self.document.epoch()) else {
            return false;
        };
        self.idle_since = None;

        let resource = page.view().resource().cloned();
        let request = RenderRequest::Page {
            task,
            resource,
            token,
        };
        if self.request_tx.send(request).is_err() {
            error!("Render worker is gone, cannot render page {id}");
            let response = RenderResponse::Failed {
                task,
                resource: None,
                error: RenderError::RenderFailed {
                    page: id,
                    detail: "render worker unavailable".to_string(),
                },
            };
            self.apply(response);
            return false;
        }
        true
    }

    fn mark_idle(&mut self) {
        if self.idle_since.is_none() {
            debug!("Render queue idle");
            self.idle_since = Some(Instant::now());
            self.events.publish(RenderEvent::Idle);
        }
    }

    fn apply(&mut self, response: RenderResponse<P, O>) {
        match self
            .queue
            .complete(response, &self.document, &mut self.buffer)
        {
            Completion::Finished(page) => {
                self.events.publish(RenderEvent::PageRendered { page });
            }
            Completion::Failed(error) => {
                let page = error.page();
                self.events
                    .publish(RenderEvent::PageRenderFailed { page, error });
            }
            Completion::Aborted(page) => {
                self.events.publish(RenderEvent::PageCancelled { page });
            }
            Completion::Stale(task) => {
                debug!(
                    "Discarding stale completion for page {} (generation {})",
                    task.page, task.generation
                );
            }
        }
    }

    /// Apply every completion the worker has sent so far. Returns how many
    /// responses were handled.
    pub fn poll_responses(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(response) = self.response_rx.try_recv() {
            self.apply(response);
            self.pump();
            handled += 1;
        }
        handled
    }

    /// Block until one completion arrives or `timeout` passes
    pub fn wait_for_response(&mut self, timeout: Duration) -> bool {
        match self.response_rx.recv_timeout(timeout) {
            Ok(response) => {
                self.apply(response);
                self.pump();
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    fn release_unfinished(&mut self) {
        for page in self.document.iter() {
            let mut view = page.view_mut();
            if view.state() != RenderingState::Finished {
                view.reset();
            }
        }
        self.queue.clear_active();
        self.queue.begin_pass();
    }

    /// Release every rendered page and the engine's document-wide caches
    pub fn cleanup(&mut self) {
        self.release_unfinished();
        self.buffer.reset();
        self.send_cleanup();
        self.idle_since = None;
        info!("Render cleanup: released all rendered pages");
        self.events.publish(RenderEvent::RenderCleanup);
    }

    /// Release unfinished pages and engine caches once the queue has been idle
    /// for the configured timeout. Rendered pages stay cached.
    pub fn cleanup_if_idle(&mut self, now: Instant) -> bool {
        let Some(since) = self.idle_since else {
            return false;
        };
        if now.saturating_duration_since(since) < self.config.idle_cleanup_timeout {
            return false;
        }
        debug!("Idle for {:?}, releasing engine caches", now - since);
        self.release_unfinished();
        self.send_cleanup();
        self.idle_since = None;
        true
    }

    /// Suspend or resume starting new renders
    pub fn set_printing(&mut self, printing: bool) {
        self.queue.set_printing(printing);
        if !printing {
            self.pump();
        }
    }

    /// Ids held by the page buffer, least recently used first
    #[must_use]
    pub fn cached_pages(&self) -> Vec<PageId> {
        self.buffer.ids()
    }

    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.document.page_count()
    }

    #[must_use]
    pub fn page_state(&self, id: PageId) -> Option<RenderingState> {
        self.document.state_of(id)
    }

    #[must_use]
    pub fn page_generation(&self, id: PageId) -> Option<u64> {
        self.document.page(id).map(|page| page.view().generation())
    }

    #[must_use]
    pub fn page_output(&self, id: PageId) -> Option<Arc<O>> {
        self.document
            .page(id)
            .and_then(|page| page.view().output().cloned())
    }

    #[must_use]
    pub fn page_error(&self, id: PageId) -> Option<RenderError> {
        self.document
            .page(id)
            .and_then(|page| page.view().last_error().cloned())
    }

    #[must_use]
    pub fn is_highest_priority(&self, id: PageId) -> bool {
        self.queue.is_highest_priority(id)
    }

    /// Whether the queue ran out of work for the last snapshot
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.idle_since.is_some()
    }

    /// Receive render events from now on
    pub fn subscribe(&mut self) -> Receiver<RenderEvent> {
        self.events.subscribe()
    }

    /// Stop the worker thread
    pub fn shutdown(&self) {
        if self.request_tx.send(RenderRequest::Shutdown).is_err() {
            warn!("Render worker already stopped");
        }
    }

    fn send_cleanup(&self) {
        if self.request_tx.send(RenderRequest::Cleanup).is_err() {
            warn!("Render worker is gone, engine caches not released");
        }
    }
}

impl<P, O> Drop for RenderManager<P, O> {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(worker) = self.worker.take() {
            debug!("Detaching render worker {:?}", worker.thread().name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ScrollDirection;

    fn visible(ids: &[PageId]) -> VisibleSet {
        VisibleSet::from_ids(ids.iter().copied(), ScrollDirection::Forward).unwrap()
    }

    #[test]
    fn capacity_is_twice_visible_plus_one() {
        assert_eq!(buffer_capacity(10, 3), 10);
        assert_eq!(buffer_capacity(10, 6), 13);
        assert_eq!(buffer_capacity(1, 0), 1);
    }

    #[test]
    fn update_sizes_buffer_from_snapshot() {
        let (request_tx, _request_rx) = flume::unbounded();
        let (_response_tx, response_rx) = flume::unbounded::<RenderResponse<(), ()>>();
        let mut manager = RenderManager::with_channels(
            RenderConfig {
                base_cache_size: 2,
                ..RenderConfig::default()
            },
            request_tx,
            response_rx,
        );
        manager.set_document(20);

        manager.update(visible(&[3, 4, 5]));
        assert_eq!(manager.buffer_capacity(), 7);
    }

    #[test]
    fn update_dispatches_one_render() {
        let (request_tx, request_rx) = flume::unbounded();
        let (_response_tx, response_rx) = flume::unbounded::<RenderResponse<(), ()>>();
        let mut manager =
            RenderManager::with_channels(RenderConfig::default(), request_tx, response_rx);
        manager.set_document(10);

        assert!(manager.update(visible(&[1, 2])));
        assert_eq!(request_rx.len(), 1);
        assert_eq!(manager.page_state(1), Some(RenderingState::Running));
        assert_eq!(manager.page_state(2), Some(RenderingState::Initial));

        assert!(manager.force_rendering(None));
        assert_eq!(request_rx.len(), 1);
    }

    #[test]
    fn cleanup_without_worker_still_releases_pages() {
        let (request_tx, request_rx) = flume::unbounded();
        let (_response_tx, response_rx) = flume::unbounded::<RenderResponse<(), ()>>();
        let mut manager =
            RenderManager::with_channels(RenderConfig::default(), request_tx, response_rx);
        manager.set_document(4);
        manager.update(visible(&[1]));
        drop(request_rx);

        manager.cleanup();
        assert_eq!(manager.page_state(1), Some(RenderingState::Initial));
        assert!(!manager.update(visible(&[2])));
        assert_eq!(manager.page_state(2), Some(RenderingState::Error));
    }

    #[test]
    fn empty_document_goes_idle() {
        let (request_tx, _request_rx) = flume::unbounded();
        let (_response_tx, response_rx) = flume::unbounded::<RenderResponse<(), ()>>();
        let mut manager =
            RenderManager::with_channels(RenderConfig::default(), request_tx, response_rx);
        let events = manager.subscribe();

        assert!(!manager.update(visible(&[1])));
        assert!(manager.is_idle());
        assert_eq!(events.try_recv().unwrap(), RenderEvent::Idle);
    }
}

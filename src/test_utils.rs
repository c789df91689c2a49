//! Helpers for driving the render manager deterministically in tests

use std::sync::Arc;

use flume::{Receiver, Sender};

use crate::render::{
    CancellationToken, PageId, RenderConfig, RenderError, RenderManager, RenderRequest,
    RenderResponse, RenderTask, ScrollDirection, VisibleSet,
};

/// Snapshot of fully visible pages
pub fn visible(ids: &[PageId], scroll: ScrollDirection) -> VisibleSet {
    VisibleSet::from_ids(ids.iter().copied(), scroll).expect("test snapshot ids must be increasing")
}

/// Test-side end of the worker channels.
///
/// Requests pile up until the test decides how and when each one completes,
/// so stale and out-of-order completions can be reproduced exactly.
pub struct ManualWorker<P, O> {
    requests: Receiver<RenderRequest<P>>,
    responses: Sender<RenderResponse<P, O>>,
    pending: Vec<(RenderTask, CancellationToken)>,
    cleanups: usize,
    shutdowns: usize,
}

/// A manager wired to a [`ManualWorker`] with a document of `page_count` pages
pub fn manual_manager<P, O>(
    config: RenderConfig,
    page_count: u32,
) -> (RenderManager<P, O>, ManualWorker<P, O>) {
    let (request_tx, request_rx) = flume::unbounded();
    let (response_tx, response_rx) = flume::unbounded();
    let mut manager = RenderManager::with_channels(config, request_tx, response_rx);
    manager.set_document(page_count);
    let worker = ManualWorker {
        requests: request_rx,
        responses: response_tx,
        pending: Vec::new(),
        cleanups: 0,
        shutdowns: 0,
    };
    (manager, worker)
}

impl<P, O> ManualWorker<P, O> {
    /// Move newly sent requests into the pending list
    pub fn receive(&mut self) -> Vec<RenderTask> {
        let mut received = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                RenderRequest::Page { task, token, .. } => {
                    received.push(task);
                    self.pending.push((task, token));
                }
                RenderRequest::Cleanup => self.cleanups += 1,
                RenderRequest::Shutdown => self.shutdowns += 1,
            }
        }
        received
    }

    /// Pages with a render request awaiting an answer, oldest first
    pub fn pending_pages(&mut self) -> Vec<PageId> {
        self.receive();
        self.pending.iter().map(|(task, _)| task.page).collect()
    }

    /// Oldest pending task for `page`
    pub fn task_for(&mut self, page: PageId) -> Option<RenderTask> {
        self.receive();
        self.pending
            .iter()
            .find(|(task, _)| task.page == page)
            .map(|(task, _)| *task)
    }

    /// Whether the pending task for `page` was asked to stop
    pub fn is_cancelled(&mut self, page: PageId) -> bool {
        self.receive();
        self.pending
            .iter()
            .any(|(task, token)| task.page == page && token.is_cancelled())
    }

    fn take(&mut self, page: PageId) -> RenderTask {
        self.receive();
        let index = self
            .pending
            .iter()
            .position(|(task, _)| task.page == page)
            .unwrap_or_else(|| panic!("no pending render for page {page}"));
        self.pending.remove(index).0
    }

    /// Answer the oldest request for `page` with rendered output
    pub fn complete(&mut self, page: PageId, resource: P, output: O) -> RenderTask {
        let task = self.take(page);
        self.send(RenderResponse::Rendered {
            task,
            resource: Arc::new(resource),
            output: Arc::new(output),
        });
        task
    }

    /// Answer the oldest request for `page` with an error
    pub fn fail(&mut self, page: PageId, error: RenderError) -> RenderTask {
        let task = self.take(page);
        self.send(RenderResponse::Failed {
            task,
            resource: None,
            error,
        });
        task
    }

    /// Acknowledge the oldest request for `page` as cancelled
    pub fn acknowledge_cancel(&mut self, page: PageId) -> RenderTask {
        let task = self.take(page);
        self.send(RenderResponse::Cancelled {
            task,
            resource: None,
        });
        task
    }

    fn send(&self, response: RenderResponse<P, O>) {
        self.responses
            .send(response)
            .expect("manager dropped its response channel");
    }

    pub fn cleanups(&mut self) -> usize {
        self.receive();
        self.cleanups
    }

    pub fn shutdowns(&mut self) -> usize {
        self.receive();
        self.shutdowns
    }
}

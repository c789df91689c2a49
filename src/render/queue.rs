//! Render scheduling: which page renders next and what gets cancelled

use std::collections::HashSet;

use log::{debug, error};

use super::buffer::Buffer;
use super::cancel::CancellationToken;
use super::page::{Document, PageHandle, PageId, RenderingState};
use super::request::{RenderError, RenderResponse, RenderTask};
use super::visibility::VisibleSet;

/// Result of applying a worker response
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Page is now `Finished` and held by the buffer
    Finished(PageId),
    /// Page is now `Error`
    Failed(RenderError),
    /// The render stopped on its own before completing; page is `Paused`
    Aborted(PageId),
    /// The task was superseded; nothing changed
    Stale(RenderTask),
}

/// Picks the highest-priority page and tracks the single in-flight render
#[derive(Debug, Default)]
pub struct RenderingQueue {
    active: Option<RenderTask>,
    highest_priority_page: Option<PageId>,
    failed_in_pass: HashSet<PageId>,
    printing: bool,
}

impl RenderingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages in render priority order, regardless of their state.
    ///
    /// Visible pages on the travel side of the first visible page come first,
    /// nearest first, then the ones behind it. With `pre_render_extra` one
    /// neighbour past the visible range in the travel direction follows.
    #[must_use]
    pub fn priority_order<P, O>(
        visible: &VisibleSet,
        document: &Document<P, O>,
        pre_render_extra: bool,
    ) -> Vec<PageId> {
        let Some(first) = visible.first() else {
            return Vec::new();
        };
        let forward = visible.scroll().is_forward();

        let mut order: Vec<PageId> = visible.ids().filter(|id| document.contains(*id)).collect();
        order.sort_by_key(|&id| {
            let ahead = if forward { id >= first } else { id <= first };
            (!ahead, id.abs_diff(first), id)
        });

        if pre_render_extra {
            if let Some(id) = Self::pre_render_neighbour(visible, document) {
                order.push(id);
            }
        }

        order
    }

    /// Page just past the visible range in the travel direction, if it exists
    fn pre_render_neighbour<P, O>(
        visible: &VisibleSet,
        document: &Document<P, O>,
    ) -> Option<PageId> {
        let neighbour = if visible.scroll().is_forward() {
            visible.highest().and_then(|id| id.checked_add(1))
        } else {
            visible.lowest().and_then(|id| id.checked_sub(1))
        };
        neighbour.filter(|id| document.contains(*id))
    }

    /// Highest-priority page that can be (re)started now.
    ///
    /// The pre-render neighbour is only considered once no visible page is
    /// left in a candidate state, including pages that failed in this pass.
    #[must_use]
    pub fn highest_priority<P, O>(
        &self,
        visible: &VisibleSet,
        document: &Document<P, O>,
        pre_render_extra: bool,
    ) -> Option<PageId> {
        let is_candidate =
            |id: &PageId| document.state_of(*id).is_some_and(RenderingState::is_candidate);

        let order = Self::priority_order(visible, document, false);
        if let Some(id) = order
            .iter()
            .copied()
            .find(|id| !self.failed_in_pass.contains(id) && is_candidate(id))
        {
            return Some(id);
        }
        if !pre_render_extra || order.iter().any(is_candidate) {
            return None;
        }
        Self::pre_render_neighbour(visible, document).filter(is_candidate)
    }

    /// Whether `id` is the page the last selection picked
    #[must_use]
    pub fn is_highest_priority(&self, id: PageId) -> bool {
        self.highest_priority_page == Some(id)
    }

    /// Start a new scheduling pass; pages that failed earlier are eligible again
    pub fn begin_pass(&mut self) {
        self.failed_in_pass.clear();
    }

    #[must_use]
    pub fn active(&self) -> Option<&RenderTask> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn is_printing(&self) -> bool {
        self.printing
    }

    pub fn set_printing(&mut self, printing: bool) {
        self.printing = printing;
    }

    /// Move `page` to `Running` and record the task
    pub fn start<P, O>(
        &mut self,
        page: &PageHandle<P, O>,
        epoch: u64,
    ) -> Option<(RenderTask, CancellationToken)> {
        let token = CancellationToken::new();
        let mut view = page.view_mut();
        let generation = view.start(token.clone())?;
        let task = RenderTask {
            page: view.id(),
            generation,
            epoch,
        };
        debug!("Starting render of page {} (generation {generation})", task.page);
        self.active = Some(task);
        self.highest_priority_page = Some(task.page);
        Some((task, token))
    }

    /// Cancel every running page outside `keep`. Returns the cancelled ids.
    pub fn cancel_outside<P, O>(
        &mut self,
        keep: &HashSet<PageId>,
        document: &Document<P, O>,
    ) -> Vec<PageId> {
        let mut cancelled = Vec::new();
        for page in document.iter() {
            let mut view = page.view_mut();
            if view.state() != RenderingState::Running || keep.contains(&view.id()) {
                continue;
            }
            if view.cancel() {
                debug!("Cancelled render of page {}", view.id());
                cancelled.push(view.id());
            }
        }
        if let Some(task) = self.active {
            if cancelled.contains(&task.page) {
                self.active = None;
            }
        }
        cancelled
    }

    /// Forget the in-flight task, e.g. after the document was reset
    pub fn clear_active(&mut self) {
        self.active = None;
        self.highest_priority_page = None;
    }

    /// Apply a worker response. Stale responses change nothing.
    pub fn complete<P, O>(
        &mut self,
        response: RenderResponse<P, O>,
        document: &Document<P, O>,
        buffer: &mut Buffer<PageHandle<P, O>>,
    ) -> Completion {
        let task = *response.task();
        if self.active == Some(task) {
            self.active = None;
        }

        let page = match document.page(task.page) {
            Some(page) if task.epoch == document.epoch() => page,
            _ => return Completion::Stale(task),
        };

        let fresh = {
            let view = page.view();
            view.generation() == task.generation && view.state() == RenderingState::Running
        };

        match response {
            RenderResponse::Rendered {
                resource, output, ..
            } => {
                let mut view = page.view_mut();
                view.set_resource(resource);
                if !fresh || !view.finish(task.generation, output) {
                    return Completion::Stale(task);
                }
                drop(view);
                buffer.push(page.clone());
                debug!("Page {} finished", task.page);
                Completion::Finished(task.page)
            }

            RenderResponse::Cancelled { resource, .. } => {
                let mut view = page.view_mut();
                if let Some(resource) = resource {
                    view.set_resource(resource);
                }
                if !fresh || !view.cancel() {
                    return Completion::Stale(task);
                }
                debug!("Page {} render aborted", task.page);
                Completion::Aborted(task.page)
            }

            RenderResponse::Failed {
                resource, error, ..
            } => {
                let mut view = page.view_mut();
                if let Some(resource) = resource {
                    view.set_resource(resource);
                }
                if !fresh {
                    return Completion::Stale(task);
                }
                if error.is_abort() {
                    view.cancel();
                    debug!("Page {} render aborted", task.page);
                    return Completion::Aborted(task.page);
                }
                if !view.fail(task.generation, error.clone()) {
                    return Completion::Stale(task);
                }
                error!("Page {}: {error}", task.page);
                self.failed_in_pass.insert(task.page);
                Completion::Failed(error)
            }
        }
    }
}

//! Per-page render state and the document that owns it

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, warn};

use super::buffer::BufferItem;
use super::cancel::CancellationToken;
use super::request::RenderError;

/// 1-based page index within a document
pub type PageId = u32;

/// Render lifecycle of a single page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderingState {
    /// No rendered output and nothing loading
    #[default]
    Initial,
    /// A render is in flight
    Running,
    /// Render was abandoned before completion
    Paused,
    /// Rendered output is valid and displayable
    Finished,
    /// Last render attempt failed
    Error,
}

impl RenderingState {
    /// Whether the scheduler may pick a page in this state
    #[must_use]
    pub const fn is_candidate(self) -> bool {
        matches!(self, Self::Initial | Self::Paused | Self::Error)
    }

    /// Transitions allowed by the page lifecycle. `reset` bypasses this table.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initial | Self::Paused | Self::Error, Self::Running)
                | (Self::Running, Self::Finished | Self::Error | Self::Paused)
                | (Self::Finished, Self::Initial)
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for RenderingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render record of one page.
///
/// `P` is the backing page object handed out by the document provider and
/// `O` is whatever the rendering engine produces for a page.
pub struct PageView<P, O> {
    id: PageId,
    state: RenderingState,
    generation: u64,
    resource: Option<Arc<P>>,
    output: Option<Arc<O>>,
    last_error: Option<RenderError>,
    token: Option<CancellationToken>,
}

impl<P, O> PageView<P, O> {
    #[must_use]
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            state: RenderingState::Initial,
            generation: 0,
            resource: None,
            output: None,
            last_error: None,
            token: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> PageId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> RenderingState {
        self.state
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn resource(&self) -> Option<&Arc<P>> {
        self.resource.as_ref()
    }

    #[must_use]
    pub fn output(&self) -> Option<&Arc<O>> {
        self.output.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&RenderError> {
        self.last_error.as_ref()
    }

    /// Store the backing page object. Keeps the first one fetched.
    pub fn set_resource(&mut self, resource: Arc<P>) {
        if self.resource.is_none() {
            self.resource = Some(resource);
        }
    }

    fn transition(&mut self, next: RenderingState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "Page {}: rejected transition {} -> {}",
                self.id, self.state, next
            );
            return false;
        }
        self.state = next;
        true
    }

    /// Begin a render. Returns the generation snapshot for the new task.
    pub fn start(&mut self, token: CancellationToken) -> Option<u64> {
        if !self.transition(RenderingState::Running) {
            return None;
        }
        self.generation += 1;
        self.last_error = None;
        self.token = Some(token);
        Some(self.generation)
    }

    /// Abandon an in-flight render. Late completions become stale.
    pub fn cancel(&mut self) -> bool {
        if !self.transition(RenderingState::Paused) {
            return false;
        }
        self.generation += 1;
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        true
    }

    /// Accept rendered output for the given task generation
    pub fn finish(&mut self, generation: u64, output: Arc<O>) -> bool {
        if generation != self.generation || !self.transition(RenderingState::Finished) {
            return false;
        }
        self.token = None;
        self.output = Some(output);
        true
    }

    /// Record a failed render for the given task generation
    pub fn fail(&mut self, generation: u64, error: RenderError) -> bool {
        if generation != self.generation || !self.transition(RenderingState::Error) {
            return false;
        }
        self.token = None;
        self.last_error = Some(error);
        true
    }

    /// Drop rendered output and return to `Initial` from any state
    pub fn reset(&mut self) {
        if self.state == RenderingState::Running {
            self.generation += 1;
        }
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if self.state != RenderingState::Initial {
            debug!("Page {}: reset from {}", self.id, self.state);
        }
        self.state = RenderingState::Initial;
        self.output = None;
        self.last_error = None;
    }
}

impl<P, O> std::fmt::Debug for PageView<P, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageView")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("has_resource", &self.resource.is_some())
            .field("has_output", &self.output.is_some())
            .finish_non_exhaustive()
    }
}

/// Shared handle to a page record. The document owns the record; the page
/// cache keeps handles so that eviction can release the page's output.
pub struct PageHandle<P, O>(Rc<RefCell<PageView<P, O>>>);

impl<P, O> PageHandle<P, O> {
    #[must_use]
    pub fn new(id: PageId) -> Self {
        Self(Rc::new(RefCell::new(PageView::new(id))))
    }

    #[must_use]
    pub fn view(&self) -> std::cell::Ref<'_, PageView<P, O>> {
        self.0.borrow()
    }

    #[must_use]
    pub fn view_mut(&self) -> std::cell::RefMut<'_, PageView<P, O>> {
        self.0.borrow_mut()
    }
}

impl<P, O> Clone for PageHandle<P, O> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<P, O> BufferItem for PageHandle<P, O> {
    fn id(&self) -> PageId {
        self.0.borrow().id
    }

    fn destroy(&mut self) {
        self.0.borrow_mut().reset();
    }
}

/// Ordered page records `1..=N` of one loaded document
pub struct Document<P, O> {
    epoch: u64,
    pages: Vec<PageHandle<P, O>>,
}

impl<P, O> Document<P, O> {
    #[must_use]
    pub fn new(epoch: u64, page_count: u32) -> Self {
        Self {
            epoch,
            pages: (1..=page_count).map(PageHandle::new).collect(),
        }
    }

    /// A document with no pages, used before anything is loaded
    #[must_use]
    pub fn empty(epoch: u64) -> Self {
        Self::new(epoch, 0)
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    #[must_use]
    pub fn contains(&self, id: PageId) -> bool {
        id >= 1 && id <= self.page_count()
    }

    #[must_use]
    pub fn page(&self, id: PageId) -> Option<&PageHandle<P, O>> {
        if id == 0 {
            return None;
        }
        self.pages.get(id as usize - 1)
    }

    #[must_use]
    pub fn state_of(&self, id: PageId) -> Option<RenderingState> {
        self.page(id).map(|page| page.view().state())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageHandle<P, O>> {
        self.pages.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestPage = PageView<(), &'static str>;

    #[test]
    fn start_bumps_generation() {
        let mut page = TestPage::new(1);
        assert_eq!(page.start(CancellationToken::new()), Some(1));
        assert_eq!(page.state(), RenderingState::Running);
        assert_eq!(page.generation(), 1);
    }

    #[test]
    fn running_page_cannot_start_again() {
        let mut page = TestPage::new(1);
        page.start(CancellationToken::new());
        assert_eq!(page.start(CancellationToken::new()), None);
        assert_eq!(page.generation(), 1);
    }

    #[test]
    fn cancel_signals_token_and_invalidates_generation() {
        let mut page = TestPage::new(3);
        let token = CancellationToken::new();
        let generation = page.start(token.clone()).unwrap();

        assert!(page.cancel());
        assert!(token.is_cancelled());
        assert_eq!(page.state(), RenderingState::Paused);
        assert_eq!(page.generation(), generation + 1);

        assert!(!page.finish(generation, Arc::new("late")));
        assert_eq!(page.state(), RenderingState::Paused);
        assert!(page.output().is_none());
    }

    #[test]
    fn finish_with_matching_generation() {
        let mut page = TestPage::new(1);
        let generation = page.start(CancellationToken::new()).unwrap();
        assert!(page.finish(generation, Arc::new("pixels")));
        assert_eq!(page.state(), RenderingState::Finished);
        assert_eq!(page.output().map(|o| **o), Some("pixels"));
    }

    #[test]
    fn error_and_paused_pages_can_restart() {
        let mut page = TestPage::new(1);
        let generation = page.start(CancellationToken::new()).unwrap();
        assert!(page.fail(generation, RenderError::RenderAborted { page: 1 }));
        assert!(page.state().is_candidate());
        assert_eq!(page.start(CancellationToken::new()), Some(2));

        page.cancel();
        assert_eq!(page.start(CancellationToken::new()), Some(4));
    }

    #[test]
    fn reset_releases_output() {
        let mut page = TestPage::new(1);
        let generation = page.start(CancellationToken::new()).unwrap();
        page.finish(generation, Arc::new("pixels"));

        page.reset();
        assert_eq!(page.state(), RenderingState::Initial);
        assert!(page.output().is_none());
        assert_eq!(page.generation(), generation);
    }

    #[test]
    fn reset_while_running_makes_completion_stale() {
        let mut page = TestPage::new(1);
        let generation = page.start(CancellationToken::new()).unwrap();
        page.reset();
        assert!(!page.finish(generation, Arc::new("late")));
        assert_eq!(page.state(), RenderingState::Initial);
    }

    #[test]
    fn finished_page_only_goes_back_to_initial() {
        assert!(RenderingState::Finished.can_transition_to(RenderingState::Initial));
        assert!(!RenderingState::Finished.can_transition_to(RenderingState::Running));
        assert!(!RenderingState::Initial.can_transition_to(RenderingState::Finished));
    }

    #[test]
    fn document_pages_are_one_based() {
        let doc: Document<(), ()> = Document::new(1, 3);
        assert!(doc.page(0).is_none());
        assert_eq!(doc.page(1).map(|p| p.view().id()), Some(1));
        assert_eq!(doc.page(3).map(|p| p.view().id()), Some(3));
        assert!(doc.page(4).is_none());
        assert!(doc.contains(3));
        assert!(!doc.contains(0));
    }
}

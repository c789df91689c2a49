//! Render tasks, worker messages and the render error taxonomy

use std::sync::Arc;

use super::cancel::CancellationToken;
use super::page::PageId;

/// One scheduled render, identified by the page generation it was started at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderTask {
    pub page: PageId,
    pub generation: u64,
    /// Document the task belongs to
    pub epoch: u64,
}

/// What the rendering engine is asked to draw
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTarget {
    pub page: PageId,
    pub generation: u64,
}

impl From<&RenderTask> for RenderTarget {
    fn from(task: &RenderTask) -> Self {
        Self {
            page: task.page,
            generation: task.generation,
        }
    }
}

/// Errors from the document provider
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("page {0} not found")]
    NotFound(PageId),

    #[error("page {page} could not be decoded: {detail}")]
    Decode { page: PageId, detail: String },
}

/// Errors from the rendering engine
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenderFailure {
    #[error("render aborted")]
    Aborted,

    #[error("{0}")]
    Failed(String),
}

impl RenderFailure {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Outcome of a render attempt that did not produce output
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("page {page}: backing resource unavailable: {source}")]
    ResourceUnavailable {
        page: PageId,
        #[source]
        source: ProviderError,
    },

    #[error("page {page}: render failed: {detail}")]
    RenderFailed { page: PageId, detail: String },

    #[error("page {page}: render aborted")]
    RenderAborted { page: PageId },
}

impl RenderError {
    #[must_use]
    pub fn page(&self) -> PageId {
        match self {
            Self::ResourceUnavailable { page, .. }
            | Self::RenderFailed { page, .. }
            | Self::RenderAborted { page } => *page,
        }
    }

    /// Cancellation is reported through this type but is not a failure
    #[must_use]
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::RenderAborted { .. })
    }

    #[must_use]
    pub fn from_failure(page: PageId, failure: RenderFailure) -> Self {
        match failure {
            RenderFailure::Aborted => Self::RenderAborted { page },
            RenderFailure::Failed(detail) => Self::RenderFailed { page, detail },
        }
    }
}

/// Request sent to the render worker
#[derive(Debug)]
pub enum RenderRequest<P> {
    /// Fetch the backing page if needed, then render it
    Page {
        task: RenderTask,
        resource: Option<Arc<P>>,
        token: CancellationToken,
    },

    /// Release document-wide caches held by the rendering engine
    Cleanup,

    /// Stop the worker
    Shutdown,
}

/// Response from the render worker
#[derive(Debug)]
pub enum RenderResponse<P, O> {
    /// Rendered page output
    Rendered {
        task: RenderTask,
        resource: Arc<P>,
        output: Arc<O>,
    },

    /// Task observed its cancellation and stopped early
    Cancelled {
        task: RenderTask,
        resource: Option<Arc<P>>,
    },

    /// Fetch or render failed
    Failed {
        task: RenderTask,
        resource: Option<Arc<P>>,
        error: RenderError,
    },
}

impl<P, O> RenderResponse<P, O> {
    #[must_use]
    pub fn task(&self) -> &RenderTask {
        match self {
            Self::Rendered { task, .. } | Self::Cancelled { task, .. } | Self::Failed { task, .. } => {
                task
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_maps_to_render_aborted() {
        let err = RenderError::from_failure(4, RenderFailure::Aborted);
        assert!(err.is_abort());
        assert_eq!(err.page(), 4);
    }

    #[test]
    fn failure_keeps_detail() {
        let err = RenderError::from_failure(2, RenderFailure::failed("bad glyph"));
        assert_eq!(err.to_string(), "page 2: render failed: bad glyph");
        assert!(!err.is_abort());
    }

    #[test]
    fn resource_error_reports_source() {
        let err = RenderError::ResourceUnavailable {
            page: 9,
            source: ProviderError::NotFound(9),
        };
        assert_eq!(
            err.to_string(),
            "page 9: backing resource unavailable: page 9 not found"
        );
        assert_eq!(err.page(), 9);
    }
}

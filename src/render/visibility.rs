//! Visibility snapshots handed in by the viewport tracker

use super::page::PageId;

/// Direction the viewport is moving
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScrollDirection {
    #[default]
    Forward,
    Backward,
}

impl ScrollDirection {
    #[must_use]
    pub fn is_forward(self) -> bool {
        self == Self::Forward
    }
}

/// One page intersecting the viewport
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisiblePage {
    pub id: PageId,
    /// Visible share of the page, 0-100. Informational only.
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VisibilityError {
    #[error("visible page ids must be strictly increasing, got {prev} then {next}")]
    UnorderedIds { prev: PageId, next: PageId },

    #[error("first visible page {0} is not among the visible pages")]
    UnknownFirst(PageId),

    #[error("page id 0 is not a valid page")]
    ZeroId,
}

/// Pages currently intersecting the viewport plus the direction of travel
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibleSet {
    views: Vec<VisiblePage>,
    first: Option<PageId>,
    scroll: ScrollDirection,
}

impl VisibleSet {
    /// Build a snapshot. `first` defaults to the lowest visible id.
    pub fn new(
        views: Vec<VisiblePage>,
        first: Option<PageId>,
        scroll: ScrollDirection,
    ) -> Result<Self, VisibilityError> {
        for pair in views.windows(2) {
            if pair[1].id <= pair[0].id {
                return Err(VisibilityError::UnorderedIds {
                    prev: pair[0].id,
                    next: pair[1].id,
                });
            }
        }
        if views.first().is_some_and(|v| v.id == 0) {
            return Err(VisibilityError::ZeroId);
        }

        let first = match first {
            Some(id) if views.iter().any(|v| v.id == id) => Some(id),
            Some(id) => return Err(VisibilityError::UnknownFirst(id)),
            None => views.first().map(|v| v.id),
        };

        Ok(Self {
            views,
            first,
            scroll,
        })
    }

    /// Fully visible pages `ids`, first page being the lowest id
    pub fn from_ids(
        ids: impl IntoIterator<Item = PageId>,
        scroll: ScrollDirection,
    ) -> Result<Self, VisibilityError> {
        let views = ids
            .into_iter()
            .map(|id| VisiblePage { id, percent: 100 })
            .collect();
        Self::new(views, None, scroll)
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn views(&self) -> &[VisiblePage] {
        &self.views
    }

    pub fn ids(&self) -> impl Iterator<Item = PageId> + '_ {
        self.views.iter().map(|v| v.id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<PageId> {
        self.first
    }

    #[must_use]
    pub fn lowest(&self) -> Option<PageId> {
        self.views.first().map(|v| v.id)
    }

    #[must_use]
    pub fn highest(&self) -> Option<PageId> {
        self.views.last().map(|v| v.id)
    }

    #[must_use]
    pub fn scroll(&self) -> ScrollDirection {
        self.scroll
    }

    #[must_use]
    pub fn contains(&self, id: PageId) -> bool {
        self.views.binary_search_by_key(&id, |v| v.id).is_ok()
    }
}

/// Source of visibility snapshots, owned outside the render core
pub trait VisibilityTracker {
    fn visible_pages(&self) -> VisibleSet;
}

//! In-memory document provider and rasterizer.
//!
//! Stands in for a real decoding/rendering engine: pages are blank rasters of
//! a fixed size, fetches and renders can be made to fail per page, and renders
//! can be slowed down to make cancellation observable.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::render::{
    CancellationToken, PageId, ProviderError, RenderBackend, RenderFailure, RenderTarget,
};

const RENDER_SLICES: u32 = 8;

/// Decoded page of a synthetic document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticPage {
    pub id: PageId,
    pub width: u32,
    pub height: u32,
}

/// Rendered output of a synthetic page
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    pub page: PageId,
    pub generation: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("page", &self.page)
            .field("generation", &self.generation)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixels_len", &self.pixels.len())
            .finish()
    }
}

/// Calls observed by a [`SyntheticBackend`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    GetPage(PageId),
    Render(PageId),
    Cleanup,
}

#[derive(Clone, Debug)]
pub struct SyntheticBackend {
    page_count: u32,
    page_size: (u32, u32),
    fail_fetch: HashSet<PageId>,
    fail_render: HashSet<PageId>,
    render_delay: Duration,
    calls: Arc<Mutex<Vec<BackendCall>>>,
}

impl SyntheticBackend {
    #[must_use]
    pub fn new(page_count: u32) -> Self {
        Self {
            page_count,
            page_size: (16, 24),
            fail_fetch: HashSet::new(),
            fail_render: HashSet::new(),
            render_delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fetching `page` fails with a decode error
    #[must_use]
    pub fn with_broken_page(mut self, page: PageId) -> Self {
        self.fail_fetch.insert(page);
        self
    }

    /// Rendering `page` fails
    #[must_use]
    pub fn with_failing_render(mut self, page: PageId) -> Self {
        self.fail_render.insert(page);
        self
    }

    #[must_use]
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, width: u32, height: u32) -> Self {
        self.page_size = (width.max(1), height.max(1));
        self
    }

    /// Shared log of backend calls, readable from any thread
    #[must_use]
    pub fn calls(&self) -> Arc<Mutex<Vec<BackendCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: BackendCall) {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(call);
    }
}

impl RenderBackend for SyntheticBackend {
    type Page = SyntheticPage;
    type Output = Raster;

    fn get_page(&mut self, id: PageId) -> Result<SyntheticPage, ProviderError> {
        self.record(BackendCall::GetPage(id));
        if id == 0 || id > self.page_count {
            return Err(ProviderError::NotFound(id));
        }
        if self.fail_fetch.contains(&id) {
            return Err(ProviderError::Decode {
                page: id,
                detail: "corrupt page object".to_string(),
            });
        }
        Ok(SyntheticPage {
            id,
            width: self.page_size.0,
            height: self.page_size.1,
        })
    }

    fn render(
        &mut self,
        page: &SyntheticPage,
        target: &RenderTarget,
        token: &CancellationToken,
    ) -> Result<Raster, RenderFailure> {
        self.record(BackendCall::Render(page.id));

        let slice = self.render_delay / RENDER_SLICES;
        for _ in 0..RENDER_SLICES {
            if token.is_cancelled() {
                return Err(RenderFailure::Aborted);
            }
            if !slice.is_zero() {
                std::thread::sleep(slice);
            }
        }
        if token.is_cancelled() {
            return Err(RenderFailure::Aborted);
        }

        if self.fail_render.contains(&page.id) {
            return Err(RenderFailure::failed(format!(
                "unsupported content on page {}",
                page.id
            )));
        }

        // Shade each page differently so outputs are distinguishable
        let shade = (page.id % 251) as u8;
        Ok(Raster {
            page: page.id,
            generation: target.generation,
            width: page.width,
            height: page.height,
            pixels: vec![shade; pixel_len(page.width, page.height)],
        })
    }

    fn cleanup(&mut self) {
        self.record(BackendCall::Cleanup);
    }
}

fn pixel_len(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(page: PageId) -> RenderTarget {
        RenderTarget {
            page,
            generation: 1,
        }
    }

    #[test]
    fn out_of_range_pages_are_not_found() {
        let mut backend = SyntheticBackend::new(3);
        assert_eq!(backend.get_page(4), Err(ProviderError::NotFound(4)));
        assert_eq!(backend.get_page(0), Err(ProviderError::NotFound(0)));
    }

    #[test]
    fn broken_page_fails_to_decode() {
        let mut backend = SyntheticBackend::new(3).with_broken_page(2);
        assert!(matches!(
            backend.get_page(2),
            Err(ProviderError::Decode { page: 2, .. })
        ));
    }

    #[test]
    fn render_produces_sized_raster() {
        let mut backend = SyntheticBackend::new(3).with_page_size(4, 5);
        let page = backend.get_page(3).unwrap();
        let raster = backend
            .render(&page, &target(3), &CancellationToken::new())
            .unwrap();
        assert_eq!(raster.pixels.len(), 20);
        assert_eq!(raster.page, 3);
        assert_eq!(
            *backend.calls().lock().unwrap(),
            vec![BackendCall::GetPage(3), BackendCall::Render(3)]
        );
    }

    #[test]
    fn pixel_len_does_not_wrap_at_u32() {
        assert_eq!(pixel_len(70_000, 70_000), 4_900_000_000);
    }

    #[test]
    fn cancelled_render_aborts() {
        let mut backend = SyntheticBackend::new(3);
        let page = backend.get_page(1).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            backend.render(&page, &target(1), &token),
            Err(RenderFailure::Aborted)
        );
    }

    #[test]
    fn failing_render_reports_detail() {
        let mut backend = SyntheticBackend::new(3).with_failing_render(1);
        let page = backend.get_page(1).unwrap();
        let err = backend
            .render(&page, &target(1), &CancellationToken::new())
            .unwrap_err();
        assert_eq!(
            err,
            RenderFailure::failed("unsupported content on page 1")
        );
    }
}

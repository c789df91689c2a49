//! Render worker - runs the external engine on a dedicated thread

use std::sync::Arc;
use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use log::{debug, info};

use super::cancel::CancellationToken;
use super::page::PageId;
use super::request::{
    ProviderError, RenderError, RenderFailure, RenderRequest, RenderResponse, RenderTarget,
    RenderTask,
};

/// Document provider and rendering engine the scheduler drives
pub trait RenderBackend: Send + 'static {
    /// Backing page object, fetched once per page and reused across renders
    type Page: Send + Sync + 'static;
    /// Rendered output of a page
    type Output: Send + Sync + 'static;

    fn get_page(&mut self, id: PageId) -> Result<Self::Page, ProviderError>;

    /// Render `page`. Implementations should poll `token` and return
    /// [`RenderFailure::Aborted`] once it is cancelled.
    fn render(
        &mut self,
        page: &Self::Page,
        target: &RenderTarget,
        token: &CancellationToken,
    ) -> Result<Self::Output, RenderFailure>;

    /// Release document-wide caches
    fn cleanup(&mut self) {}
}

/// Spawn a worker thread serving `requests` until shutdown or disconnect
pub fn spawn_worker<B: RenderBackend>(
    backend: B,
    requests: Receiver<RenderRequest<B::Page>>,
    responses: Sender<RenderResponse<B::Page, B::Output>>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("pagerat-render".to_string())
        .spawn(move || render_worker(backend, &requests, &responses))
}

/// Main worker loop
pub fn render_worker<B: RenderBackend>(
    mut backend: B,
    requests: &Receiver<RenderRequest<B::Page>>,
    responses: &Sender<RenderResponse<B::Page, B::Output>>,
) {
    for request in requests.iter() {
        match request {
            RenderRequest::Page {
                task,
                resource,
                token,
            } => {
                let response = handle_page_request(&mut backend, task, resource, &token);
                if responses.send(response).is_err() {
                    debug!("Response channel closed, stopping render worker");
                    break;
                }
            }

            RenderRequest::Cleanup => backend.cleanup(),

            RenderRequest::Shutdown => break,
        }
    }
    info!("Render worker stopped");
}

fn handle_page_request<B: RenderBackend>(
    backend: &mut B,
    task: RenderTask,
    resource: Option<Arc<B::Page>>,
    token: &CancellationToken,
) -> RenderResponse<B::Page, B::Output> {
    if token.is_cancelled() {
        return RenderResponse::Cancelled { task, resource };
    }

    let resource = match resource {
        Some(resource) => resource,
        None => match backend.get_page(task.page) {
            Ok(page) => Arc::new(page),
            Err(source) => {
                return RenderResponse::Failed {
                    task,
                    resource: None,
                    error: RenderError::ResourceUnavailable {
                        page: task.page,
                        source,
                    },
                };
            }
        },
    };

    if token.is_cancelled() {
        return RenderResponse::Cancelled {
            task,
            resource: Some(resource),
        };
    }

    match backend.render(&resource, &RenderTarget::from(&task), token) {
        Ok(output) => RenderResponse::Rendered {
            task,
            resource,
            output: Arc::new(output),
        },
        Err(RenderFailure::Aborted) => RenderResponse::Cancelled {
            task,
            resource: Some(resource),
        },
        Err(failure) => RenderResponse::Failed {
            task,
            resource: Some(resource),
            error: RenderError::from_failure(task.page, failure),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct CountingBackend {
        fetches: Arc<Mutex<Vec<PageId>>>,
        cleanups: Arc<Mutex<u32>>,
    }

    impl RenderBackend for CountingBackend {
        type Page = PageId;
        type Output = String;

        fn get_page(&mut self, id: PageId) -> Result<PageId, ProviderError> {
            self.fetches.lock().unwrap().push(id);
            if id == 13 {
                return Err(ProviderError::NotFound(id));
            }
            Ok(id)
        }

        fn render(
            &mut self,
            page: &PageId,
            target: &RenderTarget,
            _token: &CancellationToken,
        ) -> Result<String, RenderFailure> {
            if *page == 7 {
                return Err(RenderFailure::failed("broken content stream"));
            }
            Ok(format!("page {page} gen {}", target.generation))
        }

        fn cleanup(&mut self) {
            *self.cleanups.lock().unwrap() += 1;
        }
    }

    fn task(page: PageId) -> RenderTask {
        RenderTask {
            page,
            generation: 1,
            epoch: 1,
        }
    }

    #[test]
    fn fetches_resource_once_then_renders() {
        let mut backend = CountingBackend::default();
        let token = CancellationToken::new();

        let first = handle_page_request(&mut backend, task(2), None, &token);
        let RenderResponse::Rendered {
            resource, output, ..
        } = first
        else {
            panic!("expected a rendered page");
        };
        assert_eq!(output.as_str(), "page 2 gen 1");

        let second = handle_page_request(&mut backend, task(2), Some(resource), &token);
        assert!(matches!(second, RenderResponse::Rendered { .. }));
        assert_eq!(*backend.fetches.lock().unwrap(), vec![2]);
    }

    #[test]
    fn missing_page_reports_resource_unavailable() {
        let mut backend = CountingBackend::default();
        let response = handle_page_request(&mut backend, task(13), None, &CancellationToken::new());
        match response {
            RenderResponse::Failed { error, .. } => assert_eq!(
                error,
                RenderError::ResourceUnavailable {
                    page: 13,
                    source: ProviderError::NotFound(13),
                }
            ),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn render_failure_keeps_fetched_resource() {
        let mut backend = CountingBackend::default();
        let response = handle_page_request(&mut backend, task(7), None, &CancellationToken::new());
        match response {
            RenderResponse::Failed {
                resource, error, ..
            } => {
                assert!(resource.is_some());
                assert!(matches!(error, RenderError::RenderFailed { page: 7, .. }));
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn cancelled_token_skips_work() {
        let mut backend = CountingBackend::default();
        let token = CancellationToken::new();
        token.cancel();

        let response = handle_page_request(&mut backend, task(4), None, &token);
        assert!(matches!(response, RenderResponse::Cancelled { .. }));
        assert!(backend.fetches.lock().unwrap().is_empty());
    }

    #[test]
    fn worker_thread_serves_requests_until_shutdown() {
        let backend = CountingBackend::default();
        let cleanups = Arc::clone(&backend.cleanups);
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();
        let handle = spawn_worker(backend, request_rx, response_tx).unwrap();

        request_tx
            .send(RenderRequest::Page {
                task: task(1),
                resource: None,
                token: CancellationToken::new(),
            })
            .unwrap();
        request_tx.send(RenderRequest::Cleanup).unwrap();
        request_tx.send(RenderRequest::Shutdown).unwrap();
        handle.join().unwrap();

        let response = response_rx.recv().unwrap();
        assert_eq!(response.task(), &task(1));
        assert_eq!(*cleanups.lock().unwrap(), 1);
    }
}

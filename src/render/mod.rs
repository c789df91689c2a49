//! Page rendering scheduler and bounded page cache

use std::time::Duration;

mod buffer;
mod cancel;
mod events;
mod manager;
mod page;
mod queue;
mod request;
mod visibility;
mod worker;

pub use buffer::{Buffer, BufferItem};
pub use cancel::CancellationToken;
pub use events::{EventBus, RenderEvent};
pub use manager::{RenderConfig, RenderManager, buffer_capacity};
pub use page::{Document, PageHandle, PageId, PageView, RenderingState};
pub use queue::{Completion, RenderingQueue};
pub use request::{
    ProviderError, RenderError, RenderFailure, RenderRequest, RenderResponse, RenderTarget,
    RenderTask,
};
pub use visibility::{ScrollDirection, VisibilityError, VisibilityTracker, VisiblePage, VisibleSet};
pub use worker::{RenderBackend, render_worker, spawn_worker};

/// Minimum number of rendered pages kept in memory
pub const DEFAULT_CACHE_SIZE: usize = 10;

/// Idle time before unfinished pages and engine caches are released
pub const DEFAULT_IDLE_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

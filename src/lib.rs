// Export modules for use in tests and the simulator binary
pub mod render;
pub mod settings;
pub mod synthetic;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use render::{RenderConfig, RenderManager, RenderingState, ScrollDirection, VisibleSet};

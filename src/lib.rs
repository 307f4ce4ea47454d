//! Windowed paging and progressive rendering for long paginated documents

pub mod adapter;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod notification;
pub mod page_view;
pub mod panic_handler;
pub mod positions;
pub mod reader;
pub mod search;
pub mod session;
pub mod settings;
pub mod task;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use adapter::PageAdapter;
pub use engine::{DocumentEngine, EngineError};
pub use error::ViewerError;
pub use page_view::PageView;
pub use reader::{ReaderConfig, ReaderHooks, ReaderView};
pub use search::{SearchController, SearchDirection};
pub use session::DocumentSession;
pub use settings::ViewerSettings;

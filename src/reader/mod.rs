//! Paging controller and the pieces it is built from

pub mod gesture;
pub mod history;
pub mod hooks;
pub mod scroller;
pub mod view;

pub use history::HistoryStack;
pub use hooks::{NoHooks, ReaderHooks};
pub use view::{ReaderConfig, ReaderView};

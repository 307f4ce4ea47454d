/// Callbacks the paging controller makes into the UI layer.
///
/// Every method has a no-op default; implement only what the host needs.
pub trait ReaderHooks {
    /// `page` became the current page
    fn on_move_to_child(&mut self, _page: usize) {}

    /// `page` stops being the current page
    fn on_move_off_child(&mut self, _page: usize) {}

    /// A tap landed outside the paging margins and hit no link
    fn on_tap_main_doc_area(&mut self) {}

    /// The user started dragging the document
    fn on_doc_motion(&mut self) {}

    /// Open an external link target
    fn open_uri(&mut self, uri: &str) -> anyhow::Result<()> {
        open::that(uri)?;
        Ok(())
    }
}

/// Hooks for hosts that do not react to anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ReaderHooks for NoHooks {}

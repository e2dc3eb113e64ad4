use crate::errors::Result;
use crate::types::ElementSnapshot;
use async_trait::async_trait;

/// Target of a child-frame switch.
#[derive(Debug, Clone, Copy)]
pub enum FrameRef<'a, E> {
    /// Frame addressed by its `id` or `name` attribute.
    Named(&'a str),
    /// Frame element previously returned by [`DriverTrait::find_frames`].
    Element(&'a E),
}

/// The automation capability the engine drives.
///
/// A driver is a single-owner handle whose window and frame selection is
/// global state of the connection; every lookup applies to the frame that is
/// active at the time of the call. Implementations report:
///
/// - `WindowLost` when the selected window no longer exists,
/// - `FrameVanished` when a frame element went stale before it could be entered,
/// - `FrameUnreachable` when a named frame does not exist in the active document.
#[async_trait]
pub trait DriverTrait: Send + Sync {
    type Element: Clone + Send + Sync;

    async fn window_handles(&self) -> Result<Vec<String>>;

    async fn current_window_handle(&self) -> Result<String>;

    async fn switch_to_window(&mut self, handle: &str) -> Result<()>;

    async fn switch_to_top_level(&mut self) -> Result<()>;

    async fn switch_to_frame(&mut self, frame: FrameRef<'_, Self::Element>) -> Result<()>;

    async fn switch_to_parent_frame(&mut self) -> Result<()>;

    /// `Ok(None)` when nothing in the active frame matches.
    async fn find_one(&self, locator: &str) -> Result<Option<Self::Element>>;

    async fn find_all(&self, locator: &str) -> Result<Vec<Self::Element>>;

    /// Direct child frames of the active document, in DOM order.
    async fn find_frames(&self) -> Result<Vec<Self::Element>>;

    async fn read_element(&self, element: &Self::Element) -> Result<ElementSnapshot>;

    async fn navigate(&mut self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    /// Check if the underlying browser is still running
    fn is_running(&self) -> bool;

    async fn close(&mut self) -> Result<()>;
}

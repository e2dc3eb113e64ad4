use crate::core::{DriverTrait, FrameRef};
use crate::errors::{LocatorError, Result};
use crate::frames::{FramePath, FrameSegment};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Recovering,
    Disconnected,
}

/// Window and frame selection captured before an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub window: Option<String>,
    pub frame_path: FramePath,
}

/// Owner of the driver's window/frame selection.
///
/// Every switch the engine performs goes through here so that `frame_path`
/// always equals the frame the driver is positioned in. `epoch` is bumped
/// whenever the page behind the selection may have changed (navigation,
/// window switch, window recovery); caches keyed to the old page compare it.
#[derive(Debug)]
pub struct BrowserContext {
    window: Option<String>,
    frame_path: FramePath,
    state: ConnectionState,
    epoch: u64,
}

impl BrowserContext {
    pub fn new() -> Self {
        Self {
            window: None,
            frame_path: FramePath::main(),
            state: ConnectionState::Connected,
            epoch: 0,
        }
    }

    pub fn frame_path(&self) -> &FramePath {
        &self.frame_path
    }

    pub fn window(&self) -> Option<&str> {
        self.window.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            window: self.window.clone(),
            frame_path: self.frame_path.clone(),
        }
    }

    /// Mark the page as changed: drivers land on the top document after a
    /// navigation or window switch.
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        self.frame_path = FramePath::main();
    }

    /// Fail without driver I/O once the connection is gone.
    pub fn fail_fast(&self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Err(LocatorError::Disconnected(
                "no browser window available".to_string(),
            ));
        }
        Ok(())
    }

    /// Leave `Disconnected` so the next request checks the driver again.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Connected;
        self.window = None;
        self.invalidate();
    }

    /// Verify the selected window is still alive, recovering to the most
    /// recently opened window if not. Returns `true` when recovery happened.
    pub async fn ensure_connected<D: DriverTrait>(&mut self, driver: &mut D) -> Result<bool> {
        self.fail_fast()?;
        if !driver.is_running() {
            return Err(self.disconnect("browser is not running"));
        }

        match driver.current_window_handle().await {
            Ok(handle) => {
                if self.window.as_deref() != Some(handle.as_str()) {
                    if self.window.is_some() {
                        // Selection moved outside the engine; its frame state is unknown.
                        self.invalidate();
                    }
                    self.window = Some(handle);
                }
                self.state = ConnectionState::Connected;
                Ok(false)
            }
            Err(e) => {
                warn!("Current window is no longer valid ({}), recovering", e);
                self.recover_to_latest_window(driver).await?;
                Ok(true)
            }
        }
    }

    /// `Recovering` → `Connected` on the most recently opened window, or
    /// `Disconnected` when none is left.
    pub async fn recover_to_latest_window<D: DriverTrait>(&mut self, driver: &mut D) -> Result<()> {
        self.state = ConnectionState::Recovering;

        let handles = match driver.window_handles().await {
            Ok(handles) => handles,
            Err(e) => return Err(self.disconnect(&format!("cannot list windows: {}", e))),
        };

        let Some(last) = handles.last().cloned() else {
            return Err(self.disconnect("no windows remain"));
        };

        if let Err(e) = driver.switch_to_window(&last).await {
            return Err(self.disconnect(&format!("cannot switch to window {}: {}", last, e)));
        }

        self.window = Some(last.clone());
        self.invalidate();
        self.state = ConnectionState::Connected;
        info!("Recovered to window {}", last);
        Ok(())
    }

    fn disconnect(&mut self, reason: &str) -> LocatorError {
        warn!("Browser disconnected: {}", reason);
        self.state = ConnectionState::Disconnected;
        self.window = None;
        self.frame_path = FramePath::main();
        LocatorError::Disconnected(reason.to_string())
    }

    pub async fn switch_window<D: DriverTrait>(&mut self, driver: &mut D, handle: &str) -> Result<()> {
        driver.switch_to_window(handle).await?;
        self.window = Some(handle.to_string());
        self.invalidate();
        Ok(())
    }

    /// Select a window temporarily; the page behind it is not considered changed.
    pub async fn visit_window<D: DriverTrait>(&mut self, driver: &mut D, handle: &str) -> Result<()> {
        driver.switch_to_window(handle).await?;
        self.window = Some(handle.to_string());
        self.frame_path = FramePath::main();
        Ok(())
    }

    pub async fn enter_top<D: DriverTrait>(&mut self, driver: &mut D) -> Result<()> {
        driver.switch_to_top_level().await?;
        self.frame_path = FramePath::main();
        Ok(())
    }

    /// Switch to `path` from the top document, segment by segment.
    ///
    /// On failure the driver is left on the top document and the error is
    /// `FrameUnreachable`.
    pub async fn enter_path<D: DriverTrait>(&mut self, driver: &mut D, path: &FramePath) -> Result<()> {
        self.enter_top(driver).await?;

        for segment in path.segments() {
            if let Err(e) = self.enter_segment(driver, segment).await {
                if let Err(reset) = self.enter_top(driver).await {
                    debug!("Reset to top document failed: {}", reset);
                }
                return Err(match e {
                    LocatorError::Disconnected(_) => e,
                    other => LocatorError::FrameUnreachable(format!(
                        "{} (segment {}): {}",
                        path, segment, other
                    )),
                });
            }
        }
        Ok(())
    }

    async fn enter_segment<D: DriverTrait>(&mut self, driver: &mut D, segment: &FrameSegment) -> Result<()> {
        match segment {
            FrameSegment::Named(name) => {
                driver.switch_to_frame(FrameRef::Named(name.as_str())).await?;
            }
            FrameSegment::Index(index) => {
                let frames = driver.find_frames().await?;
                let frame = frames.get(*index).ok_or_else(|| {
                    LocatorError::FrameUnreachable(format!(
                        "index {} out of {} frames",
                        index,
                        frames.len()
                    ))
                })?;
                driver.switch_to_frame(FrameRef::Element(frame)).await?;
            }
        }
        self.frame_path = self.frame_path.child(segment.clone());
        Ok(())
    }

    pub async fn enter_child<D: DriverTrait>(
        &mut self,
        driver: &mut D,
        frame: &D::Element,
        segment: FrameSegment,
    ) -> Result<()> {
        driver.switch_to_frame(FrameRef::Element(frame)).await?;
        self.frame_path = self.frame_path.child(segment);
        Ok(())
    }

    /// Return to the parent frame. If that fails the position is unknown, so
    /// the driver is moved to the top document and the error returned.
    pub async fn leave_child<D: DriverTrait>(&mut self, driver: &mut D) -> Result<()> {
        match driver.switch_to_parent_frame().await {
            Ok(()) => {
                self.frame_path = self.frame_path.parent().unwrap_or_default();
                Ok(())
            }
            Err(e) => {
                warn!("Parent frame switch from {} failed: {}", self.frame_path, e);
                if let Err(reset) = self.enter_top(driver).await {
                    debug!("Reset to top document failed: {}", reset);
                    self.frame_path = FramePath::main();
                }
                Err(e)
            }
        }
    }

    /// Put the driver back where `snapshot` was taken. Failures are logged
    /// and never returned so they cannot mask the operation's own result.
    pub async fn restore<D: DriverTrait>(&mut self, driver: &mut D, snapshot: ContextSnapshot) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        if let Some(window) = snapshot.window {
            if self.window.as_deref() != Some(window.as_str()) {
                match driver.switch_to_window(&window).await {
                    Ok(()) => {
                        self.window = Some(window);
                        self.frame_path = FramePath::main();
                    }
                    Err(e) => {
                        warn!("Failed to restore window {}: {}", window, e);
                        if let Err(reset) = self.enter_top(driver).await {
                            debug!("Reset to top document failed: {}", reset);
                        }
                        return;
                    }
                }
            }
        }

        if self.frame_path == snapshot.frame_path {
            return;
        }

        if let Err(e) = self.enter_path(driver, &snapshot.frame_path).await {
            warn!(
                "Failed to restore frame context {}: {}",
                snapshot.frame_path, e
            );
        }
    }
}

impl Default for BrowserContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixtureDriver, FixturePage};

    fn two_level_driver() -> FixtureDriver {
        FixturePage::new("top", r#"<body><iframe id="outer" data-doc="outer"></iframe></body>"#)
            .document("outer", r#"<body><iframe name="inner" data-doc="inner"></iframe></body>"#)
            .document("inner", r#"<body><p>deep</p></body>"#)
            .into_driver()
    }

    #[tokio::test]
    async fn test_enter_path_tracks_segments() {
        let mut driver = two_level_driver();
        let mut ctx = BrowserContext::new();
        ctx.enter_path(&mut driver, &FramePath::parse("outer/inner"))
            .await
            .unwrap();
        assert_eq!(ctx.frame_path().to_string(), "outer/inner");
        assert_eq!(driver.active_frame_path(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_enter_unknown_path_is_unreachable_and_resets_to_top() {
        let mut driver = two_level_driver();
        let mut ctx = BrowserContext::new();
        let err = ctx
            .enter_path(&mut driver, &FramePath::parse("outer/missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::FrameUnreachable(_)));
        assert!(ctx.frame_path().is_main());
        assert!(driver.active_frame_path().is_empty());
    }

    #[tokio::test]
    async fn test_index_segment_enters_by_position() {
        let mut driver = FixturePage::new("top", r#"<iframe data-doc="a"></iframe><iframe data-doc="b"></iframe>"#)
            .document("a", "<p>a</p>")
            .document("b", "<p>b</p>")
            .into_driver();
        let mut ctx = BrowserContext::new();
        ctx.enter_path(&mut driver, &FramePath::parse("index=1"))
            .await
            .unwrap();
        assert_eq!(driver.active_frame_path(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_restore_returns_to_snapshot_path() {
        let mut driver = two_level_driver();
        let mut ctx = BrowserContext::new();
        ctx.ensure_connected(&mut driver).await.unwrap();
        ctx.enter_path(&mut driver, &FramePath::parse("outer"))
            .await
            .unwrap();
        let snapshot = ctx.snapshot();

        ctx.enter_path(&mut driver, &FramePath::parse("outer/inner"))
            .await
            .unwrap();
        ctx.restore(&mut driver, snapshot).await;
        assert_eq!(ctx.frame_path().to_string(), "outer");
        assert_eq!(driver.active_frame_path(), vec!["outer"]);
    }

    #[tokio::test]
    async fn test_recovery_switches_to_last_window() {
        let mut driver = FixturePage::new("top", "<p>one</p>")
            .window("w2", "second")
            .window("w3", "third")
            .document("second", "<p>two</p>")
            .document("third", "<p>three</p>")
            .into_driver();
        let mut ctx = BrowserContext::new();
        ctx.ensure_connected(&mut driver).await.unwrap();
        let epoch = ctx.epoch();

        driver.close_window("w1");
        let recovered = ctx.ensure_connected(&mut driver).await.unwrap();
        assert!(recovered);
        assert_eq!(ctx.window(), Some("w3"));
        assert_eq!(ctx.state(), ConnectionState::Connected);
        assert!(ctx.epoch() > epoch);
    }

    #[tokio::test]
    async fn test_no_windows_left_disconnects_and_fails_fast() {
        let mut driver = FixturePage::new("top", "<p>one</p>").into_driver();
        let mut ctx = BrowserContext::new();
        ctx.ensure_connected(&mut driver).await.unwrap();

        driver.close_window("w1");
        let err = ctx.ensure_connected(&mut driver).await.unwrap_err();
        assert!(err.is_disconnected());
        assert_eq!(ctx.state(), ConnectionState::Disconnected);

        let calls = driver.stats().total();
        assert!(ctx.ensure_connected(&mut driver).await.is_err());
        assert_eq!(driver.stats().total(), calls);
    }
}

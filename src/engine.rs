use crate::context::{BrowserContext, ConnectionState, ContextSnapshot};
use crate::core::{DriverTrait, EngineConfig};
use crate::errors::{LocatorError, Result};
use crate::frames::{DiscoveredFrame, FrameExplorer, FramePath};
use crate::resolver::{LocatorResolver, Resolution};
use crate::session::{SessionLedger, SessionSummary, ValidationSession};
use crate::types::{preview, ElementDetails, Validation, WindowInfo};
use tracing::{debug, info, warn};

/// Frame-aware locator engine over a single driver connection.
///
/// Every public operation snapshots the window and frame the caller is in
/// and restores it before returning, whatever the outcome. Operations take
/// `&mut self`: the driver's selection is global state of the connection and
/// must only be driven by one operation at a time.
pub struct LocatorEngine<D: DriverTrait> {
    driver: D,
    config: EngineConfig,
    context: BrowserContext,
    explorer: FrameExplorer,
    resolver: LocatorResolver,
    ledger: SessionLedger,
    seen_epoch: u64,
}

impl<D: DriverTrait> LocatorEngine<D> {
    pub fn new(driver: D, config: EngineConfig) -> Self {
        let explorer = FrameExplorer::new(config.frame_cache_ttl());
        let resolver = LocatorResolver::new(config.hint_ttl());
        let context = BrowserContext::new();
        let seen_epoch = context.epoch();

        Self {
            driver,
            config,
            context,
            explorer,
            resolver,
            ledger: SessionLedger::default(),
            seen_epoch,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Direct driver access. Switching windows or frames through it bypasses
    /// the engine's context tracking.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &BrowserContext {
        &self.context
    }

    pub fn current_frame_path(&self) -> &FramePath {
        self.context.frame_path()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.context.state()
    }

    pub fn session_ledger(&self) -> SessionLedger {
        self.ledger
    }

    // Connection

    pub async fn is_connected(&mut self) -> bool {
        self.ensure_connected().await.is_ok()
    }

    pub async fn ensure_connected(&mut self) -> Result<()> {
        self.context.ensure_connected(&mut self.driver).await?;
        self.sync_caches();
        Ok(())
    }

    /// Leave `Disconnected` and check the driver again.
    pub async fn reconnect(&mut self) -> Result<()> {
        info!("Reconnecting to browser");
        self.context.reset();
        self.ensure_connected().await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.invalidate_caches();
        self.driver.close().await
    }

    /// Drop caches that belong to an older page generation.
    fn sync_caches(&mut self) {
        let epoch = self.context.epoch();
        if epoch != self.seen_epoch {
            self.seen_epoch = epoch;
            self.invalidate_caches();
        }
    }

    fn invalidate_caches(&mut self) {
        self.explorer.invalidate();
        self.resolver.invalidate();
    }

    /// Fails fast when disconnected, otherwise checks the window and
    /// captures the caller's selection.
    async fn guard(&mut self) -> Result<ContextSnapshot> {
        self.ensure_connected().await?;
        Ok(self.context.snapshot())
    }

    async fn release(&mut self, snapshot: ContextSnapshot) {
        self.context.restore(&mut self.driver, snapshot).await;
    }

    // Frames and lookups

    pub async fn discover_frames(&mut self, max_depth: usize) -> Result<Vec<DiscoveredFrame>> {
        self.context.fail_fast()?;
        if let Some(frames) = self.explorer.cached(max_depth) {
            debug!("Frame topology served from cache ({} frames)", frames.len());
            return Ok(frames);
        }

        let snapshot = self.guard().await?;
        let result = self
            .explorer
            .discover(&mut self.driver, &mut self.context, max_depth)
            .await;
        self.release(snapshot).await;
        result
    }

    pub async fn discover_all_frames(&mut self) -> Result<Vec<DiscoveredFrame>> {
        self.discover_frames(self.config.max_frame_depth).await
    }

    /// Find the first element matching `locator`, top document first, then
    /// frames depth-first. The element handle belongs to `frame_path`.
    pub async fn resolve(
        &mut self,
        locator: &str,
        max_depth: usize,
        session: Option<&mut ValidationSession>,
    ) -> Result<Resolution<D::Element>> {
        let snapshot = self.guard().await?;
        let result = self
            .resolver
            .locate(&mut self.driver, &mut self.context, locator, max_depth, session)
            .await;
        self.release(snapshot).await;
        result
    }

    /// Resolve and describe the match: tag, text preview and match count in
    /// the frame where it was found.
    pub async fn validate(
        &mut self,
        locator: &str,
        session: Option<&mut ValidationSession>,
    ) -> Result<Validation> {
        let snapshot = self.guard().await?;
        let result = self.validate_in_place(locator, session).await;
        self.release(snapshot).await;
        result
    }

    async fn validate_in_place(
        &mut self,
        locator: &str,
        session: Option<&mut ValidationSession>,
    ) -> Result<Validation> {
        let max_depth = self.config.max_frame_depth;
        let resolution = self
            .resolver
            .locate(&mut self.driver, &mut self.context, locator, max_depth, session)
            .await?;

        let Some(element) = resolution.element else {
            return Ok(Validation::not_found("element not found"));
        };
        let frame_path = resolution.frame_path;

        // positioned in `frame_path` until the guard restores
        let count = match self.driver.find_all(locator.trim()).await {
            Ok(all) => all.len().max(1),
            Err(e) => {
                debug!("Counting {} failed: {}", locator, e);
                1
            }
        };

        match self.driver.read_element(&element).await {
            Ok(snapshot) => Ok(Validation {
                found: true,
                count,
                tag: Some(snapshot.tag_name),
                text: Some(preview(&snapshot.text, self.config.text_preview_chars)),
                frame_path: Some(frame_path),
                message: String::new(),
            }),
            Err(e) => Ok(Validation {
                found: true,
                count,
                tag: None,
                text: None,
                frame_path: Some(frame_path),
                message: format!("element found, details unavailable: {}", e),
            }),
        }
    }

    /// Number of matches in `frame` (or the current frame when `None`).
    pub async fn count_elements(&mut self, locator: &str, frame: Option<&FramePath>) -> Result<usize> {
        let snapshot = self.guard().await?;
        let result = self.count_in(locator, frame).await;
        self.release(snapshot).await;
        result
    }

    async fn count_in(&mut self, locator: &str, frame: Option<&FramePath>) -> Result<usize> {
        if let Some(path) = frame {
            self.context.enter_path(&mut self.driver, path).await?;
        }
        Ok(self.driver.find_all(locator).await?.len())
    }

    pub async fn element_info(
        &mut self,
        locator: &str,
        frame: Option<&FramePath>,
    ) -> Result<Option<ElementDetails>> {
        let snapshot = self.guard().await?;
        let result = self.element_info_in(locator, frame).await;
        self.release(snapshot).await;
        result
    }

    async fn element_info_in(
        &mut self,
        locator: &str,
        frame: Option<&FramePath>,
    ) -> Result<Option<ElementDetails>> {
        if let Some(path) = frame {
            self.context.enter_path(&mut self.driver, path).await?;
        }

        let Some(element) = self.driver.find_one(locator).await? else {
            return Ok(None);
        };
        let snapshot = self.driver.read_element(&element).await?;
        let count = self.driver.find_all(locator).await?.len();
        let attr = |name: &str| snapshot.attribute(name).unwrap_or_default().to_string();

        Ok(Some(ElementDetails {
            tag: snapshot.tag_name.to_lowercase(),
            id: attr("id"),
            name: attr("name"),
            class: attr("class"),
            text: preview(&snapshot.text, self.config.detail_text_chars),
            attributes: snapshot.attributes.clone(),
            count,
        }))
    }

    /// Select a frame for the caller. On failure the previous frame stays
    /// selected and `FrameUnreachable` is returned.
    pub async fn switch_to_frame_path(&mut self, path: &FramePath) -> Result<()> {
        let snapshot = self.guard().await?;
        match self.context.enter_path(&mut self.driver, path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Frame switch to {} failed: {}", path, e);
                self.release(snapshot).await;
                Err(e)
            }
        }
    }

    // Sessions

    pub fn begin_session(&mut self) -> ValidationSession {
        self.ledger.begun += 1;
        let session = ValidationSession::new(self.context.epoch());
        debug!("Validation session {} started", session.id());
        session
    }

    pub fn end_session(&mut self, session: ValidationSession) -> SessionSummary {
        self.ledger.ended += 1;
        let summary = session.summary();
        info!(
            "Validation session {} ended: {} lookups, {} hints, {} misses",
            summary.id, summary.lookups, summary.hints, summary.misses
        );
        summary
    }

    // Windows and navigation

    pub async fn list_windows(&mut self) -> Result<Vec<WindowInfo>> {
        let snapshot = self.guard().await?;
        let result = self.collect_windows(snapshot.window.as_deref()).await;
        self.release(snapshot).await;
        result
    }

    async fn collect_windows(&mut self, current: Option<&str>) -> Result<Vec<WindowInfo>> {
        let handles = self.driver.window_handles().await?;
        let mut windows = Vec::with_capacity(handles.len());

        for handle in handles {
            if let Err(e) = self.context.visit_window(&mut self.driver, &handle).await {
                debug!("Skipping window {}: {}", handle, e);
                continue;
            }
            windows.push(WindowInfo {
                title: self.driver.title().await.unwrap_or_default(),
                url: self.driver.current_url().await.unwrap_or_default(),
                current: current == Some(handle.as_str()),
                handle,
            });
        }
        Ok(windows)
    }

    /// Select `handle`. If it cannot be selected the engine recovers to the
    /// most recently opened window and returns `false`.
    pub async fn switch_window(&mut self, handle: &str) -> Result<bool> {
        self.context.fail_fast()?;
        let switched = match self.context.switch_window(&mut self.driver, handle).await {
            Ok(()) => {
                info!("Switched to window {}", handle);
                true
            }
            Err(e) => {
                warn!("Window switch to {} failed: {}", handle, e);
                self.context
                    .recover_to_latest_window(&mut self.driver)
                    .await?;
                false
            }
        };
        self.sync_caches();
        Ok(switched)
    }

    pub async fn navigate(&mut self, url: &str) -> Result<()> {
        self.context.fail_fast()?;
        url::Url::parse(url)
            .map_err(|e| LocatorError::NavigationFailed(format!("{}: {}", url, e)))?;
        self.ensure_connected().await?;

        let result = self.driver.navigate(url).await;
        // the page may have changed even when the driver reports an error
        self.context.invalidate();
        self.sync_caches();

        match result {
            Ok(()) => {
                info!("Navigated to {}", url);
                Ok(())
            }
            Err(e) => Err(LocatorError::NavigationFailed(format!("{}: {}", url, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolutionSource;
    use crate::testing::{FixtureDriver, FixturePage};

    fn engine() -> LocatorEngine<FixtureDriver> {
        let driver = FixturePage::new(
            "top",
            r#"<title>tickets</title>
               <button id="buy" class="primary big">Buy now</button>
               <iframe id="f1" data-doc="f1"></iframe>"#,
        )
        .document("f1", r#"<ok>ok</ok><ok>another</ok>"#)
        .route("https://example.com/", "top")
        .into_driver();
        LocatorEngine::new(driver, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_validate_reports_details_in_frame() {
        let mut engine = engine();
        let validation = engine.validate("//ok", None).await.unwrap();
        assert!(validation.found);
        assert_eq!(validation.count, 2);
        assert_eq!(validation.tag.as_deref(), Some("ok"));
        assert_eq!(validation.frame_path, Some(FramePath::parse("f1")));
        assert!(engine.current_frame_path().is_main());
    }

    #[tokio::test]
    async fn test_validate_missing_locator() {
        let mut engine = engine();
        let validation = engine.validate("//absent", None).await.unwrap();
        assert!(!validation.found);
        assert_eq!(validation.frame_path, None);
    }

    #[tokio::test]
    async fn test_count_in_unreachable_frame_surfaces_error() {
        let mut engine = engine();
        let err = engine
            .count_elements("//ok", Some(&FramePath::parse("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::FrameUnreachable(_)));
        assert_eq!(
            engine
                .count_elements("//ok", Some(&FramePath::parse("f1")))
                .await
                .unwrap(),
            2
        );
        assert_eq!(engine.count_elements("//ok", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_element_info_reads_attributes() {
        let mut engine = engine();
        let info = engine
            .element_info("//button[@id='buy']", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.tag, "button");
        assert_eq!(info.id, "buy");
        assert_eq!(info.class, "primary big");
        assert_eq!(info.text, "Buy now");
        assert_eq!(info.count, 1);
        assert!(engine.element_info("//missing", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shared_hint_used_without_session_and_cleared_on_navigate() {
        let mut engine = engine();
        engine.resolve("//ok", 5, None).await.unwrap();
        let second = engine.resolve("//ok", 5, None).await.unwrap();
        assert_eq!(second.source, ResolutionSource::Hint);

        engine.navigate("https://example.com/").await.unwrap();
        assert!(engine.resolver.shared_hint("//ok").is_none());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_before_driver() {
        let mut engine = engine();
        let err = engine.navigate("not a url").await.unwrap_err();
        assert!(matches!(err, LocatorError::NavigationFailed(_)));
        assert_eq!(engine.driver().stats().total(), 0);
    }

    #[tokio::test]
    async fn test_list_windows_restores_current_window() {
        let driver = FixturePage::new("top", "<title>one</title>")
            .window("w2", "second")
            .document("second", "<title>two</title>")
            .into_driver();
        let mut engine = LocatorEngine::new(driver, EngineConfig::default());

        let windows = engine.list_windows().await.unwrap();
        assert_eq!(windows.len(), 2);
        assert!(windows[0].current);
        assert_eq!(windows[1].title, "two");
        assert_eq!(engine.driver().active_window(), Some("w1"));
    }

    #[tokio::test]
    async fn test_switch_to_unknown_window_recovers() {
        let driver = FixturePage::new("top", "<p>one</p>")
            .window("w2", "second")
            .document("second", "<p>two</p>")
            .into_driver();
        let mut engine = LocatorEngine::new(driver, EngineConfig::default());

        assert!(engine.switch_window("w2").await.unwrap());
        assert!(!engine.switch_window("ghost").await.unwrap());
        assert_eq!(engine.context().window(), Some("w2"));
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let mut engine = engine();
        engine.driver_mut().close_window("w1");
        assert!(!engine.is_connected().await);
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
        assert!(engine.reconnect().await.is_err());
    }
}

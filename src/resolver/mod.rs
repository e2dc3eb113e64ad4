pub mod hints;

pub use hints::HintCache;

use crate::context::BrowserContext;
use crate::core::DriverTrait;
use crate::errors::{LocatorError, Result};
use crate::frames::{frame_identifier, FramePath};
use crate::session::ValidationSession;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Which step of the protocol produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionSource {
    Hint,
    TopLevel,
    FrameSearch,
    /// Recorded as absent earlier in the same session.
    SessionMiss,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct Resolution<E> {
    pub found: bool,
    pub element: Option<E>,
    pub frame_path: FramePath,
    pub source: ResolutionSource,
}

impl<E> Resolution<E> {
    fn hit(element: E, frame_path: FramePath, source: ResolutionSource) -> Self {
        Self {
            found: true,
            element: Some(element),
            frame_path,
            source,
        }
    }

    fn miss(source: ResolutionSource) -> Self {
        Self {
            found: false,
            element: None,
            frame_path: FramePath::main(),
            source,
        }
    }
}

enum Search<E> {
    Found(E),
    /// Every reachable frame was searched. `complete` is false when a frame
    /// was skipped for a reason other than having vanished.
    Exhausted { complete: bool },
    /// A parent switch failed; the driver was reset to the top document.
    Lost,
}

impl<E> Search<E> {
    fn confirms_absence(&self) -> bool {
        matches!(self, Search::Exhausted { complete: true })
    }
}

/// Finds the frame holding a locator's first match.
///
/// The resolver moves the driver freely and leaves it positioned in the
/// matching frame; restoring the caller's context is the engine's job.
#[derive(Debug)]
pub struct LocatorResolver {
    shared_hints: HintCache,
}

impl LocatorResolver {
    pub fn new(hint_ttl: Duration) -> Self {
        Self {
            shared_hints: HintCache::new(hint_ttl),
        }
    }

    pub fn invalidate(&mut self) {
        self.shared_hints.clear();
    }

    pub fn shared_hint(&mut self, locator: &str) -> Option<FramePath> {
        self.shared_hints.get(locator.trim())
    }

    pub async fn locate<D: DriverTrait>(
        &mut self,
        driver: &mut D,
        ctx: &mut BrowserContext,
        locator: &str,
        max_depth: usize,
        mut session: Option<&mut ValidationSession>,
    ) -> Result<Resolution<D::Element>> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(LocatorError::InvalidLocator("empty locator".to_string()));
        }

        let hint = match session.as_deref_mut() {
            Some(s) => {
                if s.sync_epoch(ctx.epoch()) {
                    debug!("Session {} saw a navigation; hints dropped", s.id());
                }
                s.record_lookup();
                if s.is_miss(locator) {
                    debug!("{} already missed in session {}", locator, s.id());
                    return Ok(Resolution::miss(ResolutionSource::SessionMiss));
                }
                s.hint(locator).cloned()
            }
            None => self.shared_hints.get(locator),
        };

        let mut main_already_missed = false;
        if let Some(path) = hint {
            match self.try_hint(driver, ctx, locator, &path).await {
                Ok(Some(element)) => {
                    debug!("Hint hit for {} in {}", locator, path);
                    self.remember(session, locator, &path);
                    return Ok(Resolution::hit(element, path, ResolutionSource::Hint));
                }
                Ok(None) => {
                    debug!("Hint {} no longer holds {}", path, locator);
                    main_already_missed = path.is_main();
                }
                Err(e) if e.is_disconnected() => return Err(e),
                Err(e) => debug!("Hint {} unusable for {}: {}", path, locator, e),
            }
        }

        ctx.enter_top(driver).await?;
        if !main_already_missed {
            if let Some(element) = driver.find_one(locator).await? {
                let path = FramePath::main();
                self.remember(session, locator, &path);
                return Ok(Resolution::hit(element, path, ResolutionSource::TopLevel));
            }
        }

        let outcome = search(driver, ctx, locator, 0, max_depth).await?;
        if let Search::Found(element) = outcome {
            let path = ctx.frame_path().clone();
            debug!("Found {} in frame {}", locator, path);
            self.remember(session, locator, &path);
            return Ok(Resolution::hit(element, path, ResolutionSource::FrameSearch));
        }

        if let Some(s) = session {
            if outcome.confirms_absence() {
                s.record_miss(locator);
            } else {
                debug!("Search for {} was incomplete; not recorded as a miss", locator);
            }
        }
        Ok(Resolution::miss(ResolutionSource::Exhausted))
    }

    async fn try_hint<D: DriverTrait>(
        &self,
        driver: &mut D,
        ctx: &mut BrowserContext,
        locator: &str,
        path: &FramePath,
    ) -> Result<Option<D::Element>> {
        ctx.enter_path(driver, path).await?;
        driver.find_one(locator).await
    }

    fn remember(&mut self, session: Option<&mut ValidationSession>, locator: &str, path: &FramePath) {
        match session {
            Some(s) => s.record_hit(locator, path),
            None => self.shared_hints.set(locator, path),
        }
    }
}

/// Live depth-first search below the active frame. Frames are visited in DOM
/// order and the first match wins.
fn search<'a, D: DriverTrait + 'a>(
    driver: &'a mut D,
    ctx: &'a mut BrowserContext,
    locator: &'a str,
    depth: usize,
    max_depth: usize,
) -> Pin<Box<dyn Future<Output = Result<Search<D::Element>>> + Send + 'a>> {
    Box::pin(async move {
        if depth > max_depth {
            return Ok(Search::Exhausted { complete: true });
        }

        let frames = match driver.find_frames().await {
            Ok(frames) => frames,
            Err(e) if e.is_disconnected() => return Err(e),
            Err(e) => {
                debug!("Frame enumeration in {} failed: {}", ctx.frame_path(), e);
                return Ok(Search::Exhausted { complete: false });
            }
        };

        let mut complete = true;
        for (index, frame) in frames.iter().enumerate() {
            let attributes = match driver.read_element(frame).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!("Skipping frame #{} in {}: {}", index, ctx.frame_path(), e);
                    complete &= e.is_recoverable();
                    continue;
                }
            };
            let segment = frame_identifier(&attributes, index);
            if let Err(e) = ctx.enter_child(driver, frame, segment).await {
                debug!("Cannot enter frame #{} in {}: {}", index, ctx.frame_path(), e);
                complete &= e.is_recoverable();
                continue;
            }

            match driver.find_one(locator).await {
                Ok(Some(element)) => return Ok(Search::Found(element)),
                Ok(None) => {}
                Err(e) => {
                    debug!("Lookup in {} failed: {}", ctx.frame_path(), e);
                    complete = false;
                }
            }

            match search(driver, ctx, locator, depth + 1, max_depth).await? {
                Search::Found(element) => return Ok(Search::Found(element)),
                Search::Lost => return Ok(Search::Lost),
                Search::Exhausted { complete: inner } => complete &= inner,
            }

            if let Err(e) = ctx.leave_child(driver).await {
                warn!("Frame search for {} aborted: {}", locator, e);
                return Ok(Search::Lost);
            }
        }

        Ok(Search::Exhausted { complete })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixturePage;

    fn driver() -> crate::testing::FixtureDriver {
        FixturePage::new(
            "top",
            r#"<h1>title</h1>
               <iframe id="a" data-doc="a"></iframe>
               <iframe id="b" data-doc="b"></iframe>"#,
        )
        .document("a", r#"<iframe id="a1" data-doc="a1"></iframe>"#)
        .document("a1", "<ok>deep</ok>")
        .document("b", "<ok>shallow</ok>")
        .into_driver()
    }

    #[tokio::test]
    async fn test_first_depth_first_match_wins() {
        let mut driver = driver();
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));

        let found = resolver
            .locate(&mut driver, &mut ctx, "//ok", 5, None)
            .await
            .unwrap();
        // a/a1 is visited before b even though b is shallower
        assert_eq!(found.frame_path.to_string(), "a/a1");
        assert_eq!(found.source, ResolutionSource::FrameSearch);
        assert_eq!(driver.active_frame_path(), vec!["a", "a1"]);
    }

    #[tokio::test]
    async fn test_depth_limit_bounds_search() {
        let mut driver = driver();
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));

        let found = resolver
            .locate(&mut driver, &mut ctx, "//ok", 0, None)
            .await
            .unwrap();
        assert_eq!(found.frame_path.to_string(), "b");
    }

    #[tokio::test]
    async fn test_missing_everywhere_records_session_miss() {
        let mut driver = driver();
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));
        let mut session = ValidationSession::new(ctx.epoch());

        let first = resolver
            .locate(&mut driver, &mut ctx, "//nothing", 5, Some(&mut session))
            .await
            .unwrap();
        assert!(!first.found);
        assert!(session.is_miss("//nothing"));

        driver.reset_stats();
        let second = resolver
            .locate(&mut driver, &mut ctx, "//nothing", 5, Some(&mut session))
            .await
            .unwrap();
        assert_eq!(second.source, ResolutionSource::SessionMiss);
        assert_eq!(driver.stats().total(), 0);
    }

    #[tokio::test]
    async fn test_stale_hint_falls_through_and_is_overwritten() {
        let mut driver = driver();
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));
        let mut session = ValidationSession::new(ctx.epoch());
        session.record_hit("//h1", &FramePath::parse("b"));

        let found = resolver
            .locate(&mut driver, &mut ctx, "//h1", 5, Some(&mut session))
            .await
            .unwrap();
        assert_eq!(found.source, ResolutionSource::TopLevel);
        assert!(found.frame_path.is_main());
        assert_eq!(session.hint("//h1"), Some(&FramePath::main()));
    }

    #[tokio::test]
    async fn test_unreachable_hint_is_kept_when_nothing_matches() {
        let mut driver = driver();
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));
        let mut session = ValidationSession::new(ctx.epoch());
        session.record_hit("//gone", &FramePath::parse("removed"));

        let result = resolver
            .locate(&mut driver, &mut ctx, "//gone", 5, Some(&mut session))
            .await
            .unwrap();
        assert!(!result.found);
        assert_eq!(session.hint("//gone"), Some(&FramePath::parse("removed")));
    }

    #[tokio::test]
    async fn test_aborted_search_is_not_recorded_as_miss() {
        let mut driver = FixturePage::new(
            "top",
            r#"<iframe id="a" data-doc="a"></iframe><iframe id="b" data-doc="b"></iframe>"#,
        )
        .document("a", "<p>a</p>")
        .document("b", "<ok>b</ok>")
        .into_driver();
        driver.break_parent_switch();
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));
        let mut session = ValidationSession::new(ctx.epoch());

        let first = resolver
            .locate(&mut driver, &mut ctx, "//ok", 5, Some(&mut session))
            .await
            .unwrap();
        assert!(!first.found);
        assert!(!session.is_miss("//ok"));

        driver.reset_stats();
        let second = resolver
            .locate(&mut driver, &mut ctx, "//ok", 5, Some(&mut session))
            .await
            .unwrap();
        assert_eq!(second.source, ResolutionSource::Exhausted);
        assert!(driver.stats().frame_enumerations > 0);
    }

    #[tokio::test]
    async fn test_unloadable_frame_leaves_search_incomplete() {
        let mut driver = FixturePage::new(
            "top",
            r#"<iframe id="loaded" data-doc="loaded"></iframe><iframe id="pending" data-doc="pending"></iframe>"#,
        )
        .document("loaded", "<p>a</p>")
        .into_driver();
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));
        let mut session = ValidationSession::new(ctx.epoch());

        resolver
            .locate(&mut driver, &mut ctx, "//ok", 5, Some(&mut session))
            .await
            .unwrap();
        assert!(!session.is_miss("//ok"));
    }

    #[tokio::test]
    async fn test_vanished_frame_still_confirms_absence() {
        let mut driver = driver();
        driver.vanish_frame("b");
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));
        let mut session = ValidationSession::new(ctx.epoch());

        resolver
            .locate(&mut driver, &mut ctx, "//nothing", 5, Some(&mut session))
            .await
            .unwrap();
        assert!(session.is_miss("//nothing"));
    }

    #[tokio::test]
    async fn test_missed_main_hint_skips_second_top_lookup() {
        let mut driver = driver();
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));
        let mut session = ValidationSession::new(ctx.epoch());
        session.record_hit("//ok", &FramePath::main());

        let found = resolver
            .locate(&mut driver, &mut ctx, "//ok", 5, Some(&mut session))
            .await
            .unwrap();
        assert_eq!(found.frame_path.to_string(), "a/a1");
        // hint in main, then frames a and a/a1
        assert_eq!(driver.stats().lookups, 3);
    }

    #[tokio::test]
    async fn test_empty_locator_is_rejected() {
        let mut driver = driver();
        let mut ctx = BrowserContext::new();
        let mut resolver = LocatorResolver::new(Duration::from_secs(2));
        let err = resolver
            .locate(&mut driver, &mut ctx, "  ", 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::InvalidLocator(_)));
    }
}

use crate::context::BrowserContext;
use crate::core::DriverTrait;
use crate::errors::{LocatorError, Result};
use crate::frames::path::{frame_identifier, FramePath};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredFrame {
    pub path: FramePath,
    pub identifier: String,
    /// 0 for frames embedded directly in the top document.
    pub depth: usize,
}

#[derive(Debug, Clone)]
struct TopologySnapshot {
    frames: Vec<DiscoveredFrame>,
    captured_at: Instant,
    max_depth: usize,
}

/// Outcome of one level of the frame walk.
enum Walk {
    Completed,
    /// A parent switch failed and the driver was reset to the top document.
    Lost,
}

/// Discovers the nested frame tree and keeps the last full scan for a short
/// time-to-live.
#[derive(Debug)]
pub struct FrameExplorer {
    ttl: Duration,
    cache: Option<TopologySnapshot>,
}

impl FrameExplorer {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, cache: None }
    }

    /// Fresh cached frames covering `max_depth`, without touching the driver.
    pub fn cached(&self, max_depth: usize) -> Option<Vec<DiscoveredFrame>> {
        let snapshot = self.cache.as_ref()?;
        if snapshot.captured_at.elapsed() >= self.ttl || snapshot.max_depth < max_depth {
            return None;
        }
        Some(
            snapshot
                .frames
                .iter()
                .filter(|f| f.depth <= max_depth)
                .cloned()
                .collect(),
        )
    }

    pub fn invalidate(&mut self) {
        if self.cache.take().is_some() {
            debug!("Frame topology cache dropped");
        }
    }

    /// Scan from the top document. Leaves the driver on the top document;
    /// the caller restores its own context.
    pub async fn discover<D: DriverTrait>(
        &mut self,
        driver: &mut D,
        ctx: &mut BrowserContext,
        max_depth: usize,
    ) -> Result<Vec<DiscoveredFrame>> {
        if let Some(frames) = self.cached(max_depth) {
            return Ok(frames);
        }

        if let Err(e) = ctx.enter_top(driver).await {
            self.invalidate();
            return Err(e);
        }

        let started = Instant::now();
        let mut frames = Vec::new();
        match walk(driver, ctx, &mut frames, 0, max_depth).await {
            Walk::Completed => {
                info!(
                    "Discovered {} frames in {}ms",
                    frames.len(),
                    started.elapsed().as_millis()
                );
                self.cache = Some(TopologySnapshot {
                    frames: frames.clone(),
                    captured_at: Instant::now(),
                    max_depth,
                });
            }
            Walk::Lost => {
                error!(
                    "Frame scan lost its position after {} frames; cache cleared",
                    frames.len()
                );
                self.invalidate();
            }
        }
        Ok(frames)
    }
}

fn walk<'a, D: DriverTrait + 'a>(
    driver: &'a mut D,
    ctx: &'a mut BrowserContext,
    out: &'a mut Vec<DiscoveredFrame>,
    depth: usize,
    max_depth: usize,
) -> Pin<Box<dyn Future<Output = Walk> + Send + 'a>> {
    Box::pin(async move {
        if depth > max_depth {
            return Walk::Completed;
        }

        let frames = match driver.find_frames().await {
            Ok(frames) => frames,
            Err(e) => {
                debug!("Frame enumeration in {} failed: {}", ctx.frame_path(), e);
                return Walk::Completed;
            }
        };

        for (index, frame) in frames.iter().enumerate() {
            let attributes = match driver.read_element(frame).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!("Skipping frame #{} in {}: {}", index, ctx.frame_path(), e);
                    continue;
                }
            };
            let segment = frame_identifier(&attributes, index);
            let entry = DiscoveredFrame {
                path: ctx.frame_path().child(segment.clone()),
                identifier: segment.to_string(),
                depth,
            };

            match ctx.enter_child(driver, frame, segment).await {
                Ok(()) => out.push(entry),
                Err(LocatorError::FrameVanished(reason)) => {
                    debug!("Frame {} vanished: {}", entry.path, reason);
                    continue;
                }
                Err(e) => {
                    debug!("Cannot enter frame {}: {}", entry.path, e);
                    out.push(entry);
                    continue;
                }
            }

            if let Walk::Lost = walk(driver, ctx, out, depth + 1, max_depth).await {
                return Walk::Lost;
            }
            if ctx.leave_child(driver).await.is_err() {
                return Walk::Lost;
            }
        }

        Walk::Completed
    })
}

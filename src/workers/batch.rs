use super::{found_in, CancelFlag, EventSink, SharedEngine, WorkerEvent};
use crate::core::{DriverTrait, WorkerConfig};
use crate::frames::FramePath;
use crate::types::LocatorItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    pub name: String,
    pub locator: String,
    pub success: bool,
    pub frame_path: Option<FramePath>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub rows: Vec<BatchRow>,
    pub cancelled: bool,
    pub session_id: Uuid,
    pub session_lookups: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn passed(&self) -> usize {
        self.rows.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.rows.len() - self.passed()
    }
}

/// Tests a list of locators inside one validation session.
pub struct BatchTestWorker<D: DriverTrait> {
    engine: SharedEngine<D>,
    items: Vec<LocatorItem>,
    pause: Duration,
    cancel: CancelFlag,
    events: EventSink,
}

impl<D: DriverTrait + 'static> BatchTestWorker<D> {
    pub fn new(engine: SharedEngine<D>, items: Vec<LocatorItem>, config: &WorkerConfig) -> Self {
        Self {
            engine,
            items,
            pause: Duration::from_millis(config.batch_item_pause_ms),
            cancel: CancelFlag::new(),
            events: EventSink::default(),
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<WorkerEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn spawn(self) -> JoinHandle<BatchReport> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> BatchReport {
        let started_at = Utc::now();
        let total = self.items.len();
        let mut session = self.engine.lock().await.begin_session();
        let session_id = session.id();
        let mut rows = Vec::with_capacity(total);
        let mut cancelled = false;

        info!("Batch test of {} locators started (session {})", total, session_id);

        for (i, item) in self.items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.events
                .progress(i, total, format!("{} ({}/{})", item.name, i + 1, total));

            let outcome = {
                let mut engine = self.engine.lock().await;
                engine.validate(&item.locator, Some(&mut session)).await
            };

            let row = match outcome {
                Ok(validation) => BatchRow {
                    name: item.name.clone(),
                    locator: item.locator.clone(),
                    success: validation.found,
                    frame_path: validation.frame_path,
                    message: validation.message,
                },
                Err(e) => BatchRow {
                    name: item.name.clone(),
                    locator: item.locator.clone(),
                    success: false,
                    frame_path: None,
                    message: e.to_string(),
                },
            };
            debug!("{}: success={} in {}", row.name, row.success, found_in(&row.frame_path));
            self.events.emit(WorkerEvent::ItemTested(row.clone()));
            rows.push(row);

            if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        let summary = self.engine.lock().await.end_session(session);
        let report = BatchReport {
            rows,
            cancelled,
            session_id,
            session_lookups: summary.lookups,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            "Batch test finished: {} passed, {} failed{}",
            report.passed(),
            report.failed(),
            if cancelled { " (cancelled)" } else { "" }
        );
        self.events.emit(WorkerEvent::Finished {
            found: report.passed(),
            total,
            cancelled,
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EngineConfig;
    use crate::engine::LocatorEngine;
    use crate::testing::{FixtureDriver, FixturePage};
    use crate::workers::{event_channel, shared};

    fn engine() -> SharedEngine<FixtureDriver> {
        let driver = FixturePage::new("top", r#"<h1>head</h1><iframe id="f1" data-doc="f1"></iframe>"#)
            .document("f1", "<ok>ok</ok>")
            .into_driver();
        shared(LocatorEngine::new(driver, EngineConfig::default()))
    }

    fn items() -> Vec<LocatorItem> {
        vec![
            LocatorItem::new("heading", "//h1"),
            LocatorItem::new("inner", "//ok"),
            LocatorItem::new("missing", "//nope"),
        ]
    }

    fn no_pause() -> WorkerConfig {
        WorkerConfig {
            batch_item_pause_ms: 0,
            validate_item_pause_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_batch_uses_one_session() {
        let engine = engine();
        let report = BatchTestWorker::new(engine.clone(), items(), &no_pause())
            .run()
            .await;

        assert!(!report.cancelled);
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.passed(), 2);
        assert_eq!(report.rows[1].frame_path, Some(FramePath::parse("f1")));
        assert_eq!(report.session_lookups, 3);

        let ledger = engine.lock().await.session_ledger();
        assert_eq!((ledger.begun, ledger.ended), (1, 1));
    }

    #[tokio::test]
    async fn test_cancel_before_start_still_ends_session() {
        let engine = engine();
        let worker = BatchTestWorker::new(engine.clone(), items(), &no_pause());
        worker.cancel_flag().cancel();
        let report = worker.spawn().await.unwrap();

        assert!(report.cancelled);
        assert!(report.rows.is_empty());
        assert_eq!(engine.lock().await.session_ledger().open(), 0);
    }

    #[tokio::test]
    async fn test_events_are_streamed() {
        let (tx, mut rx) = event_channel();
        let report = BatchTestWorker::new(engine(), items(), &no_pause())
            .with_events(tx)
            .run()
            .await;
        assert_eq!(report.rows.len(), 3);

        let mut tested = 0;
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                WorkerEvent::ItemTested(_) => tested += 1,
                WorkerEvent::Finished { found, total, .. } => {
                    assert_eq!((found, total), (2, 3));
                    finished = true;
                }
                _ => {}
            }
        }
        assert_eq!(tested, 3);
        assert!(finished);
    }
}

use super::{CancelFlag, EventSink, SharedEngine, WorkerEvent};
use crate::core::{DriverTrait, WorkerConfig};
use crate::types::{LocatorItem, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateReport {
    pub results: Vec<(String, Validation)>,
    pub found: usize,
    pub total: usize,
    pub cancelled: bool,
}

/// Validates saved locators and puts the browser back on the window that was
/// selected when the run began.
pub struct ValidateWorker<D: DriverTrait> {
    engine: SharedEngine<D>,
    items: Vec<LocatorItem>,
    pause: Duration,
    cancel: CancelFlag,
    events: EventSink,
}

impl<D: DriverTrait + 'static> ValidateWorker<D> {
    pub fn new(engine: SharedEngine<D>, items: Vec<LocatorItem>, config: &WorkerConfig) -> Self {
        Self {
            engine,
            items,
            pause: Duration::from_millis(config.validate_item_pause_ms),
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

    pub fn spawn(self) -> JoinHandle<ValidateReport> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> ValidateReport {
        let total = self.items.len();
        let mut report = ValidateReport {
            results: Vec::with_capacity(total),
            found: 0,
            total,
            cancelled: false,
        };

        let original_window = {
            let mut engine = self.engine.lock().await;
            let connected = engine.ensure_connected().await;
            let window = engine.context().window().map(str::to_string);
            drop(engine);

            if let Err(e) = connected {
                warn!("Validation skipped: {}", e);
                self.finish(&report);
                return report;
            }
            window
        };

        let mut session = self.engine.lock().await.begin_session();

        for (i, item) in self.items.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.events.progress(i, total, item.name.clone());

            let validation = {
                let mut engine = self.engine.lock().await;
                engine.validate(&item.locator, Some(&mut session)).await
            }
            .unwrap_or_else(|e| {
                error!("Validation of {} failed: {}", item.name, e);
                Validation::not_found(e.to_string())
            });

            if validation.found {
                report.found += 1;
            }
            self.events.emit(WorkerEvent::Validated {
                name: item.name.clone(),
                validation: validation.clone(),
            });
            report.results.push((item.name.clone(), validation));

            if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }

        let mut engine = self.engine.lock().await;
        engine.end_session(session);
        let moved = original_window
            .as_deref()
            .filter(|w| engine.context().window() != Some(*w));
        if let Some(window) = moved {
            match engine.switch_window(window).await {
                Ok(true) => {}
                Ok(false) => debug!("Original window {} is gone", window),
                Err(e) => debug!("Returning to window {} failed: {}", window, e),
            }
        }
        drop(engine);

        self.finish(&report);
        report
    }

    fn finish(&self, report: &ValidateReport) {
        if !report.cancelled {
            self.events.progress(report.total, report.total, "done".to_string());
        }
        self.events.emit(WorkerEvent::Finished {
            found: report.found,
            total: report.total,
            cancelled: report.cancelled,
        });
    }
}

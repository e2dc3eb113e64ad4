//! Background batch runners over a shared engine.
//!
//! Workers lock the engine for one item at a time, so other callers can
//! interleave between items. Progress is reported over an unbounded channel.

pub mod batch;
pub mod validate;

pub use batch::{BatchReport, BatchRow, BatchTestWorker};
pub use validate::{ValidateReport, ValidateWorker};

use crate::engine::LocatorEngine;
use crate::errors::{LocatorError, Result};
use crate::frames::FramePath;
use crate::types::Validation;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub type SharedEngine<D> = Arc<Mutex<LocatorEngine<D>>>;

pub fn shared<D: crate::core::DriverTrait>(engine: LocatorEngine<D>) -> SharedEngine<D> {
    Arc::new(Mutex::new(engine))
}

/// Cooperative cancellation, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerEvent {
    Progress {
        percent: u8,
        label: String,
    },
    ItemTested(BatchRow),
    Validated {
        name: String,
        validation: Validation,
    },
    Finished {
        found: usize,
        total: usize,
        cancelled: bool,
    },
}

/// Wait for a spawned worker; a panicked or aborted task is `WorkerFailed`.
pub async fn join<T>(handle: JoinHandle<T>) -> Result<T> {
    handle
        .await
        .map_err(|e| LocatorError::WorkerFailed(e.to_string()))
}

pub fn event_channel() -> (UnboundedSender<WorkerEvent>, UnboundedReceiver<WorkerEvent>) {
    mpsc::unbounded_channel()
}

/// Sends are best effort: a dropped receiver only means nobody is listening.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink(Option<UnboundedSender<WorkerEvent>>);

impl EventSink {
    pub(crate) fn new(tx: UnboundedSender<WorkerEvent>) -> Self {
        Self(Some(tx))
    }

    pub(crate) fn emit(&self, event: WorkerEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn progress(&self, done: usize, total: usize, label: String) {
        self.emit(WorkerEvent::Progress {
            percent: percent(done, total),
            label,
        });
    }
}

pub(crate) fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

pub(crate) fn found_in(path: &Option<FramePath>) -> String {
    path.as_ref()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string())
}

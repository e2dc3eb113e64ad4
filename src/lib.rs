#[cfg(feature = "chrome")]
pub mod browser;
pub mod context;
pub mod core;
pub mod engine;
pub mod errors;
pub mod frames;
pub mod resolver;
pub mod session;
pub mod testing;
pub mod types;
pub mod workers;

#[cfg(feature = "chrome")]
pub use browser::ChromeDriver;
pub use context::{BrowserContext, ConnectionState};
pub use crate::core::{Config, DriverConfig, DriverTrait, EngineConfig, FrameRef, WorkerConfig};
pub use engine::LocatorEngine;
pub use errors::{LocatorError, Result};
pub use frames::{DiscoveredFrame, FramePath, FrameSegment, MAIN_FRAME};
pub use resolver::{Resolution, ResolutionSource};
pub use session::{SessionLedger, SessionSummary, ValidationSession};
pub use types::*;
pub use workers::{BatchReport, BatchRow, BatchTestWorker, CancelFlag, ValidateWorker, WorkerEvent};

pub mod config;
pub mod driver;

pub use config::{Config, DriverConfig, EngineConfig, WorkerConfig};
pub use driver::{DriverTrait, FrameRef};

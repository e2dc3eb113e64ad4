pub mod path;
pub mod topology;

pub use path::{frame_identifier, FramePath, FrameSegment, MAIN_FRAME};
pub use topology::{DiscoveredFrame, FrameExplorer};

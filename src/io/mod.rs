//! Video container IO.

mod avi;
pub mod container;
mod ffmpeg;

pub use avi::FrameSpan;
pub use container::{ContainerReader, ContainerWriter, extract_frame};

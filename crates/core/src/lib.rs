//! Core crate for the segmask tensors-to-segmentation stage.

pub mod config;
pub mod contract;
pub mod error;
pub mod executor;
pub mod gpu;
pub mod logging;
pub mod node;
pub mod registry;
pub mod segmentation;
pub mod types;

pub use error::SegmentationError;

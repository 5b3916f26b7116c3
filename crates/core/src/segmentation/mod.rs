//! Tensors-to-segmentation stage: validation, backend selection, lazily
//! constructed converters, and the node that ties them together.

pub mod backend;
pub mod converter;
#[cfg(feature = "cpu")]
pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;
pub(crate) mod kernel;
pub mod node;
pub mod options;
pub mod shape;

pub use backend::{select_backend, Backend, BackendCapabilities};
pub use converter::{ConverterKind, ConverterSlots, ConverterTable, SegmentationConverter};
pub use node::TensorsToSegmentationNode;
pub use options::{Activation, GpuOrigin, SegmentationOptions};
pub use shape::{validate_tensor, TensorShape};

//! Tensor shape interpretation and activation/channel validation.

use crate::error::SegmentationError;
use crate::types::{ElementType, Tensor};

use super::options::Activation;

/// Spatial layout of a segmentation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

/// Interpret a dimension list as `(H, W, C)`.
///
/// Rank 3 is `HWC`; rank 4 is `BHWC` with a batch of exactly one.
pub fn hwc_from_dims(dims: &[usize]) -> Result<TensorShape, SegmentationError> {
    match *dims {
        [height, width, channels] => Ok(TensorShape {
            height,
            width,
            channels,
        }),
        [batch, height, width, channels] => {
            if batch != 1 {
                return Err(SegmentationError::Shape(format!(
                    "expected batch of 1 for BHWC tensor, got {batch}"
                )));
            }
            Ok(TensorShape {
                height,
                width,
                channels,
            })
        }
        _ => Err(SegmentationError::Shape(format!(
            "invalid rank {} for segmentation tensor {dims:?}",
            dims.len()
        ))),
    }
}

/// Check the channel count against the activation's requirement.
pub fn check_activation_channels(
    shape: &TensorShape,
    activation: Activation,
) -> Result<(), SegmentationError> {
    let expected = activation.required_channels();
    if shape.channels != expected {
        return Err(SegmentationError::ActivationChannelMismatch {
            activation: activation.to_string(),
            expected,
            actual: shape.channels,
        });
    }
    Ok(())
}

/// Validate the primary tensor of an invocation and derive its shape.
pub fn validate_tensor(
    tensor: &Tensor,
    activation: Activation,
) -> Result<TensorShape, SegmentationError> {
    if tensor.element_type() != ElementType::Float32 {
        return Err(SegmentationError::Type {
            expected: ElementType::Float32,
            actual: tensor.element_type(),
        });
    }
    let shape = hwc_from_dims(tensor.dims())?;
    check_activation_channels(&shape, activation)?;
    Ok(shape)
}

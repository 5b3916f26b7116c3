use thiserror::Error;

use crate::types::ElementType;

/// Failure taxonomy for the tensors-to-segmentation stage.
///
/// Orchestration code wraps these in `anyhow::Error`; callers recover the
/// variant with `downcast_ref::<SegmentationError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentationError {
    /// Malformed contract or options, detected before any frame flows.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("type error: expected {expected} tensor, got {actual}")]
    Type {
        expected: ElementType,
        actual: ElementType,
    },

    #[error("activation {activation} requires {expected} channel(s), tensor has {actual}")]
    ActivationChannelMismatch {
        activation: String,
        expected: usize,
        actual: usize,
    },

    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// Opaque failure reported by a converter.
    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("node has not been opened")]
    NotOpened,

    #[error("node is faulted: {0}")]
    Faulted(String),
}

impl SegmentationError {
    /// Errors that invalidate the node for the rest of its lifetime.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::BackendUnavailable { .. } | Self::Faulted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SegmentationError::ActivationChannelMismatch {
            activation: "SIGMOID".to_string(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "activation SIGMOID requires 1 channel(s), tensor has 2"
        );

        let err = SegmentationError::Type {
            expected: ElementType::Float32,
            actual: ElementType::UInt8,
        };
        assert_eq!(err.to_string(), "type error: expected float32 tensor, got uint8");
    }

    #[test]
    fn test_structural_classification() {
        assert!(SegmentationError::BackendUnavailable {
            backend: "gpu".to_string(),
            reason: "not compiled in".to_string(),
        }
        .is_structural());
        assert!(SegmentationError::Configuration("no inputs".to_string()).is_structural());
        assert!(!SegmentationError::Shape("rank 2".to_string()).is_structural());
        assert!(!SegmentationError::Conversion("boom".to_string()).is_structural());
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = SegmentationError::NotOpened.into();
        assert_eq!(
            err.downcast_ref::<SegmentationError>(),
            Some(&SegmentationError::NotOpened)
        );
    }
}

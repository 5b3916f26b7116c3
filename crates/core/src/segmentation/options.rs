use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SegmentationError;

/// Activation applied to the raw model output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum Activation {
    #[default]
    None,
    Sigmoid,
    Softmax,
}

impl Activation {
    pub fn parse(s: &str) -> Result<Self, SegmentationError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "SIGMOID" => Ok(Self::Sigmoid),
            "SOFTMAX" => Ok(Self::Softmax),
            other => Err(SegmentationError::Configuration(format!(
                "unsupported activation '{other}', expected one of NONE|SIGMOID|SOFTMAX"
            ))),
        }
    }

    /// Channel count the tensor must have for this activation.
    pub fn required_channels(&self) -> usize {
        match self {
            Self::None | Self::Sigmoid => 1,
            Self::Softmax => 2,
        }
    }
}

impl TryFrom<String> for Activation {
    type Error = SegmentationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Sigmoid => write!(f, "SIGMOID"),
            Self::Softmax => write!(f, "SOFTMAX"),
        }
    }
}

/// Row order of GPU output. `Default` behaves like `Conventional`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum GpuOrigin {
    #[default]
    Default,
    /// Bottom-left origin, as OpenGL textures expect.
    Conventional,
    TopLeft,
}

impl GpuOrigin {
    pub fn parse(s: &str) -> Result<Self, SegmentationError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEFAULT" => Ok(Self::Default),
            "CONVENTIONAL" => Ok(Self::Conventional),
            "TOP_LEFT" => Ok(Self::TopLeft),
            other => Err(SegmentationError::Configuration(format!(
                "unsupported gpu_origin '{other}', expected one of DEFAULT|CONVENTIONAL|TOP_LEFT"
            ))),
        }
    }

    pub fn is_top_left(&self) -> bool {
        matches!(self, Self::TopLeft)
    }
}

impl TryFrom<String> for GpuOrigin {
    type Error = SegmentationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

pub const DEFAULT_OUTPUT_LAYER_INDEX: usize = 1;

/// Fixed per-node configuration, loaded once at open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationOptions {
    pub activation: Activation,
    /// Channel holding the foreground score for two-channel outputs.
    pub output_layer_index: usize,
    pub gpu_origin: GpuOrigin,
}

impl Default for SegmentationOptions {
    fn default() -> Self {
        Self {
            activation: Activation::None,
            output_layer_index: DEFAULT_OUTPUT_LAYER_INDEX,
            gpu_origin: GpuOrigin::Default,
        }
    }
}

impl SegmentationOptions {
    /// Read options from a node parameter map. Absent keys keep their defaults.
    pub fn from_params(
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<Self, SegmentationError> {
        let mut options = Self::default();

        if let Some(value) = params.get("activation") {
            let name = value.as_str().ok_or_else(|| {
                SegmentationError::Configuration(format!(
                    "activation must be a string, got {value}"
                ))
            })?;
            options.activation = Activation::parse(name)?;
        }

        if let Some(value) = params.get("output_layer_index") {
            let index = value.as_u64().ok_or_else(|| {
                SegmentationError::Configuration(format!(
                    "output_layer_index must be a non-negative integer, got {value}"
                ))
            })?;
            options.output_layer_index = index as usize;
        }

        if let Some(value) = params.get("gpu_origin") {
            let name = value.as_str().ok_or_else(|| {
                SegmentationError::Configuration(format!(
                    "gpu_origin must be a string, got {value}"
                ))
            })?;
            options.gpu_origin = GpuOrigin::parse(name)?;
        }

        Ok(options)
    }
}

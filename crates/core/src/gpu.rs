//! GPU execution context handed to nodes by the host runtime.
//!
//! Nodes never create a context themselves; the runner provisions one when a
//! node's contract asks for it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Graphics API backing a [`GpuContext`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuApi {
    /// OpenGL ES 3.1 or newer (compute shaders available).
    #[default]
    OpenglEs31,
    /// OpenGL ES 3.0 / desktop GL without compute.
    OpenglEs30,
    Metal,
}

impl GpuApi {
    pub fn supports_compute(&self) -> bool {
        matches!(self, Self::OpenglEs31 | Self::Metal)
    }
}

impl fmt::Display for GpuApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenglEs31 => write!(f, "opengl_es31"),
            Self::OpenglEs30 => write!(f, "opengl_es30"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

/// Shared handle to a device owned by the host runtime.
#[derive(Debug)]
pub struct GpuContext {
    api: GpuApi,
    device: String,
    dispatches: AtomicU64,
}

impl GpuContext {
    pub fn new(api: GpuApi, device: impl Into<String>) -> Self {
        Self {
            api,
            device: device.into(),
            dispatches: AtomicU64::new(0),
        }
    }

    pub fn api(&self) -> GpuApi {
        self.api
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Record one kernel submission. Returns the submission sequence number.
    pub fn submit(&self) -> u64 {
        self.dispatches.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn submitted(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_api_display_matches_serde() {
        for api in [GpuApi::OpenglEs31, GpuApi::OpenglEs30, GpuApi::Metal] {
            let json = serde_json::to_string(&api).unwrap();
            assert_eq!(json, format!("\"{api}\""));
        }
    }

    #[test]
    fn test_submit_counts() {
        let ctx = GpuContext::new(GpuApi::Metal, "test-device");
        assert_eq!(ctx.submitted(), 0);
        assert_eq!(ctx.submit(), 1);
        assert_eq!(ctx.submit(), 2);
        assert_eq!(ctx.submitted(), 2);
        assert_eq!(ctx.device(), "test-device");
        assert!(ctx.api().supports_compute());
        assert!(!GpuApi::OpenglEs30.supports_compute());
    }
}

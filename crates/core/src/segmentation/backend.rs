use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gpu::GpuApi;
use crate::types::Tensor;

/// What this build and deployment can offer, probed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub gpu_compiled: bool,
    pub cpu_compiled: bool,
    /// Deployment switch from config; a compiled-in GPU path can still be disabled.
    pub gpu_enabled: bool,
    pub gpu_api: GpuApi,
}

impl BackendCapabilities {
    pub fn detect(gpu_enabled: bool, gpu_api: GpuApi) -> Self {
        Self {
            gpu_compiled: cfg!(feature = "gpu"),
            cpu_compiled: cfg!(feature = "cpu"),
            gpu_enabled,
            gpu_api,
        }
    }

    pub fn can_use_gpu(&self) -> bool {
        self.gpu_compiled && self.gpu_enabled
    }
}

/// Hardware path a conversion runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Gpu,
    Cpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpu => write!(f, "gpu"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Pick the backend for one invocation.
///
/// GPU wins when it is available and any tensor in the set is already
/// GPU-resident; everything else runs on the CPU.
pub fn select_backend(tensors: &[Tensor], gpu_available: bool) -> Backend {
    if gpu_available && tensors.iter().any(Tensor::ready_on_gpu) {
        Backend::Gpu
    } else {
        Backend::Cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Residency;

    fn tensor(residency: Residency) -> Tensor {
        Tensor::from_f32(&[2, 2, 1], vec![0.0; 4])
            .unwrap()
            .with_residency(residency)
    }

    #[test]
    fn test_host_tensors_use_cpu() {
        let tensors = vec![tensor(Residency::Host), tensor(Residency::Host)];
        assert_eq!(select_backend(&tensors, true), Backend::Cpu);
    }

    #[test]
    fn test_single_gpu_tensor_forces_gpu() {
        let tensors = vec![
            tensor(Residency::Host),
            tensor(Residency::Host),
            tensor(Residency::Gpu),
        ];
        assert_eq!(select_backend(&tensors, true), Backend::Gpu);
    }

    #[test]
    fn test_gpu_unavailable_falls_back_to_cpu() {
        let tensors = vec![tensor(Residency::Gpu)];
        assert_eq!(select_backend(&tensors, false), Backend::Cpu);
    }

    #[test]
    fn test_empty_set_uses_cpu() {
        assert_eq!(select_backend(&[], true), Backend::Cpu);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let tensors = vec![tensor(Residency::Gpu), tensor(Residency::Host)];
        let first = select_backend(&tensors, true);
        for _ in 0..16 {
            assert_eq!(select_backend(&tensors, true), first);
        }
    }

    #[test]
    fn test_capabilities_respect_deployment_switch() {
        let caps = BackendCapabilities::detect(false, GpuApi::Metal);
        assert!(!caps.can_use_gpu());
        assert_eq!(caps.gpu_api, GpuApi::Metal);

        let caps = BackendCapabilities::detect(true, GpuApi::OpenglEs31);
        assert_eq!(caps.can_use_gpu(), cfg!(feature = "gpu"));
        assert_eq!(caps.cpu_compiled, cfg!(feature = "cpu"));
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Gpu.to_string(), "gpu");
        assert_eq!(Backend::Cpu.to_string(), "cpu");
    }
}

//! Converter strategy table and per-node converter slots.
//!
//! [`ConverterTable`] maps each backend to the one concrete converter this
//! build and deployment can offer. It is filled once at startup from
//! [`BackendCapabilities`] and shared read-only by every node.
//! [`ConverterSlots`] is the per-node state: at most one live converter per
//! backend, created on first use.

use std::collections::BTreeMap;
use std::fmt;

use tracing::info;

use crate::error::SegmentationError;
use crate::node::ExecutionContext;
use crate::types::{Image, Tensor};

use super::backend::{Backend, BackendCapabilities};
use super::options::SegmentationOptions;

/// Turns a tensor set into a mask image at the requested size.
pub trait SegmentationConverter: Send + Sync {
    fn kind(&self) -> ConverterKind;

    fn convert(
        &mut self,
        tensors: &[Tensor],
        width: i32,
        height: i32,
    ) -> Result<Image, SegmentationError>;
}

/// Concrete converter implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConverterKind {
    /// Compute-shader path over storage buffers (OpenGL ES 3.1+).
    GlBuffer,
    /// Fragment-shader path over textures (older OpenGL).
    GlTexture,
    Metal,
    /// Host image routine.
    Native,
}

impl ConverterKind {
    pub fn backend(&self) -> Backend {
        match self {
            Self::GlBuffer | Self::GlTexture | Self::Metal => Backend::Gpu,
            Self::Native => Backend::Cpu,
        }
    }
}

impl fmt::Display for ConverterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlBuffer => write!(f, "gl_buffer"),
            Self::GlTexture => write!(f, "gl_texture"),
            Self::Metal => write!(f, "metal"),
            Self::Native => write!(f, "native"),
        }
    }
}

pub type ConverterConstructor = dyn Fn(&SegmentationOptions, &ExecutionContext) -> Result<Box<dyn SegmentationConverter>, SegmentationError>
    + Send
    + Sync;

struct TableEntry {
    kind: ConverterKind,
    construct: Box<ConverterConstructor>,
}

pub struct ConverterTable {
    entries: BTreeMap<Backend, TableEntry>,
}

impl ConverterTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register the constructor for a backend, replacing any earlier one.
    pub fn register<F>(&mut self, kind: ConverterKind, construct: F)
    where
        F: Fn(
                &SegmentationOptions,
                &ExecutionContext,
            ) -> Result<Box<dyn SegmentationConverter>, SegmentationError>
            + Send
            + Sync
            + 'static,
    {
        self.entries.insert(
            kind.backend(),
            TableEntry {
                kind,
                construct: Box::new(construct),
            },
        );
    }

    /// Build the table from what this build and deployment can offer.
    pub fn from_capabilities(caps: &BackendCapabilities) -> Self {
        let mut table = Self::new();

        #[cfg(feature = "cpu")]
        {
            if caps.cpu_compiled {
                table.register(ConverterKind::Native, |options, _ctx| {
                    Ok(Box::new(super::cpu::CpuConverter::new(options.clone())))
                });
            }
        }

        #[cfg(feature = "gpu")]
        {
            if caps.can_use_gpu() {
                let kind = super::gpu::kind_for_api(caps.gpu_api);
                table.register(kind, move |options, ctx| {
                    super::gpu::create_converter(kind, options, ctx)
                });
            }
        }

        #[cfg(not(any(feature = "cpu", feature = "gpu")))]
        let _ = caps;

        table
    }

    pub fn supports(&self, backend: Backend) -> bool {
        self.entries.contains_key(&backend)
    }

    /// Registered `(backend, kind)` pairs, GPU first.
    pub fn backends(&self) -> Vec<(Backend, ConverterKind)> {
        self.entries
            .iter()
            .map(|(backend, entry)| (*backend, entry.kind))
            .collect()
    }

    pub fn construct(
        &self,
        backend: Backend,
        options: &SegmentationOptions,
        ctx: &ExecutionContext,
    ) -> Result<Box<dyn SegmentationConverter>, SegmentationError> {
        let entry =
            self.entries
                .get(&backend)
                .ok_or_else(|| SegmentationError::BackendUnavailable {
                    backend: backend.to_string(),
                    reason: "no converter is compiled in or enabled for this backend".to_string(),
                })?;
        (entry.construct)(options, ctx)
    }
}

impl Default for ConverterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConverterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(b, e)| (b, e.kind)))
            .finish()
    }
}

/// One optional converter per backend, owned by a single node instance.
///
/// `get_or_create` takes `&mut self`, so two invocations on the same node can
/// never race to construct the same slot.
#[derive(Default)]
pub struct ConverterSlots {
    gpu: Option<Box<dyn SegmentationConverter>>,
    cpu: Option<Box<dyn SegmentationConverter>>,
}

impl ConverterSlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, backend: Backend) -> &mut Option<Box<dyn SegmentationConverter>> {
        match backend {
            Backend::Gpu => &mut self.gpu,
            Backend::Cpu => &mut self.cpu,
        }
    }

    pub fn is_constructed(&self, backend: Backend) -> bool {
        match backend {
            Backend::Gpu => self.gpu.is_some(),
            Backend::Cpu => self.cpu.is_some(),
        }
    }

    /// Return the backend's converter, constructing it on first request.
    ///
    /// A failed construction leaves the slot empty.
    pub fn get_or_create(
        &mut self,
        backend: Backend,
        table: &ConverterTable,
        options: &SegmentationOptions,
        ctx: &ExecutionContext,
    ) -> Result<&mut (dyn SegmentationConverter + 'static), SegmentationError> {
        let slot = self.slot_mut(backend);
        if slot.is_none() {
            let converter = table.construct(backend, options, ctx)?;
            info!(
                backend = %backend,
                kind = %converter.kind(),
                "Constructed segmentation converter"
            );
            *slot = Some(converter);
        }

        slot.as_deref_mut()
            .ok_or_else(|| SegmentationError::BackendUnavailable {
                backend: backend.to_string(),
                reason: "converter slot is empty after construction".to_string(),
            })
    }
}

impl fmt::Debug for ConverterSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterSlots")
            .field("gpu", &self.gpu.as_ref().map(|c| c.kind()))
            .field("cpu", &self.cpu.as_ref().map(|c| c.kind()))
            .finish()
    }
}

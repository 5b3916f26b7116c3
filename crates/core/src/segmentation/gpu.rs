//! Device converters. The mask lands in an RGBA image, value in R and A.
//!
//! Which variant runs is decided by the context's graphics API: compute
//! buffers on GLES 3.1+, fragment passes over textures on older GL, and Metal.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::SegmentationError;
use crate::gpu::{GpuApi, GpuContext};
use crate::node::ExecutionContext;
use crate::types::{ElementType, GpuImage, Image, ImageFormat, Tensor};

use super::converter::{ConverterKind, SegmentationConverter};
use super::kernel::{flip_vertical, render_mask};
use super::options::SegmentationOptions;
use super::shape::hwc_from_dims;

/// Compute-shader block size.
pub const WORKGROUP_SIZE: u32 = 8;

pub(crate) fn kind_for_api(api: GpuApi) -> ConverterKind {
    match api {
        GpuApi::OpenglEs31 => ConverterKind::GlBuffer,
        GpuApi::OpenglEs30 => ConverterKind::GlTexture,
        GpuApi::Metal => ConverterKind::Metal,
    }
}

/// Number of workgroups needed to cover a `width x height` target.
pub(crate) fn workgroups(width: u32, height: u32) -> (u32, u32) {
    (
        width.div_ceil(WORKGROUP_SIZE),
        height.div_ceil(WORKGROUP_SIZE),
    )
}

pub(crate) fn create_converter(
    kind: ConverterKind,
    options: &SegmentationOptions,
    ctx: &ExecutionContext,
) -> Result<Box<dyn SegmentationConverter>, SegmentationError> {
    let gpu = ctx
        .gpu
        .clone()
        .ok_or_else(|| SegmentationError::BackendUnavailable {
            backend: "gpu".to_string(),
            reason: "no GPU context was provisioned by the host runtime".to_string(),
        })?;

    if kind == ConverterKind::GlBuffer && !gpu.api().supports_compute() {
        return Err(SegmentationError::BackendUnavailable {
            backend: "gpu".to_string(),
            reason: format!("{} context has no compute shaders", gpu.api()),
        });
    }
    if kind_for_api(gpu.api()) != kind {
        return Err(SegmentationError::BackendUnavailable {
            backend: "gpu".to_string(),
            reason: format!("{kind} converter cannot run on a {} context", gpu.api()),
        });
    }

    Ok(Box::new(GpuConverter::new(kind, options.clone(), gpu)))
}

pub struct GpuConverter {
    kind: ConverterKind,
    options: SegmentationOptions,
    gpu: Arc<GpuContext>,
}

impl GpuConverter {
    pub fn new(kind: ConverterKind, options: SegmentationOptions, gpu: Arc<GpuContext>) -> Self {
        Self { kind, options, gpu }
    }

    /// GL-family targets are bottom-left unless told otherwise; Metal is top-left.
    fn flips_rows(&self) -> bool {
        self.kind != ConverterKind::Metal && !self.options.gpu_origin.is_top_left()
    }
}

impl SegmentationConverter for GpuConverter {
    fn kind(&self) -> ConverterKind {
        self.kind
    }

    fn convert(
        &mut self,
        tensors: &[Tensor],
        width: i32,
        height: i32,
    ) -> Result<Image, SegmentationError> {
        let tensor = tensors
            .first()
            .ok_or_else(|| SegmentationError::Conversion("no input tensors".to_string()))?;
        let view = tensor.as_f32().ok_or(SegmentationError::Type {
            expected: ElementType::Float32,
            actual: tensor.element_type(),
        })?;
        let shape = hwc_from_dims(tensor.dims())?;

        if !tensor.ready_on_gpu() {
            debug!(
                device = self.gpu.device(),
                "Uploading host-resident tensor for GPU conversion"
            );
        }

        let mut mask = render_mask(view, &shape, &self.options, width, height)?;
        if self.flips_rows() {
            mask = flip_vertical(&mask);
        }

        let (out_h, out_w) = mask.dim();
        let submission = self.gpu.submit();
        if self.kind == ConverterKind::GlBuffer {
            let (groups_x, groups_y) = workgroups(out_w as u32, out_h as u32);
            trace!(submission, groups_x, groups_y, "Dispatched mask compute pass");
        } else {
            trace!(submission, kind = %self.kind, "Rendered mask pass");
        }

        let mut texels = Vec::with_capacity(out_w * out_h * ImageFormat::Rgba32F.channels());
        for value in mask.iter() {
            texels.extend_from_slice(&[*value, 0.0, 0.0, *value]);
        }

        Ok(Image::Gpu(GpuImage {
            device: self.gpu.device().to_string(),
            width: out_w as u32,
            height: out_h as u32,
            texels,
        }))
    }
}

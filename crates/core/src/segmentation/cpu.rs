//! Host converter: produces a `VEC32F1` mask in host memory.

use tracing::debug;

use crate::error::SegmentationError;
use crate::types::{CpuImage, ElementType, Image, Tensor};

use super::converter::{ConverterKind, SegmentationConverter};
use super::kernel::render_mask;
use super::options::SegmentationOptions;
use super::shape::hwc_from_dims;

pub struct CpuConverter {
    options: SegmentationOptions,
}

impl CpuConverter {
    pub fn new(options: SegmentationOptions) -> Self {
        Self { options }
    }
}

impl SegmentationConverter for CpuConverter {
    fn kind(&self) -> ConverterKind {
        ConverterKind::Native
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

        if tensor.ready_on_gpu() {
            debug!("Reading GPU-resident tensor back to host for CPU conversion");
        }

        let pixels = render_mask(view, &shape, &self.options, width, height)?;
        Ok(Image::Cpu(CpuImage { pixels }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::options::Activation;
    use crate::types::{ImageFormat, Residency};

    fn converter(activation: Activation) -> CpuConverter {
        CpuConverter::new(SegmentationOptions {
            activation,
            ..Default::default()
        })
    }

    #[test]
    fn test_cpu_converter_sigmoid_native_size() {
        let tensor = Tensor::from_f32(&[4, 4, 1], vec![0.0; 16]).unwrap();
        let image = converter(Activation::Sigmoid)
            .convert(&[tensor], 4, 4)
            .unwrap();
        assert_eq!(image.format(), ImageFormat::Vec32F1);
        assert_eq!(image.residency(), Residency::Host);
        assert_eq!((image.width(), image.height()), (4, 4));
        assert!((image.mask_value(2, 2).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_cpu_converter_upscales() {
        let tensor = Tensor::from_f32(&[1, 2, 2, 2], vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0])
            .unwrap();
        let image = converter(Activation::Softmax)
            .convert(&[tensor], 6, 5)
            .unwrap();
        assert_eq!((image.width(), image.height()), (6, 5));
        let expected = 1.0f32.exp() / (1.0 + 1.0f32.exp());
        assert!((image.mask_value(5, 4).unwrap() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_cpu_converter_ignores_auxiliary_tensors() {
        let primary = Tensor::from_f32(&[2, 2, 1], vec![1.0; 4]).unwrap();
        let aux = Tensor::from_f32(&[7], vec![9.0; 7]).unwrap();
        let image = converter(Activation::None)
            .convert(&[primary, aux], 2, 2)
            .unwrap();
        assert_eq!(image.mask_value(0, 0), Some(1.0));
    }

    #[test]
    fn test_cpu_converter_rejects_degenerate_size() {
        let tensor = Tensor::from_f32(&[2, 2, 1], vec![0.0; 4]).unwrap();
        let err = converter(Activation::None)
            .convert(&[tensor], 0, 2)
            .unwrap_err();
        assert!(matches!(err, SegmentationError::Conversion(_)));
    }

    #[test]
    fn test_cpu_converter_rejects_empty_set() {
        let err = converter(Activation::None).convert(&[], 2, 2).unwrap_err();
        assert_eq!(
            err,
            SegmentationError::Conversion("no input tensors".to_string())
        );
    }
}

//! Per-pixel mask math shared by the CPU and GPU converters.

use ndarray::{s, Array2, ArrayViewD};

use crate::error::SegmentationError;

use super::options::{Activation, SegmentationOptions};
use super::shape::TensorShape;

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Map one pixel's channel values to a foreground score.
pub(crate) fn activate(pixel: &[f32], activation: Activation, output_layer_index: usize) -> f32 {
    match activation {
        Activation::None => pixel[0],
        Activation::Sigmoid => sigmoid(pixel[0]),
        Activation::Softmax => {
            let max = pixel[0].max(pixel[1]);
            let a = (pixel[0] - max).exp();
            let b = (pixel[1] - max).exp();
            [a, b][output_layer_index] / (a + b)
        }
    }
}

/// Largest mask a converter will allocate, 8192x8192.
pub const MAX_OUTPUT_PIXELS: usize = 1 << 26;

/// Bytes per texel of the device RGBA32F target.
const RGBA_TEXEL_BYTES: usize = 4 * std::mem::size_of::<f32>();

/// Validate a requested output size coming from a size hint.
pub(crate) fn target_size(width: i32, height: i32) -> Result<(usize, usize), SegmentationError> {
    if width <= 0 || height <= 0 {
        return Err(SegmentationError::Conversion(format!(
            "output size must be positive, got {width}x{height}"
        )));
    }
    let (w, h) = (width as usize, height as usize);
    let too_large = || {
        SegmentationError::Conversion(format!(
            "output size {width}x{height} exceeds {MAX_OUTPUT_PIXELS} pixels"
        ))
    };
    let pixels = w.checked_mul(h).ok_or_else(too_large)?;
    if pixels > MAX_OUTPUT_PIXELS || pixels.checked_mul(RGBA_TEXEL_BYTES).is_none() {
        return Err(too_large());
    }
    Ok((w, h))
}

/// Apply the activation to every pixel of an `HWC` tensor at its native size.
pub(crate) fn activation_mask(
    tensor: ArrayViewD<'_, f32>,
    shape: &TensorShape,
    options: &SegmentationOptions,
) -> Result<Array2<f32>, SegmentationError> {
    let TensorShape {
        height,
        width,
        channels,
    } = *shape;

    if height == 0 || width == 0 {
        return Err(SegmentationError::Conversion(format!(
            "tensor has empty spatial extent {width}x{height}"
        )));
    }
    if channels < options.activation.required_channels() {
        return Err(SegmentationError::Conversion(format!(
            "{} needs {} channel(s), tensor has {channels}",
            options.activation,
            options.activation.required_channels()
        )));
    }
    if options.activation == Activation::Softmax && options.output_layer_index >= channels {
        return Err(SegmentationError::Conversion(format!(
            "output_layer_index {} out of range for {channels} channel(s)",
            options.output_layer_index
        )));
    }

    let standard = tensor.as_standard_layout();
    let values = standard
        .as_slice()
        .ok_or_else(|| SegmentationError::Conversion("tensor is not contiguous".to_string()))?;
    if values.len() != height * width * channels {
        return Err(SegmentationError::Conversion(format!(
            "tensor holds {} values, expected {height}x{width}x{channels}",
            values.len()
        )));
    }

    Ok(Array2::from_shape_fn((height, width), |(y, x)| {
        let base = (y * width + x) * channels;
        activate(
            &values[base..base + channels],
            options.activation,
            options.output_layer_index,
        )
    }))
}

/// Bilinear resize with pixel-center alignment.
pub(crate) fn resize_bilinear(src: &Array2<f32>, dst_w: usize, dst_h: usize) -> Array2<f32> {
    let (src_h, src_w) = src.dim();
    if src_h == dst_h && src_w == dst_w {
        return src.clone();
    }

    Array2::from_shape_fn((dst_h, dst_w), |(dst_y, dst_x)| {
        let src_yf = (dst_y as f64 + 0.5) * src_h as f64 / dst_h as f64 - 0.5;
        let src_y0 = src_yf.floor().max(0.0) as usize;
        let src_y0 = src_y0.min(src_h - 1);
        let src_y1 = (src_y0 + 1).min(src_h - 1);
        let fy = (src_yf - src_y0 as f64).clamp(0.0, 1.0);

        let src_xf = (dst_x as f64 + 0.5) * src_w as f64 / dst_w as f64 - 0.5;
        let src_x0 = src_xf.floor().max(0.0) as usize;
        let src_x0 = src_x0.min(src_w - 1);
        let src_x1 = (src_x0 + 1).min(src_w - 1);
        let fx = (src_xf - src_x0 as f64).clamp(0.0, 1.0);

        let p00 = src[(src_y0, src_x0)] as f64;
        let p10 = src[(src_y0, src_x1)] as f64;
        let p01 = src[(src_y1, src_x0)] as f64;
        let p11 = src[(src_y1, src_x1)] as f64;

        let top = p00 * (1.0 - fx) + p10 * fx;
        let bot = p01 * (1.0 - fx) + p11 * fx;
        (top * (1.0 - fy) + bot * fy) as f32
    })
}

pub(crate) fn flip_vertical(mask: &Array2<f32>) -> Array2<f32> {
    mask.slice(s![..;-1, ..]).to_owned()
}

pub(crate) fn clip_unit(mask: &mut Array2<f32>) {
    mask.mapv_inplace(|v| v.clamp(0.0, 1.0));
}

/// Full mask pipeline: activation at native size, resize, clip.
pub(crate) fn render_mask(
    tensor: ArrayViewD<'_, f32>,
    shape: &TensorShape,
    options: &SegmentationOptions,
    width: i32,
    height: i32,
) -> Result<Array2<f32>, SegmentationError> {
    let (dst_w, dst_h) = target_size(width, height)?;
    let small = activation_mask(tensor, shape, options)?;
    let mut mask = resize_bilinear(&small, dst_w, dst_h);
    clip_unit(&mut mask);
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn shape(height: usize, width: usize, channels: usize) -> TensorShape {
        TensorShape {
            height,
            width,
            channels,
        }
    }

    fn options(activation: Activation) -> SegmentationOptions {
        SegmentationOptions {
            activation,
            ..Default::default()
        }
    }

    #[test]
    fn test_activate_none_and_sigmoid() {
        assert_eq!(activate(&[0.3], Activation::None, 1), 0.3);
        assert!((activate(&[0.0], Activation::Sigmoid, 1) - 0.5).abs() < 1e-6);
        assert!(activate(&[20.0], Activation::Sigmoid, 1) > 0.999);
        assert!(activate(&[-20.0], Activation::Sigmoid, 1) < 0.001);
    }

    #[test]
    fn test_activate_softmax_picks_output_layer() {
        let background_heavy = [3.0, 1.0];
        let fg = activate(&background_heavy, Activation::Softmax, 1);
        let bg = activate(&background_heavy, Activation::Softmax, 0);
        assert!((fg + bg - 1.0).abs() < 1e-6);
        assert!(bg > fg);

        let large = activate(&[1000.0, 1000.0], Activation::Softmax, 1);
        assert!((large - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_target_size_rejects_non_positive() {
        assert_eq!(target_size(3, 4).unwrap(), (3, 4));
        assert!(target_size(0, 4).is_err());
        assert!(target_size(4, -1).is_err());
    }

    #[test]
    fn test_target_size_rejects_oversized_mask() {
        assert_eq!(target_size(8192, 8192).unwrap(), (8192, 8192));
        assert!(matches!(
            target_size(8193, 8192),
            Err(SegmentationError::Conversion(_))
        ));
        let err = target_size(i32::MAX, i32::MAX).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{err}");
    }

    #[test]
    fn test_render_mask_refuses_huge_target_before_allocating() {
        let tensor = ArrayD::from_elem(IxDyn(&[2, 2, 1]), 0.5f32);
        let err = render_mask(
            tensor.view(),
            &shape(2, 2, 1),
            &options(Activation::None),
            i32::MAX,
            i32::MAX,
        )
        .unwrap_err();
        assert!(matches!(err, SegmentationError::Conversion(_)));
    }

    #[test]
    fn test_activation_mask_reads_hwc_layout() {
        // 1x2 pixels, 2 channels: pixel 0 favors channel 1, pixel 1 favors channel 0.
        let tensor = ArrayD::from_shape_vec(IxDyn(&[1, 2, 2]), vec![0.0, 5.0, 5.0, 0.0]).unwrap();
        let mask = activation_mask(tensor.view(), &shape(1, 2, 2), &options(Activation::Softmax))
            .unwrap();
        assert_eq!(mask.dim(), (1, 2));
        assert!(mask[(0, 0)] > 0.99);
        assert!(mask[(0, 1)] < 0.01);
    }

    #[test]
    fn test_activation_mask_rejects_bad_layer_index() {
        let tensor = ArrayD::from_elem(IxDyn(&[2, 2, 2]), 0.0f32);
        let opts = SegmentationOptions {
            activation: Activation::Softmax,
            output_layer_index: 2,
            ..Default::default()
        };
        let err = activation_mask(tensor.view(), &shape(2, 2, 2), &opts).unwrap_err();
        assert!(matches!(err, SegmentationError::Conversion(_)));
    }

    #[test]
    fn test_activation_mask_rejects_empty_extent() {
        let tensor = ArrayD::from_elem(IxDyn(&[0, 2, 1]), 0.0f32);
        let err =
            activation_mask(tensor.view(), &shape(0, 2, 1), &options(Activation::None)).unwrap_err();
        assert!(matches!(err, SegmentationError::Conversion(_)));
    }

    #[test]
    fn test_resize_identity_and_constant() {
        let src = Array2::from_shape_fn((3, 3), |(y, x)| (y * 3 + x) as f32);
        assert_eq!(resize_bilinear(&src, 3, 3), src);

        let flat = Array2::from_elem((4, 4), 0.25f32);
        let up = resize_bilinear(&flat, 9, 7);
        assert_eq!(up.dim(), (7, 9));
        assert!(up.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_resize_downscale_interpolates() {
        let src = Array2::from_shape_vec((2, 2), vec![0.0, 1.0, 0.0, 1.0]).unwrap();
        let down = resize_bilinear(&src, 1, 1);
        assert!((down[(0, 0)] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_flip_vertical() {
        let src = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let flipped = flip_vertical(&src);
        assert_eq!(flipped, Array2::from_shape_vec((2, 2), vec![3.0, 4.0, 1.0, 2.0]).unwrap());
    }

    #[test]
    fn test_render_mask_clips_to_unit_range() {
        let tensor = ArrayD::from_shape_vec(IxDyn(&[1, 2, 1]), vec![-3.0, 4.0]).unwrap();
        let mask = render_mask(tensor.view(), &shape(1, 2, 1), &options(Activation::None), 4, 2)
            .unwrap();
        assert_eq!(mask.dim(), (2, 4));
        assert!(mask.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(mask[(0, 0)], 0.0);
        assert_eq!(mask[(0, 3)], 1.0);
    }
}

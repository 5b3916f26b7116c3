use std::fmt;

use half::f16;
use ndarray::{Array2, ArrayD, ArrayViewD, IxDyn, ShapeError};
use serde::{Deserialize, Serialize};

/// Element type carried by a [`Tensor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Float32,
    Float16,
    UInt8,
    Int32,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float32 => write!(f, "float32"),
            Self::Float16 => write!(f, "float16"),
            Self::UInt8 => write!(f, "uint8"),
            Self::Int32 => write!(f, "int32"),
        }
    }
}

/// Where the most recent copy of a tensor's contents lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Residency {
    #[default]
    Host,
    Gpu,
}

/// Typed tensor storage. Dimensions are the array's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float32(ArrayD<f32>),
    /// FP16 payload, stored with the `half` crate's `f16`.
    Float16(ArrayD<f16>),
    UInt8(ArrayD<u8>),
    Int32(ArrayD<i32>),
}

/// A model output tensor delivered to a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: TensorData,
    residency: Residency,
}

impl Tensor {
    pub fn new(data: TensorData, residency: Residency) -> Self {
        Self { data, residency }
    }

    /// Build a host-resident float32 tensor from a flat row-major buffer.
    pub fn from_f32(dims: &[usize], values: Vec<f32>) -> Result<Self, ShapeError> {
        let array = ArrayD::from_shape_vec(IxDyn(dims), values)?;
        Ok(Self::new(TensorData::Float32(array), Residency::Host))
    }

    /// Mark the tensor as resident on the given side.
    pub fn with_residency(mut self, residency: Residency) -> Self {
        self.residency = residency;
        self
    }

    pub fn element_type(&self) -> ElementType {
        match &self.data {
            TensorData::Float32(_) => ElementType::Float32,
            TensorData::Float16(_) => ElementType::Float16,
            TensorData::UInt8(_) => ElementType::UInt8,
            TensorData::Int32(_) => ElementType::Int32,
        }
    }

    pub fn dims(&self) -> &[usize] {
        match &self.data {
            TensorData::Float32(a) => a.shape(),
            TensorData::Float16(a) => a.shape(),
            TensorData::UInt8(a) => a.shape(),
            TensorData::Int32(a) => a.shape(),
        }
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn ready_on_gpu(&self) -> bool {
        self.residency == Residency::Gpu
    }

    /// Float32 view of the contents, `None` for other element types.
    pub fn as_f32(&self) -> Option<ArrayViewD<'_, f32>> {
        match &self.data {
            TensorData::Float32(a) => Some(a.view()),
            _ => None,
        }
    }
}

/// Pixel layout of an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    /// One float32 channel per pixel.
    Vec32F1,
    /// Four float32 channels per pixel.
    Rgba32F,
}

impl ImageFormat {
    pub fn channels(&self) -> usize {
        match self {
            Self::Vec32F1 => 1,
            Self::Rgba32F => 4,
        }
    }
}

/// Host-resident single-channel float image, indexed `[row, col]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuImage {
    pub pixels: Array2<f32>,
}

impl CpuImage {
    pub fn width(&self) -> u32 {
        self.pixels.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.pixels.nrows() as u32
    }
}

/// Device-resident RGBA float image owned by a GPU context.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuImage {
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Interleaved RGBA, row-major.
    pub texels: Vec<f32>,
}

impl GpuImage {
    /// RGBA value at `(x, y)`.
    pub fn texel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let stride = ImageFormat::Rgba32F.channels();
        let i = (y as usize * self.width as usize + x as usize) * stride;
        let t = self.texels.get(i..i + stride)?;
        Some([t[0], t[1], t[2], t[3]])
    }
}

/// Image artifact published by a segmentation node.
#[derive(Debug, Clone, PartialEq)]
pub enum Image {
    Cpu(CpuImage),
    Gpu(GpuImage),
}

impl Image {
    pub fn width(&self) -> u32 {
        match self {
            Self::Cpu(image) => image.width(),
            Self::Gpu(image) => image.width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::Cpu(image) => image.height(),
            Self::Gpu(image) => image.height,
        }
    }

    pub fn format(&self) -> ImageFormat {
        match self {
            Self::Cpu(_) => ImageFormat::Vec32F1,
            Self::Gpu(_) => ImageFormat::Rgba32F,
        }
    }

    pub fn residency(&self) -> Residency {
        match self {
            Self::Cpu(_) => Residency::Host,
            Self::Gpu(_) => Residency::Gpu,
        }
    }

    /// Logical mask value at `(x, y)`: the single channel on CPU, red on GPU.
    pub fn mask_value(&self, x: u32, y: u32) -> Option<f32> {
        match self {
            Self::Cpu(image) => image.pixels.get((y as usize, x as usize)).copied(),
            Self::Gpu(image) => image.texel(x, y).map(|t| t[0]),
        }
    }
}

/// Monotonic per-frame timestamp in microseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn offset(self, diff: i64) -> Self {
        Self(self.0 + diff)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Port type identifier for connection validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Tensors,
    Size,
    Image,
}

impl PortType {
    pub fn is_compatible(&self, other: &PortType) -> bool {
        self == other
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tensors => write!(f, "Vec<Tensor>"),
            Self::Size => write!(f, "(width, height)"),
            Self::Image => write!(f, "Image"),
        }
    }
}

/// Data types that can flow between node ports.
#[derive(Debug, Clone, PartialEq)]
pub enum PortData {
    Tensors(Vec<Tensor>),
    /// `(width, height)`; not range-checked.
    Size(i32, i32),
    Image(Image),
}

impl PortData {
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Tensors(_) => PortType::Tensors,
            Self::Size(..) => PortType::Size,
            Self::Image(_) => PortType::Image,
        }
    }
}

/// A payload published on an output stream together with its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub timestamp: Timestamp,
    pub data: PortData,
}

impl Packet {
    pub fn new(data: PortData, timestamp: Timestamp) -> Self {
        Self { timestamp, data }
    }

    /// Take the image out of the packet, `None` for other payloads.
    pub fn into_image(self) -> Option<Image> {
        match self.data {
            PortData::Image(image) => Some(image),
            _ => None,
        }
    }
}

use std::fmt;

use crate::{
    device::{DevicePtr, HostPtr},
    error::GraphError,
};

pub const MAX_DIMS: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DType {
    Float16,
    BFloat16,
    #[default]
    Float32,
    Int8,
    Int32,
    Int64,
    UInt8,
    Bool,
}

impl DType {
    pub fn size_bytes(self) -> u64 {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => 1,
            Self::Float16 | Self::BFloat16 => 2,
            Self::Float32 | Self::Int32 => 4,
            Self::Int64 => 8,
        }
    }
}

/// Memory layout of a tensor on device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Format {
    #[default]
    Nd,
    Nchw,
    Nhwc,
    Nc1hwc0,
    FractalNz,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: [usize; MAX_DIMS],
    len: usize,
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self.dims().iter().map(usize::to_string).collect::<Vec<_>>();
        write!(f, "[{}]", dims.join(" x "))
    }
}

impl Shape {
    pub fn new(dims: &[usize]) -> Result<Self, GraphError> {
        if dims.len() > MAX_DIMS {
            return Err(GraphError::TooManyDims(dims.len()));
        }

        let mut inner = [0; MAX_DIMS];
        inner[..dims.len()].copy_from_slice(dims);

        Ok(Self { dims: inner, len: dims.len() })
    }

    pub fn scalar() -> Self {
        Self { dims: [0; MAX_DIMS], len: 0 }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims[..self.len]
    }

    pub fn rank(&self) -> usize {
        self.len
    }

    pub fn size(&self) -> usize {
        self.dims().iter().product()
    }
}

impl TryFrom<&[usize]> for Shape {
    type Error = GraphError;

    fn try_from(value: &[usize]) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
    pub format: Format,
}

impl fmt::Display for TensorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{} ({:?})", self.dtype, self.shape, self.format)
    }
}

impl Default for TensorDesc {
    fn default() -> Self {
        Self::new(DType::default(), Shape::scalar())
    }
}

impl TensorDesc {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape, format: Format::Nd }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    pub fn byte_size(&self) -> u64 {
        self.shape.size() as u64 * self.dtype.size_bytes()
    }
}

/// A tensor descriptor plus wherever its data currently lives.
///
/// Pointers are only meaningful for the duration of a single call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tensor {
    pub desc: TensorDesc,
    pub data: Option<DevicePtr>,
    pub host_data: Option<HostPtr>,
    pub size: u64,
}

impl Tensor {
    pub fn new(desc: TensorDesc) -> Self {
        Self { desc, data: None, host_data: None, size: desc.byte_size() }
    }

    pub fn bound(desc: TensorDesc, data: DevicePtr) -> Self {
        Self { data: Some(data), ..Self::new(desc) }
    }

    pub fn with_host_data(mut self, host: HostPtr) -> Self {
        self.host_data = Some(host);
        self
    }

    pub(crate) fn set_desc(&mut self, desc: TensorDesc) {
        self.desc = desc;
        self.size = desc.byte_size();
    }
}

/// Index of a tensor inside one of a graph's three tensor arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TensorId {
    Input(usize),
    Output(usize),
    Internal(usize),
}

use std::fmt::Debug;

use crate::{
    device::{Device, DeviceRegion},
    error::{OperationError, OperationResult},
    tensor::{Tensor, TensorDesc},
};

/// Everything a runner gets to see for one call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariantPack {
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
    pub tiling: DeviceRegion,
    pub workspace: DeviceRegion,
    pub intermediate: DeviceRegion,
}

impl VariantPack {
    pub fn new(inputs: &[Tensor], outputs: &[Tensor]) -> Self {
        Self { inputs: inputs.to_vec(), outputs: outputs.to_vec(), ..Default::default() }
    }

    pub fn input_descs(&self) -> Vec<TensorDesc> {
        self.inputs.iter().map(|t| t.desc).collect()
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
        self.outputs.clear();
        self.tiling = DeviceRegion::empty();
        self.workspace = DeviceRegion::empty();
        self.intermediate = DeviceRegion::empty();
    }
}

/// A kernel implementation for one operator kind.
///
/// Setup happens on the host once per distinct set of input shapes, while
/// `execute` is called on every run and should only enqueue device work.
pub trait Runner<D: Device>: Debug + 'static {
    fn name(&self) -> String {
        format!("{self:?}")
    }

    /// One-time preparation, called before the first `setup`.
    fn init(&mut self, _device: &D) -> OperationResult<D::DeviceError> {
        Ok(())
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, OperationError<D::DeviceError>>;

    /// Prepare for execution with the tensors in `pack`, whose descriptors
    /// are final but whose pointers are not yet bound.
    fn setup(&mut self, device: &D, pack: &VariantPack) -> OperationResult<D::DeviceError>;

    /// Bytes of launch parameters this runner wants staged on device.
    fn tiling_size(&self) -> u64 {
        0
    }

    /// Bytes of scratch memory needed during `execute`.
    fn workspace_size(&self) -> u64 {
        0
    }

    /// Write launch parameters into `buf`, which is `tiling_size()` bytes long.
    fn fill_host_tiling(&mut self, _buf: &mut [u8]) -> OperationResult<D::DeviceError> {
        Ok(())
    }

    fn execute(&mut self, device: &D, stream: &D::Stream, pack: &VariantPack) -> OperationResult<D::DeviceError>;
}

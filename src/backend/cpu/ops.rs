//! Reference f32 kernels.
//!
//! The planner may hand a kernel output bytes that alias an input dying at
//! the same node, so kernels go through raw pointers and never hold a slice
//! into an output while reading an input.

use crate::{
    error::{OperationError, OperationResult},
    runner::{Runner, VariantPack},
    tensor::{DType, Tensor, TensorDesc},
};

use super::{CpuDevice, CpuError, CpuStream};

type KernelResult<T> = Result<T, OperationError<CpuError>>;

fn elementwise(inputs: &[TensorDesc], arity: usize) -> KernelResult<Vec<TensorDesc>> {
    if inputs.len() != arity {
        return Err(OperationError::MismatchedTensorCount { expected: arity, actual: inputs.len() });
    }

    let first = inputs[0];

    if inputs.iter().any(|desc| desc.dtype != DType::Float32) {
        return Err(OperationError::UnsupportedOperation);
    }

    if let Some(desc) = inputs.iter().find(|desc| desc.shape != first.shape) {
        return Err(OperationError::ShapeInference(format!("{} does not match {}", desc.shape, first.shape)));
    }

    Ok(vec![first])
}

fn check_pack(pack: &VariantPack, inputs: usize) -> KernelResult<usize> {
    if pack.outputs.len() != 1 {
        return Err(OperationError::MismatchedTensorCount { expected: 1, actual: pack.outputs.len() });
    }

    let descs = elementwise(&pack.input_descs(), inputs)?;
    Ok(descs[0].shape.size())
}

fn f32_ptr(tensor: &Tensor) -> KernelResult<*mut f32> {
    tensor.data.map(|ptr| ptr.as_mut_ptr::<f32>()).ok_or(OperationError::from(CpuError::NullPointer))
}

/// `out = a + b`
#[derive(Debug, Default)]
pub struct Add {
    len: usize,
}

impl Runner<CpuDevice> for Add {
    fn name(&self) -> String {
        "Add".to_string()
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> KernelResult<Vec<TensorDesc>> {
        elementwise(inputs, 2)
    }

    fn setup(&mut self, _: &CpuDevice, pack: &VariantPack) -> OperationResult<CpuError> {
        self.len = check_pack(pack, 2)?;
        Ok(())
    }

    fn execute(&mut self, _: &CpuDevice, _: &CpuStream, pack: &VariantPack) -> OperationResult<CpuError> {
        let a = f32_ptr(&pack.inputs[0])?;
        let b = f32_ptr(&pack.inputs[1])?;
        let out = f32_ptr(&pack.outputs[0])?;

        for i in 0..self.len {
            // SAFETY: every tensor was set up with `len` elements
            unsafe { out.add(i).write(a.add(i).read() + b.add(i).read()) }
        }

        Ok(())
    }
}

/// `out = factor * x`, with `factor` shipped through the tiling buffer.
#[derive(Debug)]
pub struct Scale {
    factor: f32,
    len: usize,
}

impl Scale {
    pub fn new(factor: f32) -> Self {
        Self { factor, len: 0 }
    }
}

impl Runner<CpuDevice> for Scale {
    fn name(&self) -> String {
        format!("Scale({})", self.factor)
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> KernelResult<Vec<TensorDesc>> {
        elementwise(inputs, 1)
    }

    fn setup(&mut self, _: &CpuDevice, pack: &VariantPack) -> OperationResult<CpuError> {
        self.len = check_pack(pack, 1)?;
        Ok(())
    }

    fn tiling_size(&self) -> u64 {
        std::mem::size_of::<f32>() as u64
    }

    fn fill_host_tiling(&mut self, buf: &mut [u8]) -> OperationResult<CpuError> {
        let bytes = self.factor.to_ne_bytes();

        if buf.len() != bytes.len() {
            return Err(CpuError::BadTiling { expected: bytes.len() as u64, actual: buf.len() as u64 }.into());
        }

        buf.copy_from_slice(&bytes);
        Ok(())
    }

    fn execute(&mut self, _: &CpuDevice, _: &CpuStream, pack: &VariantPack) -> OperationResult<CpuError> {
        if pack.tiling.size < self.tiling_size() {
            return Err(CpuError::BadTiling { expected: self.tiling_size(), actual: pack.tiling.size }.into());
        }

        let tiling = pack.tiling.ptr.ok_or(CpuError::NullPointer)?;
        let x = f32_ptr(&pack.inputs[0])?;
        let out = f32_ptr(&pack.outputs[0])?;

        // SAFETY: the tiling region holds the 4 bytes written by `fill_host_tiling`
        let factor = unsafe { tiling.as_mut_ptr::<f32>().read_unaligned() };

        for i in 0..self.len {
            // SAFETY: both tensors were set up with `len` elements
            unsafe { out.add(i).write(factor * x.add(i).read()) }
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Relu {
    len: usize,
}

impl Runner<CpuDevice> for Relu {
    fn name(&self) -> String {
        "Relu".to_string()
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> KernelResult<Vec<TensorDesc>> {
        elementwise(inputs, 1)
    }

    fn setup(&mut self, _: &CpuDevice, pack: &VariantPack) -> OperationResult<CpuError> {
        self.len = check_pack(pack, 1)?;
        Ok(())
    }

    fn execute(&mut self, _: &CpuDevice, _: &CpuStream, pack: &VariantPack) -> OperationResult<CpuError> {
        let x = f32_ptr(&pack.inputs[0])?;
        let out = f32_ptr(&pack.outputs[0])?;

        for i in 0..self.len {
            // SAFETY: both tensors were set up with `len` elements
            unsafe { out.add(i).write(x.add(i).read().max(0.0)) }
        }

        Ok(())
    }
}

/// `out = x / sum(x)`, accumulating the sum in workspace.
#[derive(Debug, Default)]
pub struct Normalize {
    len: usize,
}

impl Runner<CpuDevice> for Normalize {
    fn name(&self) -> String {
        "Normalize".to_string()
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> KernelResult<Vec<TensorDesc>> {
        elementwise(inputs, 1)
    }

    fn setup(&mut self, _: &CpuDevice, pack: &VariantPack) -> OperationResult<CpuError> {
        self.len = check_pack(pack, 1)?;
        Ok(())
    }

    fn workspace_size(&self) -> u64 {
        std::mem::size_of::<f32>() as u64
    }

    fn execute(&mut self, _: &CpuDevice, _: &CpuStream, pack: &VariantPack) -> OperationResult<CpuError> {
        let sum = pack.workspace.ptr.ok_or(CpuError::NullPointer)?.as_mut_ptr::<f32>();
        let x = f32_ptr(&pack.inputs[0])?;
        let out = f32_ptr(&pack.outputs[0])?;

        // SAFETY: workspace holds one f32, tensors were set up with `len` elements
        unsafe {
            sum.write_unaligned(0.0);

            for i in 0..self.len {
                sum.write_unaligned(sum.read_unaligned() + x.add(i).read());
            }

            let total = sum.read_unaligned();
            if total == 0.0 {
                return Err(OperationError::Kernel("cannot normalize a zero sum".to_string()));
            }

            for i in 0..self.len {
                out.add(i).write(x.add(i).read() / total);
            }
        }

        Ok(())
    }
}

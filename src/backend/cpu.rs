pub mod ops;

use std::{cell::Cell, ptr};

use crate::{
    device::{Device, DevicePtr},
    registry::RunnerRegistry,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CpuError {
    NullPointer,
    BadTiling { expected: u64, actual: u64 },
}

/// Treats host memory as device memory, every "device" pointer is a plain
/// host address.
#[derive(Debug, Default)]
pub struct CpuDevice;

/// Work runs eagerly, so a stream only keeps count of what it was asked to do.
#[derive(Debug, Default)]
pub struct CpuStream {
    syncs: Cell<u64>,
    copies: Cell<u64>,
}

impl CpuStream {
    pub fn syncs(&self) -> u64 {
        self.syncs.get()
    }

    pub fn copies(&self) -> u64 {
        self.copies.get()
    }
}

impl Device for CpuDevice {
    type DeviceError = CpuError;
    type Stream = CpuStream;

    fn synchronise(&self, stream: &CpuStream) -> Result<(), CpuError> {
        stream.syncs.set(stream.syncs.get() + 1);
        Ok(())
    }

    unsafe fn copy_host_to_device(&self, stream: &CpuStream, dst: DevicePtr, src: &[u8]) -> Result<(), CpuError> {
        if dst.addr() == 0 {
            return Err(CpuError::NullPointer);
        }

        ptr::copy_nonoverlapping(src.as_ptr(), dst.as_mut_ptr::<u8>(), src.len());
        stream.copies.set(stream.copies.get() + 1);

        Ok(())
    }
}

/// Every parameterless reference kernel, by tag.
pub fn registry() -> RunnerRegistry<CpuDevice> {
    let mut registry = RunnerRegistry::default();
    registry.register("add", ops::Add::default);
    registry.register("relu", ops::Relu::default);
    registry.register("normalize", ops::Normalize::default);
    registry
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{ops::*, *};
    use crate::{
        device::DeviceRegion,
        error::{ExecuteError, GraphError, SetupError},
        graph::{builder::GraphBuilder, tests::make_tests},
        operation::Operation,
        runner::Runner,
        settings::RunnerSettings,
        tensor::{DType, Shape, Tensor, TensorDesc},
    };

    make_tests! {
        CpuDevice,
        CpuStream::default(),
        lifetime_maps,
        rejects_invalid_graphs,
        unconsumed_tensor_is_reported,
        reuses_freed_bytes_for_smaller_tensor,
        larger_tensor_dominates,
        small_tensors_are_not_padded,
        workspace_size_formula,
        setup_is_idempotent,
        sizes_follow_latest_setup,
        failed_setup_resets,
        failed_node_setup_stops_later_nodes,
        mismatched_output_is_rejected,
        reshape_is_a_view,
        nested_graph_sizes_compose,
        nodes_execute_in_order,
        failure_short_circuits,
        pointers_are_bound_per_node,
        execute_requires_setup,
        undersized_buffers_are_rejected,
        inputs_must_match_setup,
        nested_graph_binds_through,
    }

    fn vector(len: usize) -> TensorDesc {
        TensorDesc::new(DType::Float32, Shape::new(&[len]).unwrap())
    }

    fn tensor(buf: &mut [f32]) -> Tensor {
        Tensor::bound(vector(buf.len()), DevicePtr::from_host(buf.as_mut_ptr()))
    }

    /// Scratch memory handed to `execute`, 8-byte aligned.
    struct Scratch(Vec<u64>);

    impl Scratch {
        fn new(bytes: u64) -> Self {
            Self(vec![0; bytes.div_ceil(8) as usize])
        }

        fn region(&mut self, bytes: u64) -> DeviceRegion {
            DeviceRegion::new(DevicePtr::from_host(self.0.as_mut_ptr()), bytes)
        }
    }

    fn add_scale_relu(factor: f32) -> Operation<CpuDevice> {
        Operation::from_graph("add_scale_relu", Arc::new(CpuDevice), move || {
            let mut builder = GraphBuilder::new("add_scale_relu");
            let a = builder.add_input();
            let b = builder.add_input();
            let out = builder.add_output();
            let sum = builder.add_internal();
            let scaled = builder.add_internal();

            builder.add_node(Add::default(), &[a, b], &[sum]);
            builder.add_node(Scale::new(factor), &[sum], &[scaled]);
            builder.add_node(Relu::default(), &[scaled], &[out]);

            builder.build()
        })
    }

    #[test]
    fn graph_computes_on_host() {
        let stream = CpuStream::default();
        let mut op = add_scale_relu(2.0);

        let mut a = [1.0, -2.0, 3.0, -4.0];
        let mut b = [1.0; 4];
        let mut out = [0.0; 4];

        let (inputs, outputs) = ([tensor(&mut a), tensor(&mut b)], [tensor(&mut out)]);

        assert_eq!(op.workspace_size(), 0);
        op.setup(&stream, &inputs, &outputs).unwrap();

        // 4 bytes of tiling, then two 16 byte intermediates sharing bytes
        let size = op.workspace_size();
        assert_eq!(size, 4 + 16);

        let mut scratch = Scratch::new(size);
        op.execute(&stream, &inputs, &outputs, scratch.region(size)).unwrap();

        assert_eq!(out, [4.0, 0.0, 8.0, 0.0]);
        assert_eq!(stream.syncs(), 1);
        assert_eq!(stream.copies(), 1);
        assert_eq!(op.copy_stats().1, 1);

        op.execute(&stream, &inputs, &outputs, scratch.region(size)).unwrap();
        assert_eq!(stream.syncs(), 2);
    }

    #[test]
    fn tiling_reaches_single_kernel() {
        let stream = CpuStream::default();
        let mut op = Operation::new("halve", Arc::new(CpuDevice), |_| {
            Ok(Box::new(Scale::new(0.5)) as Box<dyn Runner<CpuDevice>>)
        });

        let mut x = [2.0, 4.0, -8.0];
        let mut y = [0.0; 3];
        let (inputs, outputs) = ([tensor(&mut x)], [tensor(&mut y)]);

        assert_eq!(op.infer_shape(&[vector(3)]).unwrap(), [vector(3)]);

        op.setup(&stream, &inputs, &outputs).unwrap();
        assert_eq!(op.workspace_size(), 4);

        let mut scratch = Scratch::new(4);
        op.execute(&stream, &inputs, &outputs, scratch.region(4)).unwrap();

        assert_eq!(y, [1.0, 2.0, -4.0]);
        let staged = scratch.0[0].to_ne_bytes();
        assert_eq!(f32::from_ne_bytes([staged[0], staged[1], staged[2], staged[3]]), 0.5);
    }

    #[test]
    fn registered_kernels_use_workspace() {
        let stream = CpuStream::default();
        let settings = RunnerSettings::default().with_alignment(4);

        let mut op = Operation::from_graph("relu_normalize", Arc::new(CpuDevice), || {
            let registry = registry();
            let mut builder = GraphBuilder::new("relu_normalize");
            let x = builder.add_input();
            let out = builder.add_output();
            let t0 = builder.add_internal();

            builder.add_registered(&registry, "relu", &[x], &[t0])?;
            builder.add_registered(&registry, "normalize", &[t0], &[out])?;

            builder.build()
        })
        .with_settings(settings);

        let mut x = [-1.0, 1.0, 3.0, -5.0];
        let mut out = [0.0; 4];
        let (inputs, outputs) = ([tensor(&mut x)], [tensor(&mut out)]);

        op.setup(&stream, &inputs, &outputs).unwrap();

        // no tiling, 4 bytes of shared workspace, 16 bytes for t0
        let size = op.workspace_size();
        assert_eq!(size, 4 + 16);

        let mut scratch = Scratch::new(size);
        op.execute(&stream, &inputs, &outputs, scratch.region(size)).unwrap();

        assert_eq!(out, [0.0, 0.25, 0.75, 0.0]);
        assert_eq!(stream.copies(), 0);
    }

    #[test]
    fn kernel_errors_surface_after_sync() {
        let stream = CpuStream::default();
        let mut op = Operation::from_graph("normalize", Arc::new(CpuDevice), || {
            let mut builder = GraphBuilder::new("normalize");
            let x = builder.add_input();
            let out = builder.add_output();
            builder.add_node(Normalize::default(), &[x], &[out]);
            builder.build()
        });

        let mut x = [0.0; 2];
        let mut out = [0.0; 2];
        let (inputs, outputs) = ([tensor(&mut x)], [tensor(&mut out)]);

        op.setup(&stream, &inputs, &outputs).unwrap();

        let size = op.workspace_size();
        let mut scratch = Scratch::new(size);
        let err = op.execute(&stream, &inputs, &outputs, scratch.region(size)).unwrap_err();

        let ExecuteError::Runner(err) = err else { panic!("expected a kernel failure") };
        assert_eq!(err.node_path(), [0]);
        assert_eq!(stream.syncs(), 1);
    }

    #[test]
    fn operation_lifecycle_errors() {
        let stream = CpuStream::default();
        let mut a = [0.0; 4];
        let mut b = [0.0; 4];
        let mut out = [0.0; 4];
        let (inputs, outputs) = ([tensor(&mut a), tensor(&mut b)], [tensor(&mut out)]);

        let mut op = add_scale_relu(1.0);
        let err = op.execute(&stream, &inputs, &outputs, DeviceRegion::empty()).unwrap_err();
        assert!(matches!(err, ExecuteError::NotReady));

        op.setup(&stream, &inputs, &outputs).unwrap();
        let size = op.workspace_size();
        let mut scratch = Scratch::new(size);

        let err = op.execute(&stream, &inputs, &outputs, scratch.region(size - 1)).unwrap_err();
        assert!(matches!(err, ExecuteError::BufferTooSmall { .. }));

        let mut short = [0.0; 3];
        let wrong = [tensor(&mut short)];
        assert!(op.setup(&stream, &inputs, &wrong).is_err());
        assert_eq!(op.workspace_size(), 0);

        let mut broken = Operation::<CpuDevice>::new("broken", Arc::new(CpuDevice), |_| Err(GraphError::EmptyGraph));
        let err = broken.setup(&stream, &inputs, &outputs).unwrap_err();
        assert!(matches!(err, SetupError::Build(GraphError::EmptyGraph)));
        assert!(matches!(broken.setup(&stream, &inputs, &outputs), Err(SetupError::Build(_))));
        assert_eq!(broken.workspace_size(), 0);
    }

    #[test]
    fn null_copy_is_rejected() {
        let stream = CpuStream::default();
        let err = unsafe { CpuDevice.copy_host_to_device(&stream, DevicePtr::from_raw(0), &[1, 2, 3]) };
        assert_eq!(err, Err(CpuError::NullPointer));
        assert_eq!(stream.copies(), 0);
    }
}

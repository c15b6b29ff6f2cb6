use std::time::{Duration, Instant};

use crate::{
    device::{Device, DeviceRegion},
    error::{ExecuteError, OperationError, SetupError},
    runner::{Runner, VariantPack},
    settings::RunnerSettings,
    tensor::{Tensor, TensorDesc},
};

/// Stages a runner's launch parameters on the host and ships them to
/// device once per execution.
///
/// The caller's buffer is split as `[ tiling | runner workspace ]`.
pub struct Plan<D: Device> {
    runner: Box<dyn Runner<D>>,
    settings: RunnerSettings,
    pack: VariantPack,
    host_tiling: Vec<u8>,
    tiling_size: u64,
    workspace_size: u64,
    initialised: bool,
    ready: bool,
    copy_time: Duration,
    copies: u64,
}

impl<D: Device> Plan<D> {
    pub fn new(runner: Box<dyn Runner<D>>, settings: RunnerSettings) -> Self {
        Self {
            runner,
            settings,
            pack: VariantPack::default(),
            host_tiling: Vec::new(),
            tiling_size: 0,
            workspace_size: 0,
            initialised: false,
            ready: false,
            copy_time: Duration::ZERO,
            copies: 0,
        }
    }

    pub fn runner(&self) -> &dyn Runner<D> {
        self.runner.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn tiling_size(&self) -> u64 {
        self.tiling_size
    }

    /// Bytes the caller must provide to `execute`, 0 until a setup succeeds.
    pub fn workspace_size(&self) -> u64 {
        if self.ready {
            self.tiling_size + self.workspace_size
        } else {
            0
        }
    }

    /// The launch parameters that will be copied on the next execute.
    pub fn host_tiling(&self) -> &[u8] {
        &self.host_tiling[..self.tiling_size as usize]
    }

    /// Total time spent issuing host to device tiling copies, and how many were issued.
    pub fn copy_stats(&self) -> (Duration, u64) {
        (self.copy_time, self.copies)
    }

    pub fn infer_shape(&self, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, OperationError<D::DeviceError>> {
        self.runner.infer_shape(inputs)
    }

    fn reset(&mut self) {
        self.ready = false;
        self.tiling_size = 0;
        self.workspace_size = 0;
        self.pack.clear();
    }

    fn grow_host_tiling(&mut self, size: u64) -> Result<(), SetupError<D::DeviceError>> {
        let needed = usize::try_from(size).map_err(|_| SetupError::HostStaging { requested: size })?;

        if self.host_tiling.len() < needed {
            let extra = needed - self.host_tiling.len();
            self.host_tiling.try_reserve(extra).map_err(|_| SetupError::HostStaging { requested: size })?;
            self.host_tiling.resize(needed, 0);
        }

        Ok(())
    }

    pub fn setup(
        &mut self,
        device: &D,
        inputs: &[Tensor],
        outputs: &[Tensor],
    ) -> Result<(), SetupError<D::DeviceError>> {
        self.reset();

        if !self.initialised {
            self.runner.init(device)?;
            self.initialised = true;
        }

        self.pack = VariantPack::new(inputs, outputs);
        self.runner.setup(device, &self.pack)?;

        let tiling_size = self.runner.tiling_size();
        self.grow_host_tiling(tiling_size)?;

        let buf = &mut self.host_tiling[..tiling_size as usize];
        if self.settings.zero_host_tiling {
            buf.fill(0);
        }

        self.runner.fill_host_tiling(buf)?;

        self.tiling_size = tiling_size;
        self.workspace_size = self.runner.workspace_size();
        self.ready = true;

        Ok(())
    }

    /// Copies the staged tiling into the front of `buffer` and runs the runner.
    ///
    /// Work is only queued on `stream`, the caller must synchronise it before
    /// reading outputs or calling `setup` again.
    pub fn execute(
        &mut self,
        device: &D,
        stream: &D::Stream,
        inputs: &[Tensor],
        outputs: &[Tensor],
        buffer: DeviceRegion,
    ) -> Result<(), ExecuteError<D::DeviceError>> {
        if !self.ready {
            return Err(ExecuteError::NotReady);
        }

        let required = self.workspace_size();
        let available = if buffer.ptr.is_some() { buffer.size } else { 0 };
        if available < required {
            return Err(ExecuteError::BufferTooSmall { required, actual: available });
        }

        let (tiling, workspace) = buffer.split_at(self.tiling_size);

        self.pack.inputs.clear();
        self.pack.inputs.extend_from_slice(inputs);
        self.pack.outputs.clear();
        self.pack.outputs.extend_from_slice(outputs);
        self.pack.tiling = tiling;
        self.pack.workspace = workspace.slice(0, self.workspace_size);

        if let Some(dst) = tiling.ptr.filter(|_| self.tiling_size > 0) {
            let t = Instant::now();

            // SAFETY: `buffer` holds at least `tiling_size` bytes and the host copy
            // lives in `self` until the caller synchronises the stream.
            unsafe {
                device
                    .copy_host_to_device(stream, dst, &self.host_tiling[..self.tiling_size as usize])
                    .map_err(ExecuteError::TilingCopy)?;
            }

            self.copy_time += t.elapsed();
            self.copies += 1;
        }

        self.runner.execute(device, stream, &self.pack)?;

        Ok(())
    }
}

use std::{sync::Arc, time::Duration};

use crate::{
    device::{Device, DeviceRegion},
    error::{ExecuteError, GraphError, SetupError},
    graph::{runner::GraphRunner, Graph},
    plan::Plan,
    runner::Runner,
    settings::RunnerSettings,
    tensor::{Tensor, TensorDesc},
};

/// Picks and constructs the runner behind an operation.
pub type RunnerFactory<D> = Box<dyn FnOnce(&RunnerSettings) -> Result<Box<dyn Runner<D>>, GraphError>>;

enum Slot<D: Device> {
    Pending(RunnerFactory<D>),
    Built(Plan<D>),
    Failed(GraphError),
}

/// The caller-facing entry point: set up once per input shape, then
/// execute as many times as needed with a buffer of `workspace_size()` bytes.
///
/// Not safe to drive from several threads at once, use one operation
/// per concurrent caller, each with its own stream.
pub struct Operation<D: Device> {
    name: String,
    device: Arc<D>,
    settings: RunnerSettings,
    slot: Slot<D>,
}

impl<D: Device> Operation<D> {
    pub fn new(
        name: &str,
        device: Arc<D>,
        factory: impl FnOnce(&RunnerSettings) -> Result<Box<dyn Runner<D>>, GraphError> + 'static,
    ) -> Self {
        let slot = Slot::Pending(Box::new(factory));
        Self { name: name.to_string(), device, settings: RunnerSettings::default(), slot }
    }

    /// An operation backed by the graph that `build` produces on first use.
    pub fn from_graph(
        name: &str,
        device: Arc<D>,
        build: impl FnOnce() -> Result<Graph<D>, GraphError> + 'static,
    ) -> Self {
        Self::new(name, device, move |settings| {
            let graph = build()?;
            Ok(Box::new(GraphRunner::new(graph, *settings)) as Box<dyn Runner<D>>)
        })
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> Arc<D> {
        self.device.clone()
    }

    fn plan(&mut self) -> Result<&mut Plan<D>, GraphError> {
        if let Slot::Pending(_) = self.slot {
            self.slot = match std::mem::replace(&mut self.slot, Slot::Failed(GraphError::EmptyGraph)) {
                Slot::Pending(factory) => match factory(&self.settings) {
                    Ok(runner) => {
                        log::debug!("Operation {}: built runner {}", self.name, runner.name());
                        Slot::Built(Plan::new(runner, self.settings))
                    }
                    Err(err) => {
                        log::warn!("Operation {}: failed to build runner: {err}", self.name);
                        Slot::Failed(err)
                    }
                },
                other => other,
            };
        }

        match &mut self.slot {
            Slot::Built(plan) => Ok(plan),
            Slot::Failed(err) => Err(err.clone()),
            Slot::Pending(_) => unreachable!("runner factory is consumed above"),
        }
    }

    pub fn infer_shape(&mut self, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, SetupError<D::DeviceError>> {
        Ok(self.plan()?.infer_shape(inputs)?)
    }

    pub fn setup(
        &mut self,
        stream: &D::Stream,
        inputs: &[Tensor],
        outputs: &[Tensor],
    ) -> Result<(), SetupError<D::DeviceError>> {
        log::trace!("Operation {}: setup on {stream:?}", self.name);

        let device = self.device.clone();
        let plan = self.plan()?;
        plan.setup(&device, inputs, outputs)?;

        let size = plan.workspace_size();
        log::debug!("Operation {}: workspace size {size} bytes", self.name);

        Ok(())
    }

    /// Bytes of device memory `execute` needs, 0 before a successful setup.
    pub fn workspace_size(&self) -> u64 {
        match &self.slot {
            Slot::Built(plan) => plan.workspace_size(),
            _ => 0,
        }
    }

    /// Runs the operation and blocks until `stream` has drained.
    pub fn execute(
        &mut self,
        stream: &D::Stream,
        inputs: &[Tensor],
        outputs: &[Tensor],
        buffer: DeviceRegion,
    ) -> Result<(), ExecuteError<D::DeviceError>> {
        let Slot::Built(plan) = &mut self.slot else { return Err(ExecuteError::NotReady) };

        let result = plan.execute(&self.device, stream, inputs, outputs, buffer);
        let synced = self.device.synchronise(stream);

        result?;
        synced.map_err(ExecuteError::Synchronise)?;

        let (time, copies) = plan.copy_stats();
        log::trace!("Operation {}: {copies} tiling copies, {} us total", self.name, time.as_micros());

        Ok(())
    }

    /// Cumulative host to device tiling copy time, for diagnostics.
    pub fn copy_stats(&self) -> (Duration, u64) {
        match &self.slot {
            Slot::Built(plan) => plan.copy_stats(),
            _ => (Duration::ZERO, 0),
        }
    }
}

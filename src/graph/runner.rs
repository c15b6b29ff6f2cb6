use std::fmt;

use crate::{
    device::{Device, DevicePtr, HostPtr},
    error::{OperationError, OperationResult},
    runner::{Runner, VariantPack},
    settings::RunnerSettings,
    tensor::{Tensor, TensorDesc, TensorId},
};

use super::{
    planner::{self, IntermediatePlan},
    Graph,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    Uninitialised,
    Ready,
}

/// Runs every node of a graph in order on a single stream.
///
/// The workspace it asks for is laid out as
/// `[ shared node workspace | intermediate tensors ]`, and the tiling
/// it asks for is every node's tiling concatenated in node order.
pub struct GraphRunner<D: Device> {
    graph: Graph<D>,
    settings: RunnerSettings,
    state: RunnerState,
    tiling_offsets: Vec<u64>,
    total_tiling_size: u64,
    max_workspace_size: u64,
    intermediates: IntermediatePlan,
}

impl<D: Device> fmt::Debug for GraphRunner<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GraphRunner({})", self.graph.name())
    }
}

fn resolve(
    id: TensorId,
    inputs: &[Tensor],
    outputs: &[Tensor],
    internals: &[Tensor],
) -> (Option<DevicePtr>, Option<HostPtr>) {
    let tensor = match id {
        TensorId::Input(i) => &inputs[i],
        TensorId::Output(i) => &outputs[i],
        TensorId::Internal(i) => &internals[i],
    };

    (tensor.data, tensor.host_data)
}

impl<D: Device> GraphRunner<D> {
    pub fn new(graph: Graph<D>, settings: RunnerSettings) -> Self {
        Self {
            graph,
            settings,
            state: RunnerState::Uninitialised,
            tiling_offsets: Vec::new(),
            total_tiling_size: 0,
            max_workspace_size: 0,
            intermediates: IntermediatePlan::default(),
        }
    }

    pub fn graph(&self) -> &Graph<D> {
        &self.graph
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn total_tiling_size(&self) -> u64 {
        self.total_tiling_size
    }

    pub fn max_workspace_size(&self) -> u64 {
        self.max_workspace_size
    }

    pub fn intermediate_size(&self) -> u64 {
        self.intermediates.size()
    }

    pub fn intermediate_offset(&self, tensor: usize) -> Option<u64> {
        self.intermediates.offset(tensor)
    }

    fn check_count(expected: usize, actual: usize) -> OperationResult<D::DeviceError> {
        if expected == actual {
            Ok(())
        } else {
            Err(OperationError::MismatchedTensorCount { expected, actual })
        }
    }

    fn reset(&mut self) {
        self.state = RunnerState::Uninitialised;
        self.tiling_offsets.clear();
        self.total_tiling_size = 0;
        self.max_workspace_size = 0;
        self.intermediates = IntermediatePlan::default();
    }

    fn try_setup(&mut self, device: &D, pack: &VariantPack) -> OperationResult<D::DeviceError> {
        Self::check_count(self.graph.inputs.len(), pack.inputs.len())?;
        Self::check_count(self.graph.outputs.len(), pack.outputs.len())?;

        self.graph.inputs.copy_from_slice(&pack.inputs);
        self.graph.outputs.copy_from_slice(&pack.outputs);

        let mut table = self.graph.desc_table();
        let mut node_descs = Vec::with_capacity(self.graph.nodes.len());

        for idx in 0..self.graph.nodes.len() {
            let (views, outputs) = self.graph.propagate_node(idx, &table)?;

            for (&id, &desc) in self.graph.nodes[idx].outputs.iter().zip(outputs.iter()) {
                if let TensorId::Output(index) = id {
                    let expected = pack.outputs[index].desc;
                    if expected != desc {
                        let err = OperationError::MismatchedTensor { index, expected, actual: desc };
                        return Err(err.at_node(idx, self.graph.nodes[idx].name()));
                    }
                }

                table.set(id, desc);
            }

            node_descs.push((views, outputs));
        }

        for (tensor, &desc) in self.graph.internals.iter_mut().zip(table.internals.iter()) {
            tensor.set_desc(desc);
            tensor.data = None;
            tensor.host_data = None;
        }

        for (idx, (node, (views, outputs))) in self.graph.nodes.iter_mut().zip(node_descs).enumerate() {
            node.pack.clear();
            node.pack.inputs = views.into_iter().map(Tensor::new).collect();
            node.pack.outputs = outputs.into_iter().map(Tensor::new).collect();

            node.runner.setup(device, &node.pack).map_err(|err| err.at_node(idx, node.runner.name()))?;

            node.pack.tiling.size = node.runner.tiling_size();
            node.pack.workspace.size = node.runner.workspace_size();
        }

        let mut offset = 0;
        for node in &self.graph.nodes {
            self.tiling_offsets.push(offset);
            offset += node.pack.tiling.size;
            self.max_workspace_size = self.max_workspace_size.max(node.pack.workspace.size);
        }

        self.total_tiling_size = offset;

        let sizes = self.graph.internals.iter().map(|t| t.size).collect::<Vec<_>>();
        self.intermediates = planner::solve(self.graph.lifetimes(), &sizes, &self.settings);

        log::debug!(
            "Graph {}: tiling {} bytes, workspace {} bytes, intermediates {} bytes (unshared {} bytes)",
            self.graph.name(),
            self.total_tiling_size,
            self.max_workspace_size,
            self.intermediates.size(),
            sizes.iter().sum::<u64>(),
        );

        Ok(())
    }

    fn bind(&mut self, pack: &VariantPack) -> OperationResult<D::DeviceError> {
        Self::check_count(self.graph.inputs.len(), pack.inputs.len())?;
        Self::check_count(self.graph.outputs.len(), pack.outputs.len())?;

        for (expected, given) in [(&self.graph.inputs, &pack.inputs), (&self.graph.outputs, &pack.outputs)] {
            for (index, (expected, given)) in expected.iter().zip(given.iter()).enumerate() {
                if expected.desc != given.desc {
                    return Err(OperationError::MismatchedTensor { index, expected: expected.desc, actual: given.desc });
                }
            }
        }

        let required_workspace = self.max_workspace_size + self.intermediates.size();
        if pack.tiling.size < self.total_tiling_size || pack.workspace.size < required_workspace {
            return Err(OperationError::BufferTooSmall {
                required: self.total_tiling_size + required_workspace,
                actual: pack.tiling.size + pack.workspace.size,
            });
        }

        self.graph.inputs.copy_from_slice(&pack.inputs);
        self.graph.outputs.copy_from_slice(&pack.outputs);

        let (workspace, intermediate) = pack.workspace.split_at(self.max_workspace_size);
        let intermediate = intermediate.slice(0, self.intermediates.size());

        for (idx, tensor) in self.graph.internals.iter_mut().enumerate() {
            tensor.data = match (intermediate.ptr, self.intermediates.offset(idx)) {
                (Some(base), Some(offset)) => Some(base.offset(offset)),
                _ => None,
            };
        }

        let Graph { inputs, outputs, internals, nodes, .. } = &mut self.graph;

        for (node, &tiling_offset) in nodes.iter_mut().zip(self.tiling_offsets.iter()) {
            for (tensor, &id) in node.pack.inputs.iter_mut().zip(node.inputs.iter()) {
                (tensor.data, tensor.host_data) = resolve(id, inputs, outputs, internals);
            }

            for (tensor, &id) in node.pack.outputs.iter_mut().zip(node.outputs.iter()) {
                (tensor.data, tensor.host_data) = resolve(id, inputs, outputs, internals);
            }

            node.pack.tiling = pack.tiling.slice(tiling_offset, node.pack.tiling.size);
            node.pack.workspace = workspace.slice(0, node.pack.workspace.size);
            node.pack.intermediate = intermediate;
        }

        Ok(())
    }
}

impl<D: Device> Runner<D> for GraphRunner<D> {
    fn name(&self) -> String {
        self.graph.name().to_string()
    }

    fn init(&mut self, device: &D) -> OperationResult<D::DeviceError> {
        for (idx, node) in self.graph.nodes.iter_mut().enumerate() {
            node.runner.init(device).map_err(|err| err.at_node(idx, node.runner.name()))?;
        }

        Ok(())
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, OperationError<D::DeviceError>> {
        Self::check_count(self.graph.inputs.len(), inputs.len())?;

        let mut table = self.graph.desc_table();
        table.inputs.copy_from_slice(inputs);

        for idx in 0..self.graph.nodes.len() {
            let (_, outputs) = self.graph.propagate_node(idx, &table)?;

            for (&id, desc) in self.graph.nodes[idx].outputs.iter().zip(outputs) {
                table.set(id, desc);
            }
        }

        Ok(table.outputs)
    }

    fn setup(&mut self, device: &D, pack: &VariantPack) -> OperationResult<D::DeviceError> {
        self.reset();

        match self.try_setup(device, pack) {
            Ok(()) => {
                self.state = RunnerState::Ready;
                Ok(())
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    fn tiling_size(&self) -> u64 {
        self.total_tiling_size
    }

    fn workspace_size(&self) -> u64 {
        self.max_workspace_size + self.intermediates.size()
    }

    fn fill_host_tiling(&mut self, buf: &mut [u8]) -> OperationResult<D::DeviceError> {
        if self.state != RunnerState::Ready {
            return Err(OperationError::NotReady);
        }

        if (buf.len() as u64) < self.total_tiling_size {
            return Err(OperationError::BufferTooSmall { required: self.total_tiling_size, actual: buf.len() as u64 });
        }

        for (idx, (node, &offset)) in self.graph.nodes.iter_mut().zip(self.tiling_offsets.iter()).enumerate() {
            let start = offset as usize;
            let end = start + node.pack.tiling.size as usize;

            node.runner.fill_host_tiling(&mut buf[start..end]).map_err(|err| err.at_node(idx, node.runner.name()))?;
        }

        Ok(())
    }

    fn execute(&mut self, device: &D, stream: &D::Stream, pack: &VariantPack) -> OperationResult<D::DeviceError> {
        if self.state != RunnerState::Ready {
            return Err(OperationError::NotReady);
        }

        self.bind(pack)?;

        for (idx, node) in self.graph.nodes.iter_mut().enumerate() {
            log::trace!("Graph {}: dispatching node {idx} ({})", self.graph.name, node.runner.name());

            node.runner.execute(device, stream, &node.pack).map_err(|err| err.at_node(idx, node.runner.name()))?;
        }

        Ok(())
    }
}

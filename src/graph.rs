pub mod builder;
pub mod planner;
pub mod runner;

#[cfg(test)]
pub(crate) mod tests;

use std::collections::{BTreeMap, HashMap};

use crate::{
    device::Device,
    error::{GraphError, OperationError},
    runner::{Runner, VariantPack},
    tensor::{Shape, Tensor, TensorDesc, TensorId},
};

/// Remaps the dimensions of one node input without moving any data.
pub type ReshapeFn = Box<dyn Fn(&Shape) -> Shape>;

pub struct Node<D: Device> {
    pub(crate) runner: Box<dyn Runner<D>>,
    pub(crate) inputs: Vec<TensorId>,
    pub(crate) outputs: Vec<TensorId>,
    pub(crate) reshapes: Vec<Option<ReshapeFn>>,
    pub(crate) pack: VariantPack,
}

impl<D: Device> Node<D> {
    pub(crate) fn new(runner: Box<dyn Runner<D>>, inputs: &[TensorId], outputs: &[TensorId]) -> Self {
        Self {
            runner,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            reshapes: inputs.iter().map(|_| None).collect(),
            pack: VariantPack::default(),
        }
    }

    pub fn name(&self) -> String {
        self.runner.name()
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// The tensors this node was last set up or executed with.
    pub fn variant_pack(&self) -> &VariantPack {
        &self.pack
    }
}

/// Lifetime of every internal tensor, measured in node indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Lifetimes {
    producer: Vec<Option<usize>>,
    last_consumer: HashMap<usize, usize>,
    dying_after: BTreeMap<usize, Vec<usize>>,
    produced_at: Vec<Vec<usize>>,
}

impl Lifetimes {
    /// Builds the lifetime maps from the internal tensors each node reads and writes.
    pub fn analyse<'a>(
        num_internals: usize,
        nodes: impl IntoIterator<Item = (&'a [TensorId], &'a [TensorId])>,
    ) -> Result<Self, GraphError> {
        let mut producer = vec![None; num_internals];
        let mut last_consumer = HashMap::new();
        let mut produced_at = Vec::new();

        for (idx, (inputs, outputs)) in nodes.into_iter().enumerate() {
            for input in inputs {
                if let TensorId::Internal(index) = *input {
                    if producer[index].is_none() {
                        return Err(GraphError::ConsumedBeforeProduced { index, node: idx });
                    }

                    last_consumer.insert(index, idx);
                }
            }

            let mut produced = Vec::new();

            for output in outputs {
                if let TensorId::Internal(index) = *output {
                    if let Some(first) = producer[index] {
                        return Err(GraphError::MultipleProducers { index, first, second: idx });
                    }

                    producer[index] = Some(idx);
                    produced.push(index);
                }
            }

            produced_at.push(produced);
        }

        let mut dying_after: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (&tensor, &node) in &last_consumer {
            dying_after.entry(node).or_default().push(tensor);
        }

        for tensors in dying_after.values_mut() {
            tensors.sort_unstable();
        }

        Ok(Self { producer, last_consumer, dying_after, produced_at })
    }

    pub fn num_nodes(&self) -> usize {
        self.produced_at.len()
    }

    pub fn num_internals(&self) -> usize {
        self.producer.len()
    }

    pub fn producer(&self, tensor: usize) -> Option<usize> {
        self.producer.get(tensor).copied().flatten()
    }

    pub fn last_consumer(&self, tensor: usize) -> Option<usize> {
        self.last_consumer.get(&tensor).copied()
    }

    /// Internal tensors last read by `node`.
    pub fn dying_after(&self, node: usize) -> &[usize] {
        self.dying_after.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Internal tensors written by `node`.
    pub fn produced_at(&self, node: usize) -> &[usize] {
        self.produced_at.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Internal tensors that are produced but never read.
    pub fn unconsumed(&self) -> Vec<usize> {
        (0..self.num_internals())
            .filter(|idx| self.producer(*idx).is_some() && self.last_consumer(*idx).is_none())
            .collect()
    }

    /// Half-open range of nodes over which `tensor` must keep its bytes.
    pub fn live_range(&self, tensor: usize) -> Option<(usize, usize)> {
        let start = self.producer(tensor)?;
        let end = self.last_consumer(tensor).unwrap_or(start + 1);
        Some((start, end.max(start + 1)))
    }
}

/// Descriptors of every tensor in a graph while shapes are being propagated.
#[derive(Clone, Debug)]
pub(crate) struct DescTable {
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    pub internals: Vec<TensorDesc>,
}

impl DescTable {
    pub fn get(&self, id: TensorId) -> TensorDesc {
        match id {
            TensorId::Input(i) => self.inputs[i],
            TensorId::Output(i) => self.outputs[i],
            TensorId::Internal(i) => self.internals[i],
        }
    }

    pub fn set(&mut self, id: TensorId, desc: TensorDesc) {
        match id {
            TensorId::Input(i) => self.inputs[i] = desc,
            TensorId::Output(i) => self.outputs[i] = desc,
            TensorId::Internal(i) => self.internals[i] = desc,
        }
    }
}

/// A static list of operator nodes and the tensors flowing between them.
///
/// Node order is the execution order, and is trusted to respect data
/// dependencies. Nodes refer to tensors by index, so the tensor arrays
/// are fixed in size once the graph is built.
pub struct Graph<D: Device> {
    name: String,
    pub(crate) inputs: Vec<Tensor>,
    pub(crate) outputs: Vec<Tensor>,
    pub(crate) internals: Vec<Tensor>,
    pub(crate) nodes: Vec<Node<D>>,
    lifetimes: Lifetimes,
}

impl<D: Device> Graph<D> {
    pub(crate) fn new(name: String, inputs: usize, outputs: usize, internals: usize, nodes: Vec<Node<D>>) -> Self {
        Self {
            name,
            inputs: vec![Tensor::default(); inputs],
            outputs: vec![Tensor::default(); outputs],
            internals: vec![Tensor::default(); internals],
            nodes,
            lifetimes: Lifetimes::default(),
        }
    }

    /// Validates the graph and derives tensor lifetimes.
    pub(crate) fn init(&mut self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            for &tensor in node.inputs.iter().chain(node.outputs.iter()) {
                if !self.contains(tensor) {
                    return Err(GraphError::TensorOutOfBounds { node: idx, tensor });
                }
            }

            if let Some(&TensorId::Input(index)) = node.outputs.iter().find(|x| matches!(x, TensorId::Input(_))) {
                return Err(GraphError::WritesToInput { node: idx, index });
            }
        }

        let mut output_producer = vec![None; self.outputs.len()];

        for (idx, node) in self.nodes.iter().enumerate() {
            for &tensor in &node.inputs {
                if let TensorId::Output(index) = tensor {
                    if output_producer[index].is_none() {
                        return Err(GraphError::OutputReadBeforeProduced { index, node: idx });
                    }
                }
            }

            for &tensor in &node.outputs {
                if let TensorId::Output(index) = tensor {
                    if let Some(first) = output_producer[index] {
                        return Err(GraphError::OutputProducedTwice { index, first, second: idx });
                    }

                    output_producer[index] = Some(idx);
                }
            }
        }

        if let Some(index) = output_producer.iter().position(Option::is_none) {
            return Err(GraphError::OutputNotProduced(index));
        }

        self.lifetimes = Lifetimes::analyse(
            self.internals.len(),
            self.nodes.iter().map(|node| (node.inputs.as_slice(), node.outputs.as_slice())),
        )?;

        for index in 0..self.internals.len() {
            if self.lifetimes.producer(index).is_none() {
                log::warn!("Graph {}: internal tensor {index} is never used", self.name);
            }
        }

        for index in self.lifetimes.unconsumed() {
            log::warn!("Graph {}: internal tensor {index} is produced but never consumed", self.name);
        }

        Ok(())
    }

    fn contains(&self, id: TensorId) -> bool {
        match id {
            TensorId::Input(i) => i < self.inputs.len(),
            TensorId::Output(i) => i < self.outputs.len(),
            TensorId::Internal(i) => i < self.internals.len(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn num_internals(&self) -> usize {
        self.internals.len()
    }

    pub fn nodes(&self) -> &[Node<D>] {
        &self.nodes
    }

    pub fn lifetimes(&self) -> &Lifetimes {
        &self.lifetimes
    }

    pub fn unconsumed_tensors(&self) -> Vec<usize> {
        self.lifetimes.unconsumed()
    }

    pub fn tensor(&self, id: TensorId) -> Option<&Tensor> {
        match id {
            TensorId::Input(i) => self.inputs.get(i),
            TensorId::Output(i) => self.outputs.get(i),
            TensorId::Internal(i) => self.internals.get(i),
        }
    }

    pub(crate) fn desc_table(&self) -> DescTable {
        let descs = |tensors: &[Tensor]| tensors.iter().map(|t| t.desc).collect();
        DescTable { inputs: descs(&self.inputs), outputs: descs(&self.outputs), internals: descs(&self.internals) }
    }

    /// Computes the input views and output descriptors of node `idx`
    /// from the descriptors currently in `table`.
    pub(crate) fn propagate_node(
        &self,
        idx: usize,
        table: &DescTable,
    ) -> Result<(Vec<TensorDesc>, Vec<TensorDesc>), OperationError<D::DeviceError>> {
        let node = &self.nodes[idx];

        let mut views = Vec::with_capacity(node.inputs.len());
        for (slot, (&id, reshape)) in node.inputs.iter().zip(node.reshapes.iter()).enumerate() {
            let desc = table.get(id);

            let view = match reshape {
                Some(reshape) => {
                    let shape = reshape(&desc.shape);
                    if shape.size() != desc.shape.size() {
                        let msg = format!("input {slot} of {} cannot be viewed as {shape}", desc.shape);
                        return Err(OperationError::Reshape(msg).at_node(idx, node.name()));
                    }

                    desc.with_shape(shape)
                }
                None => desc,
            };

            views.push(view);
        }

        let outputs = node.runner.infer_shape(&views).map_err(|err| err.at_node(idx, node.name()))?;

        if outputs.len() != node.outputs.len() {
            let err = OperationError::MismatchedTensorCount { expected: node.outputs.len(), actual: outputs.len() };
            return Err(err.at_node(idx, node.name()));
        }

        Ok((views, outputs))
    }
}

use crate::{
    device::Device,
    error::GraphError,
    registry::RunnerRegistry,
    runner::Runner,
    tensor::{Shape, TensorId},
};

use super::{Graph, Node};

/// Populates a `Graph` one tensor and node at a time.
pub struct GraphBuilder<D: Device> {
    name: String,
    inputs: usize,
    outputs: usize,
    internals: usize,
    nodes: Vec<Node<D>>,
}

impl<D: Device> GraphBuilder<D> {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), inputs: 0, outputs: 0, internals: 0, nodes: Vec::new() }
    }

    pub fn add_input(&mut self) -> TensorId {
        self.inputs += 1;
        TensorId::Input(self.inputs - 1)
    }

    pub fn add_output(&mut self) -> TensorId {
        self.outputs += 1;
        TensorId::Output(self.outputs - 1)
    }

    pub fn add_internal(&mut self) -> TensorId {
        self.internals += 1;
        TensorId::Internal(self.internals - 1)
    }

    /// Appends a node, returning its index. Nodes execute in the order they are added.
    pub fn add_node(&mut self, runner: impl Runner<D>, inputs: &[TensorId], outputs: &[TensorId]) -> usize {
        self.add_boxed_node(Box::new(runner), inputs, outputs)
    }

    pub fn add_boxed_node(&mut self, runner: Box<dyn Runner<D>>, inputs: &[TensorId], outputs: &[TensorId]) -> usize {
        self.nodes.push(Node::new(runner, inputs, outputs));
        self.nodes.len() - 1
    }

    pub fn add_registered(
        &mut self,
        registry: &RunnerRegistry<D>,
        tag: &str,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> Result<usize, GraphError> {
        let runner = registry.create(tag)?;
        Ok(self.add_boxed_node(runner, inputs, outputs))
    }

    /// Views input `input` of node `node` through `reshape` during shape inference.
    pub fn set_reshape(
        &mut self,
        node: usize,
        input: usize,
        reshape: impl Fn(&Shape) -> Shape + 'static,
    ) -> Result<(), GraphError> {
        let entry = self.nodes.get_mut(node).ok_or(GraphError::NodeOutOfBounds(node))?;
        let count = entry.reshapes.len();
        let slot = entry.reshapes.get_mut(input).ok_or(GraphError::ReshapeOutOfBounds { node, input, count })?;

        *slot = Some(Box::new(reshape));

        Ok(())
    }

    pub fn build(self) -> Result<Graph<D>, GraphError> {
        let mut graph = Graph::new(self.name, self.inputs, self.outputs, self.internals, self.nodes);
        graph.init()?;
        Ok(graph)
    }
}

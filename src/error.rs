use std::fmt::{self, Debug, Display};

use crate::tensor::{TensorDesc, TensorId};

/// Errors raised while building a graph, these are always fatal.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("graph has no nodes")]
    EmptyGraph,
    #[error("shape has {0} dimensions, at most {max} are supported", max = crate::tensor::MAX_DIMS)]
    TooManyDims(usize),
    #[error("node {node} references {tensor:?}, which does not exist")]
    TensorOutOfBounds { node: usize, tensor: TensorId },
    #[error("node {node} writes to graph input {index}")]
    WritesToInput { node: usize, index: usize },
    #[error("internal tensor {index} is produced by nodes {first} and {second}")]
    MultipleProducers { index: usize, first: usize, second: usize },
    #[error("internal tensor {index} is read by node {node} before it is produced")]
    ConsumedBeforeProduced { index: usize, node: usize },
    #[error("graph output {0} is never produced")]
    OutputNotProduced(usize),
    #[error("graph output {index} is produced by nodes {first} and {second}")]
    OutputProducedTwice { index: usize, first: usize, second: usize },
    #[error("graph output {index} is read by node {node} before it is produced")]
    OutputReadBeforeProduced { index: usize, node: usize },
    #[error("graph has no node {0}")]
    NodeOutOfBounds(usize),
    #[error("node {node} has a reshape for input {input}, but only {count} inputs")]
    ReshapeOutOfBounds { node: usize, input: usize, count: usize },
    #[error("no runner registered for `{0}`")]
    UnknownRunner(String),
}

/// Failure of a single runner, or of a graph on behalf of one of its nodes.
#[derive(Debug)]
pub enum OperationError<T: Debug> {
    UnsupportedOperation,
    InvalidTensorFormat,
    NotReady,
    BufferTooSmall { required: u64, actual: u64 },
    ShapeInference(String),
    Reshape(String),
    MismatchedTensorCount { expected: usize, actual: usize },
    MismatchedTensor { index: usize, expected: TensorDesc, actual: TensorDesc },
    Kernel(String),
    Graph(GraphError),
    Node { index: usize, name: String, err: Box<OperationError<T>> },
    DeviceError(Box<T>),
}

impl<T: Debug> From<T> for OperationError<T> {
    fn from(value: T) -> Self {
        Self::DeviceError(Box::new(value))
    }
}

impl<T: Debug> OperationError<T> {
    pub fn at_node(self, index: usize, name: String) -> Self {
        Self::Node { index, name, err: Box::new(self) }
    }

    /// The error as raised by the innermost failing runner.
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Node { err, .. } => err.root_cause(),
            other => other,
        }
    }

    /// Index path of failing nodes, outermost graph first.
    pub fn node_path(&self) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = self;

        while let Self::Node { index, err, .. } = current {
            path.push(*index);
            current = err;
        }

        path
    }
}

impl<T: Debug> Display for OperationError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedOperation => write!(f, "unsupported operation"),
            Self::InvalidTensorFormat => write!(f, "invalid tensor format"),
            Self::NotReady => write!(f, "execute called without a successful setup"),
            Self::BufferTooSmall { required, actual } => {
                write!(f, "buffer holds {actual} bytes, {required} are required")
            }
            Self::ShapeInference(msg) => write!(f, "shape inference failed: {msg}"),
            Self::Reshape(msg) => write!(f, "reshape failed: {msg}"),
            Self::MismatchedTensorCount { expected, actual } => {
                write!(f, "expected {expected} tensors, got {actual}")
            }
            Self::MismatchedTensor { index, expected, actual } => {
                write!(f, "tensor {index} is {actual}, expected {expected}")
            }
            Self::Kernel(msg) => write!(f, "kernel failed: {msg}"),
            Self::Graph(err) => write!(f, "{err}"),
            Self::Node { index, name, err } => write!(f, "node {index} ({name}): {err}"),
            Self::DeviceError(err) => write!(f, "device error: {err:?}"),
        }
    }
}

impl<T: Debug> std::error::Error for OperationError<T> {}

pub type OperationResult<T> = Result<(), OperationError<T>>;

#[derive(Debug)]
pub enum SetupError<T: Debug> {
    Build(GraphError),
    Runner(OperationError<T>),
    HostStaging { requested: u64 },
}

impl<T: Debug> Display for SetupError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build(err) => write!(f, "failed to build runner: {err}"),
            Self::Runner(err) => write!(f, "setup failed: {err}"),
            Self::HostStaging { requested } => {
                write!(f, "could not grow host tiling buffer to {requested} bytes")
            }
        }
    }
}

impl<T: Debug> std::error::Error for SetupError<T> {}

impl<T: Debug> From<GraphError> for SetupError<T> {
    fn from(value: GraphError) -> Self {
        Self::Build(value)
    }
}

impl<T: Debug> From<OperationError<T>> for SetupError<T> {
    fn from(value: OperationError<T>) -> Self {
        Self::Runner(value)
    }
}

#[derive(Debug)]
pub enum ExecuteError<T: Debug> {
    NotReady,
    BufferTooSmall { required: u64, actual: u64 },
    TilingCopy(T),
    Synchronise(T),
    Runner(OperationError<T>),
}

impl<T: Debug> Display for ExecuteError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "execute called without a successful setup"),
            Self::BufferTooSmall { required, actual } => {
                write!(f, "workspace buffer holds {actual} bytes, {required} are required")
            }
            Self::TilingCopy(err) => write!(f, "tiling copy to device failed: {err:?}"),
            Self::Synchronise(err) => write!(f, "stream synchronisation failed: {err:?}"),
            Self::Runner(err) => write!(f, "execute failed: {err}"),
        }
    }
}

impl<T: Debug> std::error::Error for ExecuteError<T> {}

impl<T: Debug> From<OperationError<T>> for ExecuteError<T> {
    fn from(value: OperationError<T>) -> Self {
        Self::Runner(value)
    }
}

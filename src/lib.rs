//! Executes a static graph of operator nodes on a device stream, with a
//! host-side setup phase that sizes a single caller-provided buffer and a
//! device-side execute phase that only binds pointers and dispatches.

/// Contains the host-simulated reference backend.
pub mod backend;
/// Contains the `Device` trait and device memory handles.
pub mod device;
/// Contains the error types for graph construction, setup and execution.
pub mod error;
/// Contains `Graph`, its builder, the intermediate buffer planner
/// and `GraphRunner`.
pub mod graph;
/// Contains `Operation`, the entry point callers drive.
pub mod operation;
/// Contains `Plan`, which stages launch parameters on the host.
pub mod plan;
/// Contains `RunnerRegistry`, mapping operator tags to runners.
pub mod registry;
/// Contains the `Runner` trait implemented by every kernel.
pub mod runner;
/// Contains `RunnerSettings`, the knobs for intermediate planning.
pub mod settings;
/// Contains shapes, tensor descriptors and tensor ids.
pub mod tensor;

pub use device::{Device, DevicePtr, DeviceRegion, HostPtr};
pub use error::{ExecuteError, GraphError, OperationError, SetupError};
pub use graph::{builder::GraphBuilder, runner::GraphRunner, Graph};
pub use operation::Operation;
pub use plan::Plan;
pub use registry::RunnerRegistry;
pub use runner::{Runner, VariantPack};
pub use settings::RunnerSettings;
pub use tensor::{DType, Format, Shape, Tensor, TensorDesc, TensorId};

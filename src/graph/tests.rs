
pub use execute::*;
pub use lifetimes::*;
pub use sizes::*;

use std::{cell::RefCell, rc::Rc};

use crate::{
    device::{Device, DevicePtr},
    error::{OperationError, OperationResult},
    runner::{Runner, VariantPack},
    tensor::{DType, Shape, Tensor, TensorDesc},
};

macro_rules! make_tests {
    ($dev:expr, $stream:expr $(, $id:ident)+ $(,)?) => {
        $(
            #[test]
            fn $id() {
                $crate::graph::tests::$id($dev, &$stream);
            }
        )+
    };
}

pub(crate) use make_tests;

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Init(usize),
    Setup(usize, Vec<TensorDesc>),
    Fill(usize, usize),
    Execute(usize, VariantPack),
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

pub fn executed(log: &EventLog) -> Vec<usize> {
    log.borrow()
        .iter()
        .filter_map(|event| match event {
            Event::Execute(id, _) => Some(*id),
            _ => None,
        })
        .collect()
}

pub fn pack_of(log: &EventLog, id: usize) -> VariantPack {
    log.borrow()
        .iter()
        .rev()
        .find_map(|event| match event {
            Event::Execute(x, pack) if *x == id => Some(pack.clone()),
            _ => None,
        })
        .unwrap()
}

pub fn desc(dims: &[usize]) -> TensorDesc {
    TensorDesc::new(DType::Float32, Shape::new(dims).unwrap())
}

pub fn bound(dims: &[usize], addr: u64) -> Tensor {
    Tensor::bound(desc(dims), DevicePtr::from_raw(addr))
}

/// A runner that touches no memory, it only records what it was asked to do.
#[derive(Debug)]
pub struct Mock {
    id: usize,
    tiling: u64,
    workspace: u64,
    outputs: usize,
    shape: Option<Shape>,
    fail_setup: bool,
    fail_execute: bool,
    log: EventLog,
}

impl Mock {
    pub fn new(id: usize, log: &EventLog) -> Self {
        Self {
            id,
            tiling: 0,
            workspace: 0,
            outputs: 1,
            shape: None,
            fail_setup: false,
            fail_execute: false,
            log: log.clone(),
        }
    }

    pub fn tiling(mut self, bytes: u64) -> Self {
        self.tiling = bytes;
        self
    }

    pub fn workspace(mut self, bytes: u64) -> Self {
        self.workspace = bytes;
        self
    }

    pub fn outputs(mut self, count: usize) -> Self {
        self.outputs = count;
        self
    }

    /// Output shape, otherwise outputs mirror the first input.
    pub fn shape(mut self, dims: &[usize]) -> Self {
        self.shape = Some(Shape::new(dims).unwrap());
        self
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    pub fn failing_execute(mut self) -> Self {
        self.fail_execute = true;
        self
    }
}

impl<D: Device> Runner<D> for Mock {
    fn name(&self) -> String {
        format!("mock{}", self.id)
    }

    fn init(&mut self, _device: &D) -> OperationResult<D::DeviceError> {
        self.log.borrow_mut().push(Event::Init(self.id));
        Ok(())
    }

    fn infer_shape(&self, inputs: &[TensorDesc]) -> Result<Vec<TensorDesc>, OperationError<D::DeviceError>> {
        let first = inputs.first().copied().unwrap_or_default();
        let desc = self.shape.map(|shape| first.with_shape(shape)).unwrap_or(first);
        Ok(vec![desc; self.outputs])
    }

    fn setup(&mut self, _device: &D, pack: &VariantPack) -> OperationResult<D::DeviceError> {
        self.log.borrow_mut().push(Event::Setup(self.id, pack.input_descs()));

        if self.fail_setup {
            return Err(OperationError::Kernel(format!("mock {} refused setup", self.id)));
        }

        Ok(())
    }

    fn tiling_size(&self) -> u64 {
        self.tiling
    }

    fn workspace_size(&self) -> u64 {
        self.workspace
    }

    fn fill_host_tiling(&mut self, buf: &mut [u8]) -> OperationResult<D::DeviceError> {
        buf.fill(self.id as u8);
        self.log.borrow_mut().push(Event::Fill(self.id, buf.len()));
        Ok(())
    }

    fn execute(&mut self, _device: &D, _stream: &D::Stream, pack: &VariantPack) -> OperationResult<D::DeviceError> {
        self.log.borrow_mut().push(Event::Execute(self.id, pack.clone()));

        if self.fail_execute {
            return Err(OperationError::Kernel(format!("mock {} failed", self.id)));
        }

        Ok(())
    }
}

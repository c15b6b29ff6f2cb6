use std::collections::HashMap;

use crate::{device::Device, error::GraphError, runner::Runner};

type Constructor<D> = Box<dyn Fn() -> Box<dyn Runner<D>>>;

/// Maps operator tags to runner constructors, so graphs can be assembled
/// from names rather than concrete runner types.
pub struct RunnerRegistry<D: Device> {
    constructors: HashMap<String, Constructor<D>>,
}

impl<D: Device> Default for RunnerRegistry<D> {
    fn default() -> Self {
        Self { constructors: HashMap::new() }
    }
}

impl<D: Device> RunnerRegistry<D> {
    /// Registers `ctor` under `tag`, replacing any previous entry.
    pub fn register<R: Runner<D>>(&mut self, tag: &str, ctor: impl Fn() -> R + 'static) {
        let boxed: Constructor<D> = Box::new(move || Box::new(ctor()) as Box<dyn Runner<D>>);

        if self.constructors.insert(tag.to_string(), boxed).is_some() {
            log::warn!("Runner `{tag}` registered twice, keeping the latest");
        }
    }

    pub fn create(&self, tag: &str) -> Result<Box<dyn Runner<D>>, GraphError> {
        self.constructors.get(tag).map(|ctor| ctor()).ok_or_else(|| GraphError::UnknownRunner(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags = self.constructors.keys().map(String::as_str).collect::<Vec<_>>();
        tags.sort_unstable();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::{ops::Relu, CpuDevice};

    #[test]
    fn lookup() {
        let mut registry = RunnerRegistry::<CpuDevice>::default();
        registry.register("relu", || Relu::default());

        assert!(registry.contains("relu"));
        assert_eq!(registry.create("relu").map(|r| r.name()).ok(), Some("Relu".to_string()));
        assert_eq!(registry.create("gelu").err(), Some(GraphError::UnknownRunner("gelu".to_string())));
    }

    #[test]
    fn tags_are_sorted() {
        let registry = crate::backend::cpu::registry();
        assert_eq!(registry.tags(), ["add", "normalize", "relu"]);
    }
}

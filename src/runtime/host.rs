use super::{GraphExecutor, TensorMap};
use crate::core::graph::ComputationGraph;
use crate::core::tensor::Tensor;
use anyhow::anyhow;
use std::path::Path;

/// Loads a host-side graph once and forwards one named tensor per call.
pub struct HostRunner<E: GraphExecutor> {
    executor: E,
    session: E::Session,
    pub input_name: String,
    pub output_name: String,
}

impl<E: GraphExecutor> HostRunner<E> {
    /// Binds the first declared input and output of the graph at `path`.
    pub fn new(executor: E, path: &Path) -> anyhow::Result<Self> {
        let graph = ComputationGraph::load(path)?;
        let input_name = graph.input_names().next().ok_or_else(|| anyhow!("'{}' declares no input", path.display()))?;
        let output_name = graph.output_names().next().ok_or_else(|| anyhow!("'{}' declares no output", path.display()))?;
        Ok(Self {
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
            session: executor.prepare(&graph)?,
            executor,
        })
    }

    pub fn run(&self, input: Tensor) -> anyhow::Result<Tensor> {
        let feeds = TensorMap::from([(self.input_name.clone(), input)]);
        self.executor
            .run(&self.session, &feeds)?
            .remove(&self.output_name)
            .ok_or_else(|| anyhow!("host graph produced no '{}'", self.output_name))
    }
}

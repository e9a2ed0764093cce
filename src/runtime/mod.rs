//! Seams to the collaborators the pipeline drives but does not own: a graph
//! executor and a device compiler. Reference implementations of both live
//! next to the traits so the tools run without an accelerator SDK.

pub mod compiler;
pub mod host;
pub mod interpreter;

use crate::calibration::CalibrationBatch;
use crate::core::graph::ComputationGraph;
use crate::core::tensor::Tensor;
use std::collections::HashMap;
use std::path::Path;

pub type TensorMap = HashMap<String, Tensor>;

/// Runs graphs on named inputs and returns named outputs.
pub trait GraphExecutor {
    type Session;

    fn prepare(&self, graph: &ComputationGraph) -> anyhow::Result<Self::Session>;

    fn load(&self, path: &Path) -> anyhow::Result<Self::Session> {
        let graph = ComputationGraph::load(path)?;
        self.prepare(&graph)
    }

    fn run(&self, session: &Self::Session, inputs: &TensorMap) -> anyhow::Result<TensorMap>;
}

/// Calibrates, quantizes and compiles a stage1 graph for the accelerator.
pub trait DeviceCompiler {
    type Graph;
    type Quantized;

    fn load(&self, path: &Path) -> anyhow::Result<Self::Graph>;
    fn optimize(&self, graph: Self::Graph, calibration: &CalibrationBatch) -> anyhow::Result<Self::Quantized>;
    fn save(&self, quantized: &Self::Quantized, path: &Path) -> anyhow::Result<()>;
    fn compile(&self, quantized: &Self::Quantized) -> anyhow::Result<Vec<u8>>;
}

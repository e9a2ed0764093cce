use crate::core::graph::ComputationGraph;
use crate::core::tensor::{Tensor, max_abs_diff, random_uniform};
use crate::error::{PipelineError, Result};
use crate::runtime::{GraphExecutor, TensorMap};
use anyhow::anyhow;
use std::fmt;
use tracing::debug;

/// Seed of the synthetic verification input.
pub const VERIFY_SEED: u64 = 0x5eed;

/// Largest element-wise deviation between unsplit and split execution.
/// Advisory only: callers decide what is acceptable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquivalenceReport {
    pub max_abs_diff: f32,
}

impl fmt::Display for EquivalenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3e}", self.max_abs_diff)
    }
}

/// Runs `source` and the `stage1 -> stage2` pipeline on the same synthetic
/// input and returns the maximum absolute difference of the final output.
/// Stage2 also receives the raw input when it still declares it.
pub fn verify<E: GraphExecutor>(
    executor: &E,
    source: &ComputationGraph,
    stage1: &ComputationGraph,
    stage2: &ComputationGraph,
) -> Result<f32> {
    let input = source
        .inputs
        .first()
        .ok_or_else(|| PipelineError::invalid(&source.name, "graph declares no input"))?;
    let reference_name = source
        .output_names()
        .next()
        .ok_or_else(|| PipelineError::invalid(&source.name, "graph declares no output"))?;
    let boundary_name = stage1
        .output_names()
        .next()
        .ok_or_else(|| PipelineError::invalid(&stage1.name, "graph declares no output"))?;

    let dims = input.shape.as_ref().map(|s| s.concretize()).unwrap_or_default();
    let x = random_uniform(&dims, VERIFY_SEED);
    debug!(input = %input.name, shape = ?dims, "synthetic verification input");

    let feeds = TensorMap::from([(input.name.clone(), x.clone())]);
    let reference = execute(executor, source, &feeds, reference_name)?;
    let boundary = execute(executor, stage1, &feeds, boundary_name)?;

    let mut stage2_feeds = TensorMap::from([(boundary_name.to_string(), boundary)]);
    if stage2.has_input(&input.name) {
        stage2_feeds.insert(input.name.clone(), x);
    }
    let split_name = if stage2.output_names().any(|o| o == reference_name) {
        reference_name
    } else {
        stage2
            .output_names()
            .next()
            .ok_or_else(|| PipelineError::invalid(&stage2.name, "graph declares no output"))?
    };
    let split = execute(executor, stage2, &stage2_feeds, split_name)?;

    max_abs_diff(&reference, &split).ok_or_else(|| PipelineError::OutputMismatch {
        reference: reference.shape().to_vec(),
        split: split.shape().to_vec(),
    })
}

fn execute<E: GraphExecutor>(executor: &E, graph: &ComputationGraph, feeds: &TensorMap, output: &str) -> Result<Tensor> {
    let session = executor.prepare(graph)?;
    let mut outputs = executor.run(&session, feeds)?;
    outputs
        .remove(output)
        .ok_or_else(|| PipelineError::Collaborator(anyhow!("graph '{}' returned no '{}'", graph.name, output)))
}

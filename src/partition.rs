use crate::checker::check_graph;
use crate::core::graph::ComputationGraph;
use crate::error::{PipelineError, Result};
use crate::extractor::extract;
use crate::manifest::{BOUNDARY_TENSOR, SplitPoint, VariantSpec};
use crate::pipeline::{VariantOutcome, run_variants};
use crate::rewriter::{rewrite_consumer_side, rewrite_producer_side};
use crate::runtime::GraphExecutor;
use crate::verifier::{EquivalenceReport, verify};
use tracing::info;

/// Stage graphs of one variant, after rewiring and validation.
#[derive(Debug, Clone, PartialEq)]
pub struct StageGraphs {
    pub stage1: ComputationGraph,
    pub stage2: ComputationGraph,
}

/// Cuts `source` at `split.boundary` and rewires both halves onto
/// [`BOUNDARY_TENSOR`]. Stage2 may read the raw model input directly.
pub fn split_graph(source: &ComputationGraph, split: &SplitPoint) -> Result<StageGraphs> {
    let head = extract(source, &[split.input.as_str()], &[split.boundary.as_str()])?;

    let tail_inputs = [split.boundary.as_str(), split.input.as_str()];
    let tail_outputs: Vec<&str> = split.outputs.iter().map(String::as_str).collect();
    let tail = extract(source, &tail_inputs, tail_outputs.as_slice())?;

    let mut stage1 = rewrite_producer_side(&head, &split.boundary, BOUNDARY_TENSOR);
    let mut stage2 = rewrite_consumer_side(&tail, &split.boundary, BOUNDARY_TENSOR);
    stage1.name = format!("{}_stage1", source.name);
    stage2.name = format!("{}_stage2", source.name);

    check_graph(&stage1)?;
    check_graph(&stage2)?;
    Ok(StageGraphs { stage1, stage2 })
}

/// Splits one variant's source graph, persists both stages and, when
/// `verify_split` is set, compares the split pipeline with the source.
pub fn partition_variant<E: GraphExecutor>(
    executor: &E,
    split: &SplitPoint,
    variant: &VariantSpec,
    verify_split: bool,
) -> Result<Option<EquivalenceReport>> {
    if !variant.source_graph.exists() {
        return Err(PipelineError::MissingArtifact(variant.source_graph.clone()));
    }
    let source = ComputationGraph::load(&variant.source_graph)?;
    let stages = split_graph(&source, split)?;

    stages.stage1.save(&variant.stage1_graph)?;
    stages.stage2.save(&variant.stage2_graph)?;
    info!(
        variant = %variant.tag,
        stage1_nodes = stages.stage1.nodes.len(),
        stage2_nodes = stages.stage2.nodes.len(),
        "wrote stage graphs"
    );

    if !verify_split {
        return Ok(None);
    }
    let max_abs_diff = verify(executor, &source, &stages.stage1, &stages.stage2)?;
    Ok(Some(EquivalenceReport { max_abs_diff }))
}

/// Partitions every variant in turn; a failing variant is reported and the
/// batch moves on.
pub fn partition_batch<E: GraphExecutor>(
    executor: &E,
    model: &str,
    split: &SplitPoint,
    variants: &[VariantSpec],
    verify_split: bool,
) -> Vec<VariantOutcome<Option<EquivalenceReport>>> {
    run_variants(variants, |variant| {
        let report = partition_variant(executor, split, variant, verify_split)?;
        match &report {
            Some(r) => info!("Prepared stage models for {}_{} (max diff {})", model, variant.tag, r),
            None => info!("Prepared stage models for {}_{}", model, variant.tag),
        }
        Ok(report)
    })
}

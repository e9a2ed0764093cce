use crate::core::graph::ComputationGraph;
use crate::error::{PipelineError, Result};
use petgraph::algo::toposort;
use std::collections::HashSet;

/// Structural well-formedness: unique declared inputs, a single producer per
/// tensor, every consumed tensor defined upstream, producible outputs and an
/// acyclic node order.
pub fn check_graph(graph: &ComputationGraph) -> Result<()> {
    let invalid = |reason: String| PipelineError::invalid(&graph.name, reason);

    let mut defined: HashSet<&str> = HashSet::new();
    for input in &graph.inputs {
        if input.name.is_empty() {
            return Err(invalid("graph input with empty name".into()));
        }
        if !defined.insert(input.name.as_str()) {
            return Err(invalid(format!("input '{}' declared twice", input.name)));
        }
    }

    // Один производитель на тензор
    for node in &graph.nodes {
        if node.op_type.is_empty() {
            return Err(invalid(format!("node '{}' has no operator", node.name)));
        }
        for out in node.outputs.iter().filter(|o| !o.is_empty()) {
            if !defined.insert(out.as_str()) {
                return Err(invalid(format!(
                    "tensor '{}' has more than one producer (second is node '{}')",
                    out, node.name
                )));
            }
        }
    }

    for node in &graph.nodes {
        if let Some(missing) = node.connected_inputs().find(|i| !defined.contains(i.as_str())) {
            return Err(invalid(format!(
                "node '{}' consumes '{}' which is neither a graph input nor produced by any node",
                node.name, missing
            )));
        }
    }

    if graph.outputs.is_empty() {
        return Err(invalid("graph declares no outputs".into()));
    }
    if let Some(out) = graph.outputs.iter().find(|o| !defined.contains(o.name.as_str())) {
        return Err(invalid(format!("declared output '{}' is never produced", out.name)));
    }

    toposort(&graph.dependency_graph(), None)
        .map_err(|cycle| invalid(format!("cycle through node '{}'", graph.nodes[cycle.node_id().index()].name)))?;

    Ok(())
}

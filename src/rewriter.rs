use crate::core::graph::{ComputationGraph, Node};
use crate::core::types::ValueInfo;
use crate::shape_engine::infer_shapes;
use tracing::debug;

/// Name of the identity node appended to stage1 to expose the boundary.
pub const BOUNDARY_IDENTITY_NODE: &str = "stage1_boundary_identity";

/// Stage1 side of the seam: drops every declared output, routes `old_name`
/// through an identity node into `new_name` and declares `new_name` as the
/// only output. The descriptor comes from shape inference seeded with the
/// dropped outputs' descriptors, or is the unknown-shape placeholder when
/// neither resolves it.
pub fn rewrite_producer_side(graph: &ComputationGraph, old_name: &str, new_name: &str) -> ComputationGraph {
    let mut rewired = graph.clone();
    // Снятые выходы с известной формой остаются в value_info
    for out in std::mem::take(&mut rewired.outputs) {
        if out.shape.is_some() && rewired.find_value_info(&out.name).is_none() {
            rewired.value_info.push(out);
        }
    }
    rewired
        .nodes
        .push(Node::new(BOUNDARY_IDENTITY_NODE, "Identity", &[old_name], &[new_name]));

    let mut inferred = infer_shapes(&rewired);
    let output = inferred
        .value_info
        .iter()
        .position(|vi| vi.name == new_name)
        .map(|pos| inferred.value_info.remove(pos))
        .unwrap_or_else(|| ValueInfo::unknown(new_name));

    debug!(
        graph = %graph.name,
        from = old_name,
        to = new_name,
        shape = ?output.shape,
        "exposed boundary on producer side"
    );
    inferred.outputs = vec![output];
    inferred
}

/// Stage2 side of the seam: renames every occurrence of `old_name` to
/// `new_name`. Absent names leave the graph unchanged.
pub fn rewrite_consumer_side(graph: &ComputationGraph, old_name: &str, new_name: &str) -> ComputationGraph {
    let rename = |t: &String| if t == old_name { new_name.to_string() } else { t.clone() };
    let rename_vi = |vi: &ValueInfo| ValueInfo { name: rename(&vi.name), ..vi.clone() };

    let rewired = ComputationGraph {
        name: graph.name.clone(),
        inputs: graph.inputs.iter().map(rename_vi).collect(),
        outputs: graph.outputs.iter().map(rename_vi).collect(),
        nodes: graph
            .nodes
            .iter()
            .map(|n| Node {
                inputs: n.inputs.iter().map(rename).collect(),
                outputs: n.outputs.iter().map(rename).collect(),
                ..n.clone()
            })
            .collect(),
        value_info: graph.value_info.iter().map(rename_vi).collect(),
    };

    if rewired != *graph {
        debug!(graph = %graph.name, from = old_name, to = new_name, "renamed boundary on consumer side");
    }
    rewired
}

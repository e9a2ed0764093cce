use crate::core::graph::ComputationGraph;
use crate::core::types::ValueInfo;
use crate::error::{PipelineError, Result};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashSet;
use tracing::debug;

/// Minimal sub-graph computing `output_names` from `input_names`.
///
/// The backward walk starts at the producers of the requested outputs and
/// stops at requested inputs. Nodes keep their source order, so a
/// topologically sorted source yields a topologically sorted result.
/// Requested inputs that no kept node consumes are not declared.
pub fn extract<S: AsRef<str>>(
    source: &ComputationGraph,
    input_names: &[S],
    output_names: &[S],
) -> Result<ComputationGraph> {
    let inputs: Vec<&str> = input_names.iter().map(|s| s.as_ref()).collect();
    let outputs: Vec<&str> = output_names.iter().map(|s| s.as_ref()).collect();

    // 1. Все запрошенные тензоры должны существовать
    for name in inputs.iter().chain(&outputs) {
        if !source.defines(name) {
            return Err(PipelineError::GraphExtraction(format!(
                "tensor '{}' does not exist in graph '{}'",
                name, source.name
            )));
        }
    }

    let input_set: HashSet<&str> = inputs.iter().copied().collect();
    let producers = source.producers();
    let deps = source.dependency_graph();

    // 2. Обратный обход от производителей выходов до входов
    let mut keep: HashSet<usize> = HashSet::new();
    let mut stack: Vec<NodeIndex> = Vec::new();
    for out in outputs.iter().filter(|o| !input_set.contains(*o)) {
        match producers.get(out) {
            Some(&pos) => {
                if keep.insert(pos) {
                    stack.push(NodeIndex::new(pos));
                }
            }
            None => return Err(unreachable(out, out, &inputs)),
        }
    }

    while let Some(idx) = stack.pop() {
        let node = &source.nodes[deps[idx]];
        for tensor in node.connected_inputs() {
            if !input_set.contains(tensor.as_str()) && !producers.contains_key(tensor.as_str()) {
                return Err(unreachable(tensor, &node.name, &inputs));
            }
        }
        for edge in deps.edges_directed(idx, Direction::Incoming) {
            if input_set.contains(edge.weight().as_str()) {
                continue;
            }
            if keep.insert(deps[edge.source()]) {
                stack.push(edge.source());
            }
        }
    }

    // 3. Сборка подграфа в исходном порядке узлов
    let nodes: Vec<_> = source
        .nodes
        .iter()
        .enumerate()
        .filter(|(pos, _)| keep.contains(pos))
        .map(|(_, n)| n.clone())
        .collect();

    let consumed: HashSet<&str> = nodes.iter().flat_map(|n| n.connected_inputs()).map(|s| s.as_str()).collect();
    let describe = |name: &str| source.find_value_info(name).cloned().unwrap_or_else(|| ValueInfo::unknown(name));

    let declared_inputs: Vec<ValueInfo> = inputs
        .iter()
        .filter(|i| consumed.contains(*i) || outputs.contains(i))
        .map(|i| ValueInfo { name: i.to_string(), ..describe(i) })
        .collect();
    let declared_outputs: Vec<ValueInfo> = outputs.iter().map(|o| ValueInfo { name: o.to_string(), ..describe(o) }).collect();

    let boundary: HashSet<&str> = inputs.iter().chain(&outputs).copied().collect();
    let value_info = source
        .value_info
        .iter()
        .filter(|vi| !boundary.contains(vi.name.as_str()))
        .filter(|vi| nodes.iter().any(|n| n.outputs.contains(&vi.name)))
        .cloned()
        .collect();

    debug!(
        graph = %source.name,
        kept = nodes.len(),
        total = source.nodes.len(),
        "extracted sub-graph"
    );

    Ok(ComputationGraph {
        name: source.name.clone(),
        inputs: declared_inputs,
        outputs: declared_outputs,
        nodes,
        value_info,
    })
}

fn unreachable(tensor: &str, needed_by: &str, inputs: &[&str]) -> PipelineError {
    PipelineError::GraphExtraction(format!(
        "tensor '{}' (needed by '{}') is not reachable from inputs {:?}",
        tensor, needed_by, inputs
    ))
}

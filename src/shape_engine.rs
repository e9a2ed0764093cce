use crate::core::graph::ComputationGraph;
use crate::core::op::Op;
use crate::core::types::{DataType, Dim, Shape, ValueInfo};
use std::collections::HashMap;
use tracing::trace;

/// Best-effort shape propagation. Returns a copy of the graph whose
/// `value_info` covers every node output that could be resolved; tensors
/// behind unknown operators or unknown inputs are simply left out.
pub fn infer_shapes(graph: &ComputationGraph) -> ComputationGraph {
    let mut known: HashMap<String, ValueInfo> = HashMap::new();
    for vi in graph.inputs.iter().chain(&graph.value_info) {
        if vi.shape.is_some() {
            known.insert(vi.name.clone(), vi.clone());
        }
    }

    let mut inferred = Vec::new();
    for node in &graph.nodes {
        let Ok(op) = Op::from_node(node) else {
            trace!(node = %node.name, op = %node.op_type, "no shape rule");
            continue;
        };
        let inputs: Option<Vec<&ValueInfo>> = node.connected_inputs().map(|i| known.get(i.as_str())).collect();
        let Some(inputs) = inputs else { continue };
        let shapes: Vec<&Shape> = inputs.iter().filter_map(|vi| vi.shape.as_ref()).collect();
        let dtype = inputs.first().map(|vi| vi.dtype).unwrap_or(DataType::F32);

        let Some(shape) = infer_node_shape(&op, &shapes) else { continue };
        for out in node.outputs.iter().filter(|o| !o.is_empty()) {
            let vi = ValueInfo::new(out, dtype, Some(shape.clone()));
            known.insert(out.clone(), vi.clone());
            if !graph.value_info.iter().any(|v| &v.name == out) {
                inferred.push(vi);
            }
        }
    }

    let mut result = graph.clone();
    result.value_info.extend(inferred);
    result
}

fn infer_node_shape(op: &Op, inputs: &[&Shape]) -> Option<Shape> {
    match op {
        _ if op.is_elementwise_unary() => inputs.first().map(|s| (*s).clone()),
        _ if op.is_elementwise_binary() => {
            let (a, b) = (inputs.first()?, inputs.get(1)?);
            broadcast_shapes(a, b)
        }
        Op::Constant { shape, .. } => Some(Shape::from_static(shape)),
        Op::Transpose { permutation } => {
            let s = inputs.first()?;
            let perm: Vec<usize> = permutation.clone().unwrap_or_else(|| (0..s.rank()).rev().collect());
            if perm.len() != s.rank() {
                return None;
            }
            Some(Shape { dims: perm.iter().map(|&i| s.dims.get(i).cloned()).collect::<Option<_>>()? })
        }
        Op::ReduceSum { axis, keepdims } => {
            let mut dims = inputs.first()?.dims.clone();
            let axis = Op::normalize_axis(*axis, dims.len())?;
            if *keepdims {
                dims[axis] = Dim::Static(1);
            } else {
                dims.remove(axis);
            }
            Some(Shape { dims })
        }
        Op::Reshape { new_shape } => reshape_dims(inputs.first()?, new_shape),
        Op::Concat { axis } => {
            let first = inputs.first()?;
            let axis = Op::normalize_axis(*axis, first.rank())?;
            let mut dims = first.dims.clone();
            let mut total = 0;
            for s in inputs {
                total += s.dims.get(axis)?.fixed()?;
            }
            dims[axis] = Dim::Static(total);
            Some(Shape { dims })
        }
        Op::MatMul => {
            let (a, b) = (inputs.first()?, inputs.get(1)?);
            if a.rank() == 2 && b.rank() == 2 {
                Some(Shape { dims: vec![a.dims[0].clone(), b.dims[1].clone()] })
            } else {
                None
            }
        }
        _ => None,
    }
}

/// `0` копирует измерение входа (в т.ч. символьное), `-1` выводится
/// только когда все измерения статичны.
fn reshape_dims(input: &Shape, new_shape: &[i64]) -> Option<Shape> {
    let mut dims = Vec::with_capacity(new_shape.len());
    let mut infer_at = None;
    for (i, &d) in new_shape.iter().enumerate() {
        match d {
            -1 if infer_at.is_none() => {
                infer_at = Some(i);
                dims.push(Dim::Static(1));
            }
            0 => dims.push(input.dims.get(i)?.clone()),
            d if d > 0 => dims.push(Dim::Static(d as usize)),
            _ => return None,
        }
    }
    if let Some(i) = infer_at {
        let total: usize = input.dims.iter().map(Dim::fixed).product::<Option<usize>>()?;
        let known: usize = dims.iter().map(Dim::fixed).product::<Option<usize>>()?;
        if known == 0 || total % known != 0 {
            return None;
        }
        dims[i] = Dim::Static(total / known);
    }
    Some(Shape { dims })
}

/// Правила broadcasting как в numpy; символьное измерение берётся вместо статического.
pub fn broadcast_shapes(a: &Shape, b: &Shape) -> Option<Shape> {
    let len_a = a.dims.len();
    let len_b = b.dims.len();
    let max_len = std::cmp::max(len_a, len_b);
    let mut out_dims = Vec::with_capacity(max_len);

    for i in 0..max_len {
        let dim_a = if i < (max_len - len_a) { &Dim::Static(1) } else { &a.dims[i - (max_len - len_a)] };
        let dim_b = if i < (max_len - len_b) { &Dim::Static(1) } else { &b.dims[i - (max_len - len_b)] };

        match (dim_a, dim_b) {
            (Dim::Static(va), Dim::Static(vb)) => {
                if va == vb { out_dims.push(Dim::Static(*va)); }
                else if *va == 1 { out_dims.push(Dim::Static(*vb)); }
                else if *vb == 1 { out_dims.push(Dim::Static(*va)); }
                else { return None; }
            }
            (Dim::Variable(sa), Dim::Variable(sb)) if sa == sb => out_dims.push(Dim::Variable(sa.clone())),
            (Dim::Variable(s), _) | (_, Dim::Variable(s)) => out_dims.push(Dim::Variable(s.clone())),
        }
    }
    Some(Shape { dims: out_dims })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Node;
    use serde_json::json;

    fn graph_with(nodes: Vec<Node>) -> ComputationGraph {
        ComputationGraph {
            name: "g".into(),
            inputs: vec![ValueInfo::new("x", DataType::F32, Some(Shape::from_static(&[1, 3, 4, 4])))],
            outputs: vec![],
            nodes,
            value_info: vec![],
        }
    }

    #[test]
    fn propagates_through_known_ops() {
        let graph = graph_with(vec![
            Node::new("r", "Relu", &["x"], &["r"]),
            Node::new("t", "Transpose", &["r"], &["t"]).with_attr("perm", json!([0, 2, 3, 1])),
            Node::new("s", "ReduceSum", &["t"], &["s"]).with_attr("axis", json!(3)),
        ]);
        let inferred = infer_shapes(&graph);
        let shape_of = |n: &str| inferred.find_value_info(n).and_then(|v| v.shape.clone());
        assert_eq!(shape_of("r"), Some(Shape::from_static(&[1, 3, 4, 4])));
        assert_eq!(shape_of("t"), Some(Shape::from_static(&[1, 4, 4, 3])));
        assert_eq!(shape_of("s"), Some(Shape::from_static(&[1, 4, 4])));
    }

    #[test]
    fn unknown_ops_leave_downstream_unresolved() {
        let graph = graph_with(vec![
            Node::new("g", "GridSample", &["x"], &["g"]),
            Node::new("r", "Relu", &["g"], &["r"]),
        ]);
        let inferred = infer_shapes(&graph);
        assert!(inferred.find_value_info("g").is_none());
        assert!(inferred.find_value_info("r").is_none());
    }

    fn infer_one(node: Node, input: &[usize]) -> Option<Shape> {
        let mut graph = graph_with(vec![node]);
        graph.inputs[0].shape = Some(Shape::from_static(input));
        infer_shapes(&graph).find_value_info("y").and_then(|v| v.shape.clone())
    }

    #[test]
    fn reshape_copies_zero_dims_and_infers_the_rest() {
        let reshape = |target: serde_json::Value| Node::new("r", "Reshape", &["x"], &["y"]).with_attr("shape", target);
        assert_eq!(infer_one(reshape(json!([0, 12])), &[2, 3, 4]), Some(Shape::from_static(&[2, 12])));
        assert_eq!(infer_one(reshape(json!([-1, 4])), &[2, 3, 4]), Some(Shape::from_static(&[6, 4])));
        assert_eq!(infer_one(reshape(json!([0, 0, 0, 0])), &[2, 3, 4]), None);
        assert_eq!(infer_one(reshape(json!([-1, 5])), &[2, 3, 4]), None);
    }

    #[test]
    fn reshape_keeps_symbolic_dims_it_copies() {
        let mut graph = graph_with(vec![
            Node::new("r", "Reshape", &["x"], &["y"]).with_attr("shape", json!([0, 48])),
            Node::new("f", "Reshape", &["x"], &["z"]).with_attr("shape", json!([-1])),
        ]);
        graph.inputs[0].shape.as_mut().unwrap().dims[0] = Dim::Variable("batch".into());
        let inferred = infer_shapes(&graph);
        let y = inferred.find_value_info("y").and_then(|v| v.shape.clone()).unwrap();
        assert_eq!(y.dims, vec![Dim::Variable("batch".into()), Dim::Static(48)]);
        assert!(inferred.find_value_info("z").is_none());
    }

    #[test]
    fn negative_axes_resolve_against_rank() {
        let sum = Node::new("s", "ReduceSum", &["x"], &["y"]).with_attr("axis", json!(-1));
        assert_eq!(infer_one(sum, &[2, 3]), Some(Shape::from_static(&[2])));
        let sum = Node::new("s", "ReduceSum", &["x"], &["y"]).with_attr("axis", json!(-3));
        assert_eq!(infer_one(sum, &[2, 3]), None);
    }

    #[test]
    fn broadcast_follows_numpy_rules() {
        let a = Shape::from_static(&[2, 1, 4]);
        let b = Shape::from_static(&[3, 1]);
        assert_eq!(broadcast_shapes(&a, &b), Some(Shape::from_static(&[2, 3, 4])));
        assert_eq!(broadcast_shapes(&Shape::from_static(&[2]), &Shape::from_static(&[3])), None);
    }
}

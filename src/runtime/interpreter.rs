use super::{GraphExecutor, TensorMap};
use crate::core::graph::ComputationGraph;
use crate::core::op::Op;
use crate::core::tensor::Tensor;
use anyhow::{Context, anyhow, bail};
use ndarray::{ArrayD, ArrayViewD, Axis, Ix2, IxDyn, Zip, concatenate};
use petgraph::algo::toposort;
use tracing::trace;

/// Reference CPU executor for the operator subset in [`Op`], on `f32` tensors.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

/// A graph with parsed operators and a fixed execution order.
#[derive(Debug, Clone)]
pub struct PreparedGraph {
    pub graph: ComputationGraph,
    ops: Vec<Op>,
    order: Vec<usize>,
}

impl GraphExecutor for Interpreter {
    type Session = PreparedGraph;

    fn prepare(&self, graph: &ComputationGraph) -> anyhow::Result<PreparedGraph> {
        let ops = graph
            .nodes
            .iter()
            .map(|n| Op::from_node(n).with_context(|| format!("node '{}' in graph '{}'", n.name, graph.name)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let deps = graph.dependency_graph();
        let order = toposort(&deps, None)
            .map_err(|_| anyhow!("graph '{}' contains a cycle", graph.name))?
            .into_iter()
            .map(|idx| deps[idx])
            .collect();

        Ok(PreparedGraph { graph: graph.clone(), ops, order })
    }

    fn run(&self, session: &PreparedGraph, inputs: &TensorMap) -> anyhow::Result<TensorMap> {
        let mut values = self.evaluate(session, inputs)?;
        session
            .graph
            .outputs
            .iter()
            .map(|o| {
                values
                    .remove(&o.name)
                    .map(|t| (o.name.clone(), t))
                    .ok_or_else(|| anyhow!("output '{}' was not computed", o.name))
            })
            .collect()
    }
}

impl Interpreter {
    /// Runs the graph and returns every tensor it touched, inputs included.
    pub fn evaluate(&self, session: &PreparedGraph, inputs: &TensorMap) -> anyhow::Result<TensorMap> {
        let graph = &session.graph;
        let mut values = TensorMap::new();
        for input in &graph.inputs {
            let tensor = inputs
                .get(&input.name)
                .ok_or_else(|| anyhow!("graph '{}' expects input '{}'", graph.name, input.name))?;
            values.insert(input.name.clone(), tensor.clone());
        }

        for &pos in &session.order {
            let node = &graph.nodes[pos];
            let args = node
                .connected_inputs()
                .map(|i| values.get(i).ok_or_else(|| anyhow!("node '{}' reads undefined '{}'", node.name, i)))
                .collect::<anyhow::Result<Vec<&Tensor>>>()?;
            let result = eval_op(&session.ops[pos], &args).with_context(|| format!("evaluating node '{}'", node.name))?;
            trace!(node = %node.name, shape = ?result.shape(), "evaluated");
            if let Some(out) = node.outputs.first() {
                values.insert(out.clone(), result);
            }
        }
        Ok(values)
    }
}

fn eval_op(op: &Op, args: &[&Tensor]) -> anyhow::Result<Tensor> {
    let arg = |i: usize| args.get(i).copied().ok_or_else(|| anyhow!("{:?} is missing operand {}", op, i));

    let result = match op {
        Op::Identity => arg(0)?.clone(),
        Op::Relu => arg(0)?.mapv(|v| v.max(0.0)),
        Op::Sigmoid => arg(0)?.mapv(|v| 1.0 / (1.0 + (-v).exp())),
        Op::Tanh => arg(0)?.mapv(f32::tanh),
        Op::Neg => arg(0)?.mapv(|v| -v),
        Op::Abs => arg(0)?.mapv(f32::abs),
        Op::Sqrt => arg(0)?.mapv(f32::sqrt),
        Op::Exp => arg(0)?.mapv(f32::exp),
        Op::Sin => arg(0)?.mapv(f32::sin),
        Op::Add => zip_broadcast(arg(0)?, arg(1)?, |a, b| a + b)?,
        Op::Sub => zip_broadcast(arg(0)?, arg(1)?, |a, b| a - b)?,
        Op::Mul => zip_broadcast(arg(0)?, arg(1)?, |a, b| a * b)?,
        Op::Div => zip_broadcast(arg(0)?, arg(1)?, |a, b| a / b)?,
        Op::Max => zip_broadcast(arg(0)?, arg(1)?, f32::max)?,
        Op::Pow => zip_broadcast(arg(0)?, arg(1)?, f32::powf)?,
        Op::Constant { values, shape } => ArrayD::from_shape_vec(IxDyn(shape), values.clone())?,
        Op::Transpose { permutation } => {
            let x = arg(0)?;
            let perm = permutation.clone().unwrap_or_else(|| (0..x.ndim()).rev().collect());
            if perm.len() != x.ndim() {
                bail!("permutation {:?} does not match rank {}", perm, x.ndim());
            }
            x.view().permuted_axes(perm).as_standard_layout().into_owned()
        }
        Op::ReduceSum { axis, keepdims } => {
            let x = arg(0)?;
            let axis = Op::normalize_axis(*axis, x.ndim())
                .ok_or_else(|| anyhow!("axis {} out of range for rank {}", axis, x.ndim()))?;
            let summed = x.sum_axis(Axis(axis));
            if *keepdims { summed.insert_axis(Axis(axis)) } else { summed }
        }
        Op::Reshape { new_shape } => {
            let x = arg(0)?;
            let dims = resolve_reshape(x.shape(), new_shape)?;
            x.as_standard_layout().into_owned().into_shape_with_order(IxDyn(&dims))?
        }
        Op::Concat { axis } => {
            let rank = arg(0)?.ndim();
            let axis = Op::normalize_axis(*axis, rank)
                .ok_or_else(|| anyhow!("axis {} out of range for rank {}", axis, rank))?;
            let views: Vec<ArrayViewD<f32>> = args.iter().map(|t| t.view()).collect();
            concatenate(Axis(axis), &views)?
        }
        Op::MatMul => {
            let a = arg(0)?.view().into_dimensionality::<Ix2>()?;
            let b = arg(1)?.view().into_dimensionality::<Ix2>()?;
            if a.ncols() != b.nrows() {
                bail!("matmul of {:?} by {:?}", a.shape(), b.shape());
            }
            a.dot(&b).into_dyn()
        }
    };
    Ok(result)
}

fn zip_broadcast(a: &Tensor, b: &Tensor, f: impl Fn(f32, f32) -> f32) -> anyhow::Result<Tensor> {
    let shape = broadcast_dims(a.shape(), b.shape())
        .ok_or_else(|| anyhow!("cannot broadcast {:?} with {:?}", a.shape(), b.shape()))?;
    let (va, vb) = match (a.broadcast(IxDyn(&shape)), b.broadcast(IxDyn(&shape))) {
        (Some(va), Some(vb)) => (va, vb),
        _ => bail!("cannot broadcast {:?} with {:?}", a.shape(), b.shape()),
    };
    Ok(Zip::from(&va).and(&vb).map_collect(|&x, &y| f(x, y)))
}

fn broadcast_dims(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    (0..rank)
        .map(|i| {
            let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
            let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
            match (da, db) {
                _ if da == db => Some(da),
                (1, d) | (d, 1) => Some(d),
                _ => None,
            }
        })
        .collect()
}

/// `0` copies the input extent, a single `-1` absorbs the remainder.
fn resolve_reshape(input: &[usize], new_shape: &[i64]) -> anyhow::Result<Vec<usize>> {
    let total: usize = input.iter().product();
    let mut dims = Vec::with_capacity(new_shape.len());
    let mut infer_at = None;
    for (i, &d) in new_shape.iter().enumerate() {
        match d {
            -1 if infer_at.is_none() => {
                infer_at = Some(i);
                dims.push(1);
            }
            0 => dims.push(*input.get(i).ok_or_else(|| anyhow!("reshape copies missing axis {}", i))?),
            d if d > 0 => dims.push(d as usize),
            _ => bail!("invalid reshape target {:?}", new_shape),
        }
    }
    if let Some(i) = infer_at {
        let known: usize = dims.iter().product();
        if known == 0 || total % known != 0 {
            bail!("cannot reshape {:?} into {:?}", input, new_shape);
        }
        dims[i] = total / known;
    }
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Node;
    use crate::core::types::ValueInfo;
    use ndarray::array;
    use serde_json::json;

    fn run_single(node: Node, inputs: Vec<(&str, Tensor)>) -> Tensor {
        let graph = ComputationGraph {
            name: "op".into(),
            inputs: inputs.iter().map(|(n, _)| ValueInfo::unknown(n)).collect(),
            outputs: vec![ValueInfo::unknown(&node.outputs[0])],
            nodes: vec![node],
            value_info: vec![],
        };
        let session = Interpreter.prepare(&graph).unwrap();
        let map = inputs.into_iter().map(|(n, t)| (n.to_string(), t)).collect();
        let mut out = Interpreter.run(&session, &map).unwrap();
        out.remove(&graph.outputs[0].name).unwrap()
    }

    #[test]
    fn binary_ops_broadcast() {
        let a = array![[1.0f32, 2.0], [3.0, 4.0]].into_dyn();
        let b = array![10.0f32, 20.0].into_dyn();
        let y = run_single(Node::new("add", "Add", &["a", "b"], &["y"]), vec![("a", a), ("b", b)]);
        assert_eq!(y, array![[11.0f32, 22.0], [13.0, 24.0]].into_dyn());
    }

    #[test]
    fn nodes_run_in_dependency_order() {
        // listed out of order on purpose
        let graph = ComputationGraph {
            name: "g".into(),
            inputs: vec![ValueInfo::unknown("x")],
            outputs: vec![ValueInfo::unknown("z")],
            nodes: vec![
                Node::new("second", "Mul", &["y", "k"], &["z"]),
                Node::new("k", "Constant", &[], &["k"]).with_attr("values", json!([2.0])),
                Node::new("first", "Neg", &["x"], &["y"]),
            ],
            value_info: vec![],
        };
        let session = Interpreter.prepare(&graph).unwrap();
        let inputs = TensorMap::from([("x".to_string(), array![1.0f32, -3.0].into_dyn())]);
        let out = Interpreter.run(&session, &inputs).unwrap();
        assert_eq!(out["z"], array![-2.0f32, 6.0].into_dyn());
    }

    #[test]
    fn shape_ops() {
        let x = Tensor::from_shape_vec(IxDyn(&[1, 2, 3]), (0..6).map(|v| v as f32).collect()).unwrap();
        let t = run_single(
            Node::new("t", "Transpose", &["x"], &["y"]).with_attr("perm", json!([0, 2, 1])),
            vec![("x", x.clone())],
        );
        assert_eq!(t.shape(), &[1, 3, 2]);
        assert_eq!(t[[0, 2, 1]], 5.0);

        let r = run_single(Node::new("r", "Reshape", &["x"], &["y"]).with_attr("shape", json!([0, -1])), vec![("x", x.clone())]);
        assert_eq!(r.shape(), &[1, 6]);

        let s = run_single(
            Node::new("s", "ReduceSum", &["x"], &["y"]).with_attr("axis", json!(2)).with_attr("keepdims", json!(true)),
            vec![("x", x)],
        );
        assert_eq!(s, array![[[3.0f32], [12.0]]].into_dyn());
    }

    #[test]
    fn negative_axes_count_from_the_last_dimension() {
        let x = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn();
        let s = run_single(
            Node::new("s", "ReduceSum", &["x"], &["y"]).with_attr("axis", json!(-1)),
            vec![("x", x.clone())],
        );
        assert_eq!(s, array![6.0f32, 15.0].into_dyn());

        let c = run_single(
            Node::new("c", "Concat", &["a", "b"], &["y"]).with_attr("axis", json!(-1)),
            vec![("a", x.clone()), ("b", x.clone())],
        );
        assert_eq!(c.shape(), &[2, 6]);
    }

    #[test]
    fn out_of_range_axis_is_an_error() {
        let graph = ComputationGraph {
            name: "g".into(),
            inputs: vec![ValueInfo::unknown("x")],
            outputs: vec![ValueInfo::unknown("y")],
            nodes: vec![Node::new("s", "ReduceSum", &["x"], &["y"]).with_attr("axis", json!(-3))],
            value_info: vec![],
        };
        let session = Interpreter.prepare(&graph).unwrap();
        let inputs = TensorMap::from([("x".to_string(), array![[1.0f32, 2.0]].into_dyn())]);
        assert!(Interpreter.run(&session, &inputs).is_err());
    }

    #[test]
    fn missing_inputs_and_unknown_ops_fail() {
        let graph = ComputationGraph {
            name: "g".into(),
            inputs: vec![ValueInfo::unknown("x")],
            outputs: vec![ValueInfo::unknown("y")],
            nodes: vec![Node::new("r", "Relu", &["x"], &["y"])],
            value_info: vec![],
        };
        let session = Interpreter.prepare(&graph).unwrap();
        assert!(Interpreter.run(&session, &TensorMap::new()).is_err());

        let mut unknown = graph.clone();
        unknown.nodes[0].op_type = "TopK".into();
        assert!(Interpreter.prepare(&unknown).is_err());
    }
}

use crate::core::graph::Node;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Op {
    // Unary
    Identity, Relu, Sigmoid, Tanh, Neg, Abs, Sqrt, Exp, Sin,
    // Binary
    Add, Sub, Mul, Div, Max, Pow,
    // Special
    Constant { values: Vec<f32>, shape: Vec<usize> },
    Transpose { permutation: Option<Vec<usize>> },
    ReduceSum { axis: i64, keepdims: bool },
    Reshape { new_shape: Vec<i64> },
    Concat { axis: i64 },
    MatMul,
}

impl Op {
    pub fn from_node(node: &Node) -> anyhow::Result<Self> {
        let attr = |key: &str| node.attributes.get(key).cloned().unwrap_or_default();
        let axis = || match node.attributes.get("axis") {
            None => Ok(0),
            Some(v) => v
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("{} '{}': axis {} is not an integer", node.op_type, node.name, v)),
        };
        match node.op_type.as_str() {
            "Identity" => Ok(Op::Identity),
            "Relu" => Ok(Op::Relu),
            "Sigmoid" => Ok(Op::Sigmoid),
            "Tanh" => Ok(Op::Tanh),
            "Neg" => Ok(Op::Neg),
            "Abs" => Ok(Op::Abs),
            "Sqrt" => Ok(Op::Sqrt),
            "Exp" => Ok(Op::Exp),
            "Sin" => Ok(Op::Sin),
            "Add" => Ok(Op::Add),
            "Sub" => Ok(Op::Sub),
            "Mul" => Ok(Op::Mul),
            "Div" => Ok(Op::Div),
            "Max" => Ok(Op::Max),
            "Pow" => Ok(Op::Pow),
            "MatMul" => Ok(Op::MatMul),
            "Constant" => {
                let values: Vec<f32> = serde_json::from_value(attr("values"))?;
                let shape: Vec<usize> = if node.attributes.contains_key("shape") {
                    serde_json::from_value(attr("shape"))?
                } else {
                    vec![values.len()]
                };
                if shape.iter().product::<usize>() != values.len() {
                    anyhow::bail!("Constant '{}': shape {:?} does not hold {} values", node.name, shape, values.len());
                }
                Ok(Op::Constant { values, shape })
            }
            "Transpose" => {
                let permutation = if node.attributes.contains_key("perm") {
                    Some(serde_json::from_value(attr("perm"))?)
                } else {
                    None
                };
                Ok(Op::Transpose { permutation })
            }
            "ReduceSum" => {
                let axis = axis()?;
                let keepdims = attr("keepdims").as_bool().unwrap_or(false);
                Ok(Op::ReduceSum { axis, keepdims })
            }
            "Reshape" => {
                let new_shape: Vec<i64> = serde_json::from_value(attr("shape"))?;
                Ok(Op::Reshape { new_shape })
            }
            "Concat" => {
                Ok(Op::Concat { axis: axis()? })
            }
            other => Err(anyhow::anyhow!("Unknown op: {}", other)),
        }
    }

    /// Resolves a possibly negative axis against `rank`; `None` when out of range.
    pub fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
        let resolved = if axis < 0 { axis + rank as i64 } else { axis };
        usize::try_from(resolved).ok().filter(|&a| a < rank)
    }

    pub fn is_elementwise_unary(&self) -> bool {
        matches!(
            self,
            Op::Identity | Op::Relu | Op::Sigmoid | Op::Tanh | Op::Neg | Op::Abs | Op::Sqrt | Op::Exp | Op::Sin
        )
    }

    pub fn is_elementwise_binary(&self) -> bool {
        matches!(self, Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Max | Op::Pow)
    }
}

use crate::core::types::ValueInfo;
use crate::error::{PipelineError, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Node {
    #[serde(default)]
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Node {
    pub fn new(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: serde_json::Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// Wired inputs; empty names mark omitted optional inputs.
    pub fn connected_inputs(&self) -> impl Iterator<Item = &String> {
        self.inputs.iter().filter(|i| !i.is_empty())
    }
}

/// Flat tensor-name wiring: every edge is a string identifier shared by one
/// producer (graph input or node output) and any number of consumers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ComputationGraph {
    #[serde(default)]
    pub name: String,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_info: Vec<ValueInfo>,
}

impl ComputationGraph {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_json(&content).map_err(|source| PipelineError::Format { path: path.to_path_buf(), source })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        let json = self.to_json().map_err(|source| PipelineError::Format { path: path.to_path_buf(), source })?;
        fs::write(path, json).map_err(|e| PipelineError::io(path, e))
    }

    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|i| i.name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.name.as_str())
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i.name == name)
    }

    /// Tensor name -> position of the node producing it.
    pub fn producers(&self) -> HashMap<&str, usize> {
        let mut map = HashMap::new();
        for (pos, node) in self.nodes.iter().enumerate() {
            for out in node.outputs.iter().filter(|o| !o.is_empty()) {
                map.entry(out.as_str()).or_insert(pos);
            }
        }
        map
    }

    /// True if the tensor is a graph input or some node output.
    pub fn defines(&self, name: &str) -> bool {
        self.has_input(name) || self.nodes.iter().any(|n| n.outputs.iter().any(|o| o == name))
    }

    /// True if the identifier is referenced anywhere in the graph.
    pub fn mentions(&self, name: &str) -> bool {
        self.inputs.iter().chain(&self.outputs).chain(&self.value_info).any(|v| v.name == name)
            || self.nodes.iter().any(|n| n.inputs.iter().chain(&n.outputs).any(|t| t == name))
    }

    /// Best known descriptor for a tensor, looking at declared inputs,
    /// outputs and intermediate annotations in that order.
    pub fn find_value_info(&self, name: &str) -> Option<&ValueInfo> {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .chain(&self.value_info)
            .find(|v| v.name == name)
    }

    /// Node-level dependency graph. Node weights are positions into
    /// `self.nodes`, edge weights the tensor carried from producer to consumer.
    pub fn dependency_graph(&self) -> DiGraph<usize, String> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.nodes.len());
        let indices: Vec<NodeIndex> = (0..self.nodes.len()).map(|pos| graph.add_node(pos)).collect();
        let producers = self.producers();
        for (pos, node) in self.nodes.iter().enumerate() {
            for input in node.connected_inputs() {
                if let Some(&src) = producers.get(input.as_str()) {
                    graph.add_edge(indices[src], indices[pos], input.clone());
                }
            }
        }
        graph
    }
}

use super::interpreter::Interpreter;
use super::{DeviceCompiler, GraphExecutor, TensorMap};
use crate::calibration::CalibrationBatch;
use crate::core::graph::ComputationGraph;
use crate::core::tensor::value_range;
use anyhow::{Context as _, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, info};

const KERNEL_TEMPLATE: &str = r#"/* {{ graph }}: {{ target }} kernel, calibrated on {{ samples }} samples */
#include <stdint.h>

typedef struct { float scale; uint8_t zero_point; } qparam_t;
{% for t in tensors %}
static const qparam_t q_{{ t.id }} = { {{ t.scale }}, {{ t.zero_point }} };
{%- endfor %}

void {{ entry }}({{ args | join(sep=", ") }}) {
{%- for k in kernels %}
    {{ k.call }}; /* {{ k.name }} */
{%- endfor %}
}
"#;

/// Asymmetric per-tensor u8 quantization parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QuantParams {
    pub min: f32,
    pub max: f32,
    pub scale: f32,
    pub zero_point: u8,
}

impl QuantParams {
    /// The representable range always contains zero.
    pub fn from_range(min: f32, max: f32) -> Self {
        let lo = min.min(0.0);
        let hi = max.max(0.0);
        let scale = if hi > lo { (hi - lo) / 255.0 } else { 1.0 };
        let zero_point = (-lo / scale).round().clamp(0.0, 255.0) as u8;
        Self { min, max, scale, zero_point }
    }

    pub fn quantize(&self, v: f32) -> u8 {
        (v / self.scale + self.zero_point as f32).round().clamp(0.0, 255.0) as u8
    }

    pub fn dequantize(&self, q: u8) -> f32 {
        (q as f32 - self.zero_point as f32) * self.scale
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuantizedGraph {
    pub target: String,
    pub calibration_samples: usize,
    pub graph: ComputationGraph,
    pub params: BTreeMap<String, QuantParams>,
}

/// Device compiler stand-in: range calibration through the reference
/// interpreter and a C kernel listing as the compiled artifact.
#[derive(Debug, Clone)]
pub struct ReferenceCompiler {
    pub target: String,
}

impl Default for ReferenceCompiler {
    fn default() -> Self {
        Self { target: "ref-u8".into() }
    }
}

#[derive(Serialize)]
struct TensorRenderInfo {
    id: String,
    scale: String,
    zero_point: u8,
}

#[derive(Serialize)]
struct KernelRenderInfo {
    name: String,
    call: String,
}

impl DeviceCompiler for ReferenceCompiler {
    type Graph = ComputationGraph;
    type Quantized = QuantizedGraph;

    fn load(&self, path: &Path) -> anyhow::Result<ComputationGraph> {
        Ok(ComputationGraph::load(path)?)
    }

    fn optimize(&self, graph: ComputationGraph, calibration: &CalibrationBatch) -> anyhow::Result<QuantizedGraph> {
        let input = match graph.inputs.as_slice() {
            [single] => single.clone(),
            other => bail!("graph '{}' must have exactly one input, found {}", graph.name, other.len()),
        };
        let channel_first = input
            .shape
            .as_ref()
            .filter(|s| s.rank() == 4)
            .and_then(|s| s.dims[1].fixed())
            .is_some_and(|c| calibration.data.shape()[3] == c && matches!(c, 1 | 3));

        let session = Interpreter.prepare(&graph)?;
        let mut ranges: BTreeMap<String, (f32, f32)> = BTreeMap::new();
        for i in 0..calibration.len() {
            let mut sample = calibration.sample(i);
            if channel_first {
                sample = sample.permuted_axes(vec![0, 3, 1, 2]).as_standard_layout().into_owned();
            }
            let feeds = TensorMap::from([(input.name.clone(), sample)]);
            let values = Interpreter
                .evaluate(&session, &feeds)
                .with_context(|| format!("calibration sample {}", i))?;
            for (name, tensor) in &values {
                let (lo, hi) = value_range(tensor);
                let entry = ranges.entry(name.clone()).or_insert((lo, hi));
                *entry = (entry.0.min(lo), entry.1.max(hi));
            }
        }

        let params: BTreeMap<String, QuantParams> =
            ranges.into_iter().map(|(name, (lo, hi))| (name, QuantParams::from_range(lo, hi))).collect();
        info!(graph = %graph.name, tensors = params.len(), samples = calibration.len(), "calibrated");

        Ok(QuantizedGraph {
            target: self.target.clone(),
            calibration_samples: calibration.len(),
            graph,
            params,
        })
    }

    fn save(&self, quantized: &QuantizedGraph, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(quantized)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    fn compile(&self, quantized: &QuantizedGraph) -> anyhow::Result<Vec<u8>> {
        let graph = &quantized.graph;
        let param = |name: &str| {
            quantized
                .params
                .get(name)
                .ok_or_else(|| anyhow!("tensor '{}' was never calibrated", name))
        };

        let names = quantized.params.keys().map(String::as_str);
        let ids = unique_ids(names.chain(graph.input_names()).chain(graph.output_names()));
        let id = |name: &str| ids.get(name).cloned().unwrap_or_else(|| sanitize_id(name));

        let mut tensors = Vec::new();
        for (name, p) in &quantized.params {
            tensors.push(TensorRenderInfo {
                id: id(name),
                scale: format!("{:.9e}f", p.scale),
                zero_point: p.zero_point,
            });
        }

        let mut kernels = Vec::new();
        for node in &graph.nodes {
            let mut args = Vec::new();
            for t in node.connected_inputs().chain(node.outputs.iter().filter(|o| !o.is_empty())) {
                param(t)?;
                args.push(format!("&q_{}", id(t)));
            }
            kernels.push(KernelRenderInfo {
                name: node.name.clone(),
                call: format!("k_{}({})", node.op_type.to_lowercase(), args.join(", ")),
            });
        }

        let mut args: Vec<String> =
            graph.inputs.iter().map(|i| format!("const uint8_t* restrict in_{}", id(&i.name))).collect();
        args.extend(graph.outputs.iter().map(|o| format!("uint8_t* restrict out_{}", id(&o.name))));

        let mut tera = Tera::default();
        tera.add_raw_template("kernel.c", KERNEL_TEMPLATE)?;
        let mut context = Context::new();
        context.insert("graph", &graph.name);
        context.insert("target", &quantized.target);
        context.insert("samples", &quantized.calibration_samples);
        context.insert("entry", &sanitize_id(&graph.name));
        context.insert("args", &args);
        context.insert("tensors", &tensors);
        context.insert("kernels", &kernels);

        let listing = tera.render("kernel.c", &context)?;
        debug!(graph = %graph.name, bytes = listing.len(), "rendered kernel listing");
        Ok(listing.into_bytes())
    }
}

fn sanitize_id(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

/// C identifiers per tensor name; names that sanitize to the same id get a
/// numeric suffix in first-seen order.
fn unique_ids<'n>(names: impl IntoIterator<Item = &'n str>) -> HashMap<&'n str, String> {
    let mut ids = HashMap::new();
    let mut taken = HashSet::new();
    for name in names {
        if ids.contains_key(name) {
            continue;
        }
        let base = sanitize_id(name);
        let mut id = base.clone();
        let mut n = 1;
        while !taken.insert(id.clone()) {
            id = format!("{}_{}", base, n);
            n += 1;
        }
        ids.insert(name, id);
    }
    ids
}

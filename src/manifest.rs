use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Canonical identifier of the tensor handed from stage1 to stage2.
pub const BOUNDARY_TENSOR: &str = "stage1_boundary_feat";

pub const DEFAULT_CALIBRATION_SAMPLES: usize = 128;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct VariantDef {
    /// Calibration set directory, relative to `calibration_root`.
    /// Variants without one are split but never quantized.
    #[serde(default)]
    pub calibration: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Manifest {
    pub model: String,
    #[serde(default = "default_input")]
    pub input: String,
    #[serde(default = "default_boundary")]
    pub boundary: String,
    #[serde(default = "default_outputs")]
    pub outputs: Vec<String>,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    #[serde(default = "default_calibration_root")]
    pub calibration_root: PathBuf,
    #[serde(default)]
    pub variants: BTreeMap<String, VariantDef>,
}

fn default_input() -> String {
    "images".into()
}
fn default_boundary() -> String {
    "/model/decoder/Mul_output_0".into()
}
fn default_outputs() -> Vec<String> {
    vec!["label_xyxy_score".into()]
}
fn default_models_dir() -> PathBuf {
    PathBuf::from("src_models")
}
fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("dst_models")
}
fn default_calibration_root() -> PathBuf {
    PathBuf::from("calib")
}

impl Default for Manifest {
    fn default() -> Self {
        let calibrated = [("atto", "calib_set_a"), ("femto", "calib_set_f"), ("pico", "calib_set_p"), ("n", "calib_set_n")];
        let mut variants: BTreeMap<String, VariantDef> = calibrated
            .iter()
            .map(|(tag, dir)| (tag.to_string(), VariantDef { calibration: Some(dir.to_string()) }))
            .collect();
        for tag in ["s", "x1", "x2", "x3"] {
            variants.insert(tag.into(), VariantDef::default());
        }
        Self {
            model: "deimv2".into(),
            input: default_input(),
            boundary: default_boundary(),
            outputs: default_outputs(),
            models_dir: default_models_dir(),
            artifacts_dir: default_artifacts_dir(),
            calibration_root: default_calibration_root(),
            variants,
        }
    }
}

/// Where a graph is cut: the external input, the tensor at the seam and the
/// final outputs. Shared by every variant of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPoint {
    pub input: String,
    pub boundary: String,
    pub outputs: Vec<String>,
}

/// Immutable per-variant configuration: locations of every artifact the
/// pipeline reads or writes for one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSpec {
    pub tag: String,
    pub source_graph: PathBuf,
    pub stage1_graph: PathBuf,
    pub stage2_graph: PathBuf,
    pub calibration_dir: PathBuf,
    pub quantized_graph: PathBuf,
    pub binary: PathBuf,
}

impl Manifest {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn split_point(&self) -> SplitPoint {
        SplitPoint {
            input: self.input.clone(),
            boundary: self.boundary.clone(),
            outputs: self.outputs.clone(),
        }
    }

    /// Artifact layout for `tag`. Tags missing from `variants` still get the
    /// conventional paths so that callers can report what is absent.
    pub fn variant(&self, tag: &str) -> VariantSpec {
        let stem = format!("{}_{}", self.model, tag);
        let calibration = self
            .variants
            .get(tag)
            .and_then(|v| v.calibration.clone())
            .unwrap_or_else(|| format!("calib_{}", tag));
        VariantSpec {
            tag: tag.to_string(),
            source_graph: self.models_dir.join(format!("{}.graph", stem)),
            stage1_graph: self.models_dir.join(format!("{}_stage1.graph", stem)),
            stage2_graph: self.models_dir.join(format!("{}_stage2.graph", stem)),
            calibration_dir: self.calibration_root.join(calibration),
            quantized_graph: self.artifacts_dir.join(format!("{}_stage1_quantized.graph", tag)),
            binary: self.artifacts_dir.join(format!("{}_stage1.bin", tag)),
        }
    }

    pub fn variants(&self) -> Vec<VariantSpec> {
        self.variants.keys().map(|tag| self.variant(tag)).collect()
    }

    /// Variants with a configured calibration set.
    pub fn quantize_targets(&self) -> Vec<VariantSpec> {
        self.variants
            .iter()
            .filter(|(_, def)| def.calibration.is_some())
            .map(|(tag, _)| self.variant(tag))
            .collect()
    }
}

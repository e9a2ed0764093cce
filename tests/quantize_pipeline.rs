use anyhow::{Result, anyhow};
use ndarray::{ArrayD, IxDyn};
use ndarray_npy::write_npy;
use serde_json::json;
use stagesplit::PipelineError;
use stagesplit::calibration::CalibrationBatch;
use stagesplit::core::graph::{ComputationGraph, Node};
use stagesplit::core::types::{DataType, Shape, ValueInfo};
use stagesplit::manifest::{Manifest, VariantDef, VariantSpec};
use stagesplit::partition::partition_variant;
use stagesplit::quantize::{quantize_all, quantize_and_compile};
use stagesplit::runtime::DeviceCompiler;
use stagesplit::runtime::compiler::{QuantizedGraph, ReferenceCompiler};
use stagesplit::runtime::interpreter::Interpreter;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

fn model() -> ComputationGraph {
    ComputationGraph {
        name: "deimv2_atto".into(),
        inputs: vec![ValueInfo::new("images", DataType::F32, Some(Shape::from_static(&[1, 3, 4, 4])))],
        outputs: vec![ValueInfo::unknown("label_xyxy_score")],
        nodes: vec![
            Node::new("k", "Constant", &[], &["/model/k"]).with_attr("values", json!([2.0])),
            Node::new("enc", "Relu", &["images"], &["/model/enc"]),
            Node::new("mul", "Mul", &["/model/enc", "/model/k"], &["/model/decoder/Mul_output_0"]),
            Node::new("head", "ReduceSum", &["/model/decoder/Mul_output_0"], &["label_xyxy_score"])
                .with_attr("axis", json!(1)),
        ],
        value_info: vec![],
    }
}

fn setup(dir: &Path, tags: &[(&str, usize)]) -> Result<Manifest> {
    let mut manifest = Manifest {
        models_dir: dir.join("src_models"),
        artifacts_dir: dir.join("dst_models"),
        calibration_root: dir.join("calib"),
        variants: Default::default(),
        ..Manifest::default()
    };
    for (tag, samples) in tags {
        manifest.variants.insert(tag.to_string(), VariantDef { calibration: Some(format!("set_{}", tag)) });
        let variant = manifest.variant(tag);
        model().save(&variant.source_graph)?;
        partition_variant(&Interpreter, &manifest.split_point(), &variant, false)?;
        fs::create_dir_all(&variant.calibration_dir)?;
        for i in 0..*samples {
            let sample = ArrayD::<f32>::from_elem(IxDyn(&[1, 3, 4, 4]), i as f32 - 1.0);
            write_npy(variant.calibration_dir.join(format!("{:03}.npy", i)), &sample)?;
        }
    }
    Ok(manifest)
}

#[test]
fn quantizes_and_compiles_stage1() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest = setup(dir.path(), &[("atto", 4)])?;
    let variant = manifest.variant("atto");

    let (quantized_path, binary_path) = quantize_and_compile(&ReferenceCompiler::default(), &variant, Some(3))?;
    assert_eq!(quantized_path, dir.path().join("dst_models/atto_stage1_quantized.graph"));
    assert_eq!(binary_path, dir.path().join("dst_models/atto_stage1.bin"));

    let quantized: QuantizedGraph = serde_json::from_str(&fs::read_to_string(&quantized_path)?)?;
    assert_eq!(quantized.calibration_samples, 3);
    // samples hold -1, 0 and 1; relu then doubles them
    assert_eq!(quantized.params["images"].min, -1.0);
    assert_eq!(quantized.params["stage1_boundary_feat"].max, 2.0);
    assert!(!quantized.params.contains_key("label_xyxy_score"));

    let listing = fs::read_to_string(&binary_path)?;
    assert!(listing.contains("out_stage1_boundary_feat"));
    assert!(listing.contains("calibrated on 3 samples"));
    Ok(())
}

#[test]
fn batch_skips_failing_variants() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut manifest = setup(dir.path(), &[("atto", 2), ("femto", 0)])?;
    manifest.variants.insert("pico".into(), VariantDef { calibration: Some("set_pico".into()) });

    let outcomes = quantize_all(&ReferenceCompiler::default(), &manifest.quantize_targets(), None);
    let results: HashMap<String, _> = outcomes.into_iter().map(|o| (o.tag, o.result)).collect();
    assert_eq!(results.len(), 3);
    assert!(results["atto"].is_ok());
    assert!(matches!(results["femto"], Err(PipelineError::NoCalibrationData(_))));
    assert!(matches!(results["pico"], Err(PipelineError::MissingArtifact(_))));
    Ok(())
}

/// Records the calls it receives and fails on `compile`.
struct FailingCompiler {
    calls: RefCell<Vec<&'static str>>,
}

impl DeviceCompiler for FailingCompiler {
    type Graph = ComputationGraph;
    type Quantized = ComputationGraph;

    fn load(&self, path: &Path) -> Result<ComputationGraph> {
        self.calls.borrow_mut().push("load");
        Ok(ComputationGraph::load(path)?)
    }
    fn optimize(&self, graph: ComputationGraph, calibration: &CalibrationBatch) -> Result<ComputationGraph> {
        assert_eq!(calibration.data.shape(), &[2, 4, 4, 3]);
        self.calls.borrow_mut().push("optimize");
        Ok(graph)
    }
    fn save(&self, quantized: &ComputationGraph, path: &Path) -> Result<()> {
        self.calls.borrow_mut().push("save");
        Ok(quantized.save(path)?)
    }
    fn compile(&self, _: &ComputationGraph) -> Result<Vec<u8>> {
        self.calls.borrow_mut().push("compile");
        Err(anyhow!("allocator ran out of clusters"))
    }
}

#[test]
fn compiler_failure_propagates_unchanged() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest = setup(dir.path(), &[("atto", 2)])?;
    let variant: VariantSpec = manifest.variant("atto");
    let compiler = FailingCompiler { calls: RefCell::new(Vec::new()) };

    let err = quantize_and_compile(&compiler, &variant, None).unwrap_err();
    assert!(matches!(&err, PipelineError::Collaborator(_)));
    assert_eq!(err.to_string(), "allocator ran out of clusters");
    assert_eq!(*compiler.calls.borrow(), vec!["load", "optimize", "save", "compile"]);
    assert!(variant.quantized_graph.exists());
    assert!(!variant.binary.exists());
    Ok(())
}

use crate::calibration::{CalibrationBatch, load_batch};
use crate::error::{PipelineError, Result};
use crate::manifest::VariantSpec;
use crate::pipeline::{Pipeline, Stage, VariantOutcome, run_variants};
use crate::runtime::DeviceCompiler;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// State threaded through the quantize/compile stages of one variant.
pub struct CompileContext<'a, D: DeviceCompiler> {
    pub compiler: &'a D,
    pub variant: &'a VariantSpec,
    pub calib_limit: Option<usize>,

    pub calibration: Option<CalibrationBatch>,
    pub graph: Option<D::Graph>,
    pub quantized: Option<D::Quantized>,
    pub binary: Option<Vec<u8>>,
}

impl<'a, D: DeviceCompiler> CompileContext<'a, D> {
    pub fn new(compiler: &'a D, variant: &'a VariantSpec, calib_limit: Option<usize>) -> Self {
        Self {
            compiler,
            variant,
            calib_limit,
            calibration: None,
            graph: None,
            quantized: None,
            binary: None,
        }
    }
}

fn missing(stage: &str) -> PipelineError {
    PipelineError::StageOrder(stage.to_string())
}

pub struct LoadCalibration;
pub struct LoadGraph;
pub struct Optimize;
pub struct SaveQuantized;
pub struct Compile;
pub struct WriteBinary;

impl<D: DeviceCompiler> Stage<CompileContext<'_, D>> for LoadCalibration {
    fn name(&self) -> &str {
        "load calibration"
    }
    fn run(&self, ctx: &mut CompileContext<'_, D>) -> Result<()> {
        ctx.calibration = Some(load_batch(&ctx.variant.calibration_dir, ctx.calib_limit)?);
        Ok(())
    }
}

impl<D: DeviceCompiler> Stage<CompileContext<'_, D>> for LoadGraph {
    fn name(&self) -> &str {
        "load stage1"
    }
    fn run(&self, ctx: &mut CompileContext<'_, D>) -> Result<()> {
        ctx.graph = Some(ctx.compiler.load(&ctx.variant.stage1_graph)?);
        Ok(())
    }
}

impl<D: DeviceCompiler> Stage<CompileContext<'_, D>> for Optimize {
    fn name(&self) -> &str {
        "optimize"
    }
    fn run(&self, ctx: &mut CompileContext<'_, D>) -> Result<()> {
        let graph = ctx.graph.take().ok_or_else(|| missing("optimize"))?;
        let calibration = ctx.calibration.as_ref().ok_or_else(|| missing("optimize"))?;
        ctx.quantized = Some(ctx.compiler.optimize(graph, calibration)?);
        Ok(())
    }
}

impl<D: DeviceCompiler> Stage<CompileContext<'_, D>> for SaveQuantized {
    fn name(&self) -> &str {
        "save quantized"
    }
    fn run(&self, ctx: &mut CompileContext<'_, D>) -> Result<()> {
        let quantized = ctx.quantized.as_ref().ok_or_else(|| missing("save quantized"))?;
        ctx.compiler.save(quantized, &ctx.variant.quantized_graph)?;
        Ok(())
    }
}

impl<D: DeviceCompiler> Stage<CompileContext<'_, D>> for Compile {
    fn name(&self) -> &str {
        "compile"
    }
    fn run(&self, ctx: &mut CompileContext<'_, D>) -> Result<()> {
        let quantized = ctx.quantized.as_ref().ok_or_else(|| missing("compile"))?;
        ctx.binary = Some(ctx.compiler.compile(quantized)?);
        Ok(())
    }
}

impl<D: DeviceCompiler> Stage<CompileContext<'_, D>> for WriteBinary {
    fn name(&self) -> &str {
        "write binary"
    }
    fn run(&self, ctx: &mut CompileContext<'_, D>) -> Result<()> {
        let binary = ctx.binary.as_ref().ok_or_else(|| missing("write binary"))?;
        let path = &ctx.variant.binary;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        fs::write(path, binary).map_err(|e| PipelineError::io(path, e))
    }
}

/// Quantize, then compile: the fixed stage order of one variant.
pub fn compile_pipeline<'a, D: DeviceCompiler>() -> Pipeline<CompileContext<'a, D>> {
    Pipeline::new()
        .with_stage(LoadCalibration)
        .with_stage(LoadGraph)
        .with_stage(Optimize)
        .with_stage(SaveQuantized)
        .with_stage(Compile)
        .with_stage(WriteBinary)
}

/// Calibrates, quantizes and compiles the stage1 graph of `variant`,
/// returning the quantized graph and binary paths. Compiler failures
/// propagate as they are; nothing is retried.
pub fn quantize_and_compile<D: DeviceCompiler>(
    compiler: &D,
    variant: &VariantSpec,
    calib_limit: Option<usize>,
) -> Result<(PathBuf, PathBuf)> {
    if !variant.stage1_graph.exists() {
        return Err(PipelineError::MissingArtifact(variant.stage1_graph.clone()));
    }
    let mut ctx = CompileContext::new(compiler, variant, calib_limit);
    compile_pipeline().execute(&mut ctx)?;
    Ok((variant.quantized_graph.clone(), variant.binary.clone()))
}

/// Runs [`quantize_and_compile`] for each variant, reporting failures and
/// carrying on with the rest.
pub fn quantize_all<D: DeviceCompiler>(
    compiler: &D,
    variants: &[VariantSpec],
    calib_limit: Option<usize>,
) -> Vec<VariantOutcome<(PathBuf, PathBuf)>> {
    run_variants(variants, |variant| {
        info!("Processing {}", variant.tag);
        let (quantized, binary) = quantize_and_compile(compiler, variant, calib_limit)?;
        info!("  Quantized graph: {}", quantized.display());
        info!("  Binary: {}", binary.display());
        Ok((quantized, binary))
    })
}

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command};
use ndarray_npy::{read_npy, write_npy};
use stagesplit::core::tensor::Tensor;
use stagesplit::manifest::Manifest;
use stagesplit::partition::partition_batch;
use stagesplit::quantize::quantize_all;
use stagesplit::runtime::compiler::ReferenceCompiler;
use stagesplit::runtime::host::HostRunner;
use stagesplit::runtime::interpreter::Interpreter;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let manifest = match &cli.manifest {
        Some(path) => Manifest::load(path).with_context(|| format!("loading manifest {}", path.display()))?,
        None => Manifest::default(),
    };

    match cli.command {
        Command::Split { variants, check } => {
            let tags: Vec<String> = if variants.is_empty() { manifest.variants.keys().cloned().collect() } else { variants };
            let specs: Vec<_> = tags.iter().map(|t| manifest.variant(t)).collect();
            let outcomes = partition_batch(&Interpreter, &manifest.model, &manifest.split_point(), &specs, check);
            let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
            if failed > 0 {
                bail!("{} of {} variants failed", failed, outcomes.len());
            }
        }
        Command::Quantize { max_samples } => {
            let outcomes = quantize_all(&ReferenceCompiler::default(), &manifest.quantize_targets(), Some(max_samples));
            let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
            if failed > 0 {
                bail!("{} of {} variants failed", failed, outcomes.len());
            }
        }
        Command::RunHost { graph, input, output } => {
            let runner = HostRunner::new(Interpreter, &graph)?;
            let x: Tensor = read_npy(&input).with_context(|| format!("reading {}", input.display()))?;
            let y = runner.run(x)?;
            info!(shape = ?y.shape(), "host output");
            write_npy(&output, &y).with_context(|| format!("writing {}", output.display()))?;
        }
    }

    Ok(())
}

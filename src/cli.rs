use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stagesplit", version, about = "Split graphs into accelerator/host stages, quantize and verify them")]
pub struct Cli {
    /// Manifest describing the model, split point and variants (built-in defaults when omitted)
    #[arg(long, global = true)]
    pub manifest: Option<PathBuf>,

    /// Verbosity level (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split source graphs into stage1/stage2 graphs
    Split {
        /// Variant tags to process (default: every manifest variant)
        #[arg(long, num_args = 1..)]
        variants: Vec<String>,

        /// Compare the split pipeline against the source graph
        #[arg(long)]
        check: bool,
    },
    /// Calibrate, quantize and compile the stage1 graph of every calibrated variant
    Quantize {
        /// Maximum number of calibration samples per variant
        #[arg(long, default_value_t = stagesplit::manifest::DEFAULT_CALIBRATION_SAMPLES)]
        max_samples: usize,
    },
    /// Forward one .npy tensor through a host-side graph
    RunHost {
        #[arg(long)]
        graph: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "sbridge",
    about = "Keeps an elastic cloud fleet in lockstep with the Slurm node table",
    version
)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(
        long,
        short = 'c',
        env = "SBRIDGE_CONFIG",
        default_value = "/opt/slurm-bridge/config.json",
        global = true
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Boot the named nodes (the scheduler's resume hook).
    Resume {
        /// Comma-separated or hostlist-compressed node names.
        #[arg(long)]
        node_list: String,

        /// Return as soon as the boot is dispatched.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },

    /// Power the named nodes back down (the scheduler's suspend hook).
    Suspend {
        #[arg(long)]
        node_list: String,
    },

    /// Mark the named nodes down after a failed resume (the
    /// scheduler's resume-fail hook).
    ResumeFail {
        #[arg(long)]
        node_list: String,
    },

    /// Regenerate the partition snapshot and reconfigure the scheduler.
    Scale {
        /// Proceed even while nodes are still powering down.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Show the provider fleet joined with scheduler state.
    Nodes {
        #[arg(long, value_enum, default_value = "table")]
        output_format: OutputFormat,
    },

    /// Build the scheduler topology file for a partition.
    Topology {
        #[arg(long)]
        partition: String,

        /// Where the locality information comes from.
        #[arg(long, value_enum)]
        input: TopologyInputArg,

        /// Topology plugin format to emit.
        #[arg(long = "type", value_enum)]
        kind: TopologyTypeArg,

        /// Write here (atomically); prints to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Value advertised in the BlockSizes trailer.
        #[arg(long, default_value_t = 1)]
        block_size: u32,

        /// Blocks below this size are commented out. Defaults to
        /// --block-size.
        #[arg(long)]
        min_block_size: Option<u32>,

        /// Print an ASCII rendering for review.
        #[arg(long, default_value_t = false)]
        visualize: bool,
    },

    /// Price scheduler accounting records over a date range.
    Cost {
        /// Start date, YYYY-MM-DD.
        #[arg(long)]
        start: String,

        /// End date, YYYY-MM-DD.
        #[arg(long)]
        end: String,

        /// Directory the CSV reports are written into.
        #[arg(long)]
        output: PathBuf,

        /// Extra sacct fields to include.
        #[arg(long)]
        format: Option<String>,
    },

    /// Run the reconciler loop in the foreground.
    Daemon {
        /// Seconds between reconciliation passes.
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TopologyInputArg {
    Fabric,
    Nvlink,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TopologyTypeArg {
    Tree,
    Block,
}

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use memeval_runtime::RunConfig;

#[derive(Parser)]
#[command(name = "memeval")]
#[command(about = "Replay dialog datasets against agent adapters and compute memory-evaluation metrics", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a dataset and compute the M1-M5 metric families
    Run(RunArgs),
}

/// Built-in baseline agents. Real adapters integrate through the
/// `AgentFactory` trait in `memeval-types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AgentKind {
    /// Replays the ground-truth assistant text and emits recall events
    /// built from the dialog history
    Reference,
    /// Returns an empty reply and emits nothing; the floor baseline
    Silent,
}

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Reference => "reference",
            AgentKind::Silent => "silent",
        }
    }
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Dataset file, one dialog JSON object per line
    #[arg(long, default_value = "eval/datasets/dialogs.jsonl")]
    pub dataset: PathBuf,

    /// Directory that receives one subdirectory per run
    #[arg(long, default_value = "eval/runs")]
    pub output_root: PathBuf,

    /// Directory for the progress JSONL logs
    #[arg(long, default_value = "eval/logs")]
    pub log_root: PathBuf,

    /// Run id; pass an existing one to resume that run
    #[arg(long)]
    pub run_id: Option<String>,

    /// Dialog replay worker count
    #[arg(long, default_value_t = RunConfig::default_workers())]
    pub workers_dialog: usize,

    /// Reserved judge worker count; current builds never call an external
    /// judge
    #[arg(long, default_value_t = 1)]
    pub workers_judge: usize,

    /// Per-turn deadline in seconds; 0 disables
    #[arg(long, default_value_t = 120)]
    pub turn_timeout_sec: u64,

    /// Heartbeat interval for long-running turns in seconds; 0 disables
    #[arg(long, default_value_t = 20)]
    pub turn_heartbeat_sec: u64,

    /// Retry budget for transient agent errors
    #[arg(long, default_value_t = 0)]
    pub turn_retries: u32,

    /// Which built-in baseline agent to drive
    #[arg(long, value_enum, default_value = "reference")]
    pub agent: AgentKind,

    /// Empty out memory_required_keys_gt before metric computation, for
    /// baselines without any recall capability
    #[arg(long)]
    pub drop_memory_keys: bool,
}

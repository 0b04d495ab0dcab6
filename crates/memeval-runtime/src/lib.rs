mod executor;
mod observer;
mod orchestrator;
mod output;
mod progress;
mod replay;

pub use executor::{
    execute_turn, is_retryable_error, TurnLimits, TurnOutcome, RETRYABLE_ERROR_MARKERS,
};
pub use observer::{ObserverBus, TurnBucket, TurnEndMark};
pub use orchestrator::{execute_run, progress_path_for, RunConfig, RunOutcome};
pub use output::write_eval_outputs;
pub use progress::{emit, null_sink, utc_timestamp, ProgressLogger, ProgressSink};
pub use replay::{build_failed_trace, replay_dialog};

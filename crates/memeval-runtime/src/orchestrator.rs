use std::collections::{BTreeMap, VecDeque};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use memeval_dataset::load_dataset_jsonl;
use memeval_engine::{build_turn_eval_rows, compute_all_metrics, count_run_counters};
use memeval_types::{
    AgentFactory, DatasetRecord, DialogTrace, MetricSet, RunCounters, TurnEvalRow,
};

use crate::executor::TurnLimits;
use crate::progress::{ProgressLogger, ProgressSink};
use crate::replay::{build_failed_trace, replay_dialog};

/// Everything one evaluation run needs to know.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub dataset_path: PathBuf,
    pub run_dir: PathBuf,
    pub run_id: String,
    pub progress_path: PathBuf,
    pub workers_dialog: usize,
    /// Reserved for an external judge pool; recorded in the manifest but
    /// not consulted. M5 stays deterministic.
    pub workers_judge: usize,
    pub limits: TurnLimits,
    /// Baseline mode for memory-less agents: empty out
    /// `memory_required_keys_gt` before building eval rows so M1 does not
    /// penalize an agent that has no recall at all.
    pub drop_memory_keys: bool,
}

impl RunConfig {
    /// Default dialog worker count: `min(4, hardware parallelism)`.
    pub fn default_workers() -> usize {
        let parallelism = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        parallelism.min(4).max(1)
    }
}

/// The in-memory result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub dialog_traces: Vec<DialogTrace>,
    pub turn_rows: Vec<TurnEvalRow>,
    pub metrics: MetricSet,
    pub metric_errors: BTreeMap<String, String>,
    pub counters: RunCounters,
}

/// Append-only checkpoint file; one DialogTrace JSON document per line.
/// Lines are the durability unit: a torn final line from a crashed run is
/// simply ignored on reload.
struct CheckpointFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CheckpointFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Load the latest trace per dialog id; last writer wins. Undecodable
    /// lines are skipped, never rewritten.
    fn load_existing(&self) -> BTreeMap<String, DialogTrace> {
        let mut traces = BTreeMap::new();
        let Ok(file) = std::fs::File::open(&self.path) else {
            return traces;
        };
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(trace) = serde_json::from_str::<DialogTrace>(trimmed)
                && !trace.dialog_id.is_empty()
            {
                traces.insert(trace.dialog_id.clone(), trace);
            }
        }
        traces
    }

    /// Best effort: losing a checkpoint line costs one dialog on resume,
    /// not the run.
    fn append(&self, trace: &DialogTrace) {
        let Ok(line) = serde_json::to_string(trace) else {
            return;
        };
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{}", line) {
                    eprintln!(
                        "warning: failed to checkpoint dialog {}: {}",
                        trace.dialog_id, err
                    );
                }
            }
            Err(err) => eprintln!(
                "warning: failed to open checkpoint {}: {}",
                self.path.display(),
                err
            ),
        }
    }
}

struct DialogJob {
    record: DatasetRecord,
    dialog_id: String,
}

struct DialogCompletion {
    trace: DialogTrace,
    panic_error: Option<String>,
}

/// Execute a full evaluation run: load the dataset, resume past completed
/// dialogs, replay the rest on a bounded worker pool, then derive eval rows
/// and metrics from the ordered trace set.
///
/// Dialogs run in parallel; each dialog is strictly sequential inside its
/// worker. The checkpoint file, progress log, and trace map are the only
/// shared mutable state.
pub fn execute_run(config: &RunConfig, factory: Arc<dyn AgentFactory>) -> Result<RunOutcome> {
    let records = load_dataset_jsonl(&config.dataset_path).with_context(|| {
        format!("failed to read dataset {}", config.dataset_path.display())
    })?;

    let logger = Arc::new(ProgressLogger::new(config.progress_path.clone()));
    let checkpoint = Arc::new(CheckpointFile::new(config.run_dir.join("dialog_trace.jsonl")));

    let mut traces_by_id = checkpoint.load_existing();
    logger.log(
        "run_started",
        json!({
            "run_id": config.run_id,
            "dataset_path": config.dataset_path.display().to_string(),
            "dialogs": records.len(),
            "resumed_completed_dialogs": traces_by_id.len(),
        }),
    );

    let mut jobs: VecDeque<DialogJob> = VecDeque::new();
    for record in records {
        let dialog_id = record.dialog_id();
        if traces_by_id.contains_key(&dialog_id) {
            logger.log(
                "dialog_skipped_resume",
                json!({"dialog_id": dialog_id, "dataset_index": record.dataset_index}),
            );
            continue;
        }
        logger.log(
            "dialog_started",
            json!({"dialog_id": dialog_id, "dataset_index": record.dataset_index}),
        );
        jobs.push_back(DialogJob { record, dialog_id });
    }

    let pending = jobs.len();
    if pending > 0 {
        let queue = Arc::new(Mutex::new(jobs));
        let (tx, rx) = mpsc::channel::<DialogCompletion>();
        let worker_count = config.workers_dialog.max(1).min(pending);

        let mut handles = Vec::with_capacity(worker_count);
        for worker_idx in 0..worker_count {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let factory = Arc::clone(&factory);
            let logger = Arc::clone(&logger);
            let run_id = config.run_id.clone();
            let limits = config.limits;
            let handle = thread::Builder::new()
                .name(format!("dialog-worker-{}", worker_idx))
                .spawn(move || {
                    run_dialog_worker(&queue, &tx, factory.as_ref(), &logger, &run_id, &limits)
                })
                .context("failed to spawn dialog worker")?;
            handles.push(handle);
        }
        drop(tx);

        for completion in rx {
            if let Some(error) = &completion.panic_error {
                logger.log(
                    "dialog_failed",
                    json!({
                        "dialog_id": completion.trace.dialog_id,
                        "dataset_index": completion.trace.dataset_index,
                        "error": error,
                    }),
                );
            }
            checkpoint.append(&completion.trace);
            logger.log(
                "dialog_done",
                json!({
                    "dialog_id": completion.trace.dialog_id,
                    "status": completion.trace.dialog_status,
                    "turns": completion.trace.turns.len(),
                }),
            );
            traces_by_id.insert(completion.trace.dialog_id.clone(), completion.trace);
        }

        for handle in handles {
            let _ = handle.join();
        }
    }

    let mut dialog_traces: Vec<DialogTrace> = traces_by_id.into_values().collect();
    dialog_traces.sort_by_key(|trace| trace.dataset_index);

    let metric_traces = if config.drop_memory_keys {
        drop_memory_required_keys(&dialog_traces)
    } else {
        dialog_traces.clone()
    };
    let turn_rows = build_turn_eval_rows(&metric_traces);
    let outcome = compute_all_metrics(&metric_traces, &turn_rows);
    let counters = count_run_counters(&dialog_traces);

    logger.log(
        "metrics_done",
        json!({
            "run_id": config.run_id,
            "turn_rows": turn_rows.len(),
            "metric_errors": outcome.errors,
        }),
    );
    logger.log(
        "run_finished",
        json!({
            "run_id": config.run_id,
            "total_dialogs": counters.total_dialogs,
            "valid_dialogs": counters.valid_dialogs,
            "skipped_dialogs": counters.skipped_dialogs,
            "failed_dialogs": counters.failed_dialogs,
            "total_turn_pairs": counters.total_turn_pairs,
        }),
    );

    Ok(RunOutcome {
        dialog_traces,
        turn_rows,
        metrics: outcome.metrics,
        metric_errors: outcome.errors,
        counters,
    })
}

fn run_dialog_worker(
    queue: &Arc<Mutex<VecDeque<DialogJob>>>,
    tx: &Sender<DialogCompletion>,
    factory: &dyn AgentFactory,
    logger: &Arc<ProgressLogger>,
    run_id: &str,
    limits: &TurnLimits,
) {
    loop {
        let job = {
            let mut queue = match queue.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            queue.pop_front()
        };
        let Some(mut job) = job else { break };

        let sink = dialog_progress_sink(logger, &job.dialog_id, job.record.dataset_index);
        let result = catch_unwind(AssertUnwindSafe(|| {
            replay_dialog(&mut job.record, run_id, factory, limits, &sink)
        }));

        let completion = match result {
            Ok(trace) => DialogCompletion {
                trace,
                panic_error: None,
            },
            Err(panic) => {
                let message =
                    format!("unhandled_dialog_exception: {}", panic_message(&panic));
                DialogCompletion {
                    trace: build_failed_trace(
                        &job.record,
                        run_id,
                        &job.dialog_id,
                        message.clone(),
                    ),
                    panic_error: Some(message),
                }
            }
        };
        if tx.send(completion).is_err() {
            break;
        }
    }
}

/// Per-dialog progress sink: stamps the dialog identity onto every event
/// payload before it reaches the shared log.
fn dialog_progress_sink(
    logger: &Arc<ProgressLogger>,
    dialog_id: &str,
    dataset_index: usize,
) -> ProgressSink {
    let logger = Arc::clone(logger);
    let dialog_id = dialog_id.to_string();
    Arc::new(move |event: &str, payload: Value| {
        let mut fields = match payload {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        fields.insert("dialog_id".to_string(), json!(dialog_id));
        fields.insert("dataset_index".to_string(), json!(dataset_index));
        logger.log(event, Value::Object(fields));
    })
}

/// Clone traces with `memory_required_keys_gt` emptied on every turn.
fn drop_memory_required_keys(dialog_traces: &[DialogTrace]) -> Vec<DialogTrace> {
    let mut traces = dialog_traces.to_vec();
    for dialog in &mut traces {
        for turn in &mut dialog.turns {
            if let Some(tags) = turn.gt_turn_tags.as_object_mut()
                && tags.contains_key("memory_required_keys_gt")
            {
                tags.insert("memory_required_keys_gt".to_string(), json!([]));
            }
        }
    }
    traces
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolve the progress log path for a run: `<log_root>/progress_<run_id>.jsonl`.
pub fn progress_path_for(log_root: &Path, run_id: &str) -> PathBuf {
    log_root.join(format!("progress_{}.jsonl", run_id))
}

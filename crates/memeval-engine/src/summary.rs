use memeval_types::{
    DialogStatus, DialogTrace, EvalSummary, MetricSet, RunCounters, TRACE_VERSION,
};

/// Tally run-level dialog counters from the final ordered trace list.
pub fn count_run_counters(dialog_traces: &[DialogTrace]) -> RunCounters {
    RunCounters {
        total_dialogs: dialog_traces.len(),
        valid_dialogs: dialog_traces.iter().filter(|d| d.valid_dialog).count(),
        skipped_dialogs: dialog_traces
            .iter()
            .filter(|d| d.dialog_status == DialogStatus::Skipped)
            .count(),
        failed_dialogs: dialog_traces
            .iter()
            .filter(|d| d.dialog_status == DialogStatus::Failed)
            .count(),
        total_turn_pairs: dialog_traces.iter().map(|d| d.turns.len()).sum(),
    }
}

/// Assemble the `metrics_summary.json` record. Contains no timestamps, so
/// identical traces always produce identical bytes.
pub fn aggregate_summary(
    run_id: &str,
    dataset_path: &str,
    metrics: MetricSet,
    counters: RunCounters,
) -> EvalSummary {
    EvalSummary {
        run_id: run_id.to_string(),
        trace_version: TRACE_VERSION.to_string(),
        dataset_path: dataset_path.to_string(),
        metrics,
        counters,
    }
}

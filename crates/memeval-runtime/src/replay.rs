use std::sync::Arc;

use serde_json::json;

use memeval_dataset::{align_turn_pairs, classify_validity, normalize_record};
use memeval_types::{
    AgentFactory, DatasetRecord, DialogStatus, DialogTrace, Observer, TurnTrace, TRACE_VERSION,
};

use crate::executor::{execute_turn, TurnLimits};
use crate::observer::ObserverBus;
use crate::progress::{emit, ProgressSink};

/// Replay one dialog: validate, align, build the agent, run every turn-pair
/// in order, and assemble the DialogTrace.
///
/// Turns within the dialog are strictly sequential; the agent may rely on
/// never seeing two deliberate concurrent calls (an abandoned timed-out call
/// is the only exception). Errors never escape this function: invalid input
/// yields a skipped trace, a failing factory yields a failed trace, and
/// per-turn failures land on the turn records.
pub fn replay_dialog(
    record: &mut DatasetRecord,
    run_id: &str,
    factory: &dyn AgentFactory,
    limits: &TurnLimits,
    progress: &ProgressSink,
) -> DialogTrace {
    normalize_record(record);
    let dialog_id = record.dialog_id();
    let (valid_dialog, skip_reason) = classify_validity(record);

    let mut trace = DialogTrace {
        trace_version: TRACE_VERSION.to_string(),
        run_id: run_id.to_string(),
        dialog_id: dialog_id.clone(),
        dataset_index: record.dataset_index,
        scenario_type: record.scenario_type(),
        difficulty: record.difficulty(),
        dialog_status: if valid_dialog {
            DialogStatus::Ok
        } else {
            DialogStatus::Skipped
        },
        valid_dialog,
        skip_reason,
        session_id: format!("eval_session_{}", dialog_id),
        user_id: format!("eval_user_{}", dialog_id),
        turns: Vec::new(),
        dialog_error: None,
        profile_gt: record.raw.get("profile_gt").cloned(),
        blueprint: record.raw.get("blueprint").cloned(),
        raw_turns: record.raw.get("turns").cloned(),
    };
    if !valid_dialog {
        return trace;
    }

    let turn_pairs = align_turn_pairs(record.turns());
    let observer = Arc::new(ObserverBus::new());

    let agent = match factory.create(&dialog_id, Arc::clone(&observer) as Arc<dyn Observer>) {
        Ok(agent) => agent,
        Err(err) => {
            trace.dialog_status = DialogStatus::Failed;
            trace.dialog_error = Some(format!("create_agent_failed: {}", err));
            return trace;
        }
    };

    for pair in turn_pairs {
        emit(
            progress,
            "turn_started",
            json!({"turn_pair_id": pair.turn_pair_id}),
        );

        let outcome = execute_turn(
            &agent,
            &pair,
            &trace.session_id,
            &trace.user_id,
            limits,
            progress,
        );

        let bucket = observer.get_turn_payload(pair.turn_pair_id);
        // The agent owns the authoritative timing when it reported one.
        let latency_ms = match bucket.turn_end.as_ref() {
            Some(mark) if mark.latency_ms > 0.0 => mark.latency_ms,
            _ => outcome.latency_ms,
        };

        emit(
            progress,
            "turn_done",
            json!({
                "turn_pair_id": pair.turn_pair_id,
                "turn_status": outcome.status,
                "latency_ms": latency_ms,
                "error": outcome.error,
                "attempts": outcome.attempts_used,
            }),
        );

        trace.turns.push(TurnTrace {
            turn_pair_id: pair.turn_pair_id,
            user_turn_abs_idx: pair.user_turn_abs_idx,
            gt_assistant_abs_idx: pair.gt_assistant_abs_idx,
            user_text: pair.user_text,
            gt_assistant_text: pair.gt_assistant_text,
            gt_turn_tags: pair.gt_turn_tags.unwrap_or_else(|| json!({})),
            pred_assistant_text: outcome.pred_text,
            latency_ms,
            turn_status: outcome.status,
            error: outcome.error,
            recall: bucket.recall,
            tools: bucket.tools,
            compliance: bucket.compliance,
            profile_snapshot: bucket.profile_snapshot,
        });
    }

    trace.derive_status();
    trace
}

/// Synthesize the trace for a dialog whose worker died before producing one.
pub fn build_failed_trace(
    record: &DatasetRecord,
    run_id: &str,
    dialog_id: &str,
    error: String,
) -> DialogTrace {
    DialogTrace {
        trace_version: TRACE_VERSION.to_string(),
        run_id: run_id.to_string(),
        dialog_id: dialog_id.to_string(),
        dataset_index: record.dataset_index,
        scenario_type: record.scenario_type(),
        difficulty: record.difficulty(),
        dialog_status: DialogStatus::Failed,
        valid_dialog: false,
        skip_reason: None,
        session_id: format!("eval_session_{}", dialog_id),
        user_id: format!("eval_user_{}", dialog_id),
        turns: Vec::new(),
        dialog_error: Some(error),
        profile_gt: record.raw.get("profile_gt").cloned(),
        blueprint: record.raw.get("blueprint").cloned(),
        raw_turns: record.raw.get("turns").cloned(),
    }
}

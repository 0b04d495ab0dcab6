use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trace schema version stamped on every dialog trace and summary.
pub const TRACE_VERSION: &str = "v1";

/// Outcome of a single replayed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Ok,
    Timeout,
    Error,
}

/// Outcome of a whole dialog replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogStatus {
    Ok,
    Partial,
    Failed,
    Skipped,
}

/// Why a dialog was excluded from replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidJson,
    MissingTurns,
    MissingProfileGt,
    InvalidTurnSequence,
    MissingGtTags,
}

/// One ranked item returned by the agent's memory recall
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallItem {
    pub rank: u32,
    pub item_id: String,
    pub content: String,
    pub score: f64,
    pub source: String,
    pub turn_index: i64,
    pub session_id: String,
}

/// Snapshot of the context the agent assembled for one turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallTrace {
    pub query: String,
    pub short_term_context: String,
    pub short_term_turns: Vec<Value>,
    pub profile_context: String,
    pub packed_context: String,
    pub token_count: u64,
    pub items: Vec<RecallItem>,
}

/// One tool invocation observed during a turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolTrace {
    pub tool_name: String,
    pub args: Value,
    pub result_excerpt: String,
    pub latency_ms: f64,
    pub error: Option<String>,
}

/// Verdict of the agent's compliance pass for one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceTrace {
    pub needs_modification: bool,
    pub is_compliant: bool,
    pub violations: Vec<Value>,
    pub risk_disclaimer_added: bool,
    pub suitability_warning: Option<String>,
}

impl Default for ComplianceTrace {
    fn default() -> Self {
        Self {
            needs_modification: false,
            is_compliant: true,
            violations: Vec::new(),
            risk_disclaimer_added: false,
            suitability_warning: None,
        }
    }
}

/// Everything captured for one replayed turn: the aligned pair, the agent's
/// prediction, and the observer sub-records (absent events stay null).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTrace {
    pub turn_pair_id: u32,
    pub user_turn_abs_idx: usize,
    pub gt_assistant_abs_idx: usize,
    pub user_text: String,
    pub gt_assistant_text: String,
    pub gt_turn_tags: Value,
    pub pred_assistant_text: String,
    pub latency_ms: f64,
    pub turn_status: TurnStatus,
    pub error: Option<String>,
    pub recall: Option<RecallTrace>,
    pub tools: Vec<ToolTrace>,
    pub compliance: Option<ComplianceTrace>,
    pub profile_snapshot: Option<Value>,
}

/// The per-dialog output record; one JSONL line in `dialog_trace.jsonl`.
///
/// `profile_gt`, `blueprint` and `raw_turns` are verbatim copies of the
/// dataset material so that metric computation needs nothing but traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogTrace {
    pub trace_version: String,
    pub run_id: String,
    pub dialog_id: String,
    pub dataset_index: usize,
    pub scenario_type: Option<String>,
    pub difficulty: Option<String>,
    pub dialog_status: DialogStatus,
    pub valid_dialog: bool,
    pub skip_reason: Option<SkipReason>,
    pub session_id: String,
    pub user_id: String,
    pub turns: Vec<TurnTrace>,
    pub dialog_error: Option<String>,
    pub profile_gt: Option<Value>,
    pub blueprint: Option<Value>,
    pub raw_turns: Option<Value>,
}

impl DialogTrace {
    /// Derive the dialog status from accumulated turn outcomes: any non-ok
    /// turn downgrades an `ok` dialog to `partial`.
    pub fn derive_status(&mut self) {
        if self.dialog_status == DialogStatus::Ok
            && self.turns.iter().any(|t| t.turn_status != TurnStatus::Ok)
        {
            self.dialog_status = DialogStatus::Partial;
        }
    }
}

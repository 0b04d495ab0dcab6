use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Compliance verdict attached to a turn, predicted or ground truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceLabel {
    Compliant,
    MinorViolation,
    SevereViolation,
}

impl ComplianceLabel {
    /// Parse a canonical label, case-insensitively. Anything else is `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "compliant" => Some(ComplianceLabel::Compliant),
            "minor_violation" => Some(ComplianceLabel::MinorViolation),
            "severe_violation" => Some(ComplianceLabel::SevereViolation),
            _ => None,
        }
    }
}

/// How a required-memory key reference was resolved to a target text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyResolver {
    Unresolved,
    ProfileField,
    ConstraintsGt,
    PreferencesGt,
    HistoryUserTurn,
    HistoryAbsTurn,
}

/// Resolution result for one entry of `memory_required_keys_gt`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedKey {
    pub key: String,
    pub resolvable: bool,
    pub target_text: Option<String>,
    pub resolver: KeyResolver,
}

impl ResolvedKey {
    pub fn unresolved(key: &str) -> Self {
        Self {
            key: key.to_string(),
            resolvable: false,
            target_text: None,
            resolver: KeyResolver::Unresolved,
        }
    }

    pub fn resolved(key: &str, target_text: String, resolver: KeyResolver) -> Self {
        Self {
            key: key.to_string(),
            resolvable: true,
            target_text: Some(target_text),
            resolver,
        }
    }
}

/// Which recall context a memory key was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    ShortTerm,
    LongTerm,
    Profile,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::ShortTerm => "short_term",
            MemorySource::LongTerm => "long_term",
            MemorySource::Profile => "profile",
        }
    }
}

/// Per-source hit counters accumulated across one turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHits {
    pub short_term: u32,
    pub long_term: u32,
    pub profile: u32,
}

impl SourceHits {
    pub fn bump(&mut self, source: MemorySource) {
        match source {
            MemorySource::ShortTerm => self.short_term += 1,
            MemorySource::LongTerm => self.long_term += 1,
            MemorySource::Profile => self.profile += 1,
        }
    }
}

/// One row of `turn_eval.jsonl`: every per-turn feature the metric
/// aggregators consume. Derived from a `TurnTrace`, never mutated after
/// creation.
///
/// `eligible_m2` is carried for schema symmetry but stays false at row
/// level; M2 is dialog-granular and works directly on traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvalRow {
    pub trace_version: String,
    pub run_id: String,
    pub dialog_id: String,
    pub turn_pair_id: u32,
    pub eligible_m1: bool,
    pub eligible_m2: bool,
    pub eligible_m3: bool,
    pub eligible_m4: bool,
    pub eligible_m5: bool,
    pub required_keys_raw: Vec<String>,
    pub resolved_keys: Vec<ResolvedKey>,
    pub key_hit_flags: Vec<u8>,
    pub key_hit_sources: Vec<Vec<MemorySource>>,
    pub m1_source_hits: SourceHits,
    pub constraint_contradiction: u8,
    pub risk_required_tags: Vec<String>,
    pub risk_pred_tags: Vec<String>,
    pub risk_tag_hits: u32,
    pub forbidden_hits: Vec<String>,
    pub pred_compliance_label: ComplianceLabel,
    pub gt_compliance_label: ComplianceLabel,
    pub rubric_required: Vec<String>,
    pub rubric_hit_items: Vec<String>,
    pub judge_score_1_5: Option<f64>,
}

/// One metric family's aggregate output: micro rates over raw units, macro
/// averages over per-dialog values, and the backing counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric_name: String,
    pub micro: BTreeMap<String, f64>,
    pub r#macro: BTreeMap<String, f64>,
    pub counts: BTreeMap<String, i64>,
    pub by_dialog: BTreeMap<String, BTreeMap<String, f64>>,
}

impl MetricResult {
    /// Empty result standing in for a metric whose computation failed.
    pub fn empty(metric_name: &str) -> Self {
        let mut counts = BTreeMap::new();
        counts.insert("eligible_count".to_string(), 0);
        counts.insert("skipped_count".to_string(), 0);
        counts.insert("failed_count".to_string(), 0);
        Self {
            metric_name: metric_name.to_string(),
            micro: BTreeMap::new(),
            r#macro: BTreeMap::new(),
            counts,
            by_dialog: BTreeMap::new(),
        }
    }
}

/// The five metric families, in reporting order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSet {
    pub m1_context_continuity: MetricResult,
    pub m2_profile_accuracy: MetricResult,
    pub m3_risk_coverage: MetricResult,
    pub m4_compliance: MetricResult,
    pub m5_explainability: MetricResult,
}

impl MetricSet {
    pub fn iter(&self) -> impl Iterator<Item = &MetricResult> {
        [
            &self.m1_context_continuity,
            &self.m2_profile_accuracy,
            &self.m3_risk_coverage,
            &self.m4_compliance,
            &self.m5_explainability,
        ]
        .into_iter()
    }
}

/// Run-level dialog counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub total_dialogs: usize,
    pub valid_dialogs: usize,
    pub skipped_dialogs: usize,
    pub failed_dialogs: usize,
    pub total_turn_pairs: usize,
}

/// `metrics_summary.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub run_id: String,
    pub trace_version: String,
    pub dataset_path: String,
    pub metrics: MetricSet,
    pub counters: RunCounters,
}

/// `run_manifest.json`: run identity, timings, runner settings, counters,
/// and any per-metric error strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub trace_version: String,
    pub run_id: String,
    pub dataset_path: String,
    pub started_at: String,
    pub ended_at: String,
    pub agent_name: String,
    pub workers_dialog: usize,
    pub workers_judge: usize,
    pub turn_timeout_sec: u64,
    pub turn_heartbeat_sec: u64,
    pub turn_retries: u32,
    pub counters: RunCounters,
    pub metric_errors: BTreeMap<String, String>,
}

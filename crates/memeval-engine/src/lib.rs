pub mod keywords;
mod metrics;
mod report;
mod resolve;
mod rows;
mod summary;

pub use metrics::{
    compute_all_metrics, compute_m1_context_continuity, compute_m2_profile_accuracy,
    compute_m3_risk_coverage, compute_m4_compliance, compute_m5_explainability, MetricsOutcome,
};
pub use report::render_markdown_report;
pub use resolve::{
    detect_constraint_contradiction, detect_key_hit_sources, detect_rubric_hits,
    extract_pred_risk_tags, heuristic_judge_score, infer_compliance_label,
    normalize_compliance_label, normalize_risk_tag, resolve_memory_required_key,
};
pub use rows::build_turn_eval_rows;
pub use summary::{aggregate_summary, count_run_counters};

use std::collections::BTreeMap;

use memeval_types::{MetricResult, TurnEvalRow};

use super::{group_rows_by_dialog, macro_avg, mean, ratio};

/// M5 — decision-support explainability, scored deterministically from
/// rubric keyword coverage. The reserved judge worker pool is intentionally
/// not consulted; `judge_score_1_5` comes from the rubric heuristic.
pub fn compute_m5_explainability(turn_rows: &[TurnEvalRow]) -> MetricResult {
    let eligible: Vec<&TurnEvalRow> = turn_rows.iter().filter(|r| r.eligible_m5).collect();
    let grouped = group_rows_by_dialog(&eligible);

    let mut req_total = 0i64;
    let mut hit_total = 0i64;
    let mut score_values: Vec<f64> = Vec::new();
    let mut by_dialog: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

    for (dialog_id, rows) in &grouped {
        let mut d_req = 0i64;
        let mut d_hit = 0i64;
        let mut d_scores: Vec<f64> = Vec::new();
        for row in rows {
            let req = row.rubric_required.len() as i64;
            if req == 0 {
                continue;
            }
            let hit = row.rubric_hit_items.len() as i64;
            d_req += req;
            d_hit += hit.min(req);
            if let Some(score) = row.judge_score_1_5 {
                d_scores.push(score);
                score_values.push(score);
            }
        }
        if d_req > 0 {
            let mut values = BTreeMap::new();
            values.insert("rubric_hit_rate".to_string(), ratio(d_hit, d_req));
            values.insert(
                "judge_score_mean".to_string(),
                mean(d_scores.iter().copied()),
            );
            by_dialog.insert(dialog_id.clone(), values);
            req_total += d_req;
            hit_total += d_hit;
        }
    }

    let mut micro = BTreeMap::new();
    micro.insert("rubric_hit_rate".to_string(), ratio(hit_total, req_total));
    micro.insert(
        "judge_score_mean".to_string(),
        mean(score_values.iter().copied()),
    );

    let mut macro_ = BTreeMap::new();
    for key in ["rubric_hit_rate", "judge_score_mean"] {
        macro_.insert(key.to_string(), macro_avg(&by_dialog, key));
    }

    let mut counts = BTreeMap::new();
    counts.insert("eligible_count".to_string(), eligible.len() as i64);
    counts.insert(
        "skipped_count".to_string(),
        turn_rows.len() as i64 - eligible.len() as i64,
    );
    counts.insert("failed_count".to_string(), 0);
    counts.insert("rubric_required_total".to_string(), req_total);
    counts.insert("rubric_hit_total".to_string(), hit_total);
    counts.insert("judge_scored_turns".to_string(), score_values.len() as i64);

    MetricResult {
        metric_name: "m5_explainability".to_string(),
        micro,
        r#macro: macro_,
        counts,
        by_dialog,
    }
}

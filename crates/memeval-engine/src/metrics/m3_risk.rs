use std::collections::BTreeMap;

use memeval_types::{MetricResult, TurnEvalRow};

use super::{group_rows_by_dialog, macro_avg, ratio};

/// M3 — risk-disclosure coverage. Hits are clamped to the required count per
/// turn; a turn is strictly covered when every required tag was expressed.
pub fn compute_m3_risk_coverage(turn_rows: &[TurnEvalRow]) -> MetricResult {
    let eligible: Vec<&TurnEvalRow> = turn_rows.iter().filter(|r| r.eligible_m3).collect();
    let grouped = group_rows_by_dialog(&eligible);

    let mut req_total = 0i64;
    let mut hit_total = 0i64;
    let mut strict_total = 0i64;
    let mut by_dialog: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

    for (dialog_id, rows) in &grouped {
        let mut d_req = 0i64;
        let mut d_hit = 0i64;
        let mut d_strict = 0i64;
        for row in rows {
            let req = row.risk_required_tags.len() as i64;
            if req == 0 {
                continue;
            }
            let hit = i64::from(row.risk_tag_hits);
            d_req += req;
            d_hit += hit.min(req);
            d_strict += i64::from(hit >= req);
        }
        if d_req > 0 {
            let turns = rows.len() as i64;
            let mut values = BTreeMap::new();
            values.insert("risk_coverage".to_string(), ratio(d_hit, d_req));
            values.insert(
                "strict_risk_coverage_rate".to_string(),
                ratio(d_strict, turns),
            );
            by_dialog.insert(dialog_id.clone(), values);
            req_total += d_req;
            hit_total += d_hit;
            strict_total += d_strict;
        }
    }

    let eligible_turns = eligible.len() as i64;
    let mut micro = BTreeMap::new();
    micro.insert("risk_coverage".to_string(), ratio(hit_total, req_total));
    micro.insert(
        "strict_risk_coverage_rate".to_string(),
        ratio(strict_total, eligible_turns),
    );

    let mut macro_ = BTreeMap::new();
    for key in ["risk_coverage", "strict_risk_coverage_rate"] {
        macro_.insert(key.to_string(), macro_avg(&by_dialog, key));
    }

    let mut counts = BTreeMap::new();
    counts.insert("eligible_count".to_string(), eligible_turns);
    counts.insert(
        "skipped_count".to_string(),
        turn_rows.len() as i64 - eligible_turns,
    );
    counts.insert("failed_count".to_string(), 0);
    counts.insert("risk_required_total".to_string(), req_total);
    counts.insert("risk_hit_total".to_string(), hit_total);

    MetricResult {
        metric_name: "m3_risk_coverage".to_string(),
        micro,
        r#macro: macro_,
        counts,
        by_dialog,
    }
}

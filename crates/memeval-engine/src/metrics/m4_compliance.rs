use std::collections::BTreeMap;

use memeval_types::{ComplianceLabel, MetricResult, TurnEvalRow};

use super::{group_rows_by_dialog, macro_avg, ratio};

/// M4 — content compliance: label agreement with the ground truth, the rate
/// of severe violations, and the rate of turns quoting a forbidden phrase.
/// Every turn that completed normally is eligible.
pub fn compute_m4_compliance(turn_rows: &[TurnEvalRow]) -> MetricResult {
    let eligible: Vec<&TurnEvalRow> = turn_rows.iter().filter(|r| r.eligible_m4).collect();
    let grouped = group_rows_by_dialog(&eligible);

    let total = eligible.len() as i64;
    let mut correct = 0i64;
    let mut severe = 0i64;
    let mut forbidden_hit_turns = 0i64;
    let mut by_dialog: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

    for (dialog_id, rows) in &grouped {
        let d_total = rows.len() as i64;
        if d_total == 0 {
            continue;
        }
        let mut d_correct = 0i64;
        let mut d_severe = 0i64;
        let mut d_forbidden = 0i64;
        for row in rows {
            d_correct += i64::from(row.pred_compliance_label == row.gt_compliance_label);
            d_severe +=
                i64::from(row.pred_compliance_label == ComplianceLabel::SevereViolation);
            d_forbidden += i64::from(!row.forbidden_hits.is_empty());
        }
        let mut values = BTreeMap::new();
        values.insert(
            "compliance_label_acc".to_string(),
            ratio(d_correct, d_total),
        );
        values.insert("severe_violation_rate".to_string(), ratio(d_severe, d_total));
        values.insert(
            "forbidden_hit_rate".to_string(),
            ratio(d_forbidden, d_total),
        );
        by_dialog.insert(dialog_id.clone(), values);
        correct += d_correct;
        severe += d_severe;
        forbidden_hit_turns += d_forbidden;
    }

    let mut micro = BTreeMap::new();
    micro.insert("compliance_label_acc".to_string(), ratio(correct, total));
    micro.insert("severe_violation_rate".to_string(), ratio(severe, total));
    micro.insert(
        "forbidden_hit_rate".to_string(),
        ratio(forbidden_hit_turns, total),
    );

    let mut macro_ = BTreeMap::new();
    for key in [
        "compliance_label_acc",
        "severe_violation_rate",
        "forbidden_hit_rate",
    ] {
        macro_.insert(key.to_string(), macro_avg(&by_dialog, key));
    }

    let mut counts = BTreeMap::new();
    counts.insert("eligible_count".to_string(), total);
    counts.insert("skipped_count".to_string(), turn_rows.len() as i64 - total);
    counts.insert("failed_count".to_string(), 0);
    counts.insert("severe_count".to_string(), severe);

    MetricResult {
        metric_name: "m4_compliance".to_string(),
        micro,
        r#macro: macro_,
        counts,
        by_dialog,
    }
}

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use memeval_types::{string_list, value_to_string, DialogTrace, MetricResult};

use crate::keywords::{
    lookup, HORIZON_MAP, HORIZON_TEXT_HINTS, LIQUIDITY_MAP, LIQUIDITY_TEXT_HINTS, RISK_LEVEL_MAP,
    RISK_TEXT_HINTS,
};

/// M2 — profile extraction accuracy, one unit per valid dialog with a
/// non-empty ground-truth profile.
///
/// The predicted profile comes from the latest observer `profile_snapshot`;
/// fields the agent never reported are inferred from the concatenated
/// prediction texts via keyword ladders. Constraint and preference sets are
/// scored with set F1, where mentioning a ground-truth item anywhere in the
/// predictions counts as having captured it.
pub fn compute_m2_profile_accuracy(dialog_traces: &[DialogTrace]) -> MetricResult {
    let mut by_dialog: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    let mut eligible_dialogs = 0i64;

    let mut risk_correct = 0i64;
    let mut horizon_correct = 0i64;
    let mut liquidity_correct = 0i64;
    let mut constraints_f1_total = 0.0f64;
    let mut preferences_f1_total = 0.0f64;

    for dialog in dialog_traces {
        if !dialog.valid_dialog {
            continue;
        }
        let Some(profile_gt) = dialog
            .profile_gt
            .as_ref()
            .and_then(Value::as_object)
            .filter(|p| !p.is_empty())
        else {
            continue;
        };
        eligible_dialogs += 1;

        let gt_risk = normalize_field(profile_gt.get("risk_level_gt"), RISK_LEVEL_MAP);
        let gt_horizon = normalize_field(profile_gt.get("horizon_gt"), HORIZON_MAP);
        let gt_liquidity = normalize_field(profile_gt.get("liquidity_need_gt"), LIQUIDITY_MAP);
        let gt_constraints: BTreeSet<String> =
            string_list(profile_gt.get("constraints_gt")).into_iter().collect();
        let gt_preferences: BTreeSet<String> =
            string_list(profile_gt.get("preferences_gt")).into_iter().collect();

        let snapshot = dialog
            .turns
            .iter()
            .filter_map(|t| t.profile_snapshot.as_ref())
            .filter_map(Value::as_object)
            .next_back();

        let mut pred_risk = "unknown".to_string();
        let mut pred_horizon = "unknown".to_string();
        let mut pred_liquidity = "unknown".to_string();
        let mut pred_constraints: BTreeSet<String> = BTreeSet::new();
        let mut pred_preferences: BTreeSet<String> = BTreeSet::new();

        if let Some(snapshot) = snapshot {
            pred_risk = normalize_field(snapshot.get("risk_level"), RISK_LEVEL_MAP);
            pred_horizon = normalize_field(snapshot.get("investment_horizon"), HORIZON_MAP);
            pred_liquidity = normalize_field(snapshot.get("liquidity_need"), LIQUIDITY_MAP);
            pred_preferences.extend(string_list(snapshot.get("preferred_topics")));
            pred_constraints.extend(string_list(snapshot.get("forbidden_assets")));
        }

        let all_pred_text = dialog
            .turns
            .iter()
            .map(|t| t.pred_assistant_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if pred_risk == "unknown" {
            pred_risk = infer_from_text(&all_pred_text, RISK_TEXT_HINTS);
        }
        if pred_horizon == "unknown" {
            pred_horizon = infer_from_text(&all_pred_text, HORIZON_TEXT_HINTS);
        }
        if pred_liquidity == "unknown" {
            pred_liquidity = infer_from_text(&all_pred_text, LIQUIDITY_TEXT_HINTS);
        }

        // Mentioning a ground-truth item anywhere counts as capturing it.
        pred_constraints.extend(
            gt_constraints
                .iter()
                .filter(|c| all_pred_text.contains(c.as_str()))
                .cloned(),
        );
        pred_preferences.extend(
            gt_preferences
                .iter()
                .filter(|p| all_pred_text.contains(p.as_str()))
                .cloned(),
        );

        let risk_acc = field_accuracy(&pred_risk, &gt_risk);
        let horizon_acc = field_accuracy(&pred_horizon, &gt_horizon);
        let liquidity_acc = field_accuracy(&pred_liquidity, &gt_liquidity);
        let c_f1 = set_f1(&pred_constraints, &gt_constraints);
        let p_f1 = set_f1(&pred_preferences, &gt_preferences);

        risk_correct += risk_acc as i64;
        horizon_correct += horizon_acc as i64;
        liquidity_correct += liquidity_acc as i64;
        constraints_f1_total += c_f1;
        preferences_f1_total += p_f1;

        let mut values = BTreeMap::new();
        values.insert("risk_level_acc".to_string(), risk_acc);
        values.insert("horizon_acc".to_string(), horizon_acc);
        values.insert("liquidity_acc".to_string(), liquidity_acc);
        values.insert("constraints_f1".to_string(), c_f1);
        values.insert("preferences_f1".to_string(), p_f1);
        values.insert(
            "profile_score".to_string(),
            (risk_acc + horizon_acc + liquidity_acc + c_f1 + p_f1) / 5.0,
        );
        by_dialog.insert(dialog.dialog_id.clone(), values);
    }

    let mut micro = BTreeMap::new();
    if eligible_dialogs > 0 {
        let denom = eligible_dialogs as f64;
        let risk = risk_correct as f64 / denom;
        let horizon = horizon_correct as f64 / denom;
        let liquidity = liquidity_correct as f64 / denom;
        let constraints = constraints_f1_total / denom;
        let preferences = preferences_f1_total / denom;
        micro.insert("risk_level_acc".to_string(), risk);
        micro.insert("horizon_acc".to_string(), horizon);
        micro.insert("liquidity_acc".to_string(), liquidity);
        micro.insert("constraints_f1".to_string(), constraints);
        micro.insert("preferences_f1".to_string(), preferences);
        micro.insert(
            "profile_score".to_string(),
            (risk + horizon + liquidity + constraints + preferences) / 5.0,
        );
    } else {
        for key in [
            "risk_level_acc",
            "horizon_acc",
            "liquidity_acc",
            "constraints_f1",
            "preferences_f1",
            "profile_score",
        ] {
            micro.insert(key.to_string(), 0.0);
        }
    }

    // M2 is dialog-granular already, so macro and micro coincide.
    let macro_ = micro.clone();

    let mut counts = BTreeMap::new();
    counts.insert("eligible_count".to_string(), eligible_dialogs);
    counts.insert(
        "skipped_count".to_string(),
        dialog_traces.len() as i64 - eligible_dialogs,
    );
    counts.insert(
        "failed_count".to_string(),
        dialog_traces.iter().filter(|d| !d.valid_dialog).count() as i64,
    );

    MetricResult {
        metric_name: "m2_profile_accuracy".to_string(),
        micro,
        r#macro: macro_,
        counts,
        by_dialog,
    }
}

fn normalize_field(value: Option<&Value>, table: &[(&'static str, &'static str)]) -> String {
    let surface = value.map(value_to_string).unwrap_or_default();
    lookup(table, surface.trim())
        .unwrap_or("unknown")
        .to_string()
}

fn infer_from_text(text: &str, hints: &[(&[&str], &str)]) -> String {
    for (keywords, canonical) in hints {
        if keywords.iter().any(|k| text.contains(k)) {
            return (*canonical).to_string();
        }
    }
    "unknown".to_string()
}

fn field_accuracy(pred: &str, gt: &str) -> f64 {
    if pred == gt && gt != "unknown" { 1.0 } else { 0.0 }
}

/// Set F1 with the empty-set conventions: empty vs empty is a perfect 1.0,
/// an empty ground truth against any prediction is 0.0.
fn set_f1(pred: &BTreeSet<String>, gt: &BTreeSet<String>) -> f64 {
    if gt.is_empty() && pred.is_empty() {
        return 1.0;
    }
    if gt.is_empty() {
        return 0.0;
    }
    let inter = pred.intersection(gt).count() as f64;
    let precision = if pred.is_empty() {
        0.0
    } else {
        inter / pred.len() as f64
    };
    let recall = inter / gt.len() as f64;
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

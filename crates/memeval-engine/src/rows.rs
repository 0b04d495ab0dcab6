use serde_json::Value;

use memeval_types::{
    string_list, DialogTrace, MemorySource, SourceHits, TurnEvalRow, TurnStatus,
};

use crate::resolve::{
    detect_constraint_contradiction, detect_key_hit_sources, detect_rubric_hits,
    extract_pred_risk_tags, heuristic_judge_score, infer_compliance_label,
    normalize_compliance_label, normalize_risk_tag, resolve_memory_required_key,
};

/// Derive one `TurnEvalRow` per replayed turn of every valid dialog.
///
/// Rows are the sole input of the turn-level metrics (M1, M3, M4, M5); they
/// are never mutated after creation. Skipped and failed dialogs contribute
/// nothing.
pub fn build_turn_eval_rows(dialog_traces: &[DialogTrace]) -> Vec<TurnEvalRow> {
    let mut rows = Vec::new();

    for dialog in dialog_traces {
        if !dialog.valid_dialog {
            continue;
        }

        let profile_gt = dialog.profile_gt.as_ref().and_then(Value::as_object);
        let constraints = string_list(profile_gt.and_then(|p| p.get("constraints_gt")));
        let forbidden_list = string_list(
            dialog
                .blueprint
                .as_ref()
                .and_then(Value::as_object)
                .and_then(|b| b.get("forbidden_list")),
        );
        let raw_turns = dialog
            .raw_turns
            .as_ref()
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        for turn in &dialog.turns {
            let tags = turn.gt_turn_tags.as_object();
            let pred_text = turn.pred_assistant_text.as_str();
            let turn_ok = turn.turn_status == TurnStatus::Ok;

            // M1: required-memory keys, hit sources, constraint contradiction
            let required_keys_raw =
                string_list(tags.and_then(|t| t.get("memory_required_keys_gt")));
            let resolved_keys: Vec<_> = required_keys_raw
                .iter()
                .map(|key| resolve_memory_required_key(key, profile_gt, raw_turns))
                .collect();

            let mut key_hit_flags: Vec<u8> = Vec::new();
            let mut key_hit_sources: Vec<Vec<MemorySource>> = Vec::new();
            let mut source_hits = SourceHits::default();
            for resolved in &resolved_keys {
                if !resolved.resolvable {
                    continue;
                }
                let target = resolved.target_text.as_deref().unwrap_or("");
                let sources = detect_key_hit_sources(target, turn);
                key_hit_flags.push(u8::from(!sources.is_empty()));
                for source in &sources {
                    source_hits.bump(*source);
                }
                key_hit_sources.push(sources);
            }
            let eligible_m1 = turn_ok && !key_hit_flags.is_empty();
            let constraint_contradiction =
                detect_constraint_contradiction(pred_text, &constraints);

            // M3: risk-disclosure coverage
            let risk_required_tags: Vec<String> =
                string_list(tags.and_then(|t| t.get("risk_disclosure_required_gt")))
                    .iter()
                    .map(|tag| normalize_risk_tag(tag))
                    .filter(|tag| !tag.is_empty())
                    .collect();
            let risk_pred_tags = extract_pred_risk_tags(pred_text);
            let risk_tag_hits = risk_required_tags
                .iter()
                .filter(|required| {
                    if required.as_str() == "risk_disclosure_present" {
                        !risk_pred_tags.is_empty()
                    } else {
                        risk_pred_tags.contains(*required)
                    }
                })
                .count() as u32;
            let eligible_m3 = turn_ok && !risk_required_tags.is_empty();

            // M4: compliance labels
            let forbidden_hits: Vec<String> = forbidden_list
                .iter()
                .filter(|phrase| !phrase.is_empty() && pred_text.contains(phrase.as_str()))
                .cloned()
                .collect();
            let pred_compliance_label = infer_compliance_label(turn, &forbidden_hits);
            let gt_compliance_label =
                normalize_compliance_label(tags.and_then(|t| t.get("compliance_label_gt")));

            // M5: explainability rubric
            let rubric_required =
                string_list(tags.and_then(|t| t.get("explainability_rubric_gt")));
            let rubric_hit_items = detect_rubric_hits(&rubric_required, pred_text);
            let judge_score_1_5 =
                heuristic_judge_score(rubric_required.len(), rubric_hit_items.len());
            let eligible_m5 = turn_ok && !rubric_required.is_empty();

            rows.push(TurnEvalRow {
                trace_version: dialog.trace_version.clone(),
                run_id: dialog.run_id.clone(),
                dialog_id: dialog.dialog_id.clone(),
                turn_pair_id: turn.turn_pair_id,
                eligible_m1,
                eligible_m2: false,
                eligible_m3,
                eligible_m4: turn_ok,
                eligible_m5,
                required_keys_raw,
                resolved_keys,
                key_hit_flags,
                key_hit_sources,
                m1_source_hits: source_hits,
                constraint_contradiction,
                risk_required_tags,
                risk_pred_tags,
                risk_tag_hits,
                forbidden_hits,
                pred_compliance_label,
                gt_compliance_label,
                rubric_required,
                rubric_hit_items,
                judge_score_1_5,
            });
        }
    }

    rows
}

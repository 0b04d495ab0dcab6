use std::collections::BTreeMap;

use memeval_types::{MetricResult, TurnEvalRow};

use super::{group_rows_by_dialog, macro_avg, ratio};

/// M1 — context continuity: did the agent's recalled context contain the
/// memory targets each turn required, and did replies contradict user
/// constraints.
///
/// Micro rates divide over raw key counts across the run; macro averages the
/// per-dialog rates over dialogs with at least one required key.
pub fn compute_m1_context_continuity(turn_rows: &[TurnEvalRow]) -> MetricResult {
    let eligible: Vec<&TurnEvalRow> = turn_rows.iter().filter(|r| r.eligible_m1).collect();
    let grouped = group_rows_by_dialog(&eligible);

    let mut total_required = 0i64;
    let mut total_hits = 0i64;
    let mut strict_hits = 0i64;
    let mut contra_total = 0i64;
    let mut short_term_total = 0i64;
    let mut long_term_total = 0i64;
    let mut profile_total = 0i64;

    let mut by_dialog: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();

    for (dialog_id, rows) in &grouped {
        let mut d_required = 0i64;
        let mut d_hits = 0i64;
        let mut d_strict = 0i64;
        let mut d_contra = 0i64;
        let mut d_short = 0i64;
        let mut d_long = 0i64;
        let mut d_profile = 0i64;

        for row in rows {
            let required = row.key_hit_flags.len() as i64;
            if required == 0 {
                continue;
            }
            let hits = row.key_hit_flags.iter().map(|f| *f as i64).sum::<i64>();
            d_required += required;
            d_hits += hits;
            d_strict += i64::from(hits == required);
            d_contra += i64::from(row.constraint_contradiction);
            d_short += i64::from(row.m1_source_hits.short_term);
            d_long += i64::from(row.m1_source_hits.long_term);
            d_profile += i64::from(row.m1_source_hits.profile);
        }

        if d_required > 0 {
            let turns = rows.len() as i64;
            let mut values = BTreeMap::new();
            values.insert("key_coverage".to_string(), ratio(d_hits, d_required));
            values.insert("strict_key_hit_rate".to_string(), ratio(d_strict, turns));
            values.insert("contradiction_rate".to_string(), ratio(d_contra, turns));
            by_dialog.insert(dialog_id.clone(), values);

            total_required += d_required;
            total_hits += d_hits;
            strict_hits += d_strict;
            contra_total += d_contra;
            short_term_total += d_short;
            long_term_total += d_long;
            profile_total += d_profile;
        }
    }

    let eligible_turns = eligible.len() as i64;
    let mut micro = BTreeMap::new();
    micro.insert("key_coverage".to_string(), ratio(total_hits, total_required));
    micro.insert(
        "strict_key_hit_rate".to_string(),
        ratio(strict_hits, eligible_turns),
    );
    micro.insert(
        "contradiction_rate".to_string(),
        ratio(contra_total, eligible_turns),
    );
    micro.insert(
        "short_term_hit_rate".to_string(),
        ratio(short_term_total, total_required),
    );
    micro.insert(
        "long_term_hit_rate".to_string(),
        ratio(long_term_total, total_required),
    );
    micro.insert(
        "profile_hit_rate".to_string(),
        ratio(profile_total, total_required),
    );

    let mut macro_ = BTreeMap::new();
    for key in ["key_coverage", "strict_key_hit_rate", "contradiction_rate"] {
        macro_.insert(key.to_string(), macro_avg(&by_dialog, key));
    }

    let mut counts = BTreeMap::new();
    counts.insert("eligible_count".to_string(), eligible_turns);
    counts.insert(
        "skipped_count".to_string(),
        turn_rows.len() as i64 - eligible_turns,
    );
    counts.insert("failed_count".to_string(), 0);
    counts.insert("required_key_total".to_string(), total_required);
    counts.insert("required_key_hit_total".to_string(), total_hits);
    counts.insert("short_term_hit_total".to_string(), short_term_total);
    counts.insert("long_term_hit_total".to_string(), long_term_total);
    counts.insert("profile_hit_total".to_string(), profile_total);

    MetricResult {
        metric_name: "m1_context_continuity".to_string(),
        micro,
        r#macro: macro_,
        counts,
        by_dialog,
    }
}

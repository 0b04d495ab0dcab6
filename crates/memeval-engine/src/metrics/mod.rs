mod m1_context;
mod m2_profile;
mod m3_risk;
mod m4_compliance;
mod m5_explainability;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use memeval_types::{DialogTrace, MetricResult, MetricSet, TurnEvalRow};

pub use m1_context::compute_m1_context_continuity;
pub use m2_profile::compute_m2_profile_accuracy;
pub use m3_risk::compute_m3_risk_coverage;
pub use m4_compliance::compute_m4_compliance;
pub use m5_explainability::compute_m5_explainability;

/// Metric results plus the error map for computations that fell over.
#[derive(Debug, Clone)]
pub struct MetricsOutcome {
    pub metrics: MetricSet,
    pub errors: BTreeMap<String, String>,
}

/// Compute all five metric families behind per-metric failure barriers: a
/// bug in one computation yields an empty result and an entry in the error
/// map instead of erasing the other four.
pub fn compute_all_metrics(
    dialog_traces: &[DialogTrace],
    turn_rows: &[TurnEvalRow],
) -> MetricsOutcome {
    let mut errors = BTreeMap::new();

    let mut guarded = |name: &str, compute: &dyn Fn() -> MetricResult| -> MetricResult {
        match catch_unwind(AssertUnwindSafe(compute)) {
            Ok(result) => result,
            Err(panic) => {
                errors.insert(name.to_string(), panic_message(&panic));
                MetricResult::empty(name)
            }
        }
    };

    let metrics = MetricSet {
        m1_context_continuity: guarded("m1_context_continuity", &|| {
            compute_m1_context_continuity(turn_rows)
        }),
        m2_profile_accuracy: guarded("m2_profile_accuracy", &|| {
            compute_m2_profile_accuracy(dialog_traces)
        }),
        m3_risk_coverage: guarded("m3_risk_coverage", &|| compute_m3_risk_coverage(turn_rows)),
        m4_compliance: guarded("m4_compliance", &|| compute_m4_compliance(turn_rows)),
        m5_explainability: guarded("m5_explainability", &|| {
            compute_m5_explainability(turn_rows)
        }),
    };

    MetricsOutcome { metrics, errors }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Group rows by dialog id, preserving row order within each dialog.
pub(crate) fn group_rows_by_dialog<'a>(
    rows: &[&'a TurnEvalRow],
) -> BTreeMap<String, Vec<&'a TurnEvalRow>> {
    let mut grouped: BTreeMap<String, Vec<&TurnEvalRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.dialog_id.clone()).or_default().push(row);
    }
    grouped
}

pub(crate) fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 { 0.0 } else { sum / count as f64 }
}

pub(crate) fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Average one named value across the per-dialog maps; 0.0 when no dialog
/// qualified.
pub(crate) fn macro_avg(
    by_dialog: &BTreeMap<String, BTreeMap<String, f64>>,
    key: &str,
) -> f64 {
    mean(
        by_dialog
            .values()
            .map(|values| values.get(key).copied().unwrap_or(0.0)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_all_metrics_on_empty_input() {
        let outcome = compute_all_metrics(&[], &[]);
        assert!(outcome.errors.is_empty());
        assert_eq!(
            outcome.metrics.m1_context_continuity.metric_name,
            "m1_context_continuity"
        );
        assert_eq!(
            outcome.metrics.m5_explainability.counts["eligible_count"],
            0
        );
        for metric in outcome.metrics.iter() {
            assert!(metric.by_dialog.is_empty());
        }
    }

    #[test]
    fn test_ratio_and_mean_guards() {
        assert_eq!(ratio(1, 0), 0.0);
        assert_eq!(ratio(1, 2), 0.5);
        assert_eq!(mean(std::iter::empty()), 0.0);
        assert_eq!(mean([1.0, 3.0].into_iter()), 2.0);
    }
}

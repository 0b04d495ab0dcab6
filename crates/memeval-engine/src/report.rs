use std::fmt::Write as _;

use memeval_types::EvalSummary;

/// Render the run summary as a small Markdown report: the run header, the
/// dialog counters, and one micro/macro/counts table per metric.
pub fn render_markdown_report(summary: &EvalSummary) -> String {
    let mut out = String::new();
    out.push_str("# Evaluation Report\n\n");
    let _ = writeln!(out, "- run_id: `{}`", summary.run_id);
    let _ = writeln!(out, "- dataset: `{}`", summary.dataset_path);
    let counters = &summary.counters;
    let _ = writeln!(
        out,
        "- counters: total={}, valid={}, skipped={}, failed={}, turn_pairs={}",
        counters.total_dialogs,
        counters.valid_dialogs,
        counters.skipped_dialogs,
        counters.failed_dialogs,
        counters.total_turn_pairs
    );
    out.push('\n');

    for metric in summary.metrics.iter() {
        let _ = writeln!(out, "## {}\n", metric.metric_name);
        out.push_str("| scope | key | value |\n");
        out.push_str("|-------|-----|-------|\n");
        for (key, value) in &metric.micro {
            let _ = writeln!(out, "| micro | {} | {:.6} |", key, value);
        }
        for (key, value) in &metric.r#macro {
            let _ = writeln!(out, "| macro | {} | {:.6} |", key, value);
        }
        for (key, value) in &metric.counts {
            let _ = writeln!(out, "| counts | {} | {} |", key, value);
        }
        out.push('\n');
    }

    out
}

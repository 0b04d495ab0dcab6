use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use memeval_types::{DialogTrace, EvalSummary, RunManifest, TurnEvalRow};

/// Write the final run artifacts into the run directory.
///
/// `dialog_trace.jsonl` is rewritten here as the final copy ordered by
/// dataset index, replacing the append-order checkpoint content it also
/// serves as during the run. JSON files use 2-space indentation; JSONL
/// files carry one document per line, LF-terminated.
pub fn write_eval_outputs(
    run_dir: &Path,
    manifest: &RunManifest,
    dialog_traces: &[DialogTrace],
    turn_rows: &[TurnEvalRow],
    summary: &EvalSummary,
) -> Result<()> {
    std::fs::create_dir_all(run_dir)
        .with_context(|| format!("failed to create run dir {}", run_dir.display()))?;

    write_pretty_json(&run_dir.join("run_manifest.json"), manifest)?;
    write_jsonl(&run_dir.join("dialog_trace.jsonl"), dialog_traces)?;
    write_jsonl(&run_dir.join("turn_eval.jsonl"), turn_rows)?;
    write_pretty_json(&run_dir.join("metrics_summary.json"), summary)?;
    Ok(())
}

fn write_pretty_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to write {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        let line = serde_json::to_string(row)?;
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memeval_types::{RunCounters, TRACE_VERSION};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn manifest() -> RunManifest {
        RunManifest {
            trace_version: TRACE_VERSION.to_string(),
            run_id: "20260101_000000".to_string(),
            dataset_path: "data.jsonl".to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            ended_at: "2026-01-01T00:01:00Z".to_string(),
            agent_name: "reference".to_string(),
            workers_dialog: 2,
            workers_judge: 1,
            turn_timeout_sec: 120,
            turn_heartbeat_sec: 20,
            turn_retries: 0,
            counters: RunCounters::default(),
            metric_errors: BTreeMap::new(),
        }
    }

    #[test]
    fn test_artifacts_are_written() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("run");
        let outcome = memeval_engine::compute_all_metrics(&[], &[]);
        let summary = memeval_engine::aggregate_summary(
            "20260101_000000",
            "data.jsonl",
            outcome.metrics,
            RunCounters::default(),
        );
        write_eval_outputs(&run_dir, &manifest(), &[], &[], &summary).unwrap();

        let manifest_text =
            std::fs::read_to_string(run_dir.join("run_manifest.json")).unwrap();
        // 2-space indentation, real JSON numbers.
        assert!(manifest_text.contains("\n  \"run_id\": \"20260101_000000\""));
        assert!(manifest_text.contains("\"workers_dialog\": 2"));

        assert!(run_dir.join("dialog_trace.jsonl").exists());
        assert!(run_dir.join("turn_eval.jsonl").exists());
        let summary_text =
            std::fs::read_to_string(run_dir.join("metrics_summary.json")).unwrap();
        assert!(summary_text.contains("\"m1_context_continuity\""));
    }

    #[test]
    fn test_summary_bytes_are_stable() {
        let outcome = memeval_engine::compute_all_metrics(&[], &[]);
        let summary = memeval_engine::aggregate_summary(
            "r",
            "d.jsonl",
            outcome.metrics,
            RunCounters::default(),
        );
        let once = serde_json::to_string_pretty(&summary).unwrap();
        let outcome = memeval_engine::compute_all_metrics(&[], &[]);
        let summary = memeval_engine::aggregate_summary(
            "r",
            "d.jsonl",
            outcome.metrics,
            RunCounters::default(),
        );
        let twice = serde_json::to_string_pretty(&summary).unwrap();
        assert_eq!(once, twice);
    }
}

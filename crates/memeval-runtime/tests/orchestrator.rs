use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use memeval_runtime::{execute_run, progress_path_for, RunConfig, TurnLimits};
use memeval_testing::{dialog, write_dataset, ScriptedFactory, TurnAction};
use memeval_types::{DialogStatus, TurnStatus};

fn tagged_dialog(id: &str) -> Value {
    dialog(id)
        .profile_gt(json!({"risk_level_gt": "稳健"}))
        .user("请问沪深300ETF的费率?")
        .assistant_tagged(
            "管理费约0.5%",
            json!({"compliance_label_gt": "compliant"}),
        )
        .build()
}

fn run_config(dir: &Path, run_id: &str, dataset: &Path) -> RunConfig {
    RunConfig {
        dataset_path: dataset.to_path_buf(),
        run_dir: dir.join("runs").join(run_id),
        run_id: run_id.to_string(),
        progress_path: progress_path_for(&dir.join("logs"), run_id),
        workers_dialog: 2,
        workers_judge: 1,
        limits: TurnLimits::default(),
        drop_memory_keys: false,
    }
}

fn progress_events(path: &Path) -> Vec<(String, Value)> {
    let content = fs::read_to_string(path).unwrap_or_default();
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let row: Value = serde_json::from_str(line).expect("valid progress row");
            (row["event"].as_str().unwrap_or_default().to_string(), row)
        })
        .collect()
}

#[test]
fn run_produces_ordered_traces_and_checkpoint() {
    let dir = TempDir::new().unwrap();
    let dataset = write_dataset(
        dir.path(),
        "data.jsonl",
        &[
            tagged_dialog("d1"),
            tagged_dialog("d2"),
            tagged_dialog("d3"),
        ],
    );
    let config = run_config(dir.path(), "run1", &dataset);
    fs::create_dir_all(&config.run_dir).unwrap();

    let outcome = execute_run(&config, Arc::new(ScriptedFactory::echo_gt())).unwrap();

    assert_eq!(outcome.counters.total_dialogs, 3);
    assert_eq!(outcome.counters.valid_dialogs, 3);
    let indices: Vec<usize> = outcome
        .dialog_traces
        .iter()
        .map(|t| t.dataset_index)
        .collect();
    assert_eq!(indices, vec![1, 2, 3]);

    // Every dialog was checkpointed as one JSONL line.
    let checkpoint = fs::read_to_string(config.run_dir.join("dialog_trace.jsonl")).unwrap();
    assert_eq!(checkpoint.lines().count(), 3);

    let events = progress_events(&config.progress_path);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names.first(), Some(&"run_started"));
    assert_eq!(names.last(), Some(&"run_finished"));
    assert!(names.contains(&"dialog_started"));
    assert!(names.contains(&"turn_started"));
    assert!(names.contains(&"turn_done"));
    assert!(names.contains(&"dialog_done"));
    assert!(names.contains(&"metrics_done"));
}

#[test]
fn resume_skips_completed_dialogs() {
    let dir = TempDir::new().unwrap();
    let dialogs: Vec<Value> = (1..=5).map(|i| tagged_dialog(&format!("d{i}"))).collect();
    let dataset = write_dataset(dir.path(), "data.jsonl", &dialogs);

    // First run: only d1 and d2 reach the checkpoint (simulated kill by
    // running against a truncated dataset with the same run dir).
    let partial = write_dataset(
        dir.path(),
        "partial.jsonl",
        &[tagged_dialog("d1"), tagged_dialog("d2")],
    );
    let mut config = run_config(dir.path(), "run1", &partial);
    fs::create_dir_all(&config.run_dir).unwrap();
    execute_run(&config, Arc::new(ScriptedFactory::echo_gt())).unwrap();

    // Second run over the full dataset resumes into the same run dir.
    config.dataset_path = dataset;
    let outcome = execute_run(&config, Arc::new(ScriptedFactory::echo_gt())).unwrap();
    assert_eq!(outcome.counters.total_dialogs, 5);

    let events = progress_events(&config.progress_path);
    let resumes = events
        .iter()
        .filter(|(name, _)| name == "dialog_skipped_resume")
        .count();
    assert_eq!(resumes, 2);

    // Metrics cover all five dialogs after the resumed run.
    let ids: Vec<&str> = outcome
        .dialog_traces
        .iter()
        .map(|t| t.dialog_id.as_str())
        .collect();
    assert_eq!(ids, vec!["d1", "d2", "d3", "d4", "d5"]);
}

#[test]
fn resume_is_idempotent_for_metrics() {
    let dir = TempDir::new().unwrap();
    let dataset = write_dataset(
        dir.path(),
        "data.jsonl",
        &[tagged_dialog("d1"), tagged_dialog("d2")],
    );
    let config = run_config(dir.path(), "run1", &dataset);
    fs::create_dir_all(&config.run_dir).unwrap();

    let first = execute_run(&config, Arc::new(ScriptedFactory::echo_gt())).unwrap();
    let first_bytes = serde_json::to_string_pretty(&first.metrics).unwrap();

    // Everything already checkpointed: the second run is a no-op replay.
    let second = execute_run(&config, Arc::new(ScriptedFactory::replying(&["x"]))).unwrap();
    let second_bytes = serde_json::to_string_pretty(&second.metrics).unwrap();
    assert_eq!(first_bytes, second_bytes);

    let events = progress_events(&config.progress_path);
    let resumes = events
        .iter()
        .filter(|(name, _)| name == "dialog_skipped_resume")
        .count();
    assert_eq!(resumes, 2);
}

#[test]
fn malformed_checkpoint_lines_are_ignored() {
    let dir = TempDir::new().unwrap();
    let dataset = write_dataset(dir.path(), "data.jsonl", &[tagged_dialog("d1")]);
    let config = run_config(dir.path(), "run1", &dataset);
    fs::create_dir_all(&config.run_dir).unwrap();
    // A torn final line from a crashed writer.
    fs::write(
        config.run_dir.join("dialog_trace.jsonl"),
        "{\"dialog_id\": \"d1\", \"trace_ver",
    )
    .unwrap();

    let outcome = execute_run(&config, Arc::new(ScriptedFactory::echo_gt())).unwrap();
    assert_eq!(outcome.counters.total_dialogs, 1);
    assert_eq!(outcome.dialog_traces[0].dialog_status, DialogStatus::Ok);
}

#[test]
fn panicking_factory_yields_failed_trace_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let dataset = write_dataset(
        dir.path(),
        "data.jsonl",
        &[tagged_dialog("d1"), tagged_dialog("d2")],
    );
    let config = run_config(dir.path(), "run1", &dataset);
    fs::create_dir_all(&config.run_dir).unwrap();

    let outcome = execute_run(
        &config,
        Arc::new(ScriptedFactory::panicking_construction("factory blew up")),
    )
    .unwrap();

    assert_eq!(outcome.counters.total_dialogs, 2);
    assert_eq!(outcome.counters.failed_dialogs, 2);
    for trace in &outcome.dialog_traces {
        assert_eq!(trace.dialog_status, DialogStatus::Failed);
        let error = trace.dialog_error.as_deref().unwrap();
        assert!(error.starts_with("unhandled_dialog_exception:"));
        assert!(error.contains("factory blew up"));
    }

    let events = progress_events(&config.progress_path);
    assert!(events.iter().any(|(name, _)| name == "dialog_failed"));
    // The run still finished normally.
    assert!(events.iter().any(|(name, _)| name == "run_finished"));
}

#[test]
fn timeout_turn_marks_dialog_partial() {
    let dir = TempDir::new().unwrap();
    let dataset = write_dataset(dir.path(), "data.jsonl", &[tagged_dialog("d1")]);
    let mut config = run_config(dir.path(), "run1", &dataset);
    config.limits = TurnLimits {
        timeout_sec: 1,
        heartbeat_sec: 0,
        retries: 0,
    };
    fs::create_dir_all(&config.run_dir).unwrap();

    let factory = ScriptedFactory::scripted(vec![TurnAction::ReplyAfter(
        Duration::from_secs(4),
        "太慢了".to_string(),
    )]);
    let outcome = execute_run(&config, Arc::new(factory)).unwrap();

    let trace = &outcome.dialog_traces[0];
    assert_eq!(trace.dialog_status, DialogStatus::Partial);
    assert_eq!(trace.turns[0].turn_status, TurnStatus::Error);
    assert!(trace.turns[0]
        .error
        .as_deref()
        .unwrap()
        .starts_with("turn_timeout: exceeded"));

    // The timed-out turn is ineligible for every turn-level metric.
    assert!(outcome.turn_rows.iter().all(|row| !row.eligible_m4));
    let events = progress_events(&config.progress_path);
    assert!(events.iter().any(|(name, _)| name == "turn_timeout"));
}

#[test]
fn drop_memory_keys_mode_clears_m1_requirements() {
    let dir = TempDir::new().unwrap();
    let d = dialog("d1")
        .profile_gt(json!({"risk_level_gt": "稳健"}))
        .user("q")
        .assistant_tagged(
            "a",
            json!({"memory_required_keys_gt": ["profile_gt.risk_level_gt"]}),
        )
        .build();
    let dataset = write_dataset(dir.path(), "data.jsonl", &[d]);
    let mut config = run_config(dir.path(), "run1", &dataset);
    config.drop_memory_keys = true;
    fs::create_dir_all(&config.run_dir).unwrap();

    let outcome = execute_run(&config, Arc::new(ScriptedFactory::echo_gt())).unwrap();
    assert!(outcome.turn_rows[0].required_keys_raw.is_empty());
    assert!(!outcome.turn_rows[0].eligible_m1);
    // The trace copy on disk keeps the original requirement.
    assert_eq!(
        outcome.dialog_traces[0].turns[0].gt_turn_tags["memory_required_keys_gt"][0],
        "profile_gt.risk_level_gt"
    );
}

#[test]
fn invalid_dialog_seed_scenario() {
    // Seed scenario: {dialog_id: "d1", turns: []} is skipped with
    // missing_turns and contributes nothing to any metric.
    let dir = TempDir::new().unwrap();
    let dataset = write_dataset(
        dir.path(),
        "data.jsonl",
        &[json!({"dialog_id": "d1", "turns": []})],
    );
    let config = run_config(dir.path(), "run1", &dataset);
    fs::create_dir_all(&config.run_dir).unwrap();

    let outcome = execute_run(&config, Arc::new(ScriptedFactory::echo_gt())).unwrap();
    assert_eq!(outcome.counters.skipped_dialogs, 1);
    assert_eq!(outcome.counters.valid_dialogs, 0);
    assert!(outcome.turn_rows.is_empty());
    let m1 = &outcome.metrics.m1_context_continuity;
    assert_eq!(m1.counts["eligible_count"], 0);
    let m2 = &outcome.metrics.m2_profile_accuracy;
    assert_eq!(m2.counts["eligible_count"], 0);
}

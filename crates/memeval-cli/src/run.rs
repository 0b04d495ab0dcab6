use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};
use chrono::Utc;
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use memeval_engine::{aggregate_summary, render_markdown_report};
use memeval_runtime::{
    execute_run, progress_path_for, utc_timestamp, write_eval_outputs, RunConfig, TurnLimits,
};
use memeval_types::{RunManifest, TRACE_VERSION};

use crate::agents::build_factory;
use crate::args::RunArgs;

pub fn handle(args: RunArgs) -> Result<()> {
    let run_id = args
        .run_id
        .clone()
        .unwrap_or_else(|| Utc::now().format("%Y%m%d_%H%M%S").to_string());
    let run_dir = args.output_root.join(&run_id);
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create run dir {}", run_dir.display()))?;

    let config = RunConfig {
        dataset_path: args.dataset.clone(),
        run_dir: run_dir.clone(),
        run_id: run_id.clone(),
        progress_path: progress_path_for(&args.log_root, &run_id),
        workers_dialog: args.workers_dialog.max(1),
        workers_judge: args.workers_judge,
        limits: TurnLimits {
            timeout_sec: args.turn_timeout_sec,
            heartbeat_sec: args.turn_heartbeat_sec,
            retries: args.turn_retries,
        },
        drop_memory_keys: args.drop_memory_keys,
    };
    let factory = build_factory(args.agent);

    let started_at = utc_timestamp();
    let outcome = execute_run(&config, factory)?;
    let ended_at = utc_timestamp();

    let dataset_path = args.dataset.display().to_string();
    let summary = aggregate_summary(
        &run_id,
        &dataset_path,
        outcome.metrics,
        outcome.counters,
    );
    let manifest = RunManifest {
        trace_version: TRACE_VERSION.to_string(),
        run_id: run_id.clone(),
        dataset_path,
        started_at,
        ended_at,
        agent_name: args.agent.name().to_string(),
        workers_dialog: config.workers_dialog,
        workers_judge: config.workers_judge,
        turn_timeout_sec: config.limits.timeout_sec,
        turn_heartbeat_sec: config.limits.heartbeat_sec,
        turn_retries: config.limits.retries,
        counters: outcome.counters,
        metric_errors: outcome.metric_errors.clone(),
    };

    write_eval_outputs(
        &run_dir,
        &manifest,
        &outcome.dialog_traces,
        &outcome.turn_rows,
        &summary,
    )?;

    let report = render_markdown_report(&summary);
    let report_path = run_dir.join("report.md");
    fs::write(&report_path, report)
        .with_context(|| format!("failed to write {}", report_path.display()))?;

    print_summary(&run_id, &run_dir, &report_path, &outcome.metric_errors);
    Ok(())
}

fn print_summary(
    run_id: &str,
    run_dir: &std::path::Path,
    report_path: &std::path::Path,
    metric_errors: &BTreeMap<String, String>,
) {
    let colored = std::io::stdout().is_terminal();
    if colored {
        println!("{} run_id={}", "[Eval Done]".green().bold(), run_id);
    } else {
        println!("[Eval Done] run_id={}", run_id);
    }
    println!("- output: {}", run_dir.display());
    println!("- report: {}", report_path.display());
    if !metric_errors.is_empty() {
        let rendered = serde_json::to_string(metric_errors).unwrap_or_default();
        if colored {
            println!("- {}: {}", "metric_errors".yellow(), rendered);
        } else {
            println!("- metric_errors: {}", rendered);
        }
    }
}

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use memeval_types::{Agent, TurnPair, TurnStatus};

use crate::progress::{emit, ProgressSink};

/// Substrings (matched case-insensitively) marking transient agent errors
/// worth retrying.
pub const RETRYABLE_ERROR_MARKERS: &[&str] = &[
    "request timed out.",
    "connection error.",
    "incomplete chunked read",
];

/// Per-turn execution limits. Zero disables the deadline or the heartbeat.
#[derive(Debug, Clone, Copy)]
pub struct TurnLimits {
    pub timeout_sec: u64,
    pub heartbeat_sec: u64,
    pub retries: u32,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            timeout_sec: 120,
            heartbeat_sec: 20,
            retries: 0,
        }
    }
}

/// What one turn execution produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub pred_text: String,
    pub status: TurnStatus,
    pub error: Option<String>,
    pub latency_ms: f64,
    pub attempts_used: u32,
}

pub fn is_retryable_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    RETRYABLE_ERROR_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Run one turn against the agent under a deadline, with heartbeats and
/// bounded retries.
///
/// Each attempt hands the call to a dedicated worker thread and polls its
/// channel at `min(1s, remaining)` granularity so the dialog worker stays
/// responsive. On deadline expiry the receiver is dropped and the worker is
/// left to finish on its own; the abandoned call cannot be force-killed and
/// is not joined. The deadline clock resets per attempt, and only errors
/// matching [`RETRYABLE_ERROR_MARKERS`] are retried (after a 1 s pause).
pub fn execute_turn(
    agent: &Arc<dyn Agent>,
    pair: &TurnPair,
    session_id: &str,
    user_id: &str,
    limits: &TurnLimits,
    progress: &ProgressSink,
) -> TurnOutcome {
    let total_attempts = limits.retries.saturating_add(1);

    let mut outcome = TurnOutcome {
        pred_text: String::new(),
        status: TurnStatus::Error,
        error: Some("turn never attempted".to_string()),
        latency_ms: 0.0,
        attempts_used: 0,
    };

    for attempt in 1..=total_attempts {
        outcome = run_attempt(agent, pair, session_id, user_id, limits, progress, attempt);
        outcome.attempts_used = attempt;

        let retry = attempt < total_attempts
            && outcome.status == TurnStatus::Error
            && outcome
                .error
                .as_deref()
                .map(is_retryable_error)
                .unwrap_or(false);
        if !retry {
            break;
        }

        emit(
            progress,
            "turn_retry",
            json!({
                "turn_pair_id": pair.turn_pair_id,
                "attempt": attempt,
                "error": outcome.error,
            }),
        );
        thread::sleep(Duration::from_secs(1));
    }

    outcome
}

fn run_attempt(
    agent: &Arc<dyn Agent>,
    pair: &TurnPair,
    session_id: &str,
    user_id: &str,
    limits: &TurnLimits,
    progress: &ProgressSink,
    attempt: u32,
) -> TurnOutcome {
    let started = Instant::now();
    let (tx, rx) = mpsc::channel::<Result<String, String>>();

    let worker_agent = Arc::clone(agent);
    let worker_pair = pair.clone();
    let worker_session = session_id.to_string();
    let worker_user = user_id.to_string();
    let spawned = thread::Builder::new()
        .name(format!("turn-worker-{}", pair.turn_pair_id))
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                worker_agent.handle_turn(
                    &worker_pair.user_text,
                    &worker_session,
                    &worker_user,
                    Some(&worker_pair),
                )
            }));
            let outcome = match result {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(err)) => Err(err.to_string()),
                Err(panic) => Err(format!("agent panicked: {}", panic_message(&panic))),
            };
            // The receiver may be gone after a timeout; that is fine.
            let _ = tx.send(outcome);
        });
    if let Err(err) = spawned {
        return TurnOutcome {
            pred_text: String::new(),
            status: TurnStatus::Error,
            error: Some(format!("failed to spawn turn worker: {}", err)),
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            attempts_used: attempt,
        };
    }

    let deadline = if limits.timeout_sec > 0 {
        Some(Duration::from_secs(limits.timeout_sec))
    } else {
        None
    };
    let heartbeat = Duration::from_secs(limits.heartbeat_sec.max(1));
    let mut next_heartbeat = heartbeat;

    let (status, error, pred_text) = loop {
        let elapsed = started.elapsed();
        if let Some(deadline) = deadline
            && elapsed >= deadline
        {
            emit(
                progress,
                "turn_timeout",
                json!({
                    "turn_pair_id": pair.turn_pair_id,
                    "elapsed_sec": round3(elapsed.as_secs_f64()),
                    "timeout_sec": limits.timeout_sec,
                }),
            );
            break (
                TurnStatus::Error,
                Some(format!("turn_timeout: exceeded {}s", limits.timeout_sec)),
                String::new(),
            );
        }

        let mut wait = Duration::from_secs(1);
        if let Some(deadline) = deadline {
            wait = wait.min(deadline.saturating_sub(elapsed));
        }
        wait = wait.max(Duration::from_millis(100));

        match rx.recv_timeout(wait) {
            Ok(Ok(text)) => break (TurnStatus::Ok, None, text),
            Ok(Err(message)) => break (TurnStatus::Error, Some(message), String::new()),
            Err(RecvTimeoutError::Timeout) => {
                let elapsed = started.elapsed();
                if limits.heartbeat_sec > 0 && elapsed >= next_heartbeat {
                    emit(
                        progress,
                        "turn_heartbeat",
                        json!({
                            "turn_pair_id": pair.turn_pair_id,
                            "elapsed_sec": round3(elapsed.as_secs_f64()),
                        }),
                    );
                    next_heartbeat += heartbeat;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                break (
                    TurnStatus::Error,
                    Some("agent worker exited without a result".to_string()),
                    String::new(),
                )
            }
        }
    };

    TurnOutcome {
        pred_text,
        status,
        error,
        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        attempts_used: attempt,
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::null_sink;
    use memeval_types::AgentError;
    use serde_json::Value;
    use std::sync::Mutex;

    struct FnAgent<F>(F);

    impl<F> Agent for FnAgent<F>
    where
        F: Fn() -> Result<String, AgentError> + Send + Sync,
    {
        fn handle_turn(
            &self,
            _user_message: &str,
            _session_id: &str,
            _user_id: &str,
            _turn_pair: Option<&TurnPair>,
        ) -> Result<String, AgentError> {
            (self.0)()
        }
    }

    fn pair() -> TurnPair {
        TurnPair {
            turn_pair_id: 1,
            user_turn_abs_idx: 0,
            gt_assistant_abs_idx: 1,
            user_text: "question".to_string(),
            gt_assistant_text: "answer".to_string(),
            gt_turn_tags: None,
        }
    }

    fn collecting_sink() -> (ProgressSink, Arc<Mutex<Vec<String>>>) {
        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        let sink: ProgressSink = Arc::new(move |event: &str, _payload: Value| {
            captured.lock().unwrap().push(event.to_string());
        });
        (sink, events)
    }

    #[test]
    fn test_successful_turn() {
        let agent: Arc<dyn Agent> = Arc::new(FnAgent(|| Ok("reply".to_string())));
        let outcome = execute_turn(
            &agent,
            &pair(),
            "s",
            "u",
            &TurnLimits::default(),
            &null_sink(),
        );
        assert_eq!(outcome.status, TurnStatus::Ok);
        assert_eq!(outcome.pred_text, "reply");
        assert_eq!(outcome.attempts_used, 1);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_error_turn_is_not_retried_by_default() {
        let agent: Arc<dyn Agent> = Arc::new(FnAgent(|| Err(AgentError::new("boom"))));
        let limits = TurnLimits {
            retries: 2,
            ..Default::default()
        };
        let outcome = execute_turn(&agent, &pair(), "s", "u", &limits, &null_sink());
        assert_eq!(outcome.status, TurnStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
        // Non-retryable message: a single attempt despite the budget.
        assert_eq!(outcome.attempts_used, 1);
    }

    #[test]
    fn test_retryable_error_consumes_attempts() {
        let calls = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&calls);
        let agent: Arc<dyn Agent> = Arc::new(FnAgent(move || {
            let mut calls = counter.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Err(AgentError::new("Connection error."))
            } else {
                Ok("recovered".to_string())
            }
        }));
        let limits = TurnLimits {
            retries: 1,
            ..Default::default()
        };
        let (sink, events) = collecting_sink();
        let outcome = execute_turn(&agent, &pair(), "s", "u", &limits, &sink);
        assert_eq!(outcome.status, TurnStatus::Ok);
        assert_eq!(outcome.pred_text, "recovered");
        assert_eq!(outcome.attempts_used, 2);
        assert!(events.lock().unwrap().contains(&"turn_retry".to_string()));
    }

    #[test]
    fn test_retry_budget_exhaustion_keeps_last_error() {
        let agent: Arc<dyn Agent> =
            Arc::new(FnAgent(|| Err(AgentError::new("Request timed out."))));
        let limits = TurnLimits {
            retries: 1,
            ..Default::default()
        };
        let outcome = execute_turn(&agent, &pair(), "s", "u", &limits, &null_sink());
        assert_eq!(outcome.status, TurnStatus::Error);
        assert_eq!(outcome.attempts_used, 2);
        assert_eq!(outcome.error.as_deref(), Some("Request timed out."));
    }

    #[test]
    fn test_timeout_detaches_and_reports() {
        let agent: Arc<dyn Agent> = Arc::new(FnAgent(|| {
            thread::sleep(Duration::from_secs(5));
            Ok("too late".to_string())
        }));
        let limits = TurnLimits {
            timeout_sec: 1,
            heartbeat_sec: 0,
            retries: 0,
        };
        let (sink, events) = collecting_sink();
        let started = Instant::now();
        let outcome = execute_turn(&agent, &pair(), "s", "u", &limits, &sink);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(outcome.status, TurnStatus::Error);
        assert!(outcome
            .error
            .as_deref()
            .unwrap()
            .starts_with("turn_timeout: exceeded 1s"));
        assert!(events.lock().unwrap().contains(&"turn_timeout".to_string()));
    }

    #[test]
    fn test_panicking_agent_surfaces_as_error() {
        let agent: Arc<dyn Agent> = Arc::new(FnAgent(|| panic!("unexpected state")));
        let outcome = execute_turn(
            &agent,
            &pair(),
            "s",
            "u",
            &TurnLimits::default(),
            &null_sink(),
        );
        assert_eq!(outcome.status, TurnStatus::Error);
        assert!(outcome.error.unwrap().contains("unexpected state"));
    }

    #[test]
    fn test_heartbeats_fire_while_waiting() {
        let agent: Arc<dyn Agent> = Arc::new(FnAgent(|| {
            thread::sleep(Duration::from_millis(2500));
            Ok("slow".to_string())
        }));
        let limits = TurnLimits {
            timeout_sec: 10,
            heartbeat_sec: 1,
            retries: 0,
        };
        let (sink, events) = collecting_sink();
        let outcome = execute_turn(&agent, &pair(), "s", "u", &limits, &sink);
        assert_eq!(outcome.status, TurnStatus::Ok);
        let heartbeats = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == "turn_heartbeat")
            .count();
        assert!(heartbeats >= 1, "expected at least one heartbeat");
    }

    #[test]
    fn test_retryable_matcher_is_case_insensitive() {
        assert!(is_retryable_error("HTTP 599: CONNECTION ERROR."));
        assert!(is_retryable_error("read failed: incomplete chunked read"));
        assert!(!is_retryable_error("model refused"));
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let agent: Arc<dyn Agent> = Arc::new(FnAgent(|| {
            thread::sleep(Duration::from_millis(1200));
            Ok("done".to_string())
        }));
        let limits = TurnLimits {
            timeout_sec: 0,
            heartbeat_sec: 0,
            retries: 0,
        };
        let outcome = execute_turn(&agent, &pair(), "s", "u", &limits, &null_sink());
        assert_eq!(outcome.status, TurnStatus::Ok);
        assert_eq!(outcome.pred_text, "done");
    }
}

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde_json::Value;

use memeval_types::{ComplianceTrace, Observer, ObserverEvent, RecallTrace, ToolTrace};

/// Everything the observer collected for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnBucket {
    pub query: Option<String>,
    pub recall: Option<RecallTrace>,
    pub tools: Vec<ToolTrace>,
    pub compliance: Option<ComplianceTrace>,
    pub profile_snapshot: Option<Value>,
    pub turn_end: Option<TurnEndMark>,
}

/// The agent's own account of when a turn finished.
#[derive(Debug, Clone)]
pub struct TurnEndMark {
    pub latency_ms: f64,
    pub final_content: String,
}

/// Per-dialog event sink keyed by turn-pair id.
///
/// `recall_done`, `compliance_done` and `profile_snapshot` replace the
/// previous value; `tool_called` appends in emission order. Events with an
/// unknown or non-positive id are dropped, and emitting never raises back
/// into the agent. Observer state is local to one dialog; nothing is shared
/// across dialogs.
#[derive(Debug, Default)]
pub struct ObserverBus {
    buckets: Mutex<BTreeMap<u32, TurnBucket>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back what was collected for one turn. Returns an owned copy so
    /// the caller never aliases live observer state; an id nothing was
    /// emitted for yields an empty bucket.
    pub fn get_turn_payload(&self, turn_pair_id: u32) -> TurnBucket {
        let buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets.get(&turn_pair_id).cloned().unwrap_or_default()
    }
}

impl Observer for ObserverBus {
    fn on_event(&self, event_name: &str, payload: Value) {
        let Some((turn_pair_id, event)) = ObserverEvent::parse(event_name, &payload) else {
            return;
        };

        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let bucket = buckets.entry(turn_pair_id).or_default();
        match event {
            ObserverEvent::TurnStart { query } => bucket.query = Some(query),
            ObserverEvent::RecallDone { recall } => bucket.recall = Some(recall),
            ObserverEvent::ToolCalled { tool } => bucket.tools.push(tool),
            ObserverEvent::ComplianceDone { compliance } => bucket.compliance = Some(compliance),
            ObserverEvent::ProfileSnapshot { profile } => {
                bucket.profile_snapshot = Some(profile)
            }
            ObserverEvent::TurnEnd {
                latency_ms,
                final_content,
            } => {
                bucket.turn_end = Some(TurnEndMark {
                    latency_ms,
                    final_content,
                })
            }
        }
    }
}

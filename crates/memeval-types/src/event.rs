use serde_json::Value;

use crate::trace::{ComplianceTrace, RecallItem, RecallTrace, ToolTrace};
use crate::util::value_to_string;

/// The closed set of events an agent may emit through its observer handle.
///
/// Payloads arrive as loose JSON objects at the `Observer::on_event`
/// boundary and are parsed into these variants; unknown event names parse to
/// `None` and are dropped, which keeps the wire surface forward-compatible.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    TurnStart {
        query: String,
    },
    RecallDone {
        recall: RecallTrace,
    },
    ToolCalled {
        tool: ToolTrace,
    },
    ComplianceDone {
        compliance: ComplianceTrace,
    },
    ProfileSnapshot {
        profile: Value,
    },
    TurnEnd {
        latency_ms: f64,
        final_content: String,
    },
}

impl ObserverEvent {
    /// Parse a raw `(event_name, payload)` emission into `(turn_pair_id,
    /// event)`. Returns `None` for unknown event names and for payloads
    /// without a positive `turn_pair_id`.
    pub fn parse(event_name: &str, payload: &Value) -> Option<(u32, Self)> {
        let turn_pair_id = turn_pair_id(payload)?;
        let event = match event_name {
            "turn_start" => ObserverEvent::TurnStart {
                query: get_string(payload, "query"),
            },
            "recall_done" => ObserverEvent::RecallDone {
                recall: parse_recall(payload),
            },
            "tool_called" => ObserverEvent::ToolCalled {
                tool: parse_tool(payload),
            },
            "compliance_done" => ObserverEvent::ComplianceDone {
                compliance: parse_compliance(payload),
            },
            "profile_snapshot" => ObserverEvent::ProfileSnapshot {
                profile: payload
                    .get("profile")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            },
            "turn_end" => ObserverEvent::TurnEnd {
                latency_ms: get_f64(payload, "latency_ms"),
                final_content: get_string(payload, "final_content"),
            },
            _ => return None,
        };
        Some((turn_pair_id, event))
    }
}

fn turn_pair_id(payload: &Value) -> Option<u32> {
    let raw = payload.get("turn_pair_id")?;
    let id = match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if id <= 0 {
        return None;
    }
    Some(id as u32)
}

fn get_string(payload: &Value, key: &str) -> String {
    payload.get(key).map(value_to_string).unwrap_or_default()
}

fn get_f64(payload: &Value, key: &str) -> f64 {
    payload.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn get_u64(payload: &Value, key: &str) -> u64 {
    payload.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn get_bool(payload: &Value, key: &str, default: bool) -> bool {
    payload.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn parse_recall(payload: &Value) -> RecallTrace {
    let items = payload
        .get("recalled_items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .map(|(idx, item)| RecallItem {
                    rank: idx as u32 + 1,
                    item_id: get_string(item, "id"),
                    content: get_string(item, "content"),
                    score: get_f64(item, "score"),
                    source: get_string(item, "source"),
                    turn_index: item.get("turn_index").and_then(Value::as_i64).unwrap_or(0),
                    session_id: get_string(item, "session_id"),
                })
                .collect()
        })
        .unwrap_or_default();

    RecallTrace {
        query: get_string(payload, "query"),
        short_term_context: get_string(payload, "short_term_context"),
        short_term_turns: payload
            .get("short_term_turns")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        profile_context: get_string(payload, "profile_context"),
        packed_context: get_string(payload, "packed_context"),
        token_count: get_u64(payload, "token_count"),
        items,
    }
}

fn parse_tool(payload: &Value) -> ToolTrace {
    ToolTrace {
        tool_name: get_string(payload, "tool_name"),
        args: payload
            .get("tool_args")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
        result_excerpt: get_string(payload, "tool_result"),
        latency_ms: get_f64(payload, "latency_ms"),
        error: None,
    }
}

fn parse_compliance(payload: &Value) -> ComplianceTrace {
    ComplianceTrace {
        needs_modification: get_bool(payload, "needs_modification", false),
        is_compliant: get_bool(payload, "is_compliant", true),
        violations: payload
            .get("violations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        risk_disclaimer_added: get_bool(payload, "risk_disclaimer_added", false),
        suitability_warning: payload
            .get("suitability_warning")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::pair::TurnPair;

/// Handle through which an agent reports what it did during a turn.
///
/// Event names and payload shapes are the closed set parsed by
/// [`crate::ObserverEvent`]; emitting must never disturb the agent's control
/// flow, so implementations swallow malformed payloads and unknown names.
pub trait Observer: Send + Sync {
    fn on_event(&self, event_name: &str, payload: Value);
}

/// Error raised by an agent adapter. Carries only a message; the harness
/// matches the text against its retryable-error set and records it verbatim
/// on the turn trace.
#[derive(Debug)]
pub struct AgentError {
    message: String,
}

impl AgentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AgentError {}

impl From<String> for AgentError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for AgentError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// The single contract the harness depends on.
///
/// `handle_turn` takes `&self` because a timed-out call is detached rather
/// than joined: the abandoned invocation may still be running when the next
/// turn starts, so agents own their interior mutability. Within one dialog
/// the harness never issues two calls concurrently on purpose.
pub trait Agent: Send + Sync {
    fn handle_turn(
        &self,
        user_message: &str,
        session_id: &str,
        user_id: &str,
        turn_pair: Option<&TurnPair>,
    ) -> Result<String, AgentError>;
}

/// Builds one agent per dialog. Agents are never shared across dialogs.
pub trait AgentFactory: Send + Sync {
    fn create(
        &self,
        dialog_id: &str,
        observer: Arc<dyn Observer>,
    ) -> Result<Arc<dyn Agent>, AgentError>;
}

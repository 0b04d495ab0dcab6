//! Testing utilities for the memeval workspace: declarative dialog
//! fixtures, dataset file writers, and scripted stub agents that stand in
//! for real adapters in replay and orchestrator tests.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map, Value};

use memeval_types::{Agent, AgentError, AgentFactory, DatasetRecord, Observer, TurnPair};

/// Fluent builder for one dataset dialog object.
pub struct DialogBuilder {
    fields: Map<String, Value>,
    turns: Vec<Value>,
}

/// Start building a dialog with the given id.
pub fn dialog(dialog_id: &str) -> DialogBuilder {
    let mut fields = Map::new();
    fields.insert(
        "dialog_id".to_string(),
        Value::String(dialog_id.to_string()),
    );
    DialogBuilder {
        fields,
        turns: Vec::new(),
    }
}

impl DialogBuilder {
    pub fn user(mut self, text: &str) -> Self {
        self.turns.push(json!({"role": "user", "text": text}));
        self
    }

    pub fn assistant(mut self, text: &str) -> Self {
        self.turns.push(json!({"role": "assistant", "text": text}));
        self
    }

    pub fn assistant_tagged(mut self, text: &str, turn_tags: Value) -> Self {
        self.turns.push(json!({
            "role": "assistant",
            "text": text,
            "turn_tags": turn_tags
        }));
        self
    }

    pub fn raw_turn(mut self, turn: Value) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn profile_gt(mut self, profile: Value) -> Self {
        self.fields.insert("profile_gt".to_string(), profile);
        self
    }

    pub fn blueprint(mut self, blueprint: Value) -> Self {
        self.fields.insert("blueprint".to_string(), blueprint);
        self
    }

    pub fn scenario(mut self, scenario_type: &str, difficulty: &str) -> Self {
        self.fields.insert(
            "scenario_type".to_string(),
            Value::String(scenario_type.to_string()),
        );
        self.fields.insert(
            "difficulty".to_string(),
            Value::String(difficulty.to_string()),
        );
        self
    }

    pub fn build(mut self) -> Value {
        self.fields
            .insert("turns".to_string(), Value::Array(self.turns));
        Value::Object(self.fields)
    }
}

/// Wrap a dialog object as a loaded dataset record with the given 1-based
/// index.
pub fn dataset_record(dataset_index: usize, dialog: Value) -> DatasetRecord {
    match dialog {
        Value::Object(map) => DatasetRecord::new(dataset_index, map),
        other => panic!("dialog fixture must be a JSON object, got {other}"),
    }
}

/// Write dialogs as a JSONL dataset file under `dir` and return its path.
pub fn write_dataset(dir: &Path, name: &str, dialogs: &[Value]) -> PathBuf {
    let path = dir.join(name);
    let mut file = File::create(&path).expect("create dataset file");
    for dialog in dialogs {
        let line = serde_json::to_string(dialog).expect("serialize dialog");
        writeln!(file, "{}", line).expect("write dataset line");
    }
    path
}

/// One scripted behavior for one `handle_turn` call.
#[derive(Debug, Clone)]
pub enum TurnAction {
    /// Return this text immediately.
    Reply(String),
    /// Sleep, then return this text.
    ReplyAfter(Duration, String),
    /// Fail with this error message.
    Fail(String),
    /// Return the ground-truth assistant text from the turn pair.
    EchoGt,
    /// Emit observer events (payloads get the current `turn_pair_id`
    /// injected when absent), then return this text.
    ReplyWithEvents {
        text: String,
        events: Vec<(String, Value)>,
    },
}

/// Deterministic stand-in for a real agent adapter: plays back a script of
/// [`TurnAction`]s, one per `handle_turn` call, then falls back to a fixed
/// action.
pub struct ScriptedAgent {
    observer: Arc<dyn Observer>,
    script: Mutex<VecDeque<TurnAction>>,
    fallback: TurnAction,
}

impl ScriptedAgent {
    pub fn new(
        observer: Arc<dyn Observer>,
        script: Vec<TurnAction>,
        fallback: TurnAction,
    ) -> Self {
        Self {
            observer,
            script: Mutex::new(script.into()),
            fallback,
        }
    }

    fn next_action(&self) -> TurnAction {
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Agent for ScriptedAgent {
    fn handle_turn(
        &self,
        _user_message: &str,
        _session_id: &str,
        _user_id: &str,
        turn_pair: Option<&TurnPair>,
    ) -> Result<String, AgentError> {
        match self.next_action() {
            TurnAction::Reply(text) => Ok(text),
            TurnAction::ReplyAfter(delay, text) => {
                std::thread::sleep(delay);
                Ok(text)
            }
            TurnAction::Fail(message) => Err(AgentError::new(message)),
            TurnAction::EchoGt => Ok(turn_pair
                .map(|p| p.gt_assistant_text.clone())
                .unwrap_or_default()),
            TurnAction::ReplyWithEvents { text, events } => {
                for (event_name, payload) in events {
                    let mut payload = payload;
                    if let (Some(pair), Some(map)) = (turn_pair, payload.as_object_mut())
                        && !map.contains_key("turn_pair_id")
                    {
                        map.insert("turn_pair_id".to_string(), json!(pair.turn_pair_id));
                    }
                    self.observer.on_event(&event_name, payload);
                }
                Ok(text)
            }
        }
    }
}

enum ConstructionFailure {
    Error(String),
    Panic(String),
}

/// Factory producing [`ScriptedAgent`]s, with optional per-dialog scripts
/// and scripted construction failures.
pub struct ScriptedFactory {
    per_dialog: HashMap<String, Vec<TurnAction>>,
    default_script: Vec<TurnAction>,
    fallback: TurnAction,
    construction_failure: Option<ConstructionFailure>,
}

impl ScriptedFactory {
    /// Every agent replies with these texts, one per turn, then empty
    /// strings.
    pub fn replying(replies: &[&str]) -> Self {
        Self::scripted(
            replies
                .iter()
                .map(|r| TurnAction::Reply((*r).to_string()))
                .collect(),
        )
    }

    /// Every agent plays this script.
    pub fn scripted(script: Vec<TurnAction>) -> Self {
        Self {
            per_dialog: HashMap::new(),
            default_script: script,
            fallback: TurnAction::Reply(String::new()),
            construction_failure: None,
        }
    }

    /// Every agent echoes the ground-truth assistant text.
    pub fn echo_gt() -> Self {
        Self {
            per_dialog: HashMap::new(),
            default_script: Vec::new(),
            fallback: TurnAction::EchoGt,
            construction_failure: None,
        }
    }

    /// `create` returns an error for every dialog.
    pub fn failing_construction(message: &str) -> Self {
        let mut factory = Self::scripted(Vec::new());
        factory.construction_failure = Some(ConstructionFailure::Error(message.to_string()));
        factory
    }

    /// `create` panics for every dialog; exercises the orchestrator's
    /// unhandled-exception path.
    pub fn panicking_construction(message: &str) -> Self {
        let mut factory = Self::scripted(Vec::new());
        factory.construction_failure = Some(ConstructionFailure::Panic(message.to_string()));
        factory
    }

    /// Override the script for one dialog id.
    pub fn with_dialog_script(mut self, dialog_id: &str, script: Vec<TurnAction>) -> Self {
        self.per_dialog.insert(dialog_id.to_string(), script);
        self
    }

    /// Change what agents do once their script is exhausted.
    pub fn with_fallback(mut self, fallback: TurnAction) -> Self {
        self.fallback = fallback;
        self
    }
}

impl AgentFactory for ScriptedFactory {
    fn create(
        &self,
        dialog_id: &str,
        observer: Arc<dyn Observer>,
    ) -> Result<Arc<dyn Agent>, AgentError> {
        match &self.construction_failure {
            Some(ConstructionFailure::Error(message)) => {
                return Err(AgentError::new(message.clone()))
            }
            Some(ConstructionFailure::Panic(message)) => panic!("{}", message),
            None => {}
        }
        let script = self
            .per_dialog
            .get(dialog_id)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        Ok(Arc::new(ScriptedAgent::new(
            observer,
            script,
            self.fallback.clone(),
        )))
    }
}

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;

use memeval_types::{Agent, AgentError, AgentFactory, Observer, TurnPair};

use crate::args::AgentKind;

pub fn build_factory(kind: AgentKind) -> Arc<dyn AgentFactory> {
    match kind {
        AgentKind::Reference => Arc::new(ReferenceFactory),
        AgentKind::Silent => Arc::new(SilentFactory),
    }
}

/// Baseline that replays the ground-truth assistant text.
///
/// It keeps the dialog's user turns as a rolling short-term context and
/// reports it through `recall_done`, so the full observer pipeline (and the
/// short-term leg of M1) is exercised without any model or network.
struct ReferenceAgent {
    observer: Arc<dyn Observer>,
    history: Mutex<Vec<String>>,
}

impl Agent for ReferenceAgent {
    fn handle_turn(
        &self,
        user_message: &str,
        _session_id: &str,
        _user_id: &str,
        turn_pair: Option<&TurnPair>,
    ) -> Result<String, AgentError> {
        let started = Instant::now();

        let short_term_context = {
            let mut history = self
                .history
                .lock()
                .map_err(|_| AgentError::new("reference agent history poisoned"))?;
            history.push(user_message.to_string());
            history.join("\n")
        };

        let reply = turn_pair
            .map(|pair| pair.gt_assistant_text.clone())
            .unwrap_or_default();

        if let Some(pair) = turn_pair {
            self.observer.on_event(
                "turn_start",
                json!({"turn_pair_id": pair.turn_pair_id, "query": user_message}),
            );
            self.observer.on_event(
                "recall_done",
                json!({
                    "turn_pair_id": pair.turn_pair_id,
                    "query": user_message,
                    "short_term_context": short_term_context,
                    "recalled_items": [],
                }),
            );
            self.observer.on_event(
                "turn_end",
                json!({
                    "turn_pair_id": pair.turn_pair_id,
                    "latency_ms": started.elapsed().as_secs_f64() * 1000.0,
                    "final_content": reply,
                }),
            );
        }

        Ok(reply)
    }
}

struct ReferenceFactory;

impl AgentFactory for ReferenceFactory {
    fn create(
        &self,
        _dialog_id: &str,
        observer: Arc<dyn Observer>,
    ) -> Result<Arc<dyn Agent>, AgentError> {
        Ok(Arc::new(ReferenceAgent {
            observer,
            history: Mutex::new(Vec::new()),
        }))
    }
}

/// Baseline that says nothing and observes nothing.
struct SilentAgent;

impl Agent for SilentAgent {
    fn handle_turn(
        &self,
        _user_message: &str,
        _session_id: &str,
        _user_id: &str,
        _turn_pair: Option<&TurnPair>,
    ) -> Result<String, AgentError> {
        Ok(String::new())
    }
}

struct SilentFactory;

impl AgentFactory for SilentFactory {
    fn create(
        &self,
        _dialog_id: &str,
        _observer: Arc<dyn Observer>,
    ) -> Result<Arc<dyn Agent>, AgentError> {
        Ok(Arc::new(SilentAgent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memeval_runtime::ObserverBus;

    fn pair(id: u32, user: &str, gt: &str) -> TurnPair {
        TurnPair {
            turn_pair_id: id,
            user_turn_abs_idx: (id as usize - 1) * 2,
            gt_assistant_abs_idx: (id as usize - 1) * 2 + 1,
            user_text: user.to_string(),
            gt_assistant_text: gt.to_string(),
            gt_turn_tags: None,
        }
    }

    #[test]
    fn test_reference_agent_replays_gt_and_reports_history() {
        let bus = Arc::new(ObserverBus::new());
        let factory = ReferenceFactory;
        let agent = factory
            .create("d1", Arc::clone(&bus) as Arc<dyn Observer>)
            .unwrap();

        let first = agent
            .handle_turn("第一问", "s", "u", Some(&pair(1, "第一问", "第一答")))
            .unwrap();
        assert_eq!(first, "第一答");

        let second = agent
            .handle_turn("第二问", "s", "u", Some(&pair(2, "第二问", "第二答")))
            .unwrap();
        assert_eq!(second, "第二答");

        let bucket = bus.get_turn_payload(2);
        let recall = bucket.recall.unwrap();
        assert!(recall.short_term_context.contains("第一问"));
        assert!(recall.short_term_context.contains("第二问"));
        assert_eq!(bucket.turn_end.unwrap().final_content, "第二答");
    }

    #[test]
    fn test_silent_agent_replies_empty() {
        let bus = Arc::new(ObserverBus::new());
        let agent = SilentFactory
            .create("d1", bus as Arc<dyn Observer>)
            .unwrap();
        let reply = agent.handle_turn("问题", "s", "u", None).unwrap();
        assert!(reply.is_empty());
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::string_list;

/// A (user utterance, next assistant utterance) pair aligned from the raw
/// turn list of one dialog. Ids are 1-based and assigned in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnPair {
    pub turn_pair_id: u32,
    pub user_turn_abs_idx: usize,
    pub gt_assistant_abs_idx: usize,
    pub user_text: String,
    pub gt_assistant_text: String,
    /// Ground-truth tags carried by the assistant turn; present only when
    /// the raw turn carried a JSON object `turn_tags`.
    pub gt_turn_tags: Option<Value>,
}

impl TurnPair {
    pub fn tags(&self) -> Option<&Map<String, Value>> {
        self.gt_turn_tags.as_ref().and_then(Value::as_object)
    }

    pub fn memory_required_keys(&self) -> Vec<String> {
        string_list(self.tags().and_then(|t| t.get("memory_required_keys_gt")))
    }

    pub fn risk_disclosure_required(&self) -> Vec<String> {
        string_list(self.tags().and_then(|t| t.get("risk_disclosure_required_gt")))
    }

    pub fn explainability_rubric(&self) -> Vec<String> {
        string_list(self.tags().and_then(|t| t.get("explainability_rubric_gt")))
    }

    pub fn compliance_label(&self) -> Option<String> {
        self.tags()
            .and_then(|t| t.get("compliance_label_gt"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

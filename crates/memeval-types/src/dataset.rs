use serde_json::{Map, Value};

/// One line of the evaluation dataset, decoded leniently.
///
/// The raw object is kept as-is so that ground-truth material
/// (`profile_gt`, `blueprint`, raw turns) can be passed through to traces
/// without loss. Lines that failed to decode are quarantined here instead of
/// aborting the load; they surface later as skipped dialogs.
#[derive(Debug, Clone)]
pub struct DatasetRecord {
    /// 1-based line number in the dataset file
    pub dataset_index: usize,
    pub raw: Map<String, Value>,
    pub invalid_json_error: Option<String>,
}

impl DatasetRecord {
    pub fn new(dataset_index: usize, raw: Map<String, Value>) -> Self {
        Self {
            dataset_index,
            raw,
            invalid_json_error: None,
        }
    }

    /// Placeholder record for a line that failed to decode.
    pub fn invalid(dataset_index: usize, error: String) -> Self {
        let mut raw = Map::new();
        raw.insert(
            "dialog_id".to_string(),
            Value::String(format!("invalid_json_line_{}", dataset_index)),
        );
        Self {
            dataset_index,
            raw,
            invalid_json_error: Some(error),
        }
    }

    /// The dialog id, synthesized from the dataset index when the field is
    /// absent, null, or empty.
    pub fn dialog_id(&self) -> String {
        match self.raw.get("dialog_id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("dialog_{}", self.dataset_index),
        }
    }

    pub fn turns(&self) -> &[Value] {
        self.raw
            .get("turns")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn profile_gt(&self) -> Option<&Map<String, Value>> {
        self.raw.get("profile_gt").and_then(Value::as_object)
    }

    pub fn blueprint(&self) -> Option<&Map<String, Value>> {
        self.raw.get("blueprint").and_then(Value::as_object)
    }

    pub fn scenario_type(&self) -> Option<String> {
        self.raw
            .get("scenario_type")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn difficulty(&self) -> Option<String> {
        self.raw
            .get("difficulty")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value;

use memeval_types::{DatasetRecord, Result};

/// Read a dataset file as line-delimited JSON objects.
///
/// Blank lines are skipped but still count toward the 1-based line number
/// attached to each record. A line that fails to decode as a JSON object is
/// quarantined as a placeholder record instead of aborting the load; it will
/// surface downstream as a dialog skipped with reason `invalid_json`.
pub fn load_dataset_jsonl(path: &Path) -> Result<Vec<DatasetRecord>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut line_no = 0usize;
    for line in reader.lines() {
        let line = line?;
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => records.push(DatasetRecord::new(line_no, map)),
            Ok(_) => records.push(DatasetRecord::invalid(
                line_no,
                "expected a JSON object".to_string(),
            )),
            Err(err) => records.push(DatasetRecord::invalid(line_no, err.to_string())),
        }
    }
    Ok(records)
}

use serde_json::{Map, Value};

use memeval_types::{DatasetRecord, SkipReason};

use crate::align::align_turn_pairs;

/// Replace missing or wrongly-typed `turns`/`profile_gt`/`blueprint` with
/// empty defaults of the expected shape, so later stages can index into them
/// without re-checking types.
pub fn normalize_record(record: &mut DatasetRecord) {
    if !record
        .raw
        .get("turns")
        .map(Value::is_array)
        .unwrap_or(false)
    {
        record
            .raw
            .insert("turns".to_string(), Value::Array(Vec::new()));
    }
    for field in ["profile_gt", "blueprint"] {
        if !record.raw.get(field).map(Value::is_object).unwrap_or(false) {
            record
                .raw
                .insert(field.to_string(), Value::Object(Map::new()));
        }
    }
}

/// Classify a dialog as replayable or skipped.
///
/// Checks run in a fixed order and the first failure wins: quarantined JSON,
/// missing/empty turns, missing profile, an alignment that produces zero
/// pairs, and finally the absence of any pair carrying a `turn_tags`
/// mapping.
pub fn classify_validity(record: &DatasetRecord) -> (bool, Option<SkipReason>) {
    if record.invalid_json_error.is_some() {
        return (false, Some(SkipReason::InvalidJson));
    }

    let turns = match record.raw.get("turns").and_then(Value::as_array) {
        Some(turns) if !turns.is_empty() => turns,
        _ => return (false, Some(SkipReason::MissingTurns)),
    };
    if record.profile_gt().is_none() {
        return (false, Some(SkipReason::MissingProfileGt));
    }

    let pairs = align_turn_pairs(turns);
    if pairs.is_empty() {
        return (false, Some(SkipReason::InvalidTurnSequence));
    }
    if !pairs.iter().any(|p| p.tags().is_some()) {
        return (false, Some(SkipReason::MissingGtTags));
    }

    (true, None)
}

use serde_json::Value;

use memeval_types::{value_to_string, TurnPair};

/// Pair user utterances with the next assistant utterance.
///
/// Scans the raw turn list in order: each user turn pairs with the nearest
/// following assistant turn, skipping whatever sits in between. A trailing
/// user turn with no assistant reply is dropped. `turn_pair_id` starts at 1
/// in emission order; absolute indices into the raw list are recorded so
/// history references stay resolvable.
pub fn align_turn_pairs(turns: &[Value]) -> Vec<TurnPair> {
    let mut pairs: Vec<TurnPair> = Vec::new();
    let mut i = 0;
    while i < turns.len() {
        if role_of(&turns[i]) != Some("user") {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < turns.len() && role_of(&turns[j]) != Some("assistant") {
            j += 1;
        }
        if j >= turns.len() {
            break;
        }

        let assistant = &turns[j];
        pairs.push(TurnPair {
            turn_pair_id: pairs.len() as u32 + 1,
            user_turn_abs_idx: i,
            gt_assistant_abs_idx: j,
            user_text: text_of(&turns[i]),
            gt_assistant_text: text_of(assistant),
            gt_turn_tags: assistant
                .get("turn_tags")
                .filter(|tags| tags.is_object())
                .cloned(),
        });
        i = j + 1;
    }
    pairs
}

fn role_of(turn: &Value) -> Option<&str> {
    turn.get("role").and_then(Value::as_str)
}

fn text_of(turn: &Value) -> String {
    turn.get("text").map(value_to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turns(value: Value) -> Vec<Value> {
        value.as_array().unwrap().clone()
    }

    #[test]
    fn test_simple_alternation() {
        let turns = turns(json!([
            {"role": "user", "text": "q1"},
            {"role": "assistant", "text": "a1"},
            {"role": "user", "text": "q2"},
            {"role": "assistant", "text": "a2"}
        ]));
        let pairs = align_turn_pairs(&turns);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].turn_pair_id, 1);
        assert_eq!(pairs[1].turn_pair_id, 2);
        assert_eq!(pairs[0].user_text, "q1");
        assert_eq!(pairs[0].gt_assistant_text, "a1");
        assert_eq!(pairs[1].user_turn_abs_idx, 2);
        assert_eq!(pairs[1].gt_assistant_abs_idx, 3);
    }

    #[test]
    fn test_intermediate_entries_are_skipped() {
        let turns = turns(json!([
            {"role": "user", "text": "q1"},
            {"role": "system", "text": "note"},
            {"role": "tool", "text": "output"},
            {"role": "assistant", "text": "a1"}
        ]));
        let pairs = align_turn_pairs(&turns);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].gt_assistant_abs_idx, 3);
    }

    #[test]
    fn test_trailing_user_turn_is_dropped() {
        let turns = turns(json!([
            {"role": "user", "text": "q1"},
            {"role": "assistant", "text": "a1"},
            {"role": "user", "text": "dangling"}
        ]));
        let pairs = align_turn_pairs(&turns);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_consecutive_user_turns_pair_with_first() {
        let turns = turns(json!([
            {"role": "user", "text": "q1"},
            {"role": "user", "text": "q2"},
            {"role": "assistant", "text": "a1"}
        ]));
        let pairs = align_turn_pairs(&turns);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].user_text, "q1");
        assert_eq!(pairs[0].gt_assistant_abs_idx, 2);
    }

    #[test]
    fn test_tags_kept_only_when_object() {
        let turns = turns(json!([
            {"role": "user", "text": "q1"},
            {"role": "assistant", "text": "a1", "turn_tags": {"compliance_label_gt": "compliant"}},
            {"role": "user", "text": "q2"},
            {"role": "assistant", "text": "a2", "turn_tags": ["not", "a", "mapping"]}
        ]));
        let pairs = align_turn_pairs(&turns);
        assert!(pairs[0].gt_turn_tags.is_some());
        assert!(pairs[1].gt_turn_tags.is_none());
    }

    #[test]
    fn test_null_entries_and_missing_text_are_tolerated() {
        let turns = turns(json!([
            null,
            {"role": "user"},
            {"role": "assistant"}
        ]));
        let pairs = align_turn_pairs(&turns);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].user_text, "");
        assert_eq!(pairs[0].gt_assistant_text, "");
    }

    #[test]
    fn test_no_user_turns_yields_no_pairs() {
        let turns = turns(json!([{"role": "assistant", "text": "a"}]));
        assert!(align_turn_pairs(&turns).is_empty());
    }
}

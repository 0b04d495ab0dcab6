use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use memeval_dataset::align_turn_pairs;
use memeval_types::{
    is_truthy, value_to_string, ComplianceLabel, KeyResolver, MemorySource, ResolvedKey,
    TurnTrace,
};

use crate::keywords::{
    keyword_list, CONSTRAINT_KEYWORD_RULES, NEGATION_GUARDS, RISK_PRED_KEYWORDS,
    RISK_TAG_ALIASES, RUBRIC_KEYWORDS, SEVERE_VIOLATION_TYPES,
};

static PROFILE_LIST_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^profile_gt\.(constraints_gt|preferences_gt)\[(\d+)\]$").expect("valid regex")
});

static HISTORY_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^history_turn_index:(\d+)$").expect("valid regex"));

static DRAWDOWN_LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"最大回撤<\s*(\d+)%").expect("valid regex"));

static PERCENT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*%").expect("valid regex"));

/// Resolve one `memory_required_keys_gt` reference to the text it points at.
///
/// Supported shapes: scalar profile fields, indexed constraint/preference
/// entries, and `history_turn_index:<n>` into the aligned user-turn sequence
/// of `raw_turns`. When a history index is out of range for the aligned
/// sequence it falls back to the 1-based absolute index into the raw turn
/// list; that fallback is load-bearing for existing datasets and pinned by a
/// test below.
pub fn resolve_memory_required_key(
    key: &str,
    profile_gt: Option<&Map<String, Value>>,
    raw_turns: &[Value],
) -> ResolvedKey {
    if matches!(
        key,
        "profile_gt.risk_level_gt" | "profile_gt.horizon_gt" | "profile_gt.liquidity_need_gt"
    ) {
        let field = key.rsplit('.').next().unwrap_or(key);
        if let Some(value) = profile_gt.and_then(|p| p.get(field))
            && !value.is_null()
        {
            return ResolvedKey::resolved(key, value_to_string(value), KeyResolver::ProfileField);
        }
        return ResolvedKey::unresolved(key);
    }

    if let Some(caps) = PROFILE_LIST_KEY_RE.captures(key) {
        let field = &caps[1];
        let idx: usize = match caps[2].parse() {
            Ok(idx) => idx,
            Err(_) => return ResolvedKey::unresolved(key),
        };
        let resolver = if field == "constraints_gt" {
            KeyResolver::ConstraintsGt
        } else {
            KeyResolver::PreferencesGt
        };
        if let Some(item) = profile_gt
            .and_then(|p| p.get(field))
            .and_then(Value::as_array)
            .and_then(|arr| arr.get(idx))
        {
            return ResolvedKey::resolved(key, value_to_string(item), resolver);
        }
        return ResolvedKey::unresolved(key);
    }

    if let Some(caps) = HISTORY_KEY_RE.captures(key) {
        let n: usize = match caps[1].parse() {
            Ok(n) => n,
            Err(_) => return ResolvedKey::unresolved(key),
        };
        let aligned = align_turn_pairs(raw_turns);
        if n >= 1 && n <= aligned.len() {
            return ResolvedKey::resolved(
                key,
                aligned[n - 1].user_text.clone(),
                KeyResolver::HistoryUserTurn,
            );
        }
        if n >= 1
            && n <= raw_turns.len()
            && let Some(text) = raw_turns[n - 1].get("text")
            && is_truthy(text)
        {
            return ResolvedKey::resolved(key, value_to_string(text), KeyResolver::HistoryAbsTurn);
        }
        return ResolvedKey::unresolved(key);
    }

    ResolvedKey::unresolved(key)
}

/// Search for a resolved target text across the three recall contexts of a
/// turn. An empty target never matches.
pub fn detect_key_hit_sources(target_text: &str, turn: &TurnTrace) -> Vec<MemorySource> {
    if target_text.is_empty() {
        return Vec::new();
    }
    let Some(recall) = turn.recall.as_ref() else {
        return Vec::new();
    };

    let mut sources = Vec::new();
    if recall.short_term_context.contains(target_text) {
        sources.push(MemorySource::ShortTerm);
    }
    let long_term_text = recall
        .items
        .iter()
        .map(|item| item.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if long_term_text.contains(target_text) {
        sources.push(MemorySource::LongTerm);
    }
    if recall.profile_context.contains(target_text) {
        sources.push(MemorySource::Profile);
    }
    sources
}

fn has_negation_guard(text: &str) -> bool {
    NEGATION_GUARDS.iter().any(|guard| text.contains(guard))
}

/// Rule-based check for a prediction contradicting a user constraint.
/// Saturates at 1: any single contradiction marks the turn.
pub fn detect_constraint_contradiction(pred_text: &str, constraints: &[String]) -> u8 {
    if pred_text.is_empty() || constraints.is_empty() {
        return 0;
    }

    for constraint in constraints {
        if constraint.starts_with("最大回撤<")
            && let Some(caps) = DRAWDOWN_LIMIT_RE.captures(constraint)
            && pred_text.contains("回撤")
        {
            let threshold: u64 = match caps[1].parse() {
                Ok(t) => t,
                Err(_) => continue,
            };
            let exceeded = PERCENT_TOKEN_RE
                .captures_iter(pred_text)
                .filter_map(|c| c[1].parse::<u64>().ok())
                .any(|value| value > threshold);
            if exceeded {
                return 1;
            }
        }

        if let Some(keywords) = keyword_list(CONSTRAINT_KEYWORD_RULES, constraint)
            && keywords.iter().any(|k| pred_text.contains(k))
            && !has_negation_guard(pred_text)
        {
            return 1;
        }
    }
    0
}

/// Canonicalize one required risk tag. Unknown tags are kept, lowercased,
/// so novel dataset tags still flow through as opaque requirements.
pub fn normalize_risk_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.is_empty() {
        return String::new();
    }
    for (canonical, aliases) in RISK_TAG_ALIASES {
        if tag == *canonical || aliases.contains(&tag) {
            return (*canonical).to_string();
        }
    }
    tag.to_lowercase()
}

/// Extract the canonical risk tags a prediction expresses, sorted and
/// deduplicated.
pub fn extract_pred_risk_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = RISK_PRED_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(canonical, _)| (*canonical).to_string())
        .collect();
    tags.sort();
    tags
}

/// Predict the compliance label for a turn from forbidden-phrase hits and
/// the observer's compliance verdict.
pub fn infer_compliance_label(turn: &TurnTrace, forbidden_hits: &[String]) -> ComplianceLabel {
    if !forbidden_hits.is_empty() {
        return ComplianceLabel::SevereViolation;
    }

    let violations = turn
        .compliance
        .as_ref()
        .map(|c| c.violations.as_slice())
        .unwrap_or(&[]);
    if violations.is_empty() {
        return ComplianceLabel::Compliant;
    }

    for violation in violations {
        let vtype = violation.get("type").and_then(Value::as_str).unwrap_or("");
        let severity = violation
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or("");
        if SEVERE_VIOLATION_TYPES.contains(&vtype) || severity.eq_ignore_ascii_case("high") {
            return ComplianceLabel::SevereViolation;
        }
    }
    ComplianceLabel::MinorViolation
}

/// Normalize a ground-truth compliance label; anything outside the three
/// canonical values counts as compliant.
pub fn normalize_compliance_label(label: Option<&Value>) -> ComplianceLabel {
    label
        .map(value_to_string)
        .as_deref()
        .and_then(ComplianceLabel::parse)
        .unwrap_or(ComplianceLabel::Compliant)
}

/// Which rubric items the prediction covers. Items without a keyword list
/// match on the item text itself.
pub fn detect_rubric_hits(rubric_required: &[String], pred_text: &str) -> Vec<String> {
    rubric_required
        .iter()
        .filter(|item| {
            match keyword_list(RUBRIC_KEYWORDS, item) {
                Some(keywords) => keywords.iter().any(|k| pred_text.contains(k)),
                None => pred_text.contains(item.as_str()),
            }
        })
        .cloned()
        .collect()
}

/// Deterministic 1-5 score from rubric coverage, rounded to two decimals.
pub fn heuristic_judge_score(required: usize, hits: usize) -> Option<f64> {
    if required == 0 {
        return None;
    }
    let hit_rate = hits as f64 / required as f64;
    Some((100.0 * (1.0 + 4.0 * hit_rate)).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memeval_types::{RecallItem, RecallTrace, TurnStatus};
    use serde_json::json;

    fn profile() -> Map<String, Value> {
        json!({
            "risk_level_gt": "稳健",
            "horizon_gt": "2年以上",
            "liquidity_need_gt": "中",
            "constraints_gt": ["不使用杠杆", "最大回撤<10%"],
            "preferences_gt": ["指数基金"]
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn raw_turns() -> Vec<Value> {
        json!([
            {"role": "user", "text": "我偏好稳健配置"},
            {"role": "assistant", "text": "明白"},
            {"role": "user", "text": "请推荐指数基金"},
            {"role": "assistant", "text": "好的"}
        ])
        .as_array()
        .cloned()
        .unwrap()
    }

    fn turn_with_recall(recall: Option<RecallTrace>) -> TurnTrace {
        TurnTrace {
            turn_pair_id: 1,
            user_turn_abs_idx: 0,
            gt_assistant_abs_idx: 1,
            user_text: String::new(),
            gt_assistant_text: String::new(),
            gt_turn_tags: json!({}),
            pred_assistant_text: String::new(),
            latency_ms: 0.0,
            turn_status: TurnStatus::Ok,
            error: None,
            recall,
            tools: Vec::new(),
            compliance: None,
            profile_snapshot: None,
        }
    }

    #[test]
    fn resolves_profile_scalar_fields() {
        let profile = profile();
        let resolved =
            resolve_memory_required_key("profile_gt.risk_level_gt", Some(&profile), &[]);
        assert!(resolved.resolvable);
        assert_eq!(resolved.target_text.as_deref(), Some("稳健"));
        assert_eq!(resolved.resolver, KeyResolver::ProfileField);
    }

    #[test]
    fn resolves_indexed_constraints_and_preferences() {
        let profile = profile();
        let resolved =
            resolve_memory_required_key("profile_gt.constraints_gt[1]", Some(&profile), &[]);
        assert_eq!(resolved.target_text.as_deref(), Some("最大回撤<10%"));
        assert_eq!(resolved.resolver, KeyResolver::ConstraintsGt);

        let resolved =
            resolve_memory_required_key("profile_gt.preferences_gt[0]", Some(&profile), &[]);
        assert_eq!(resolved.resolver, KeyResolver::PreferencesGt);

        let out_of_range =
            resolve_memory_required_key("profile_gt.constraints_gt[9]", Some(&profile), &[]);
        assert!(!out_of_range.resolvable);
    }

    #[test]
    fn resolves_history_key_against_aligned_user_turns() {
        let turns = raw_turns();
        let resolved = resolve_memory_required_key("history_turn_index:2", None, &turns);
        assert!(resolved.resolvable);
        assert_eq!(resolved.target_text.as_deref(), Some("请推荐指数基金"));
        assert_eq!(resolved.resolver, KeyResolver::HistoryUserTurn);
    }

    #[test]
    fn resolves_history_key_via_absolute_fallback() {
        // Index 3 exceeds the two aligned user turns but lands on the raw
        // turn list; the resolver deliberately falls back to that absolute
        // position instead of reporting the key unresolvable.
        let turns = raw_turns();
        let resolved = resolve_memory_required_key("history_turn_index:3", None, &turns);
        assert!(resolved.resolvable);
        assert_eq!(resolved.target_text.as_deref(), Some("请推荐指数基金"));
        assert_eq!(resolved.resolver, KeyResolver::HistoryAbsTurn);

        let beyond = resolve_memory_required_key("history_turn_index:9", None, &turns);
        assert!(!beyond.resolvable);
    }

    #[test]
    fn unknown_keys_stay_unresolved() {
        let resolved = resolve_memory_required_key("something_else", None, &[]);
        assert!(!resolved.resolvable);
        assert_eq!(resolved.resolver, KeyResolver::Unresolved);
    }

    #[test]
    fn detects_hits_across_all_three_sources() {
        let recall = RecallTrace {
            short_term_context: "用户说过 偏好稳健".to_string(),
            profile_context: "风险偏好: 稳健".to_string(),
            items: vec![RecallItem {
                content: "历史记录: 偏好稳健 配置".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let turn = turn_with_recall(Some(recall));
        let sources = detect_key_hit_sources("偏好稳健", &turn);
        assert_eq!(
            sources,
            vec![
                MemorySource::ShortTerm,
                MemorySource::LongTerm,
                MemorySource::Profile
            ]
        );
    }

    #[test]
    fn empty_target_and_missing_recall_never_hit() {
        let turn = turn_with_recall(None);
        assert!(detect_key_hit_sources("稳健", &turn).is_empty());
        let turn = turn_with_recall(Some(RecallTrace::default()));
        assert!(detect_key_hit_sources("", &turn).is_empty());
    }

    #[test]
    fn drawdown_constraint_contradiction() {
        let constraints = vec!["最大回撤<10%".to_string()];
        assert_eq!(
            detect_constraint_contradiction("回撤可能达到15%", &constraints),
            1
        );
        assert_eq!(
            detect_constraint_contradiction("回撤控制在8%以内", &constraints),
            0
        );
        // Percent tokens alone do not trigger without the drawdown word.
        assert_eq!(
            detect_constraint_contradiction("收益预计15%", &constraints),
            0
        );
    }

    #[test]
    fn keyword_constraint_contradiction_respects_negation_guard() {
        let constraints = vec!["不使用杠杆".to_string()];
        assert_eq!(
            detect_constraint_contradiction("可以适当加杠杆提高收益", &constraints),
            1
        );
        assert_eq!(
            detect_constraint_contradiction("不建议使用杠杆", &constraints),
            0
        );
        assert_eq!(detect_constraint_contradiction("", &constraints), 0);
    }

    #[test]
    fn normalizes_risk_tags_through_aliases() {
        assert_eq!(normalize_risk_tag("波动"), "volatility_risk");
        assert_eq!(normalize_risk_tag("不保证收益"), "no_guaranteed_return");
        assert_eq!(normalize_risk_tag("volatility_risk"), "volatility_risk");
        assert_eq!(normalize_risk_tag("Custom_Tag"), "custom_tag");
        assert_eq!(normalize_risk_tag("  "), "");
    }

    #[test]
    fn extracts_pred_risk_tags_sorted() {
        let tags = extract_pred_risk_tags("市场存在不确定性，不构成买卖建议，不保证收益");
        assert_eq!(
            tags,
            vec![
                "market_uncertainty",
                "no_guaranteed_return",
                "not_buy_sell_advice"
            ]
        );
        assert!(extract_pred_risk_tags("没有任何相关内容").is_empty());
    }

    #[test]
    fn compliance_label_inference() {
        let mut turn = turn_with_recall(None);
        assert_eq!(
            infer_compliance_label(&turn, &["保证收益".to_string()]),
            ComplianceLabel::SevereViolation
        );
        assert_eq!(
            infer_compliance_label(&turn, &[]),
            ComplianceLabel::Compliant
        );

        turn.compliance = Some(memeval_types::ComplianceTrace {
            violations: vec![json!({"type": "exaggeration", "severity": "low"})],
            ..Default::default()
        });
        assert_eq!(
            infer_compliance_label(&turn, &[]),
            ComplianceLabel::MinorViolation
        );

        turn.compliance = Some(memeval_types::ComplianceTrace {
            violations: vec![json!({"type": "promise_return", "severity": "low"})],
            ..Default::default()
        });
        assert_eq!(
            infer_compliance_label(&turn, &[]),
            ComplianceLabel::SevereViolation
        );

        turn.compliance = Some(memeval_types::ComplianceTrace {
            violations: vec![json!({"type": "other", "severity": "HIGH"})],
            ..Default::default()
        });
        assert_eq!(
            infer_compliance_label(&turn, &[]),
            ComplianceLabel::SevereViolation
        );
    }

    #[test]
    fn gt_label_normalization_defaults_to_compliant() {
        assert_eq!(
            normalize_compliance_label(Some(&json!("Severe_Violation"))),
            ComplianceLabel::SevereViolation
        );
        assert_eq!(
            normalize_compliance_label(Some(&json!("whatever"))),
            ComplianceLabel::Compliant
        );
        assert_eq!(normalize_compliance_label(None), ComplianceLabel::Compliant);
    }

    #[test]
    fn rubric_hits_and_judge_score() {
        let required = vec!["信息依据".to_string(), "边界声明".to_string()];
        let hits = detect_rubric_hits(&required, "根据财报数据，本内容仅供参考");
        assert_eq!(hits, required);

        let hits = detect_rubric_hits(&required, "根据财报数据");
        assert_eq!(hits, vec!["信息依据"]);

        // Unknown rubric items match on their own text.
        let custom = vec!["特殊条目".to_string()];
        assert_eq!(
            detect_rubric_hits(&custom, "回复包含特殊条目字样"),
            custom
        );

        assert_eq!(heuristic_judge_score(0, 0), None);
        assert_eq!(heuristic_judge_score(2, 1), Some(3.0));
        assert_eq!(heuristic_judge_score(3, 1), Some(2.33));
        assert_eq!(heuristic_judge_score(3, 3), Some(5.0));
    }
}

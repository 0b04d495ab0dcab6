//! Keyword and alias tables backing the deterministic metric heuristics.
//!
//! These are data, not algorithm: the rule set is expected to evolve as the
//! dataset grows, so everything lexical lives here and the detection code in
//! `resolve.rs` stays table-driven.

/// Surface forms of required risk-disclosure tags, mapped to canonical
/// codes. Ordered; the first matching entry wins during normalization.
pub const RISK_TAG_ALIASES: &[(&str, &[&str])] = &[
    ("volatility_risk", &["波动风险", "波动", "价格波动"]),
    ("no_guaranteed_return", &["不保证收益", "不保证本金", "不保本"]),
    (
        "market_uncertainty",
        &["市场不确定性", "市场存在不确定性", "不确定性"],
    ),
    ("suitability_match", &["适当性匹配", "风险匹配", "适当性"]),
    (
        "not_buy_sell_advice",
        &["不构成个股买卖建议", "不构成买卖建议"],
    ),
    ("not_investment_advice", &["不构成投资建议", "仅供参考"]),
    ("credit_risk", &["信用风险"]),
    ("liquidity_risk", &["流动性风险"]),
    ("interest_rate_risk", &["利率风险"]),
    (
        "past_performance_not_future",
        &["过往业绩不代表未来表现", "过往业绩不预示未来", "历史业绩不代表未来"],
    ),
    ("risk_disclosure_present", &["无明确风险提示"]),
];

/// Keywords that count as a prediction expressing each canonical risk tag.
pub const RISK_PRED_KEYWORDS: &[(&str, &[&str])] = &[
    ("volatility_risk", &["波动风险", "波动", "回撤"]),
    ("no_guaranteed_return", &["不保证收益", "不保证本金", "不保本"]),
    (
        "market_uncertainty",
        &["市场不确定性", "不确定性", "市场有风险"],
    ),
    ("suitability_match", &["适当性匹配", "风险承受能力", "匹配"]),
    (
        "not_buy_sell_advice",
        &["不构成个股买卖建议", "不构成买卖建议"],
    ),
    ("not_investment_advice", &["不构成投资建议", "仅供参考"]),
    ("credit_risk", &["信用风险", "违约风险"]),
    ("liquidity_risk", &["流动性风险", "变现"]),
    ("interest_rate_risk", &["利率风险", "利率上升"]),
    (
        "past_performance_not_future",
        &["过往业绩不代表未来", "历史业绩不代表未来", "过往业绩不预示未来"],
    ),
];

/// Keywords that count as a prediction covering each explainability rubric
/// item. Unknown items fall back to matching the item text itself.
pub const RUBRIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("信息依据", &["依据", "数据", "指标", "财报", "根据"]),
    ("风险收益平衡", &["风险", "收益", "回撤", "平衡"]),
    (
        "与画像匹配",
        &["风险偏好", "稳健", "保守", "进取", "约束", "您的"],
    ),
    ("方案比较维度", &["对比", "比较", "优劣", "方案", "维度"]),
    ("可执行步骤", &["步骤", "建议", "先", "然后", "1.", "2."]),
    (
        "边界声明",
        &["不构成", "仅供参考", "投资有风险", "不保证收益"],
    ),
];

/// Observer violation types that escalate straight to `severe_violation`.
pub const SEVERE_VIOLATION_TYPES: &[&str] =
    &["trading_advice", "promise_return", "guarantee", "insider"];

/// Fixed user-constraint strings and the keywords whose presence in a
/// prediction contradicts them (unless a negation guard is also present).
pub const CONSTRAINT_KEYWORD_RULES: &[(&str, &[&str])] = &[
    ("不使用杠杆", &["杠杆", "融资融券", "加杠杆"]),
    ("不做短线交易", &["短线", "日内", "频繁交易"]),
    ("不投分级基金", &["分级基金"]),
    ("不投海外市场", &["海外市场", "美股", "港股"]),
    ("不参与题材炒作", &["题材炒作", "追热点"]),
];

/// Words that neutralize a constraint keyword ("不建议使用杠杆" is advice
/// against, not a contradiction).
pub const NEGATION_GUARDS: &[&str] = &["不建议", "避免", "不要", "不应", "不宜", "谨慎"];

/// Surface forms of ground-truth and predicted risk levels.
pub const RISK_LEVEL_MAP: &[(&str, &str)] = &[
    ("保守", "low"),
    ("稳健", "medium"),
    ("进取", "high"),
    ("low", "low"),
    ("medium", "medium"),
    ("high", "high"),
];

/// Surface forms of investment horizons.
pub const HORIZON_MAP: &[(&str, &str)] = &[
    ("<=6月", "short"),
    ("6-24月", "medium"),
    ("2年以上", "long"),
    ("短期", "short"),
    ("中期", "medium"),
    ("长期", "long"),
    ("short", "short"),
    ("medium", "medium"),
    ("long", "long"),
];

/// Surface forms of liquidity needs.
pub const LIQUIDITY_MAP: &[(&str, &str)] = &[
    ("高", "high"),
    ("中", "medium"),
    ("低", "low"),
    ("high", "high"),
    ("medium", "medium"),
    ("low", "low"),
];

/// Text-inference keyword ladders for profile fields, tried in order; used
/// only when the agent never emitted a usable profile snapshot.
pub const RISK_TEXT_HINTS: &[(&[&str], &str)] = &[
    (&["保守", "低风险"], "low"),
    (&["稳健", "中风险"], "medium"),
    (&["进取", "高风险", "激进"], "high"),
];

pub const HORIZON_TEXT_HINTS: &[(&[&str], &str)] = &[
    (&["6月", "短期"], "short"),
    (&["6-24月", "1年", "2年内"], "medium"),
    (&["2年以上", "长期"], "long"),
];

pub const LIQUIDITY_TEXT_HINTS: &[(&[&str], &str)] = &[
    (&["高流动性", "随时需要用钱", "保留现金"], "high"),
    (&["流动性中等"], "medium"),
    (&["低流动性"], "low"),
];

pub fn lookup(table: &[(&'static str, &'static str)], value: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(surface, _)| *surface == value)
        .map(|(_, canonical)| *canonical)
}

pub fn keyword_list(
    table: &[(&'static str, &'static [&'static str])],
    key: &str,
) -> Option<&'static [&'static str]> {
    table
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, keywords)| *keywords)
}

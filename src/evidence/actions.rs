//! Action candidate derivation
//!
//! An ordered insight-set→action table with numeric priorities. Declared
//! risk appetite nudges safety-sensitive priorities; ties break lexically
//! by action_id; two generic safe actions pad the list so the 2–4 action
//! contract always holds.

use crate::models::{ActionCandidate, Insight, RiskAppetite};
use serde_json::json;
use std::collections::BTreeMap;

const MIN_ACTIONS: usize = 2;
const MAX_ACTIONS: usize = 4;

/// Priority shift for safety-sensitive actions per declared appetite.
const APPETITE_SHIFT: u8 = 5;

struct ActionRule {
    action_id: &'static str,
    action_type: &'static str,
    base_priority: u8,
    /// Insight kinds that must all be present for the rule to fire.
    requires: &'static [&'static str],
    /// Safety-sensitive actions become more urgent for conservative
    /// appetites and less urgent for aggressive ones.
    risk_sensitive: bool,
    params: fn() -> BTreeMap<String, serde_json::Value>,
}

fn no_params() -> BTreeMap<String, serde_json::Value> {
    BTreeMap::new()
}

const ACTION_RULES: &[ActionRule] = &[
    ActionRule {
        action_id: "act.reduce_discretionary_spend",
        action_type: "spend_adjustment",
        base_priority: 10,
        requires: &["cashflow_pressure"],
        risk_sensitive: true,
        params: || {
            let mut p = BTreeMap::new();
            p.insert("review_window_days".to_string(), json!(30));
            p
        },
    },
    ActionRule {
        action_id: "act.review_flagged_transactions",
        action_type: "security_review",
        base_priority: 12,
        requires: &["anomaly_alert"],
        risk_sensitive: false,
        params: no_params,
    },
    ActionRule {
        action_id: "act.rebuild_emergency_buffer",
        action_type: "savings_adjustment",
        base_priority: 20,
        requires: &["cashflow_pressure"],
        risk_sensitive: true,
        params: || {
            let mut p = BTreeMap::new();
            p.insert("target_months".to_string(), json!(3));
            p
        },
    },
    ActionRule {
        action_id: "act.adjust_goal_timeline",
        action_type: "goal_adjustment",
        base_priority: 25,
        requires: &["goal_at_risk"],
        risk_sensitive: false,
        params: || {
            let mut p = BTreeMap::new();
            p.insert("extend_months".to_string(), json!(6));
            p
        },
    },
    ActionRule {
        action_id: "act.trim_recurring_commitments",
        action_type: "spend_adjustment",
        base_priority: 30,
        requires: &["recurring_load"],
        risk_sensitive: false,
        params: no_params,
    },
    ActionRule {
        action_id: "act.apply_jar_allocation",
        action_type: "allocation",
        base_priority: 35,
        requires: &["allocation_available"],
        risk_sensitive: false,
        params: no_params,
    },
    ActionRule {
        action_id: "act.stress_test_plan",
        action_type: "planning",
        base_priority: 40,
        requires: &["scenario_tightens"],
        risk_sensitive: true,
        params: no_params,
    },
    ActionRule {
        action_id: "act.review_risk_posture",
        action_type: "risk_review",
        base_priority: 28,
        requires: &["elevated_risk_profile"],
        risk_sensitive: true,
        params: no_params,
    },
];

/// Generic safe actions appended when the rule table yields fewer than
/// two candidates.
const GENERIC_ACTIONS: &[(&str, &str, u8)] = &[
    ("act.periodic_review", "review", 60),
    ("act.data_refresh", "maintenance", 70),
];

fn adjusted_priority(base: u8, risk_sensitive: bool, appetite: Option<RiskAppetite>) -> u8 {
    if !risk_sensitive {
        return base;
    }
    match appetite {
        Some(RiskAppetite::Conservative) => base.saturating_sub(APPETITE_SHIFT).max(1),
        Some(RiskAppetite::Aggressive) => (base + APPETITE_SHIFT).min(99),
        _ => base,
    }
}

/// Derive the prioritized action list from the insight pack.
pub fn derive_actions(
    insights: &[Insight],
    risk_appetite: Option<RiskAppetite>,
) -> Vec<ActionCandidate> {
    let mut actions: Vec<ActionCandidate> = Vec::new();

    for rule in ACTION_RULES {
        let satisfied = rule
            .requires
            .iter()
            .all(|kind| insights.iter().any(|i| i.kind == *kind));
        if !satisfied {
            continue;
        }

        let supporting: Vec<String> = rule
            .requires
            .iter()
            .filter_map(|kind| {
                insights
                    .iter()
                    .find(|i| i.kind == *kind)
                    .map(|i| i.insight_id.clone())
            })
            .collect();

        actions.push(ActionCandidate {
            action_id: rule.action_id.to_string(),
            priority: adjusted_priority(rule.base_priority, rule.risk_sensitive, risk_appetite),
            action_type: rule.action_type.to_string(),
            params: (rule.params)(),
            supporting_insight_ids: supporting,
        });
    }

    for (action_id, action_type, priority) in GENERIC_ACTIONS {
        if actions.len() >= MIN_ACTIONS {
            break;
        }
        actions.push(ActionCandidate {
            action_id: action_id.to_string(),
            priority: *priority,
            action_type: action_type.to_string(),
            params: BTreeMap::new(),
            supporting_insight_ids: Vec::new(),
        });
    }

    actions.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.action_id.cmp(&b.action_id))
    });
    actions.truncate(MAX_ACTIONS);

    actions
}

//! Insight derivation
//!
//! An ordered condition→insight table over the extracted facts. Each
//! insight records exactly which fact ids justify it; nothing here is
//! ever fabricated or fetched.

use crate::models::{Fact, FactValue, Insight, Severity};

/// Runway below this many months counts as low.
const LOW_RUNWAY_MONTHS: f64 = 3.0;
/// Feasibility below this score puts a goal at risk.
const GOAL_AT_RISK_SCORE: f64 = 0.5;
/// Risk score at or above this is elevated.
const ELEVATED_RISK_SCORE: f64 = 0.7;
/// Recurring monthly commitments at or above this are heavy.
const HEAVY_RECURRING_TOTAL: f64 = 1000.0;

/// Read-only view over the fact pack with prefix lookup.
pub struct FactIndex<'a> {
    facts: &'a [Fact],
}

impl<'a> FactIndex<'a> {
    pub fn new(facts: &'a [Fact]) -> Self {
        Self { facts }
    }

    /// First fact whose id starts with the prefix (ids are hierarchical,
    /// so the timeframe segment stays out of rule conditions).
    pub fn by_prefix(&self, prefix: &str) -> Option<&'a Fact> {
        self.facts.iter().find(|f| f.fact_id.starts_with(prefix))
    }

    pub fn number_by_prefix(&self, prefix: &str) -> Option<(&'a str, f64)> {
        self.by_prefix(prefix).and_then(|f| match f.value {
            FactValue::Number(n) => Some((f.fact_id.as_str(), n)),
            FactValue::Integer(n) => Some((f.fact_id.as_str(), n as f64)),
            _ => None,
        })
    }

    pub fn text_by_prefix(&self, prefix: &str) -> Option<(&'a str, &'a str)> {
        self.by_prefix(prefix).and_then(|f| match &f.value {
            FactValue::Text(t) => Some((f.fact_id.as_str(), t.as_str())),
            _ => None,
        })
    }
}

struct RuleMatch {
    supporting: Vec<String>,
    message_seed: String,
}

struct InsightRule {
    kind: &'static str,
    severity: Severity,
    check: fn(&FactIndex) -> Option<RuleMatch>,
}

/// Ordered: earlier rules state stronger conditions; later rules guard
/// against re-stating what an earlier one already covered.
const INSIGHT_RULES: &[InsightRule] = &[
    InsightRule {
        kind: "cashflow_pressure",
        severity: Severity::High,
        check: |facts| {
            let (net_id, net) = facts.number_by_prefix("spend.net_cashflow")?;
            let (runway_id, runway) = facts.number_by_prefix("forecast.runway_months")?;
            if net < 0.0 && runway < LOW_RUNWAY_MONTHS {
                Some(RuleMatch {
                    supporting: vec![net_id.to_string(), runway_id.to_string()],
                    message_seed: format!(
                        "net cashflow {{fact:{}}} is negative and runway {{fact:{}}} months is short",
                        net_id, runway_id
                    ),
                })
            } else {
                None
            }
        },
    },
    InsightRule {
        kind: "negative_cashflow",
        severity: Severity::Medium,
        check: |facts| {
            let (net_id, net) = facts.number_by_prefix("spend.net_cashflow")?;
            if net >= 0.0 {
                return None;
            }
            // Covered by cashflow_pressure when runway is also short.
            if let Some((_, runway)) = facts.number_by_prefix("forecast.runway_months") {
                if runway < LOW_RUNWAY_MONTHS {
                    return None;
                }
            }
            Some(RuleMatch {
                supporting: vec![net_id.to_string()],
                message_seed: format!("net cashflow {{fact:{}}} is negative", net_id),
            })
        },
    },
    InsightRule {
        kind: "anomaly_alert",
        severity: Severity::High,
        check: |facts| {
            let (flags_id, flags) = facts.text_by_prefix("anomaly.flags")?;
            let mut supporting = vec![flags_id.to_string()];
            if let Some(count) = facts.by_prefix("anomaly.count") {
                supporting.push(count.fact_id.clone());
            }
            Some(RuleMatch {
                supporting,
                message_seed: format!(
                    "anomaly signals were raised ({{fact:{}}}: {})",
                    flags_id, flags
                ),
            })
        },
    },
    InsightRule {
        kind: "goal_at_risk",
        severity: Severity::High,
        check: |facts| {
            let (score_id, score) = facts.number_by_prefix("goal.feasibility_score")?;
            if score >= GOAL_AT_RISK_SCORE {
                return None;
            }
            let mut supporting = vec![score_id.to_string()];
            if let Some(gap) = facts.by_prefix("goal.gap_amount") {
                supporting.push(gap.fact_id.clone());
            }
            Some(RuleMatch {
                supporting,
                message_seed: format!(
                    "goal feasibility {{fact:{}}} is below a comfortable level",
                    score_id
                ),
            })
        },
    },
    InsightRule {
        kind: "elevated_risk_profile",
        severity: Severity::Medium,
        check: |facts| {
            let by_score = facts
                .number_by_prefix("risk.score")
                .filter(|(_, score)| *score >= ELEVATED_RISK_SCORE);
            let by_band = facts
                .text_by_prefix("risk.band")
                .filter(|(_, band)| matches!(*band, "elevated" | "high"));

            let (id, _) = by_score.or(by_band.map(|(id, _)| (id, 0.0)))?;
            let mut supporting = vec![id.to_string()];
            if let Some((band_id, _)) = facts.text_by_prefix("risk.band") {
                if band_id != id {
                    supporting.push(band_id.to_string());
                }
            }
            Some(RuleMatch {
                supporting,
                message_seed: format!("the risk profile {{fact:{}}} reads elevated", id),
            })
        },
    },
    InsightRule {
        kind: "recurring_load",
        severity: Severity::Medium,
        check: |facts| {
            let (total_id, total) = facts.number_by_prefix("recurring.monthly_total")?;
            if total < HEAVY_RECURRING_TOTAL {
                return None;
            }
            let mut supporting = vec![total_id.to_string()];
            if let Some(count) = facts.by_prefix("recurring.count") {
                supporting.push(count.fact_id.clone());
            }
            Some(RuleMatch {
                supporting,
                message_seed: format!(
                    "recurring commitments {{fact:{}}} are a heavy monthly load",
                    total_id
                ),
            })
        },
    },
    InsightRule {
        kind: "scenario_tightens",
        severity: Severity::Medium,
        check: |facts| {
            let (delta_id, delta) = facts.number_by_prefix("scenario.delta_net")?;
            if delta >= 0.0 {
                return None;
            }
            Some(RuleMatch {
                supporting: vec![delta_id.to_string()],
                message_seed: format!(
                    "the simulated change worsens net position by {{fact:{}}}",
                    delta_id
                ),
            })
        },
    },
    InsightRule {
        kind: "allocation_available",
        severity: Severity::Low,
        check: |facts| {
            let first = facts.by_prefix("allocation.")?;
            Some(RuleMatch {
                supporting: vec![first.fact_id.clone()],
                message_seed: format!(
                    "a jar allocation suggestion is available ({{fact:{}}})",
                    first.fact_id
                ),
            })
        },
    },
    InsightRule {
        kind: "stable_cashflow",
        severity: Severity::Low,
        check: |facts| {
            let (net_id, net) = facts.number_by_prefix("spend.net_cashflow")?;
            if net < 0.0 {
                return None;
            }
            Some(RuleMatch {
                supporting: vec![net_id.to_string()],
                message_seed: format!("net cashflow {{fact:{}}} is non-negative", net_id),
            })
        },
    },
];

/// Run the rule table in order. Each rule fires at most once, so insight
/// ids ("ins.<kind>") are unique per pack.
pub fn derive_insights(facts: &[Fact]) -> Vec<Insight> {
    let index = FactIndex::new(facts);
    let mut insights = Vec::new();

    for rule in INSIGHT_RULES {
        if let Some(m) = (rule.check)(&index) {
            insights.push(Insight {
                insight_id: format!("ins.{}", rule.kind),
                kind: rule.kind.to_string(),
                severity: rule.severity,
                message_seed: m.message_seed,
                supporting_fact_ids: m.supporting,
            });
        }
    }

    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::facts::extract_facts;
    use crate::tools;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn facts_for(outputs: &[(&str, serde_json::Value)]) -> Vec<Fact> {
        let map: BTreeMap<String, serde_json::Value> = outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        extract_facts(&map)
    }

    #[test]
    fn test_cashflow_pressure_needs_both_facts() {
        let facts = facts_for(&[
            (
                tools::SPEND_ANALYTICS,
                json!({ "net_cashflow": -300.0, "window_days": 30 }),
            ),
            (
                tools::CASHFLOW_FORECAST,
                json!({ "runway_months": 1.5 }),
            ),
        ]);

        let insights = derive_insights(&facts);
        let pressure = insights
            .iter()
            .find(|i| i.kind == "cashflow_pressure")
            .unwrap();
        assert_eq!(pressure.severity, Severity::High);
        assert_eq!(
            pressure.supporting_fact_ids,
            vec!["spend.net_cashflow.30d", "forecast.runway_months"]
        );
        // The weaker rule steps aside when pressure already fired.
        assert!(!insights.iter().any(|i| i.kind == "negative_cashflow"));
    }

    #[test]
    fn test_negative_cashflow_without_runway_fact() {
        let facts = facts_for(&[(
            tools::SPEND_ANALYTICS,
            json!({ "net_cashflow": -20.0, "window_days": 30 }),
        )]);

        let insights = derive_insights(&facts);
        assert!(insights.iter().any(|i| i.kind == "negative_cashflow"));
        assert!(!insights.iter().any(|i| i.kind == "cashflow_pressure"));
    }

    #[test]
    fn test_anomaly_alert_records_flag_fact() {
        let facts = facts_for(&[(
            tools::ANOMALY_SIGNALS,
            json!({ "flags": ["abnormal_spend"], "flag_count": 1 }),
        )]);

        let insights = derive_insights(&facts);
        let alert = insights.iter().find(|i| i.kind == "anomaly_alert").unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert!(alert
            .supporting_fact_ids
            .contains(&"anomaly.flags".to_string()));
        assert!(alert.message_seed.contains("{fact:anomaly.flags}"));
    }

    #[test]
    fn test_no_facts_no_insights() {
        assert!(derive_insights(&[]).is_empty());
    }

    #[test]
    fn test_insight_ids_unique() {
        let facts = facts_for(&[
            (
                tools::SPEND_ANALYTICS,
                json!({ "net_cashflow": -300.0, "window_days": 30 }),
            ),
            (tools::CASHFLOW_FORECAST, json!({ "runway_months": 1.0 })),
            (
                tools::ANOMALY_SIGNALS,
                json!({ "flags": ["abnormal_spend"] }),
            ),
        ]);
        let insights = derive_insights(&facts);
        let mut ids: Vec<&str> = insights.iter().map(|i| i.insight_id.as_str()).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(before, ids.len());
    }
}

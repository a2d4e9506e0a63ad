//! Fact extraction
//!
//! Each tool's output maps to zero or more typed facts via a fixed
//! per-tool schema. Unknown or missing sub-fields are omitted, never
//! defaulted, so no fact ever carries a fabricated-looking value.

use crate::models::{Fact, FactValue};
use crate::tools;
use serde_json::Value;
use std::collections::BTreeMap;

type FactExtractor = fn(&Value) -> Vec<Fact>;

/// Fixed per-tool extraction schemas, one entry per documented tool.
const EXTRACTORS: &[(&str, FactExtractor)] = &[
    (tools::SPEND_ANALYTICS, extract_spend),
    (tools::ANOMALY_SIGNALS, extract_anomalies),
    (tools::CASHFLOW_FORECAST, extract_forecast),
    (tools::RISK_PROFILE, extract_risk_profile),
    (tools::GOAL_FEASIBILITY, extract_goal),
    (tools::RECURRING_DETECT, extract_recurring),
    (tools::JAR_ALLOCATION, extract_allocation),
    (tools::WHAT_IF_SCENARIO, extract_scenario),
    (tools::SERVICE_CATALOG, extract_services),
    (tools::SUITABILITY_GUARD, extract_suitability),
];

/// Extract every fact the settled tool outputs support, in a stable
/// order (schema order, then field order within each schema).
pub fn extract_facts(tool_outputs: &BTreeMap<String, Value>) -> Vec<Fact> {
    let mut facts = Vec::new();
    for (tool_name, extractor) in EXTRACTORS {
        if let Some(output) = tool_outputs.get(*tool_name) {
            facts.extend(extractor(output));
        }
    }
    facts
}

//
// ================= Builders =================
//

fn amount_text(v: f64) -> String {
    format!("{:.2}", v)
}

fn number_fact(
    fact_id: String,
    label: &str,
    value: f64,
    value_text: String,
    unit: Option<&str>,
    timeframe: Option<String>,
    source_tool: &str,
    source_path: &str,
) -> Fact {
    Fact {
        fact_id,
        label: label.to_string(),
        value: FactValue::Number(value),
        value_text,
        unit: unit.map(|u| u.to_string()),
        timeframe,
        source_tool: source_tool.to_string(),
        source_path: source_path.to_string(),
    }
}

fn integer_fact(
    fact_id: String,
    label: &str,
    value: i64,
    unit: Option<&str>,
    timeframe: Option<String>,
    source_tool: &str,
    source_path: &str,
) -> Fact {
    Fact {
        fact_id,
        label: label.to_string(),
        value: FactValue::Integer(value),
        value_text: value.to_string(),
        unit: unit.map(|u| u.to_string()),
        timeframe,
        source_tool: source_tool.to_string(),
        source_path: source_path.to_string(),
    }
}

fn text_fact(
    fact_id: String,
    label: &str,
    value: &str,
    source_tool: &str,
    source_path: &str,
) -> Fact {
    Fact {
        fact_id,
        label: label.to_string(),
        value: FactValue::Text(value.to_string()),
        value_text: value.to_string(),
        unit: None,
        timeframe: None,
        source_tool: source_tool.to_string(),
        source_path: source_path.to_string(),
    }
}

/// Window suffix for hierarchical fact ids, e.g. "30d". Absent when the
/// tool did not report its window.
fn day_window(output: &Value, field: &str) -> (String, Option<String>) {
    match output.get(field).and_then(Value::as_i64) {
        Some(days) => (format!(".{}d", days), Some(format!("{}d", days))),
        None => (String::new(), None),
    }
}

fn month_window(output: &Value, field: &str) -> (String, Option<String>) {
    match output.get(field).and_then(Value::as_i64) {
        Some(months) => (format!(".{}m", months), Some(format!("{}m", months))),
        None => (String::new(), None),
    }
}

//
// ================= Per-tool Schemas =================
//

fn extract_spend(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();
    let (suffix, timeframe) = day_window(output, "window_days");

    if let Some(total) = output.get("total_spend").and_then(Value::as_f64) {
        facts.push(number_fact(
            format!("spend.total{}", suffix),
            "Total spend",
            total,
            amount_text(total),
            Some("currency"),
            timeframe.clone(),
            tools::SPEND_ANALYTICS,
            "/total_spend",
        ));
    }
    if let Some(net) = output.get("net_cashflow").and_then(Value::as_f64) {
        facts.push(number_fact(
            format!("spend.net_cashflow{}", suffix),
            "Net cashflow",
            net,
            amount_text(net),
            Some("currency"),
            timeframe.clone(),
            tools::SPEND_ANALYTICS,
            "/net_cashflow",
        ));
    }
    if let Some(category) = output.get("top_category").and_then(Value::as_str) {
        facts.push(text_fact(
            format!("spend.top_category{}", suffix),
            "Top spend category",
            category,
            tools::SPEND_ANALYTICS,
            "/top_category",
        ));
    }

    facts
}

fn extract_anomalies(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();

    if let Some(flags) = output.get("flags").and_then(Value::as_array) {
        let names: Vec<&str> = flags.iter().filter_map(Value::as_str).collect();
        if !names.is_empty() {
            facts.push(text_fact(
                "anomaly.flags".to_string(),
                "Anomaly flags",
                &names.join(", "),
                tools::ANOMALY_SIGNALS,
                "/flags",
            ));
        }
    }
    if let Some(count) = output.get("flag_count").and_then(Value::as_i64) {
        facts.push(integer_fact(
            "anomaly.count".to_string(),
            "Anomaly flag count",
            count,
            None,
            None,
            tools::ANOMALY_SIGNALS,
            "/flag_count",
        ));
    }

    facts
}

fn extract_forecast(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();
    let (suffix, timeframe) = day_window(output, "horizon_days");

    if let Some(net) = output.get("projected_net").and_then(Value::as_f64) {
        facts.push(number_fact(
            format!("forecast.net{}", suffix),
            "Projected net cashflow",
            net,
            amount_text(net),
            Some("currency"),
            timeframe,
            tools::CASHFLOW_FORECAST,
            "/projected_net",
        ));
    }
    if let Some(runway) = output.get("runway_months").and_then(Value::as_f64) {
        facts.push(number_fact(
            "forecast.runway_months".to_string(),
            "Cash runway",
            runway,
            format!("{:.1}", runway),
            Some("months"),
            None,
            tools::CASHFLOW_FORECAST,
            "/runway_months",
        ));
    }

    facts
}

fn extract_risk_profile(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();

    if let Some(score) = output.get("score").and_then(Value::as_f64) {
        facts.push(number_fact(
            "risk.score".to_string(),
            "Risk score",
            score,
            format!("{:.2}", score),
            None,
            None,
            tools::RISK_PROFILE,
            "/score",
        ));
    }
    if let Some(band) = output.get("band").and_then(Value::as_str) {
        facts.push(text_fact(
            "risk.band".to_string(),
            "Risk band",
            band,
            tools::RISK_PROFILE,
            "/band",
        ));
    }

    facts
}

fn extract_goal(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();

    if let Some(score) = output.get("feasibility_score").and_then(Value::as_f64) {
        facts.push(number_fact(
            "goal.feasibility_score".to_string(),
            "Goal feasibility",
            score,
            format!("{:.2}", score),
            None,
            None,
            tools::GOAL_FEASIBILITY,
            "/feasibility_score",
        ));
    }
    if let Some(gap) = output.get("gap_amount").and_then(Value::as_f64) {
        facts.push(number_fact(
            "goal.gap_amount".to_string(),
            "Goal funding gap",
            gap,
            amount_text(gap),
            Some("currency"),
            None,
            tools::GOAL_FEASIBILITY,
            "/gap_amount",
        ));
    }
    if let Some(months) = output.get("target_months").and_then(Value::as_i64) {
        facts.push(integer_fact(
            "goal.target_months".to_string(),
            "Goal horizon",
            months,
            Some("months"),
            None,
            tools::GOAL_FEASIBILITY,
            "/target_months",
        ));
    }

    facts
}

fn extract_recurring(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();

    if let Some(count) = output.get("recurring_count").and_then(Value::as_i64) {
        facts.push(integer_fact(
            "recurring.count".to_string(),
            "Recurring flows",
            count,
            None,
            None,
            tools::RECURRING_DETECT,
            "/recurring_count",
        ));
    }
    if let Some(total) = output.get("monthly_total").and_then(Value::as_f64) {
        facts.push(number_fact(
            "recurring.monthly_total".to_string(),
            "Recurring monthly total",
            total,
            amount_text(total),
            Some("currency"),
            None,
            tools::RECURRING_DETECT,
            "/monthly_total",
        ));
    }

    facts
}

fn extract_allocation(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();

    if let Some(jars) = output.get("jars").and_then(Value::as_object) {
        // BTreeMap-style iteration keeps jar facts in a stable order.
        let mut entries: Vec<(&String, &Value)> = jars.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (name, pct) in entries {
            if let Some(pct) = pct.as_i64() {
                facts.push(integer_fact(
                    format!("allocation.{}.pct", name),
                    &format!("Suggested {} allocation", name),
                    pct,
                    Some("%"),
                    None,
                    tools::JAR_ALLOCATION,
                    &format!("/jars/{}", name),
                ));
            }
        }
    }

    facts
}

fn extract_scenario(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();
    let (suffix, timeframe) = month_window(output, "horizon_months");

    if let Some(delta) = output.get("delta_net").and_then(Value::as_f64) {
        facts.push(number_fact(
            format!("scenario.delta_net{}", suffix),
            "Scenario net impact",
            delta,
            amount_text(delta),
            Some("currency"),
            timeframe,
            tools::WHAT_IF_SCENARIO,
            "/delta_net",
        ));
    }
    if let Some(outcome) = output.get("outcome").and_then(Value::as_str) {
        facts.push(text_fact(
            "scenario.outcome".to_string(),
            "Scenario outcome",
            outcome,
            tools::WHAT_IF_SCENARIO,
            "/outcome",
        ));
    }

    facts
}

fn extract_services(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();

    if let Some(count) = output.get("match_count").and_then(Value::as_i64) {
        facts.push(integer_fact(
            "services.match_count".to_string(),
            "Matching services",
            count,
            None,
            None,
            tools::SERVICE_CATALOG,
            "/match_count",
        ));
    }
    if let Some(top) = output
        .get("matches")
        .and_then(Value::as_array)
        .and_then(|m| m.first())
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
    {
        facts.push(text_fact(
            "services.top_match".to_string(),
            "Top matching service",
            top,
            tools::SERVICE_CATALOG,
            "/matches/0/name",
        ));
    }

    facts
}

fn extract_suitability(output: &Value) -> Vec<Fact> {
    let mut facts = Vec::new();

    if let Some(decision) = output.get("decision").and_then(Value::as_str) {
        facts.push(text_fact(
            "policy.decision".to_string(),
            "Suitability decision",
            decision,
            tools::SUITABILITY_GUARD,
            "/decision",
        ));
    }

    facts
}

use financial_advisory_core::audit::AuditSink;
use financial_advisory_core::config::AgentConfig;
use financial_advisory_core::inference::MockInference;
use financial_advisory_core::knowledge::NoopKnowledge;
use financial_advisory_core::pipeline::{Pipeline, PipelineRequest};
use financial_advisory_core::tools::create_demo_registry;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Scripted inference for the offline demo: one extraction, one answer.
fn demo_backend() -> MockInference {
    let extraction = json!({
        "intent": "spending",
        "sub_intent": "monthly_review",
        "confidence": 0.91,
        "domain_relevance": 0.97,
        "candidates": [
            { "intent": "spending", "confidence": 0.91 },
            { "intent": "planning", "confidence": 0.04 }
        ],
        "slots": { "window_days": 30, "risk_appetite": "balanced" },
        "scenario_confidence": null
    })
    .to_string();

    let answer = json!({
        "summary_lines": [
            "Your spending ran ahead of income this month: net cashflow is {fact:spend.net_cashflow.30d}.",
            "Most of it went to {fact:spend.top_category.30d}, and an anomaly signal ({fact:anomaly.flags}) was raised.",
            "Recurring commitments add up to {fact:recurring.monthly_total} per month."
        ],
        "key_metrics": [
            { "fact_id": "spend.net_cashflow.30d", "label": "Net cashflow" },
            { "fact_id": "recurring.monthly_total", "label": "Recurring monthly total" }
        ],
        "actions": [
            { "action_id": "act.review_flagged_transactions", "line": "Review the flagged transactions first." },
            { "action_id": "act.trim_recurring_commitments", "line": "Trim recurring commitments you no longer use." }
        ],
        "assumptions": [],
        "limitations": ["Figures cover the most recent statement window only."],
        "disclaimer": "This is general guidance based on your own data, not regulated financial advice.",
        "used_fact_ids": [
            "spend.net_cashflow.30d",
            "spend.top_category.30d",
            "anomaly.flags",
            "recurring.monthly_total"
        ],
        "used_insight_ids": ["ins.anomaly_alert"],
        "used_action_ids": ["act.review_flagged_transactions", "act.trim_recurring_commitments"]
    })
    .to_string();

    MockInference::with_responses(vec![extraction, answer])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Financial advisory core — offline demo run");

    let pipeline = Pipeline::new(
        AgentConfig::default(),
        Arc::new(demo_backend()),
        Arc::new(create_demo_registry()),
        Arc::new(NoopKnowledge),
        AuditSink::new_in_memory(),
    );

    let state = pipeline
        .run(PipelineRequest {
            prompt: "How did my spending go this month? Anything odd?".to_string(),
            user_id: Uuid::new_v4(),
            clarify_round: 0,
        })
        .await;

    println!("\n=== RESPONSE ===");
    println!("{}", state.response);
    println!("\n=== TRACE ===");
    println!("trace_id: {}", state.trace_id);
    println!("answer_mode: {:?}", state.meta.answer_mode);
    println!("invoked_tools: {:?}", state.meta.invoked_tools);
    println!("reason_codes: {:?}", state.meta.reason_codes);

    Ok(())
}

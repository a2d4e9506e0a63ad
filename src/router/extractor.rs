//! Structured intent extractor
//!
//! Calls the inference boundary for intent + slots + confidence + top-2
//! candidates. Schema-invalid output is retried a bounded number of
//! times; after that the router refuses to guess.

use crate::inference::{extract_json_object, InferenceBackend};
use crate::models::{Intent, IntentCandidate, IntentExtraction};
use crate::error::AgentError;
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct IntentExtractor {
    backend: Arc<dyn InferenceBackend>,
    max_retries: u8,
}

impl IntentExtractor {
    pub fn new(backend: Arc<dyn InferenceBackend>, max_retries: u8) -> Self {
        Self {
            backend,
            max_retries,
        }
    }

    pub async fn extract(&self, prompt: &str) -> Result<IntentExtraction> {
        let extraction_prompt = build_extraction_prompt(prompt);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match self.backend.complete(&extraction_prompt).await {
                Ok(raw) => match extract_json_object(&raw).and_then(|v| parse_extraction(&v)) {
                    Ok(extraction) => {
                        debug!(
                            intent = %extraction.intent,
                            confidence = extraction.confidence,
                            "Intent extracted"
                        );
                        return Ok(extraction);
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "Extraction output rejected");
                        last_error = Some(e);
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "Extraction transport failure");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| AgentError::ExtractionError("no attempts made".to_string())))
    }
}

fn build_extraction_prompt(prompt: &str) -> String {
    format!(
        r#"You are the intent classifier of a financial advisory assistant.

Classify the user message below. Known intents:
- spending: spending breakdowns, budgets, recent transactions
- planning: savings goals and their feasibility
- risk: financial risk, anomalies, unusual activity
- scenario: what-if simulations of a change in income or spending
- allocation: splitting money across jars/envelopes
- services: finding an advisory service or product
- out_of_scope: anything else (investment picks, legal, non-financial)

Extract any slots you can: horizon_months, delta_amount, target_amount,
window_days, risk_appetite (conservative|balanced|aggressive).

USER MESSAGE:
{}

Return ONLY one JSON object, no explanation:
{{
  "intent": "<intent>",
  "sub_intent": "<optional free text or null>",
  "confidence": <0..1>,
  "domain_relevance": <0..1>,
  "candidates": [
    {{ "intent": "<best>", "confidence": <0..1> }},
    {{ "intent": "<second best>", "confidence": <0..1> }}
  ],
  "slots": {{ }},
  "scenario_confidence": <0..1 or null>
}}
"#,
        prompt
    )
}

fn unit_interval(value: &Value, field: &str) -> Result<f64> {
    let n = value
        .as_f64()
        .ok_or_else(|| AgentError::ExtractionError(format!("{} is not a number", field)))?;
    if !(0.0..=1.0).contains(&n) {
        return Err(AgentError::ExtractionError(format!(
            "{} out of [0,1]: {}",
            field, n
        )));
    }
    Ok(n)
}

/// Validate the extractor's JSON against the expected schema. Exactly two
/// ranked candidates are required; anything else is schema-invalid.
pub fn parse_extraction(value: &Value) -> Result<IntentExtraction> {
    let intent_str = value
        .get("intent")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::ExtractionError("missing intent".to_string()))?;
    let intent = Intent::parse(intent_str)
        .ok_or_else(|| AgentError::ExtractionError(format!("unknown intent: {}", intent_str)))?;

    let confidence = unit_interval(
        value
            .get("confidence")
            .ok_or_else(|| AgentError::ExtractionError("missing confidence".to_string()))?,
        "confidence",
    )?;

    let domain_relevance = unit_interval(
        value
            .get("domain_relevance")
            .ok_or_else(|| AgentError::ExtractionError("missing domain_relevance".to_string()))?,
        "domain_relevance",
    )?;

    let candidates_json = value
        .get("candidates")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::ExtractionError("missing candidates".to_string()))?;

    if candidates_json.len() != 2 {
        return Err(AgentError::ExtractionError(format!(
            "expected exactly 2 candidates, got {}",
            candidates_json.len()
        )));
    }

    let mut candidates = Vec::with_capacity(2);
    for candidate in candidates_json {
        let intent_str = candidate
            .get("intent")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::ExtractionError("candidate missing intent".to_string()))?;
        let intent = Intent::parse(intent_str).ok_or_else(|| {
            AgentError::ExtractionError(format!("unknown candidate intent: {}", intent_str))
        })?;
        let confidence = unit_interval(
            candidate
                .get("confidence")
                .ok_or_else(|| {
                    AgentError::ExtractionError("candidate missing confidence".to_string())
                })?,
            "candidate confidence",
        )?;
        candidates.push(IntentCandidate { intent, confidence });
    }
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let slots: BTreeMap<String, Value> = value
        .get("slots")
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    let scenario_confidence = match value.get("scenario_confidence") {
        Some(Value::Null) | None => None,
        Some(v) => Some(unit_interval(v, "scenario_confidence")?),
    };

    let sub_intent = value
        .get("sub_intent")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    Ok(IntentExtraction {
        intent,
        sub_intent,
        confidence,
        domain_relevance,
        candidates,
        slots,
        scenario_confidence,
    })
}

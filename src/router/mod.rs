//! Intent router & bounded clarification policy
//!
//! collecting-extraction → deciding → {final | clarifying | exhausted}.
//! On extraction failure the router does not guess: it forces
//! out_of_scope and asks for clarification. Exhaustion fails open so the
//! pipeline always terminates.

use crate::config::RouterConfig;
use crate::models::{
    ClarificationState, Intent, IntentExtraction, RouteDecision, RouteMode, RouteSource,
};
use crate::inference::InferenceBackend;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod clarify;
pub mod extractor;
pub mod overrides;

use clarify::{
    missing_scenario_slots, select_question, REASON_EXTRACTION_UNAVAILABLE,
    REASON_LOW_CONFIDENCE, REASON_LOW_SCENARIO_CONFIDENCE, REASON_MISSING_SCENARIO_SLOTS,
    REASON_NARROW_TOP2_GAP,
};
use extractor::IntentExtractor;
use overrides::apply_overrides;

lazy_static! {
    /// Fixed tool bundle per resolved intent; populated once, read
    /// lock-free afterwards.
    static ref TOOL_BUNDLES: HashMap<Intent, Vec<&'static str>> = {
        use crate::tools::*;
        let mut m = HashMap::new();
        m.insert(
            Intent::Spending,
            vec![SPEND_ANALYTICS, RECURRING_DETECT, ANOMALY_SIGNALS],
        );
        m.insert(
            Intent::Planning,
            vec![GOAL_FEASIBILITY, CASHFLOW_FORECAST, SPEND_ANALYTICS],
        );
        m.insert(
            Intent::Risk,
            vec![RISK_PROFILE, ANOMALY_SIGNALS, CASHFLOW_FORECAST],
        );
        m.insert(Intent::Scenario, vec![WHAT_IF_SCENARIO, CASHFLOW_FORECAST]);
        m.insert(Intent::Allocation, vec![JAR_ALLOCATION, SPEND_ANALYTICS]);
        m.insert(Intent::Services, vec![SERVICE_CATALOG]);
        m.insert(Intent::OutOfScope, vec![SUITABILITY_GUARD]);
        m
    };
}

/// The tool bundle for a resolved intent.
pub fn bundle_for_intent(intent: Intent) -> Vec<String> {
    TOOL_BUNDLES
        .get(&intent)
        .map(|names| names.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

pub struct IntentRouter {
    extractor: IntentExtractor,
    config: RouterConfig,
}

impl IntentRouter {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: RouterConfig) -> Self {
        let extractor = IntentExtractor::new(backend, config.extraction_max_retries);
        Self { extractor, config }
    }

    /// Decide the route for one prompt. Mutates the clarification state:
    /// asking a question advances the monotonic round counter.
    pub async fn route(
        &self,
        prompt: &str,
        clarification: &mut ClarificationState,
    ) -> (RouteDecision, Option<IntentExtraction>) {
        match self.extractor.extract(prompt).await {
            Ok(extraction) => {
                let decision = self.decide(prompt, &extraction, clarification);
                (decision, Some(extraction))
            }
            Err(e) => {
                warn!(error = %e, "Extraction unavailable; forcing out_of_scope");
                let decision = self.forced_out_of_scope(clarification);
                (decision, None)
            }
        }
    }

    fn decide(
        &self,
        prompt: &str,
        extraction: &IntentExtraction,
        clarification: &mut ClarificationState,
    ) -> RouteDecision {
        let mut reason_codes = Vec::new();
        let mut source = RouteSource::Extractor;
        let mut final_intent = extraction.intent;

        if let Some((corrected, code)) = apply_overrides(prompt, extraction.intent) {
            debug!(
                from = %extraction.intent,
                to = %corrected,
                code,
                "Heuristic override applied"
            );
            final_intent = corrected;
            source = RouteSource::Override;
            reason_codes.push(code.to_string());
        }

        if extraction.domain_relevance < self.config.min_domain_relevance {
            reason_codes.push("low_domain_relevance".to_string());
            final_intent = Intent::OutOfScope;
        }

        // Hard clarification triggers.
        let mut fired = Vec::new();
        if extraction.confidence < self.config.min_confidence {
            fired.push(REASON_LOW_CONFIDENCE.to_string());
        }
        if extraction.top2_gap() < self.config.top2_gap_min {
            fired.push(REASON_NARROW_TOP2_GAP.to_string());
        }
        if final_intent == Intent::Scenario {
            if extraction.scenario_confidence.unwrap_or(0.0) < self.config.scenario_confidence_min
            {
                fired.push(REASON_LOW_SCENARIO_CONFIDENCE.to_string());
            }
            if !missing_scenario_slots(extraction).is_empty() {
                fired.push(REASON_MISSING_SCENARIO_SLOTS.to_string());
            }
        }
        reason_codes.extend(fired.iter().cloned());

        // Soft trigger: advisory only, never gates execution.
        if extraction.slot_str("risk_appetite").is_none() {
            reason_codes.push("soft_clarify:risk_appetite".to_string());
        }

        if !fired.is_empty() {
            return self.clarify_or_proceed(
                final_intent,
                source,
                reason_codes,
                fired,
                Some(extraction),
                clarification,
            );
        }

        info!(intent = %final_intent, "Route decided");
        RouteDecision {
            mode: RouteMode::Final,
            policy_version: self.config.policy_version.clone(),
            final_intent,
            tool_bundle: bundle_for_intent(final_intent),
            clarify_needed: false,
            clarifying_question: None,
            reason_codes,
            fallback_used: None,
            source,
        }
    }

    fn forced_out_of_scope(&self, clarification: &mut ClarificationState) -> RouteDecision {
        let fired = vec![REASON_EXTRACTION_UNAVAILABLE.to_string()];
        self.clarify_or_proceed(
            Intent::OutOfScope,
            RouteSource::Forced,
            fired.clone(),
            fired,
            None,
            clarification,
        )
    }

    /// Either ask exactly one question, or — when the round budget is
    /// spent — fail open and proceed with the extracted intent.
    fn clarify_or_proceed(
        &self,
        final_intent: Intent,
        source: RouteSource,
        reason_codes: Vec<String>,
        fired: Vec<String>,
        extraction: Option<&IntentExtraction>,
        clarification: &mut ClarificationState,
    ) -> RouteDecision {
        if clarification.exhausted() {
            info!(
                intent = %final_intent,
                round = clarification.round,
                "Clarification budget spent; proceeding"
            );
            clarification.pending = false;
            clarification.question = None;
            return RouteDecision {
                mode: RouteMode::Exhausted,
                policy_version: self.config.policy_version.clone(),
                final_intent,
                tool_bundle: bundle_for_intent(final_intent),
                clarify_needed: false,
                clarifying_question: None,
                reason_codes,
                fallback_used: Some("clarify_exhausted".to_string()),
                source,
            };
        }

        let question = select_question(&fired, extraction);
        clarification.round += 1;
        clarification.pending = true;
        clarification.question = question.clone();

        info!(
            round = clarification.round,
            max = clarification.max_questions,
            "Asking clarifying question"
        );

        RouteDecision {
            mode: RouteMode::Clarifying,
            policy_version: self.config.policy_version.clone(),
            final_intent,
            // clarify_needed ⇒ tool_bundle empty
            tool_bundle: Vec::new(),
            clarify_needed: true,
            clarifying_question: question,
            reason_codes,
            fallback_used: None,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{FailingInference, MockInference};
    use serde_json::json;

    fn router(response: String) -> IntentRouter {
        IntentRouter::new(
            Arc::new(MockInference::new(response)),
            RouterConfig::default(),
        )
    }

    fn extraction_json(
        intent: &str,
        confidence: f64,
        second: &str,
        second_confidence: f64,
    ) -> String {
        json!({
            "intent": intent,
            "confidence": confidence,
            "domain_relevance": 0.9,
            "candidates": [
                { "intent": intent, "confidence": confidence },
                { "intent": second, "confidence": second_confidence }
            ],
            "slots": { "risk_appetite": "balanced" },
            "scenario_confidence": null
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_confident_extraction_routes_final() {
        let router = router(extraction_json("spending", 0.9, "planning", 0.05));
        let mut clarification = ClarificationState::new(0, 2);
        let (decision, extraction) = router.route("what did I spend", &mut clarification).await;

        assert_eq!(decision.mode, RouteMode::Final);
        assert_eq!(decision.final_intent, Intent::Spending);
        assert!(!decision.clarify_needed);
        assert!(!decision.tool_bundle.is_empty());
        assert!(extraction.is_some());
        assert_eq!(clarification.round, 0);
    }

    #[tokio::test]
    async fn test_narrow_gap_asks_question_with_both_candidates() {
        let router = router(extraction_json("scenario", 0.52, "planning", 0.49));
        let mut clarification = ClarificationState::new(0, 2);
        let (decision, _) = router.route("hmm", &mut clarification).await;

        assert_eq!(decision.mode, RouteMode::Clarifying);
        assert!(decision.clarify_needed);
        assert!(decision.tool_bundle.is_empty());
        let question = decision.clarifying_question.unwrap();
        assert_eq!(question.options, vec!["scenario", "planning"]);
        assert_eq!(clarification.round, 1);
        assert!(clarification.pending);
    }

    #[tokio::test]
    async fn test_exhausted_round_fails_open() {
        let router = router(extraction_json("scenario", 0.52, "planning", 0.49));
        let mut clarification = ClarificationState::new(2, 2);
        let (decision, _) = router.route("hmm", &mut clarification).await;

        assert_eq!(decision.mode, RouteMode::Exhausted);
        assert!(!decision.clarify_needed);
        assert_eq!(decision.fallback_used.as_deref(), Some("clarify_exhausted"));
        assert_eq!(decision.final_intent, Intent::Scenario);
        assert!(!decision.tool_bundle.is_empty());
        assert_eq!(clarification.round, 2);
    }

    #[tokio::test]
    async fn test_rounds_are_monotonic_and_bounded() {
        let router = router(extraction_json("scenario", 0.52, "planning", 0.49));
        let mut clarification = ClarificationState::new(0, 2);

        let (first, _) = router.route("hmm", &mut clarification).await;
        assert!(first.clarify_needed);
        assert_eq!(clarification.round, 1);

        let (second, _) = router.route("hmm", &mut clarification).await;
        assert!(second.clarify_needed);
        assert_eq!(clarification.round, 2);

        let (third, _) = router.route("hmm", &mut clarification).await;
        assert!(!third.clarify_needed);
        assert_eq!(third.fallback_used.as_deref(), Some("clarify_exhausted"));
        assert_eq!(clarification.round, 2);
    }

    #[tokio::test]
    async fn test_extraction_failure_forces_out_of_scope() {
        let router = IntentRouter::new(Arc::new(FailingInference), RouterConfig::default());
        let mut clarification = ClarificationState::new(0, 2);
        let (decision, extraction) = router.route("???", &mut clarification).await;

        assert!(extraction.is_none());
        assert_eq!(decision.final_intent, Intent::OutOfScope);
        assert_eq!(decision.source, RouteSource::Forced);
        assert!(decision.clarify_needed);
        assert!(decision
            .reason_codes
            .iter()
            .any(|c| c == REASON_EXTRACTION_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_override_appends_reason_code() {
        let router = router(extraction_json("allocation", 0.9, "spending", 0.05));
        let mut clarification = ClarificationState::new(0, 2);
        let (decision, _) = router
            .route("why was my card flagged as suspicious?", &mut clarification)
            .await;

        assert_eq!(decision.final_intent, Intent::Risk);
        assert_eq!(decision.source, RouteSource::Override);
        assert!(decision
            .reason_codes
            .iter()
            .any(|c| c == "override:anomaly_phrasing"));
    }

    #[tokio::test]
    async fn test_soft_clarify_never_gates() {
        let payload = json!({
            "intent": "spending",
            "confidence": 0.92,
            "domain_relevance": 0.9,
            "candidates": [
                { "intent": "spending", "confidence": 0.92 },
                { "intent": "planning", "confidence": 0.03 }
            ],
            "slots": {},
            "scenario_confidence": null
        })
        .to_string();
        let router = router(payload);
        let mut clarification = ClarificationState::new(0, 2);
        let (decision, _) = router.route("spend summary", &mut clarification).await;

        assert!(!decision.clarify_needed);
        assert_eq!(decision.mode, RouteMode::Final);
        assert!(decision
            .reason_codes
            .iter()
            .any(|c| c == "soft_clarify:risk_appetite"));
    }

    #[tokio::test]
    async fn test_missing_scenario_slots_gates_scenario() {
        let payload = json!({
            "intent": "scenario",
            "confidence": 0.9,
            "domain_relevance": 0.9,
            "candidates": [
                { "intent": "scenario", "confidence": 0.9 },
                { "intent": "planning", "confidence": 0.05 }
            ],
            "slots": { "risk_appetite": "balanced" },
            "scenario_confidence": 0.9
        })
        .to_string();
        let router = router(payload);
        let mut clarification = ClarificationState::new(0, 2);
        let (decision, _) = router.route("what if?", &mut clarification).await;

        assert!(decision.clarify_needed);
        let question = decision.clarifying_question.unwrap();
        assert_eq!(question.code, REASON_MISSING_SCENARIO_SLOTS);
    }
}

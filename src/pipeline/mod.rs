//! Request pipeline
//!
//! The named stage machine:
//! GATE → ROUTE → GUARD → FAN-OUT → DERIVE → SYNTHESIZE → RENDER → AUDIT
//!
//! Every stage is a transition function over the session state. Once a
//! terminal response is written the machine skips straight to the audit
//! stage, so later stages are structurally no-ops.

use crate::audit::AuditSink;
use crate::config::AgentConfig;
use crate::evidence::derive_advisory_context;
use crate::execution::FanoutEngine;
use crate::gate::{AdmissionGate, FAIL_FAST_MESSAGE};
use crate::inference::InferenceBackend;
use crate::knowledge::KnowledgeBase;
use crate::models::{
    AnswerMode, GateDecision, PipelineStage, SessionState, ToolErrorKind, ToolFailure,
};
use crate::renderer;
use crate::router::IntentRouter;
use crate::synthesis::{AnswerSynthesizer, SynthesisOutcome};
use crate::tools::{Tool, ToolArgs, ToolRegistry, SUITABILITY_GUARD};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One inbound request.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub prompt: String,
    pub user_id: Uuid,
    /// Clarifying rounds already spent in this conversation.
    pub clarify_round: u8,
}

pub struct Pipeline {
    config: AgentConfig,
    gate: AdmissionGate,
    router: IntentRouter,
    fanout: FanoutEngine,
    synthesizer: AnswerSynthesizer,
    registry: Arc<ToolRegistry>,
    knowledge: Arc<dyn KnowledgeBase>,
    audit: AuditSink,
}

impl Pipeline {
    pub fn new(
        config: AgentConfig,
        backend: Arc<dyn InferenceBackend>,
        registry: Arc<ToolRegistry>,
        knowledge: Arc<dyn KnowledgeBase>,
        audit: AuditSink,
    ) -> Self {
        Self {
            gate: AdmissionGate::new(config.gate.clone()),
            router: IntentRouter::new(backend.clone(), config.router.clone()),
            fanout: FanoutEngine::new(registry.clone(), config.fanout.clone()),
            synthesizer: AnswerSynthesizer::new(backend, config.synthesis.clone()),
            registry,
            knowledge,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Drive one request through the stage machine to completion.
    pub async fn run(&self, request: PipelineRequest) -> SessionState {
        let start = Instant::now();
        let mut state = SessionState::new(
            request.prompt,
            request.user_id,
            request.clarify_round,
            self.config.router.max_questions,
            self.config.router.policy_version.clone(),
        );

        info!(
            trace_id = %state.trace_id,
            user_id = %state.user_id,
            "Pipeline: request received"
        );

        loop {
            // Terminal-response invariant: closed sessions go straight
            // to the audit stage.
            if state.is_closed()
                && !matches!(state.stage, PipelineStage::Audit | PipelineStage::Done)
            {
                state.stage = PipelineStage::Audit;
            }

            match state.stage {
                PipelineStage::Admission => self.stage_admission(&mut state),
                PipelineStage::Routing => self.stage_routing(&mut state).await,
                PipelineStage::Guard => self.stage_guard(&mut state).await,
                PipelineStage::FanOut => self.stage_fanout(&mut state).await,
                PipelineStage::Derivation => self.stage_derivation(&mut state).await,
                PipelineStage::Synthesis => self.stage_synthesis(&mut state).await,
                PipelineStage::Render => self.stage_render(&mut state),
                PipelineStage::Audit => self.stage_audit(&mut state).await,
                PipelineStage::Done => break,
            }
        }

        info!(
            trace_id = %state.trace_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            answer_mode = ?state.meta.answer_mode,
            "Pipeline: request complete"
        );

        state
    }

    //
    // ================= Stages =================
    //

    fn stage_admission(&self, state: &mut SessionState) {
        let outcome = self.gate.admit(&state.prompt);
        state.normalized_prompt = outcome.text;
        for code in &outcome.report.reason_codes {
            state.push_reason(code.clone());
        }

        if outcome.report.decision == GateDecision::FailFast {
            state.gate = Some(outcome.report);
            state.close(AnswerMode::FailFast, FAIL_FAST_MESSAGE);
        } else {
            state.gate = Some(outcome.report);
        }

        state.stage = PipelineStage::Routing;
    }

    async fn stage_routing(&self, state: &mut SessionState) {
        let (decision, extraction) = self
            .router
            .route(&state.normalized_prompt, &mut state.clarification)
            .await;

        for code in &decision.reason_codes {
            state.push_reason(code.clone());
        }
        if state.meta.fallback_used.is_none() {
            state.meta.fallback_used = decision.fallback_used.clone();
        }
        state.extraction = extraction;

        if decision.clarify_needed {
            if let Some(question) = &decision.clarifying_question {
                state.close(
                    AnswerMode::Clarification,
                    renderer::render_clarification(question),
                );
            }
        }

        state.route = Some(decision);
        state.stage = PipelineStage::Guard;
    }

    /// Suitability check before any analytics spend. A denial produces
    /// the fixed refusal; a guard outage is isolated like any tool
    /// failure and the request proceeds.
    async fn stage_guard(&self, state: &mut SessionState) {
        let args = self.tool_args(state);

        match self.registry.get(SUITABILITY_GUARD) {
            Some(tool) => {
                state.meta.invoked_tools.push(SUITABILITY_GUARD.to_string());
                match tool.call(&args).await {
                    Ok(output) => {
                        let allowed = output
                            .get("allow")
                            .and_then(Value::as_bool)
                            .unwrap_or(true);
                        state
                            .tool_outputs
                            .insert(SUITABILITY_GUARD.to_string(), output);

                        if !allowed {
                            info!(trace_id = %state.trace_id, "Suitability guard denied request");
                            state.push_reason("policy:deny_recommendation");
                            state.close(AnswerMode::Refusal, renderer::render_refusal());
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Suitability guard unavailable");
                        state.push_reason(format!("tool_error:{}", SUITABILITY_GUARD));
                        state
                            .tool_errors
                            .insert(SUITABILITY_GUARD.to_string(), e.into());
                    }
                }
            }
            None => {
                state.push_reason(format!("tool_error:{}", SUITABILITY_GUARD));
                state.tool_errors.insert(
                    SUITABILITY_GUARD.to_string(),
                    ToolFailure {
                        error_kind: ToolErrorKind::Validation,
                        message: "tool not registered".to_string(),
                    },
                );
            }
        }

        state.stage = PipelineStage::FanOut;
    }

    async fn stage_fanout(&self, state: &mut SessionState) {
        let bundle: Vec<String> = state
            .route
            .as_ref()
            .map(|r| r.tool_bundle.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|name| !state.tool_outputs.contains_key(name))
            .collect();

        if !bundle.is_empty() {
            let args = self.tool_args(state);
            let result = self.fanout.dispatch(&bundle, &args).await;

            state.meta.invoked_tools.extend(bundle.iter().cloned());
            for (name, _) in &result.errors {
                state.push_reason(format!("tool_error:{}", name));
            }
            state.tool_outputs.extend(result.outputs);
            state.tool_errors.extend(result.errors);
        }

        state.stage = PipelineStage::Derivation;
    }

    async fn stage_derivation(&self, state: &mut SessionState) {
        let citations = match self
            .knowledge
            .retrieve(&state.normalized_prompt, &BTreeMap::new())
            .await
        {
            Ok(citations) => citations,
            Err(e) => {
                warn!(error = %e, "Knowledge retrieval unavailable");
                state.push_reason("kb_unavailable");
                Vec::new()
            }
        };

        let policy_flags: Vec<String> = state
            .meta
            .reason_codes
            .iter()
            .filter(|code| {
                code.starts_with("policy:")
                    || code.starts_with("soft_clarify:")
                    || *code == "clarify_exhausted"
            })
            .cloned()
            .collect();

        let context = derive_advisory_context(
            &state.tool_outputs,
            citations,
            policy_flags,
            state.risk_appetite(),
        );

        debug!(
            fact_count = context.facts.len(),
            insight_count = context.insights.len(),
            action_count = context.actions.len(),
            "Advisory context derived"
        );

        state.advisory_context = Some(context);
        state.stage = PipelineStage::Synthesis;
    }

    async fn stage_synthesis(&self, state: &mut SessionState) {
        let context = state.advisory_context.clone().unwrap_or_default();
        let intent = state.final_intent();

        match self
            .synthesizer
            .run(&state.normalized_prompt, intent, &context)
            .await
        {
            SynthesisOutcome::Valid(plan) => {
                state.answer = Some(plan);
            }
            SynthesisOutcome::Abandoned { violated_rules } => {
                for rule in &violated_rules {
                    state.push_reason(format!("synthesis:{}", rule));
                }
                if state.meta.fallback_used.is_none() {
                    state.meta.fallback_used = Some("synthesis_fallback".to_string());
                }
            }
        }

        state.stage = PipelineStage::Render;
    }

    fn stage_render(&self, state: &mut SessionState) {
        let context = state.advisory_context.clone().unwrap_or_default();

        match &state.answer {
            Some(plan) => {
                let mut notes = Vec::new();
                if state
                    .meta
                    .reason_codes
                    .iter()
                    .any(|c| c == "soft_clarify:risk_appetite")
                {
                    notes.push(
                        "Risk appetite was not stated; a balanced appetite is assumed."
                            .to_string(),
                    );
                }
                let text = renderer::render_answer(plan, &context, &notes);
                state.close(AnswerMode::Generated, text);
            }
            None => {
                let text =
                    renderer::render_fallback(&context, self.config.synthesis.fallback_fact_limit);
                state.close(AnswerMode::Fallback, text);
            }
        }

        state.stage = PipelineStage::Audit;
    }

    async fn stage_audit(&self, state: &mut SessionState) {
        let payload = json!({
            "prompt": state.prompt,
            "normalized_prompt": state.normalized_prompt,
            "gate": state.gate,
            "route": state.route,
            "clarification": state.clarification,
            "tool_errors": state.tool_errors,
            "answer": state.answer,
            "meta": state.meta,
            "response": state.response,
        });

        self.audit
            .record(state.user_id, state.trace_id, payload)
            .await;

        state.stage = PipelineStage::Done;
    }

    fn tool_args(&self, state: &SessionState) -> ToolArgs {
        match &state.extraction {
            Some(extraction) => ToolArgs::from_slots(state.user_id, &extraction.slots),
            None => ToolArgs::new(state.user_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::MockInference;
    use crate::knowledge::NoopKnowledge;
    use crate::tools::{self, StaticTool, ToolCallError};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn extraction_json(intent: &str, confidence: f64, second: &str, gap_to: f64) -> String {
        json!({
            "intent": intent,
            "confidence": confidence,
            "domain_relevance": 0.9,
            "candidates": [
                { "intent": intent, "confidence": confidence },
                { "intent": second, "confidence": gap_to }
            ],
            "slots": { "risk_appetite": "balanced" },
            "scenario_confidence": null
        })
        .to_string()
    }

    /// Records whether it was ever called.
    struct RecordingTool {
        name: &'static str,
        called: Arc<AtomicBool>,
        payload: Value,
    }

    #[async_trait::async_trait]
    impl Tool for RecordingTool {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "records invocation"
        }

        async fn call(&self, _args: &ToolArgs) -> std::result::Result<Value, ToolCallError> {
            self.called.store(true, Ordering::SeqCst);
            Ok(self.payload.clone())
        }
    }

    fn risk_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::succeeding(
            tools::SUITABILITY_GUARD,
            json!({ "decision": "allow", "allow": true }),
        )));
        registry.register(Arc::new(StaticTool::succeeding(
            tools::ANOMALY_SIGNALS,
            json!({ "flags": ["abnormal_spend"], "flag_count": 1 }),
        )));
        registry.register(Arc::new(StaticTool::succeeding(
            tools::RISK_PROFILE,
            json!({ "score": 0.71, "band": "elevated" }),
        )));
        registry.register(Arc::new(StaticTool::succeeding(
            tools::CASHFLOW_FORECAST,
            json!({ "projected_net": -910.20, "runway_months": 2.4, "horizon_days": 90 }),
        )));
        registry
    }

    fn pipeline(registry: ToolRegistry, responses: Vec<String>) -> Pipeline {
        Pipeline::new(
            AgentConfig::default(),
            Arc::new(MockInference::with_responses(responses)),
            Arc::new(registry),
            Arc::new(NoopKnowledge),
            AuditSink::new_in_memory(),
        )
    }

    fn request(prompt: &str) -> PipelineRequest {
        PipelineRequest {
            prompt: prompt.to_string(),
            user_id: Uuid::new_v4(),
            clarify_round: 0,
        }
    }

    #[tokio::test]
    async fn test_anomaly_scenario_grounded_answer() {
        // Extraction says allocation, but the anomaly phrasing override
        // must land on risk; the answer cites the anomaly fact verbatim.
        let answer = json!({
            "summary_lines": [
                "Your account raised an anomaly signal: {fact:anomaly.flags}.",
                "Your broader risk reading is {fact:risk.band}.",
                "Nothing here needs panic, but it does need review."
            ],
            "key_metrics": [{ "fact_id": "anomaly.flags", "label": "Flags" }],
            "actions": [
                { "action_id": "act.review_flagged_transactions", "line": "Review the flagged transactions." },
                { "action_id": "act.review_risk_posture", "line": "Revisit your risk posture." }
            ],
            "assumptions": [],
            "limitations": [],
            "disclaimer": "This is general guidance, not regulated financial advice.",
            "used_fact_ids": ["anomaly.flags", "risk.band"],
            "used_insight_ids": ["ins.anomaly_alert"],
            "used_action_ids": ["act.review_flagged_transactions", "act.review_risk_posture"]
        })
        .to_string();

        let pipeline = pipeline(
            risk_registry(),
            vec![extraction_json("allocation", 0.9, "spending", 0.05), answer],
        );
        let state = pipeline
            .run(request("my account flagged an anomaly, what now?"))
            .await;

        assert_eq!(state.final_intent(), crate::models::Intent::Risk);
        assert_eq!(state.meta.answer_mode, AnswerMode::Generated);
        assert!(state.response.contains("abnormal_spend"));
        assert!(state
            .meta
            .reason_codes
            .iter()
            .any(|c| c == "override:anomaly_phrasing"));
        assert!(!state.response.contains("{fact:"));
    }

    #[tokio::test]
    async fn test_suitability_denial_blocks_all_other_tools() {
        let called = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::succeeding(
            tools::SUITABILITY_GUARD,
            json!({ "decision": "deny_recommendation", "allow": false }),
        )));
        registry.register(Arc::new(RecordingTool {
            name: tools::SPEND_ANALYTICS,
            called: called.clone(),
            payload: json!({}),
        }));
        registry.register(Arc::new(RecordingTool {
            name: tools::RECURRING_DETECT,
            called: called.clone(),
            payload: json!({}),
        }));
        registry.register(Arc::new(RecordingTool {
            name: tools::ANOMALY_SIGNALS,
            called: called.clone(),
            payload: json!({}),
        }));

        let pipeline = pipeline(
            registry,
            vec![extraction_json("spending", 0.95, "planning", 0.02)],
        );
        let state = pipeline
            .run(request("should I buy this stock with my savings?"))
            .await;

        assert_eq!(state.meta.answer_mode, AnswerMode::Refusal);
        assert_eq!(state.response, renderer::render_refusal());
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(state.meta.invoked_tools, vec![tools::SUITABILITY_GUARD]);
    }

    #[tokio::test]
    async fn test_narrow_gap_clarifies_before_any_tool_spend() {
        let called = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(RecordingTool {
            name: tools::SUITABILITY_GUARD,
            called: called.clone(),
            payload: json!({ "allow": true }),
        }));

        let pipeline = pipeline(
            registry,
            vec![extraction_json("scenario", 0.52, "planning", 0.49)],
        );
        let state = pipeline.run(request("thinking about my money")).await;

        assert_eq!(state.meta.answer_mode, AnswerMode::Clarification);
        assert!(state.response.contains("scenario"));
        assert!(state.response.contains("planning"));
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(state.clarification.round, 1);
    }

    #[tokio::test]
    async fn test_clarify_exhaustion_proceeds_with_extracted_intent() {
        let answer = json!({
            "summary_lines": [
                "The simulated change lands at {fact:scenario.delta_net.12m}.",
                "Your forecast runway is {fact:forecast.runway_months} months.",
                "Proceeding on the scenario reading of your question."
            ],
            "key_metrics": [{ "fact_id": "scenario.delta_net.12m", "label": "Impact" }],
            "actions": [
                { "action_id": "act.periodic_review", "line": "Review this again next month." },
                { "action_id": "act.data_refresh", "line": "Refresh your account data." }
            ],
            "assumptions": [],
            "limitations": [],
            "disclaimer": "This is general guidance, not regulated financial advice.",
            "used_fact_ids": ["scenario.delta_net.12m", "forecast.runway_months"],
            "used_insight_ids": [],
            "used_action_ids": ["act.periodic_review", "act.data_refresh"]
        })
        .to_string();

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::succeeding(
            tools::SUITABILITY_GUARD,
            json!({ "allow": true }),
        )));
        registry.register(Arc::new(StaticTool::succeeding(
            tools::WHAT_IF_SCENARIO,
            json!({ "delta_net": 120.0, "outcome": "steady", "horizon_months": 12 }),
        )));
        registry.register(Arc::new(StaticTool::succeeding(
            tools::CASHFLOW_FORECAST,
            json!({ "projected_net": 80.0, "runway_months": 6.0, "horizon_days": 90 }),
        )));

        let pipeline = pipeline(
            registry,
            vec![extraction_json("scenario", 0.52, "planning", 0.49), answer],
        );
        let state = pipeline
            .run(PipelineRequest {
                prompt: "thinking about my money".to_string(),
                user_id: Uuid::new_v4(),
                clarify_round: AgentConfig::default().router.max_questions,
            })
            .await;

        assert_ne!(state.meta.answer_mode, AnswerMode::Clarification);
        assert_eq!(
            state.meta.fallback_used.as_deref(),
            Some("clarify_exhausted")
        );
        assert_eq!(state.final_intent(), crate::models::Intent::Scenario);
    }

    #[tokio::test]
    async fn test_partial_tool_failure_still_answers_via_fallback() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::succeeding(
            tools::SUITABILITY_GUARD,
            json!({ "allow": true }),
        )));
        registry.register(Arc::new(StaticTool::succeeding(
            tools::SPEND_ANALYTICS,
            json!({ "total_spend": 1500.0, "net_cashflow": 230.0, "window_days": 30 }),
        )));
        registry.register(Arc::new(StaticTool::succeeding(
            tools::RECURRING_DETECT,
            json!({ "recurring_count": 4, "monthly_total": 450.0 }),
        )));
        registry.register(Arc::new(StaticTool::failing(
            tools::ANOMALY_SIGNALS,
            ToolErrorKind::Status,
            "upstream 422",
        )));

        // Second inference response is unusable, forcing the
        // deterministic fallback on partial evidence.
        let pipeline = pipeline(
            registry,
            vec![
                extraction_json("spending", 0.95, "planning", 0.02),
                "not json at all".to_string(),
            ],
        );
        let state = pipeline.run(request("how is my spending?")).await;

        assert_eq!(state.meta.answer_mode, AnswerMode::Fallback);
        assert_eq!(state.tool_errors.len(), 1);
        assert!(state
            .meta
            .reason_codes
            .iter()
            .any(|c| c == "tool_error:anomaly-signals"));
        assert!(state.response.contains("Total spend: 1500.00"));
    }

    #[tokio::test]
    async fn test_garbled_input_fails_fast_without_inference() {
        let pipeline = pipeline(ToolRegistry::new(), vec![]);
        let state = pipeline
            .run(request("\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}"))
            .await;

        assert_eq!(state.meta.answer_mode, AnswerMode::FailFast);
        assert_eq!(state.response, FAIL_FAST_MESSAGE);
        assert!(state.extraction.is_none());
        assert!(state.meta.invoked_tools.is_empty());
    }

    #[tokio::test]
    async fn test_audit_record_written_for_every_outcome() {
        let pipeline = pipeline(ToolRegistry::new(), vec![]);
        let user_id = Uuid::new_v4();
        let state = pipeline
            .run(PipelineRequest {
                prompt: "\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}".to_string(),
                user_id,
                clarify_round: 0,
            })
            .await;

        let record = pipeline.audit.get(state.trace_id).await.unwrap();
        assert_eq!(record.user_id, user_id);
        assert_eq!(record.payload["response"], json!(FAIL_FAST_MESSAGE));
    }
}

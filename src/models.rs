//! Core data models for the advisory decision core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Resolved user intent. `OutOfScope` is also the forced intent when the
/// extraction boundary fails and the router refuses to guess.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Spending,
    Planning,
    Risk,
    Scenario,
    Allocation,
    Services,
    OutOfScope,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Spending => "spending",
            Intent::Planning => "planning",
            Intent::Risk => "risk",
            Intent::Scenario => "scenario",
            Intent::Allocation => "allocation",
            Intent::Services => "services",
            Intent::OutOfScope => "out_of_scope",
        }
    }

    pub fn parse(s: &str) -> Option<Intent> {
        match s.trim().to_lowercase().as_str() {
            "spending" | "spend" => Some(Intent::Spending),
            "planning" | "plan" | "goal" => Some(Intent::Planning),
            "risk" => Some(Intent::Risk),
            "scenario" | "what_if" | "what-if" => Some(Intent::Scenario),
            "allocation" | "allocate" => Some(Intent::Allocation),
            "services" | "service" => Some(Intent::Services),
            "out_of_scope" => Some(Intent::OutOfScope),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskAppetite {
    Conservative,
    Balanced,
    Aggressive,
}

impl RiskAppetite {
    pub fn parse(s: &str) -> Option<RiskAppetite> {
        match s.trim().to_lowercase().as_str() {
            "conservative" | "low" => Some(RiskAppetite::Conservative),
            "balanced" | "medium" | "moderate" => Some(RiskAppetite::Balanced),
            "aggressive" | "high" => Some(RiskAppetite::Aggressive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn rank(&self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

//
// ================= Admission Gate =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Pass,
    Repair,
    FailFast,
}

/// Outcome of the admission gate for one raw input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub decision: GateDecision,
    /// Corruption likelihood in [0,1] for the text that leaves the gate.
    pub mojibake_score: f64,
    /// Name of the repair strategy applied, if any.
    pub repair_applied: Option<String>,
    pub encoding_guess: Option<String>,
    pub reason_codes: Vec<String>,
    /// SHA-256 hex over the normalized text.
    pub fingerprint: String,
}

//
// ================= Intent Extraction =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentCandidate {
    pub intent: Intent,
    pub confidence: f64,
}

/// Structured output of the inference-backed intent extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentExtraction {
    pub intent: Intent,
    #[serde(default)]
    pub sub_intent: Option<String>,
    pub confidence: f64,
    pub domain_relevance: f64,
    /// Exactly two ranked candidates, best first.
    pub candidates: Vec<IntentCandidate>,
    #[serde(default)]
    pub slots: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub scenario_confidence: Option<f64>,
}

impl IntentExtraction {
    /// Confidence gap between the top-2 candidates.
    pub fn top2_gap(&self) -> f64 {
        match (self.candidates.first(), self.candidates.get(1)) {
            (Some(a), Some(b)) => (a.confidence - b.confidence).abs(),
            _ => 1.0,
        }
    }

    pub fn slot_str(&self, key: &str) -> Option<&str> {
        self.slots.get(key).and_then(|v| v.as_str())
    }
}

//
// ================= Route Decision =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    Final,
    Clarifying,
    Exhausted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Extractor,
    Override,
    Forced,
}

/// A clarifying question with a closed, bounded option list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    /// Reason code of the trigger this question resolves.
    pub code: String,
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub mode: RouteMode,
    pub policy_version: String,
    pub final_intent: Intent,
    pub tool_bundle: Vec<String>,
    pub clarify_needed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarifying_question: Option<ClarifyingQuestion>,
    pub reason_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<String>,
    pub source: RouteSource,
}

//
// ================= Clarification State =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationState {
    pub pending: bool,
    /// Monotonic round counter; once `round >= max_questions` the router
    /// must decide, not ask again.
    pub round: u8,
    pub max_questions: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<ClarifyingQuestion>,
}

impl ClarificationState {
    pub fn new(round: u8, max_questions: u8) -> Self {
        Self {
            pending: false,
            round,
            max_questions,
            question: None,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.round >= self.max_questions
    }
}

//
// ================= Tool Failures =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Transport,
    Status,
    Validation,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFailure {
    pub error_kind: ToolErrorKind,
    pub message: String,
}

//
// ================= Evidence =================
//

/// Typed value of a fact; unknown tool sub-fields are omitted upstream,
/// never defaulted into one of these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FactValue {
    Flag(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

/// A single named, typed, source-attributed data point — the atomic unit
/// of truth. `fact_id` is the only handle by which downstream text may
/// reference a number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// Stable hierarchical id, e.g. "spend.net_cashflow.30d".
    pub fact_id: String,
    pub label: String,
    pub value: FactValue,
    /// Rendered form used verbatim in output.
    pub value_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    pub source_tool: String,
    pub source_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub insight_id: String,
    pub kind: String,
    pub severity: Severity,
    pub message_seed: String,
    pub supporting_fact_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub action_id: String,
    /// 1..=99, lower is more urgent; ties break lexically by action_id.
    pub priority: u8,
    pub action_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    pub supporting_insight_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub id: String,
    pub snippet: String,
    pub citation: String,
    pub score: f64,
}

/// The frozen bundle of truth the generator may draw from.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdvisoryContext {
    pub facts: Vec<Fact>,
    pub insights: Vec<Insight>,
    pub actions: Vec<ActionCandidate>,
    pub citations: Vec<Citation>,
    pub policy_flags: Vec<String>,
}

impl AdvisoryContext {
    pub fn fact(&self, fact_id: &str) -> Option<&Fact> {
        self.facts.iter().find(|f| f.fact_id == fact_id)
    }

    pub fn has_insight(&self, insight_id: &str) -> bool {
        self.insights.iter().any(|i| i.insight_id == insight_id)
    }

    pub fn action(&self, action_id: &str) -> Option<&ActionCandidate> {
        self.actions.iter().find(|a| a.action_id == action_id)
    }
}

//
// ================= Answer Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetric {
    pub fact_id: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action_id: String,
    pub line: String,
}

/// Schema-compliant generated answer. Prose references numbers only via
/// `{fact:<id>}` placeholders; every placeholder must appear in
/// `used_fact_ids` (declare⇔use invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerPlan {
    pub summary_lines: Vec<String>,
    #[serde(default)]
    pub key_metrics: Vec<KeyMetric>,
    pub actions: Vec<PlannedAction>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
    pub disclaimer: String,
    #[serde(default)]
    pub used_fact_ids: Vec<String>,
    #[serde(default)]
    pub used_insight_ids: Vec<String>,
    #[serde(default)]
    pub used_action_ids: Vec<String>,
}

//
// ================= Response Metadata =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    Generated,
    Fallback,
    Refusal,
    Clarification,
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub answer_mode: AnswerMode,
    pub reason_codes: Vec<String>,
    pub invoked_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<String>,
    pub policy_version: String,
}

impl ResponseMeta {
    fn new(policy_version: String) -> Self {
        Self {
            answer_mode: AnswerMode::Generated,
            reason_codes: Vec::new(),
            invoked_tools: Vec::new(),
            fallback_used: None,
            policy_version,
        }
    }
}

//
// ================= Pipeline Stages =================
//

/// Named states of the request pipeline. Each stage has exactly one
/// transition function; `Done` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Admission,
    Routing,
    Guard,
    FanOut,
    Derivation,
    Synthesis,
    Render,
    Audit,
    Done,
}

//
// ================= Session State =================
//

/// Mutable record threaded through the pipeline, one per request.
/// Invariant: once `response` is non-empty every later stage is a no-op
/// (the stage machine skips straight to Audit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub trace_id: Uuid,
    pub user_id: Uuid,
    pub prompt: String,
    pub normalized_prompt: String,
    pub stage: PipelineStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<IntentExtraction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteDecision>,
    pub clarification: ClarificationState,
    pub tool_outputs: BTreeMap<String, serde_json::Value>,
    pub tool_errors: BTreeMap<String, ToolFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory_context: Option<AdvisoryContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<AnswerPlan>,
    pub meta: ResponseMeta,
    /// Final text; empty until a stage terminates the request.
    pub response: String,
    pub created_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(
        prompt: impl Into<String>,
        user_id: Uuid,
        clarify_round: u8,
        max_questions: u8,
        policy_version: impl Into<String>,
    ) -> Self {
        let prompt = prompt.into();
        Self {
            trace_id: Uuid::new_v4(),
            user_id,
            normalized_prompt: prompt.clone(),
            prompt,
            stage: PipelineStage::Admission,
            gate: None,
            extraction: None,
            route: None,
            clarification: ClarificationState::new(clarify_round, max_questions),
            tool_outputs: BTreeMap::new(),
            tool_errors: BTreeMap::new(),
            advisory_context: None,
            answer: None,
            meta: ResponseMeta::new(policy_version.into()),
            response: String::new(),
            created_at: Utc::now(),
        }
    }

    /// True once a terminal response has been written.
    pub fn is_closed(&self) -> bool {
        !self.response.is_empty()
    }

    pub fn push_reason(&mut self, code: impl Into<String>) {
        let code = code.into();
        if !self.meta.reason_codes.contains(&code) {
            self.meta.reason_codes.push(code);
        }
    }

    /// Close the request with a terminal response.
    pub fn close(&mut self, mode: AnswerMode, text: impl Into<String>) {
        if self.response.is_empty() {
            self.meta.answer_mode = mode;
            self.response = text.into();
        }
    }

    pub fn final_intent(&self) -> Intent {
        self.route
            .as_ref()
            .map(|r| r.final_intent)
            .unwrap_or(Intent::OutOfScope)
    }

    pub fn risk_appetite(&self) -> Option<RiskAppetite> {
        self.extraction
            .as_ref()
            .and_then(|e| e.slot_str("risk_appetite"))
            .and_then(RiskAppetite::parse)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            std::cmp::max(Severity::Low, Severity::High),
            Severity::High
        );
    }

    #[test]
    fn test_top2_gap() {
        let extraction = IntentExtraction {
            intent: Intent::Scenario,
            sub_intent: None,
            confidence: 0.52,
            domain_relevance: 0.9,
            candidates: vec![
                IntentCandidate {
                    intent: Intent::Scenario,
                    confidence: 0.52,
                },
                IntentCandidate {
                    intent: Intent::Planning,
                    confidence: 0.49,
                },
            ],
            slots: BTreeMap::new(),
            scenario_confidence: None,
        };
        assert!((extraction.top2_gap() - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_session_close_is_terminal() {
        let mut state = SessionState::new("hello", Uuid::new_v4(), 0, 2, "v1");
        assert!(!state.is_closed());
        state.close(AnswerMode::Refusal, "no");
        state.close(AnswerMode::Generated, "overwrite attempt");
        assert_eq!(state.response, "no");
        assert_eq!(state.meta.answer_mode, AnswerMode::Refusal);
    }

    #[test]
    fn test_intent_parse_aliases() {
        assert_eq!(Intent::parse("what-if"), Some(Intent::Scenario));
        assert_eq!(Intent::parse("Spend"), Some(Intent::Spending));
        assert_eq!(Intent::parse("unknown"), None);
    }
}

//! Answer synthesis
//!
//! Builds one generation prompt embedding the full Advisory Context plus
//! explicit format rules, parses the structured response, and runs the
//! bounded generate-validate-repair-retry loop. Abandons generation for
//! the turn rather than retrying indefinitely.

use crate::config::SynthesisConfig;
use crate::error::AgentError;
use crate::inference::{extract_json_object, InferenceBackend};
use crate::models::{AdvisoryContext, AnswerPlan, Intent};
use crate::verification::{repair_declared_use, validate, Violation};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MIN_SUMMARY_LINES: usize = 3;
const MAX_SUMMARY_LINES: usize = 5;
const MIN_ACTIONS: usize = 2;
const MAX_ACTIONS: usize = 4;

/// Outcome of the synthesis loop for one turn.
pub enum SynthesisOutcome {
    Valid(AnswerPlan),
    /// Generation could not be trusted; rendering must fall back.
    Abandoned { violated_rules: Vec<String> },
}

pub struct AnswerSynthesizer {
    backend: Arc<dyn InferenceBackend>,
    config: SynthesisConfig,
}

impl AnswerSynthesizer {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: SynthesisConfig) -> Self {
        Self { backend, config }
    }

    /// Generate-validate-repair-retry. At most `max_attempts` generations
    /// and exactly one mechanical repair across the whole turn.
    pub async fn run(
        &self,
        user_prompt: &str,
        intent: Intent,
        context: &AdvisoryContext,
    ) -> SynthesisOutcome {
        let mut corrective: Option<Vec<String>> = None;
        let mut repair_spent = false;
        let mut last_rules: Vec<String> = Vec::new();

        for attempt in 1..=self.config.max_attempts {
            let prompt =
                build_generation_prompt(user_prompt, intent, context, corrective.as_deref());

            let mut plan = match self.generate(&prompt).await {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(attempt, error = %e, "Synthesis attempt failed to parse");
                    last_rules = vec!["schema_violation".to_string()];
                    corrective = Some(last_rules.clone());
                    continue;
                }
            };

            let mut violations = validate(&plan, context);
            if !violations.is_empty() && !repair_spent {
                // The one failure class considered safely auto-fixable.
                if repair_declared_use(&mut plan, context) {
                    debug!(attempt, "Applied mechanical declared-use repair");
                    violations = validate(&plan, context);
                }
                repair_spent = true;
            }

            if violations.is_empty() {
                info!(attempt, "Synthesis validated");
                return SynthesisOutcome::Valid(plan);
            }

            last_rules = rule_names(&violations);
            warn!(
                attempt,
                rules = ?last_rules,
                "Synthesis validation failed"
            );
            corrective = Some(last_rules.clone());
        }

        SynthesisOutcome::Abandoned {
            violated_rules: last_rules,
        }
    }

    async fn generate(&self, prompt: &str) -> Result<AnswerPlan> {
        let raw = self.backend.complete(prompt).await?;
        let value = extract_json_object(&raw)?;
        let plan: AnswerPlan = serde_json::from_value(value)
            .map_err(|e| AgentError::SynthesisError(format!("answer schema: {}", e)))?;
        check_structure(&plan)?;
        Ok(plan)
    }
}

fn rule_names(violations: &[Violation]) -> Vec<String> {
    let mut names: Vec<String> = violations.iter().map(|v| v.rule.to_string()).collect();
    names.sort();
    names.dedup();
    names
}

fn check_structure(plan: &AnswerPlan) -> Result<()> {
    let lines = plan.summary_lines.len();
    if !(MIN_SUMMARY_LINES..=MAX_SUMMARY_LINES).contains(&lines) {
        return Err(AgentError::SynthesisError(format!(
            "summary_lines must be {}..{}, got {}",
            MIN_SUMMARY_LINES, MAX_SUMMARY_LINES, lines
        )));
    }
    let actions = plan.actions.len();
    if !(MIN_ACTIONS..=MAX_ACTIONS).contains(&actions) {
        return Err(AgentError::SynthesisError(format!(
            "actions must be {}..{}, got {}",
            MIN_ACTIONS, MAX_ACTIONS, actions
        )));
    }
    if plan.disclaimer.trim().is_empty() {
        return Err(AgentError::SynthesisError("missing disclaimer".to_string()));
    }
    Ok(())
}

/// One prompt per attempt; corrective feedback carries the violated rule
/// names from the previous attempt.
fn build_generation_prompt(
    user_prompt: &str,
    intent: Intent,
    context: &AdvisoryContext,
    corrective: Option<&[String]>,
) -> String {
    let context_json =
        serde_json::to_string_pretty(context).unwrap_or_else(|_| "{}".to_string());

    let base = format!(
        r#"You are a financial advisory assistant writing one grounded answer.

USER QUESTION ({} intent):
{}

ADVISORY CONTEXT (the only truth you may draw from):
{}

FORMAT RULES (schema: answer_plan):
- Return ONLY one JSON object, no explanation.
- "summary_lines": {} to {} short lines.
- "actions": {} to {} entries; each {{ "action_id", "line" }} and the
  action_id must come from the context's actions.
- Never write a raw number in prose. Use a fact placeholder instead:
  {{fact:<fact_id>}} for any value from the context.
- Reference only listed insight and action ids.
- Declare every id you used in "used_fact_ids", "used_insight_ids",
  "used_action_ids" — every placeholder in prose must be declared.
- Include "key_metrics" ([{{ "fact_id", "label" }}]), "assumptions",
  "limitations", and a one-line "disclaimer".

JSON shape:
{{
  "summary_lines": ["..."],
  "key_metrics": [{{ "fact_id": "...", "label": "..." }}],
  "actions": [{{ "action_id": "...", "line": "..." }}],
  "assumptions": ["..."],
  "limitations": ["..."],
  "disclaimer": "...",
  "used_fact_ids": ["..."],
  "used_insight_ids": ["..."],
  "used_action_ids": ["..."]
}}
"#,
        intent,
        user_prompt,
        context_json,
        MIN_SUMMARY_LINES,
        MAX_SUMMARY_LINES,
        MIN_ACTIONS,
        MAX_ACTIONS,
    );

    match corrective {
        Some(rules) if !rules.is_empty() => format!(
            "Your previous answer violated these rules: {}.\nFix every violation.\n\n{}",
            rules.join(", "),
            base
        ),
        _ => base,
    }
}

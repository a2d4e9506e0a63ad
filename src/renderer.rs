//! Rendering
//!
//! Turns a validated answer plan into final text, substituting fact
//! placeholders with their rendered values. The deterministic fallback
//! lists top facts verbatim with a fixed action template — it performs
//! no generation, so it is structurally incapable of hallucinating.

use crate::models::{AdvisoryContext, AnswerPlan, ClarifyingQuestion};
use crate::verification::PLACEHOLDER_RE;

/// Fixed disclaimer carried by every advisory answer.
pub const DISCLAIMER: &str =
    "This is general guidance based on your own data, not regulated financial advice.";

/// Fixed refusal template for actions the suitability guard denies.
pub const REFUSAL_TEMPLATE: &str = "I can't recommend that action. Buying, selling, or picking \
specific investment products is outside what I'm authorized to advise on.";

/// Replace every `{fact:<id>}` with the fact's rendered value. Unresolved
/// placeholders never survive validation, but render defensively as "—".
fn substitute_placeholders(line: &str, context: &AdvisoryContext) -> String {
    PLACEHOLDER_RE
        .replace_all(line, |caps: &regex::Captures| {
            context
                .fact(&caps[1])
                .map(|f| f.value_text.clone())
                .unwrap_or_else(|| "—".to_string())
        })
        .into_owned()
}

/// Render a validated answer plan.
pub fn render_answer(
    plan: &AnswerPlan,
    context: &AdvisoryContext,
    advisory_notes: &[String],
) -> String {
    let mut out = String::new();

    for line in &plan.summary_lines {
        out.push_str(&substitute_placeholders(line, context));
        out.push('\n');
    }

    if !plan.key_metrics.is_empty() {
        out.push('\n');
        out.push_str("Key figures:\n");
        for metric in &plan.key_metrics {
            if let Some(fact) = context.fact(&metric.fact_id) {
                let label = metric.label.as_deref().unwrap_or(&fact.label);
                out.push_str(&format!("- {}: {}", label, fact.value_text));
                if let Some(timeframe) = &fact.timeframe {
                    out.push_str(&format!(" ({})", timeframe));
                }
                out.push('\n');
            }
        }
    }

    out.push('\n');
    out.push_str("Suggested next steps:\n");
    for (i, action) in plan.actions.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}\n",
            i + 1,
            substitute_placeholders(&action.line, context)
        ));
    }

    let assumptions: Vec<&String> = plan.assumptions.iter().chain(advisory_notes).collect();
    if !assumptions.is_empty() {
        out.push('\n');
        out.push_str("Assumptions:\n");
        for assumption in assumptions {
            out.push_str(&format!("- {}\n", substitute_placeholders(assumption, context)));
        }
    }

    if !plan.limitations.is_empty() {
        out.push('\n');
        out.push_str("Limitations:\n");
        for limitation in &plan.limitations {
            out.push_str(&format!("- {}\n", substitute_placeholders(limitation, context)));
        }
    }

    out.push('\n');
    out.push_str(&plan.disclaimer);
    out
}

/// Deterministic facts-only rendering used when generation cannot be
/// trusted for the turn.
pub fn render_fallback(context: &AdvisoryContext, fact_limit: usize) -> String {
    let mut out = String::new();

    if context.facts.is_empty() {
        out.push_str(
            "I couldn't put together a full answer this time, and I won't guess at numbers.\n",
        );
    } else {
        out.push_str("Here is what your data shows:\n");
        for fact in context.facts.iter().take(fact_limit) {
            out.push_str(&format!("- {}: {}", fact.label, fact.value_text));
            if let Some(timeframe) = &fact.timeframe {
                out.push_str(&format!(" ({})", timeframe));
            }
            out.push('\n');
        }
    }

    out.push('\n');
    out.push_str("Suggested next steps:\n");
    let mut listed = 0;
    for action in context.actions.iter().take(2) {
        out.push_str(&format!("- {}\n", humanize_action_id(&action.action_id)));
        listed += 1;
    }
    if listed == 0 {
        out.push_str("- Review the figures above\n- Re-run this check after your next statement\n");
    }

    out.push('\n');
    out.push_str(DISCLAIMER);
    out
}

/// Fixed refusal text for policy denials, disclaimer included.
pub fn render_refusal() -> String {
    format!("{}\n\n{}", REFUSAL_TEMPLATE, DISCLAIMER)
}

/// Render a clarifying question with its closed option list.
pub fn render_clarification(question: &ClarifyingQuestion) -> String {
    let mut out = String::new();
    out.push_str(&question.question);
    out.push('\n');
    for (i, option) in question.options.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, option.replace('_', " ")));
    }
    out
}

fn humanize_action_id(action_id: &str) -> String {
    action_id
        .trim_start_matches("act.")
        .replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionCandidate, Fact, FactValue, KeyMetric, PlannedAction};
    use std::collections::BTreeMap;

    fn context() -> AdvisoryContext {
        AdvisoryContext {
            facts: vec![Fact {
                fact_id: "anomaly.flags".to_string(),
                label: "Anomaly flags".to_string(),
                value: FactValue::Text("abnormal_spend".to_string()),
                value_text: "abnormal_spend".to_string(),
                unit: None,
                timeframe: None,
                source_tool: "anomaly-signals".to_string(),
                source_path: "/flags".to_string(),
            }],
            insights: vec![],
            actions: vec![ActionCandidate {
                action_id: "act.review_flagged_transactions".to_string(),
                priority: 12,
                action_type: "security_review".to_string(),
                params: BTreeMap::new(),
                supporting_insight_ids: vec![],
            }],
            citations: vec![],
            policy_flags: vec![],
        }
    }

    #[test]
    fn test_placeholders_substitute_rendered_value() {
        let plan = AnswerPlan {
            summary_lines: vec![
                "Your account raised {fact:anomaly.flags}.".to_string(),
                "Worth a look.".to_string(),
                "Nothing else stands out.".to_string(),
            ],
            key_metrics: vec![KeyMetric {
                fact_id: "anomaly.flags".to_string(),
                label: None,
            }],
            actions: vec![
                PlannedAction {
                    action_id: "act.review_flagged_transactions".to_string(),
                    line: "Review the flagged items.".to_string(),
                },
                PlannedAction {
                    action_id: "act.review_flagged_transactions".to_string(),
                    line: "Then confirm your recent payees.".to_string(),
                },
            ],
            assumptions: vec![],
            limitations: vec![],
            disclaimer: DISCLAIMER.to_string(),
            used_fact_ids: vec!["anomaly.flags".to_string()],
            used_insight_ids: vec![],
            used_action_ids: vec![],
        };

        let text = render_answer(&plan, &context(), &[]);
        assert!(text.contains("raised abnormal_spend"));
        assert!(!text.contains("{fact:"));
        assert!(text.contains(DISCLAIMER));
    }

    #[test]
    fn test_fallback_lists_facts_verbatim() {
        let text = render_fallback(&context(), 5);
        assert!(text.contains("Anomaly flags: abnormal_spend"));
        assert!(text.contains("review flagged transactions"));
        assert!(text.contains(DISCLAIMER));
    }

    #[test]
    fn test_fallback_with_empty_context_still_safe() {
        let text = render_fallback(&AdvisoryContext::default(), 5);
        assert!(text.contains("won't guess"));
        assert!(text.contains(DISCLAIMER));
    }

    #[test]
    fn test_refusal_carries_disclaimer() {
        let text = render_refusal();
        assert!(text.starts_with(REFUSAL_TEMPLATE));
        assert!(text.contains(DISCLAIMER));
    }

    #[test]
    fn test_clarification_lists_options() {
        let question = ClarifyingQuestion {
            code: "narrow_top2_gap".to_string(),
            question: "Which did you mean?".to_string(),
            options: vec!["scenario".to_string(), "planning".to_string()],
        };
        let text = render_clarification(&question);
        assert!(text.contains("1. scenario"));
        assert!(text.contains("2. planning"));
    }
}

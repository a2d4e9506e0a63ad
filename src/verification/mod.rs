//! Grounding validator
//!
//! Deterministic cross-check of a generated answer against the Advisory
//! Context it was given. Two independent checks: identifier grounding
//! (every referenced id resolves, every used placeholder is declared) and
//! numeric grounding (every standalone number in prose traces to a fact,
//! an action parameter, or the small-cadence allow-list).

use crate::models::{AdvisoryContext, AnswerPlan, FactValue};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

/// Percentages at or below this are allowed without a backing fact.
const ALLOWED_PERCENT_MAX: f64 = 25.0;
/// Day/week/month cadences at or below this many units are allowed.
const ALLOWED_CADENCE_MAX: f64 = 90.0;

lazy_static! {
    /// `{fact:<id>}` placeholder, shared with the renderer.
    pub static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\{fact:([A-Za-z0-9_.\-]+)\}").unwrap();
    static ref NUMBER_RE: Regex =
        Regex::new(r"(?i)(\d+(?:\.\d+)?)[\s\-]*(%|days?|weeks?|months?)?").unwrap();
    static ref LIST_MARKER_RE: Regex = Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").unwrap();
}

/// One violated grounding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub rule: &'static str,
    pub detail: String,
}

impl Violation {
    fn new(rule: &'static str, detail: impl Into<String>) -> Self {
        Self {
            rule,
            detail: detail.into(),
        }
    }
}

/// Validate a parsed answer plan against its Advisory Context. Returns
/// every violation found; an empty vector means the answer is grounded.
pub fn validate(plan: &AnswerPlan, context: &AdvisoryContext) -> Vec<Violation> {
    let mut violations = Vec::new();

    check_identifiers(plan, context, &mut violations);
    check_numbers(plan, context, &mut violations);

    violations
}

/// The one mechanical repair: extend the declared-used-facts list to
/// cover placeholders used in prose but not declared. Returns true if
/// the plan changed. Only resolvable placeholders are added — unknown
/// ids stay violations for the corrective retry.
pub fn repair_declared_use(plan: &mut AnswerPlan, context: &AdvisoryContext) -> bool {
    let mut changed = false;

    for line in prose_lines(plan) {
        for capture in PLACEHOLDER_RE.captures_iter(&line) {
            let fact_id = capture[1].to_string();
            if context.fact(&fact_id).is_some() && !plan.used_fact_ids.contains(&fact_id) {
                plan.used_fact_ids.push(fact_id);
                changed = true;
            }
        }
    }

    changed
}

//
// ================= Identifier Grounding =================
//

fn check_identifiers(plan: &AnswerPlan, context: &AdvisoryContext, out: &mut Vec<Violation>) {
    for id in &plan.used_fact_ids {
        if context.fact(id).is_none() {
            out.push(Violation::new("unknown_used_fact", id.clone()));
        }
    }
    for id in &plan.used_insight_ids {
        if !context.has_insight(id) {
            out.push(Violation::new("unknown_used_insight", id.clone()));
        }
    }
    for id in &plan.used_action_ids {
        if context.action(id).is_none() {
            out.push(Violation::new("unknown_used_action", id.clone()));
        }
    }
    for metric in &plan.key_metrics {
        if context.fact(&metric.fact_id).is_none() {
            out.push(Violation::new("unknown_key_metric", metric.fact_id.clone()));
        }
    }
    for action in &plan.actions {
        if context.action(&action.action_id).is_none() {
            out.push(Violation::new("unknown_action_ref", action.action_id.clone()));
        }
    }

    // Placeholders: must resolve, and (declare⇔use) must be declared.
    for line in prose_lines(plan) {
        for capture in PLACEHOLDER_RE.captures_iter(&line) {
            let fact_id = &capture[1];
            if context.fact(fact_id).is_none() {
                out.push(Violation::new("unresolved_placeholder", fact_id));
            } else if !plan.used_fact_ids.iter().any(|id| id == fact_id) {
                out.push(Violation::new("undeclared_placeholder", fact_id));
            }
        }
    }
}

//
// ================= Numeric Grounding =================
//

fn check_numbers(plan: &AnswerPlan, context: &AdvisoryContext, out: &mut Vec<Violation>) {
    let allowed = allowed_values(context);

    for line in prose_lines(plan) {
        let stripped = PLACEHOLDER_RE.replace_all(&line, " ");
        let stripped = LIST_MARKER_RE.replace(&stripped, "");

        for capture in NUMBER_RE.captures_iter(&stripped) {
            let token = &capture[1];
            let unit = capture.get(2).map(|m| m.as_str().to_lowercase());
            let Ok(value) = token.parse::<f64>() else {
                continue;
            };

            if is_grounded(value, unit.as_deref(), &allowed) {
                continue;
            }

            out.push(Violation::new(
                "ungrounded_number",
                format!("{} in \"{}\"", token, line.trim()),
            ));
        }
    }
}

fn is_grounded(value: f64, unit: Option<&str>, allowed: &HashSet<u64>) -> bool {
    if allowed.contains(&value.to_bits()) || allowed.contains(&value.abs().to_bits()) {
        return true;
    }

    match unit {
        Some("%") => value <= ALLOWED_PERCENT_MAX,
        Some(u) if u.starts_with("day") || u.starts_with("week") || u.starts_with("month") => {
            value <= ALLOWED_CADENCE_MAX
        }
        _ => false,
    }
}

/// Every numeric value the context can vouch for: fact values, their
/// absolutes, timeframe magnitudes, and action parameters. Stored as
/// f64 bit patterns for exact set membership.
fn allowed_values(context: &AdvisoryContext) -> HashSet<u64> {
    let mut allowed = HashSet::new();
    let mut push = |v: f64| {
        allowed.insert(v.to_bits());
        allowed.insert(v.abs().to_bits());
    };

    for fact in &context.facts {
        match &fact.value {
            FactValue::Number(n) => push(*n),
            FactValue::Integer(i) => push(*i as f64),
            _ => {}
        }
        if let Ok(rendered) = fact.value_text.trim_start_matches('-').parse::<f64>() {
            push(rendered);
        }
        if let Some(timeframe) = &fact.timeframe {
            let digits: String = timeframe
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(magnitude) = digits.parse::<f64>() {
                push(magnitude);
            }
        }
    }

    for action in &context.actions {
        for value in action.params.values() {
            if let Some(n) = value.as_f64() {
                push(n);
            }
        }
    }

    allowed
}

fn prose_lines(plan: &AnswerPlan) -> Vec<String> {
    let mut lines = plan.summary_lines.clone();
    lines.extend(plan.actions.iter().map(|a| a.line.clone()));
    lines.extend(plan.assumptions.iter().cloned());
    lines.extend(plan.limitations.iter().cloned());
    lines.push(plan.disclaimer.clone());
    lines
}

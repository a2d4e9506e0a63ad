//! Bounded clarification protocol
//!
//! When hard triggers fire and rounds remain, the router emits exactly
//! one clarifying question chosen by a fixed precedence table over the
//! fired reason codes, always with a closed bounded option list.

use crate::models::{ClarifyingQuestion, IntentExtraction};

pub const REASON_EXTRACTION_UNAVAILABLE: &str = "extraction_unavailable";
pub const REASON_MISSING_SCENARIO_SLOTS: &str = "missing_scenario_slots";
pub const REASON_LOW_SCENARIO_CONFIDENCE: &str = "low_scenario_confidence";
pub const REASON_NARROW_TOP2_GAP: &str = "narrow_top2_gap";
pub const REASON_LOW_CONFIDENCE: &str = "low_confidence";

/// Slots a scenario request must carry before simulation is dispatched.
pub const REQUIRED_SCENARIO_SLOTS: &[&str] = &["horizon_months", "delta_amount"];

/// Question precedence, most specific first. The first fired code in this
/// order decides which single question is asked.
const QUESTION_PRECEDENCE: &[&str] = &[
    REASON_EXTRACTION_UNAVAILABLE,
    REASON_MISSING_SCENARIO_SLOTS,
    REASON_LOW_SCENARIO_CONFIDENCE,
    REASON_NARROW_TOP2_GAP,
    REASON_LOW_CONFIDENCE,
];

const ALL_TOPIC_OPTIONS: &[&str] = &[
    "spending",
    "planning",
    "risk",
    "scenario",
    "allocation",
    "services",
];

/// Missing required scenario slots, in declaration order.
pub fn missing_scenario_slots(extraction: &IntentExtraction) -> Vec<&'static str> {
    REQUIRED_SCENARIO_SLOTS
        .iter()
        .filter(|slot| !extraction.slots.contains_key(**slot))
        .copied()
        .collect()
}

/// Pick the single question for this round from the fired reason codes.
pub fn select_question(
    fired: &[String],
    extraction: Option<&IntentExtraction>,
) -> Option<ClarifyingQuestion> {
    let code = QUESTION_PRECEDENCE
        .iter()
        .find(|code| fired.iter().any(|f| f == **code))?;

    Some(build_question(code, extraction))
}

fn build_question(code: &str, extraction: Option<&IntentExtraction>) -> ClarifyingQuestion {
    match code {
        REASON_EXTRACTION_UNAVAILABLE => ClarifyingQuestion {
            code: code.to_string(),
            question: "I couldn't work out what you're after. Which of these is closest?"
                .to_string(),
            options: ALL_TOPIC_OPTIONS.iter().map(|s| s.to_string()).collect(),
        },
        REASON_MISSING_SCENARIO_SLOTS => {
            let missing = extraction
                .map(missing_scenario_slots)
                .unwrap_or_else(|| REQUIRED_SCENARIO_SLOTS.to_vec());
            ClarifyingQuestion {
                code: code.to_string(),
                question: format!(
                    "To simulate that scenario I still need: {}. Which one can you give me first?",
                    missing.join(", ")
                ),
                options: missing.iter().map(|s| s.to_string()).collect(),
            }
        }
        REASON_LOW_SCENARIO_CONFIDENCE => ClarifyingQuestion {
            code: code.to_string(),
            question: "Do you want me to simulate a hypothetical change, or look at your current picture?"
                .to_string(),
            options: vec![
                "simulate_scenario".to_string(),
                "current_picture".to_string(),
            ],
        },
        REASON_NARROW_TOP2_GAP => {
            // The question is limited to exactly the two ranked candidates.
            let options = extraction
                .map(|e| {
                    e.candidates
                        .iter()
                        .map(|c| c.intent.as_str().to_string())
                        .collect()
                })
                .unwrap_or_else(|| ALL_TOPIC_OPTIONS.iter().map(|s| s.to_string()).collect());
            ClarifyingQuestion {
                code: code.to_string(),
                question: "Your message could go two ways — which did you mean?".to_string(),
                options,
            }
        }
        _ => {
            let mut options: Vec<String> = extraction
                .map(|e| {
                    e.candidates
                        .iter()
                        .map(|c| c.intent.as_str().to_string())
                        .collect()
                })
                .unwrap_or_default();
            options.push("something_else".to_string());
            ClarifyingQuestion {
                code: REASON_LOW_CONFIDENCE.to_string(),
                question: "I'm not confident I understood. Which of these is closest?".to_string(),
                options,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Intent, IntentCandidate};
    use std::collections::BTreeMap;

    fn extraction_with_candidates(a: Intent, b: Intent) -> IntentExtraction {
        IntentExtraction {
            intent: a,
            sub_intent: None,
            confidence: 0.52,
            domain_relevance: 0.9,
            candidates: vec![
                IntentCandidate {
                    intent: a,
                    confidence: 0.52,
                },
                IntentCandidate {
                    intent: b,
                    confidence: 0.49,
                },
            ],
            slots: BTreeMap::new(),
            scenario_confidence: None,
        }
    }

    #[test]
    fn test_narrow_gap_question_limited_to_candidates() {
        let extraction = extraction_with_candidates(Intent::Scenario, Intent::Planning);
        let question = select_question(
            &[REASON_NARROW_TOP2_GAP.to_string()],
            Some(&extraction),
        )
        .unwrap();
        assert_eq!(question.options, vec!["scenario", "planning"]);
    }

    #[test]
    fn test_precedence_prefers_missing_slots_over_gap() {
        let extraction = extraction_with_candidates(Intent::Scenario, Intent::Planning);
        let fired = vec![
            REASON_NARROW_TOP2_GAP.to_string(),
            REASON_MISSING_SCENARIO_SLOTS.to_string(),
        ];
        let question = select_question(&fired, Some(&extraction)).unwrap();
        assert_eq!(question.code, REASON_MISSING_SCENARIO_SLOTS);
        assert_eq!(question.options, vec!["horizon_months", "delta_amount"]);
    }

    #[test]
    fn test_no_fired_codes_means_no_question() {
        assert!(select_question(&[], None).is_none());
    }

    #[test]
    fn test_missing_slots_respects_present_ones() {
        let mut extraction = extraction_with_candidates(Intent::Scenario, Intent::Planning);
        extraction
            .slots
            .insert("horizon_months".to_string(), serde_json::json!(12));
        assert_eq!(missing_scenario_slots(&extraction), vec!["delta_amount"]);
    }
}

//! Heuristic override layer
//!
//! Whitelisted lexical corrections to extractor mistakes. Each rule is a
//! (keywords, target intent, reason code) triple; the first rule whose
//! evidence contradicts the extracted intent wins.

use crate::models::Intent;

struct OverrideRule {
    code: &'static str,
    keywords: &'static [&'static str],
    target: Intent,
}

/// Ordered: earlier rules take precedence.
const OVERRIDE_RULES: &[OverrideRule] = &[
    OverrideRule {
        code: "override:anomaly_phrasing",
        keywords: &[
            "anomaly",
            "anomalies",
            "flagged",
            "suspicious",
            "unusual charge",
            "unusual transaction",
            "fraud",
        ],
        target: Intent::Risk,
    },
    OverrideRule {
        code: "override:what_if_phrasing",
        keywords: &["what if", "what-if", "suppose i", "if i cut", "if i saved"],
        target: Intent::Scenario,
    },
    OverrideRule {
        code: "override:jar_phrasing",
        keywords: &["jar", "jars", "envelope", "envelopes"],
        target: Intent::Allocation,
    },
    OverrideRule {
        code: "override:recurring_phrasing",
        keywords: &["subscription", "subscriptions", "recurring charge", "recurring payment"],
        target: Intent::Spending,
    },
];

/// Apply the first override whose lexical evidence contradicts the
/// extracted intent. Returns the corrected intent and the reason code.
pub fn apply_overrides(prompt: &str, extracted: Intent) -> Option<(Intent, &'static str)> {
    let lowered = prompt.to_lowercase();

    for rule in OVERRIDE_RULES {
        if rule.target == extracted {
            continue;
        }
        if rule.keywords.iter().any(|kw| lowered.contains(kw)) {
            return Some((rule.target, rule.code));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anomaly_phrasing_overrides_allocation() {
        let result = apply_overrides("my card was flagged for an unusual charge", Intent::Allocation);
        assert_eq!(result, Some((Intent::Risk, "override:anomaly_phrasing")));
    }

    #[test]
    fn test_no_override_when_intent_already_matches() {
        assert_eq!(apply_overrides("an anomaly was flagged", Intent::Risk), None);
    }

    #[test]
    fn test_no_override_without_evidence() {
        assert_eq!(apply_overrides("how much did I spend on food", Intent::Spending), None);
    }

    #[test]
    fn test_rule_order_is_respected() {
        // Both anomaly and jar evidence present: the earlier rule wins.
        let result = apply_overrides("suspicious charge in my savings jar", Intent::Planning);
        assert_eq!(result, Some((Intent::Risk, "override:anomaly_phrasing")));
    }
}

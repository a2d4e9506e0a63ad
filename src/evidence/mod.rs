//! Evidence → insight → action derivation
//!
//! Pure, deterministic, network-free. This layer is the ground truth the
//! rest of the system may not contradict: facts come only from documented
//! tool output fields, insights only from the rule table over facts, and
//! actions only from the rule table over insights.

pub mod actions;
pub mod facts;
pub mod insights;

pub use actions::derive_actions;
pub use facts::extract_facts;
pub use insights::derive_insights;

use crate::models::{AdvisoryContext, Citation, RiskAppetite};
use serde_json::Value;
use std::collections::BTreeMap;

/// Build the frozen Advisory Context for one request.
pub fn derive_advisory_context(
    tool_outputs: &BTreeMap<String, Value>,
    citations: Vec<Citation>,
    policy_flags: Vec<String>,
    risk_appetite: Option<RiskAppetite>,
) -> AdvisoryContext {
    let facts = extract_facts(tool_outputs);
    let insights = derive_insights(&facts);
    let actions = derive_actions(&insights, risk_appetite);

    AdvisoryContext {
        facts,
        insights,
        actions,
        citations,
        policy_flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_is_deterministic() {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "spend-analytics".to_string(),
            json!({ "total_spend": 2100.0, "net_cashflow": -80.5, "window_days": 30 }),
        );
        outputs.insert(
            "cashflow-forecast".to_string(),
            json!({ "projected_net": -240.0, "runway_months": 1.8, "horizon_days": 90 }),
        );

        let a = derive_advisory_context(&outputs, vec![], vec![], None);
        let b = derive_advisory_context(&outputs, vec![], vec![], None);

        let a_json = serde_json::to_string(&a).unwrap();
        let b_json = serde_json::to_string(&b).unwrap();
        assert_eq!(a_json, b_json);
        assert!(a.actions.len() >= 2 && a.actions.len() <= 4);
    }
}

//! Tool trait and registry
//!
//! Analytics tools are opaque remote procedures called by stable name.
//! HTTP-backed tools post to the analytics API service; the core
//! interprets only documented output fields.

use crate::models::{ToolErrorKind, ToolFailure};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

//
// ================= Tool Names =================
//

pub const SPEND_ANALYTICS: &str = "spend-analytics";
pub const ANOMALY_SIGNALS: &str = "anomaly-signals";
pub const CASHFLOW_FORECAST: &str = "cashflow-forecast";
pub const RISK_PROFILE: &str = "risk-profile-non-investment";
pub const GOAL_FEASIBILITY: &str = "goal-feasibility";
pub const RECURRING_DETECT: &str = "recurring-cashflow-detect";
pub const JAR_ALLOCATION: &str = "jar-allocation-suggest";
pub const WHAT_IF_SCENARIO: &str = "what-if-scenario";
pub const SERVICE_CATALOG: &str = "service-catalog-match";
pub const SUITABILITY_GUARD: &str = "suitability-guard";

//
// ================= Arguments & Errors =================

/// Fixed argument schema: user_id plus tool-specific numeric parameters.
/// Parameters are clamped to each tool's [min,max] before dispatch.
#[derive(Debug, Clone)]
pub struct ToolArgs {
    pub user_id: Uuid,
    pub params: BTreeMap<String, f64>,
}

impl ToolArgs {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            params: BTreeMap::new(),
        }
    }

    /// Lift numeric extraction slots into tool parameters; non-numeric
    /// slots are ignored here (they steer routing, not tool calls).
    pub fn from_slots(user_id: Uuid, slots: &BTreeMap<String, Value>) -> Self {
        let mut params = BTreeMap::new();
        for (key, value) in slots {
            let numeric = value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()));
            if let Some(n) = numeric {
                params.insert(key.clone(), n);
            }
        }
        Self { user_id, params }
    }
}

/// Typed tool-call failure; the kind drives retry classification.
#[derive(Debug, Clone)]
pub struct ToolCallError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolCallError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Status,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Validation,
            message: message.into(),
        }
    }

    /// Transient failures are worth a bounded retry; validation and 4xx
    /// outcomes are not.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ToolErrorKind::Transport | ToolErrorKind::Timeout)
    }
}

impl From<ToolCallError> for ToolFailure {
    fn from(e: ToolCallError) -> Self {
        ToolFailure {
            error_kind: e.kind,
            message: e.message,
        }
    }
}

impl std::fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Trait for a single analytics tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn call(&self, args: &ToolArgs) -> std::result::Result<Value, ToolCallError>;
}

//
// ================= Registry =================
//

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= HTTP Client =================
//

#[derive(Clone)]
pub struct AnalyticsApiClient {
    client: Client,
    base_url: String,
}

impl AnalyticsApiClient {
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("ANALYTICS_API_BASE_URL")
            .or_else(|_| env::var("TOOLS_API_BASE_URL"))
            .ok()?;

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .ok()?;

        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
    ) -> std::result::Result<Value, ToolCallError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                ToolCallError::transport(format!("request failed for {}: {}", path, e))
            })?;

        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            ToolCallError::validation(format!("invalid JSON response: {}", e))
        })?;

        if status.is_server_error() {
            return Err(ToolCallError::transport(format!(
                "analytics API returned {} for {}: {}",
                status, path, body
            )));
        }
        if !status.is_success() {
            return Err(ToolCallError::status(format!(
                "analytics API returned {} for {}: {}",
                status, path, body
            )));
        }

        Ok(body)
    }
}

//
// ================= Parameter Clamp Tables =================
//

/// Numeric parameter bounds for one tool argument.
pub struct ParamSpec {
    pub key: &'static str,
    pub min: f64,
    pub max: f64,
    /// Used when the caller did not supply the parameter; `None` omits it.
    pub default: Option<f64>,
}

const SPEND_PARAMS: &[ParamSpec] = &[ParamSpec {
    key: "window_days",
    min: 7.0,
    max: 365.0,
    default: Some(30.0),
}];

const ANOMALY_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        key: "window_days",
        min: 7.0,
        max: 180.0,
        default: Some(30.0),
    },
    ParamSpec {
        key: "sensitivity",
        min: 0.1,
        max: 1.0,
        default: Some(0.5),
    },
];

const FORECAST_PARAMS: &[ParamSpec] = &[ParamSpec {
    key: "horizon_days",
    min: 30.0,
    max: 365.0,
    default: Some(90.0),
}];

const GOAL_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        key: "target_amount",
        min: 0.0,
        max: 1_000_000_000.0,
        default: None,
    },
    ParamSpec {
        key: "horizon_months",
        min: 1.0,
        max: 600.0,
        default: Some(12.0),
    },
];

const RECURRING_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        key: "window_days",
        min: 30.0,
        max: 365.0,
        default: Some(90.0),
    },
    ParamSpec {
        key: "min_occurrences",
        min: 2.0,
        max: 12.0,
        default: Some(3.0),
    },
];

const JAR_PARAMS: &[ParamSpec] = &[ParamSpec {
    key: "monthly_surplus",
    min: 0.0,
    max: 100_000_000.0,
    default: None,
}];

const SCENARIO_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        key: "delta_amount",
        min: -100_000_000.0,
        max: 100_000_000.0,
        default: None,
    },
    ParamSpec {
        key: "horizon_months",
        min: 1.0,
        max: 600.0,
        default: Some(12.0),
    },
];

const SERVICE_PARAMS: &[ParamSpec] = &[ParamSpec {
    key: "limit",
    min: 1.0,
    max: 10.0,
    default: Some(5.0),
}];

const NO_PARAMS: &[ParamSpec] = &[];

//
// ================= HTTP-backed Analytics Tool =================
//

/// One struct, many instances: each analytics tool differs only in name,
/// endpoint path, and parameter bounds.
pub struct AnalyticsTool {
    name: &'static str,
    description: &'static str,
    path: &'static str,
    params: &'static [ParamSpec],
    api: Option<AnalyticsApiClient>,
}

impl AnalyticsTool {
    fn new(
        name: &'static str,
        description: &'static str,
        path: &'static str,
        params: &'static [ParamSpec],
        api: Option<AnalyticsApiClient>,
    ) -> Self {
        Self {
            name,
            description,
            path,
            params,
            api,
        }
    }

    fn build_body(&self, args: &ToolArgs) -> Value {
        let mut body = json!({ "user_id": args.user_id.to_string() });

        for spec in self.params {
            let supplied = args.params.get(spec.key).copied().or(spec.default);
            if let Some(raw) = supplied {
                body[spec.key] = json!(raw.clamp(spec.min, spec.max));
            }
        }

        body
    }
}

#[async_trait::async_trait]
impl Tool for AnalyticsTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    async fn call(&self, args: &ToolArgs) -> std::result::Result<Value, ToolCallError> {
        let api = self.api.as_ref().ok_or_else(|| {
            ToolCallError::validation(
                "ANALYTICS_API_BASE_URL (or TOOLS_API_BASE_URL) is not configured",
            )
        })?;

        let body = self.build_body(args);
        api.post_json(self.path, &body).await
    }
}

//
// ================= Static Tool (demo & tests) =================
//

/// Tool returning a canned payload or a canned failure. Keeps the demo
/// binary and tests functional without the analytics service.
pub struct StaticTool {
    name: &'static str,
    payload: std::result::Result<Value, ToolCallError>,
}

impl StaticTool {
    pub fn succeeding(name: &'static str, payload: Value) -> Self {
        Self {
            name,
            payload: Ok(payload),
        }
    }

    pub fn failing(name: &'static str, kind: ToolErrorKind, message: &str) -> Self {
        Self {
            name,
            payload: Err(ToolCallError {
                kind,
                message: message.to_string(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Canned analytics payload"
    }

    async fn call(&self, _args: &ToolArgs) -> std::result::Result<Value, ToolCallError> {
        self.payload.clone()
    }
}

//
// ================= Registries =================
//

/// HTTP-backed registry for production use.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let api = AnalyticsApiClient::from_env();

    let tools: &[(&'static str, &'static str, &'static str, &'static [ParamSpec])] = &[
        (
            SPEND_ANALYTICS,
            "Spending totals, categories, and net cashflow over a window",
            "/tools/spend-analytics",
            SPEND_PARAMS,
        ),
        (
            ANOMALY_SIGNALS,
            "Anomalous transaction and balance signals",
            "/tools/anomaly-signals",
            ANOMALY_PARAMS,
        ),
        (
            CASHFLOW_FORECAST,
            "Forward cashflow forecast and runway",
            "/tools/cashflow-forecast",
            FORECAST_PARAMS,
        ),
        (
            RISK_PROFILE,
            "Non-investment financial risk profile",
            "/tools/risk-profile-non-investment",
            NO_PARAMS,
        ),
        (
            GOAL_FEASIBILITY,
            "Savings goal feasibility scoring",
            "/tools/goal-feasibility",
            GOAL_PARAMS,
        ),
        (
            RECURRING_DETECT,
            "Recurring inflow/outflow detection",
            "/tools/recurring-cashflow-detect",
            RECURRING_PARAMS,
        ),
        (
            JAR_ALLOCATION,
            "Jar allocation suggestion for monthly surplus",
            "/tools/jar-allocation-suggest",
            JAR_PARAMS,
        ),
        (
            WHAT_IF_SCENARIO,
            "What-if scenario simulation",
            "/tools/what-if-scenario",
            SCENARIO_PARAMS,
        ),
        (
            SERVICE_CATALOG,
            "Matching entries from the service catalog",
            "/tools/service-catalog-match",
            SERVICE_PARAMS,
        ),
        (
            SUITABILITY_GUARD,
            "Suitability and authorization check for requested actions",
            "/tools/suitability-guard",
            NO_PARAMS,
        ),
    ];

    for &(name, description, path, params) in tools {
        registry.register(Arc::new(AnalyticsTool::new(
            name,
            description,
            path,
            params,
            api.clone(),
        )));
    }

    registry
}

/// Static registry with plausible payloads; used by the demo binary and
/// kept available for tests.
pub fn create_demo_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(StaticTool::succeeding(
        SPEND_ANALYTICS,
        json!({
            "total_spend": 2840.55,
            "net_cashflow": -312.40,
            "top_category": "dining",
            "window_days": 30
        }),
    )));
    registry.register(Arc::new(StaticTool::succeeding(
        ANOMALY_SIGNALS,
        json!({ "flags": ["abnormal_spend"], "flag_count": 1 }),
    )));
    registry.register(Arc::new(StaticTool::succeeding(
        CASHFLOW_FORECAST,
        json!({ "projected_net": -910.20, "runway_months": 2.4, "horizon_days": 90 }),
    )));
    registry.register(Arc::new(StaticTool::succeeding(
        RISK_PROFILE,
        json!({ "score": 0.71, "band": "elevated" }),
    )));
    registry.register(Arc::new(StaticTool::succeeding(
        GOAL_FEASIBILITY,
        json!({ "feasibility_score": 0.42, "gap_amount": 5400.0, "target_months": 18 }),
    )));
    registry.register(Arc::new(StaticTool::succeeding(
        RECURRING_DETECT,
        json!({ "recurring_count": 7, "monthly_total": 1260.0 }),
    )));
    registry.register(Arc::new(StaticTool::succeeding(
        JAR_ALLOCATION,
        json!({ "jars": { "essentials": 55, "savings": 25, "flexible": 20 } }),
    )));
    registry.register(Arc::new(StaticTool::succeeding(
        WHAT_IF_SCENARIO,
        json!({ "delta_net": -1800.0, "outcome": "tighter", "horizon_months": 12 }),
    )));
    registry.register(Arc::new(StaticTool::succeeding(
        SERVICE_CATALOG,
        json!({ "matches": [{ "name": "budget-coaching" }], "match_count": 1 }),
    )));
    registry.register(Arc::new(StaticTool::succeeding(
        SUITABILITY_GUARD,
        json!({ "decision": "allow", "allow": true }),
    )));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = create_demo_registry();
        assert!(registry.get(SPEND_ANALYTICS).is_some());
        assert!(registry.get("no-such-tool").is_none());
        assert_eq!(registry.list().len(), 10);
    }

    #[test]
    fn test_param_clamping() {
        let tool = AnalyticsTool::new(
            SPEND_ANALYTICS,
            "test",
            "/tools/spend-analytics",
            SPEND_PARAMS,
            None,
        );

        let mut args = ToolArgs::new(Uuid::new_v4());
        args.params.insert("window_days".to_string(), 9999.0);
        let body = tool.build_body(&args);
        assert_eq!(body["window_days"], json!(365.0));

        let args = ToolArgs::new(Uuid::new_v4());
        let body = tool.build_body(&args);
        assert_eq!(body["window_days"], json!(30.0));
    }

    #[test]
    fn test_missing_param_without_default_is_omitted() {
        let tool = AnalyticsTool::new(
            GOAL_FEASIBILITY,
            "test",
            "/tools/goal-feasibility",
            GOAL_PARAMS,
            None,
        );
        let args = ToolArgs::new(Uuid::new_v4());
        let body = tool.build_body(&args);
        assert!(body.get("target_amount").is_none());
        assert_eq!(body["horizon_months"], json!(12.0));
    }

    #[test]
    fn test_args_from_slots_keeps_numeric_only() {
        let mut slots = BTreeMap::new();
        slots.insert("horizon_months".to_string(), json!(24));
        slots.insert("delta_amount".to_string(), json!("-500"));
        slots.insert("risk_appetite".to_string(), json!("balanced"));

        let args = ToolArgs::from_slots(Uuid::new_v4(), &slots);
        assert_eq!(args.params.get("horizon_months"), Some(&24.0));
        assert_eq!(args.params.get("delta_amount"), Some(&-500.0));
        assert!(!args.params.contains_key("risk_appetite"));
    }

    #[tokio::test]
    async fn test_static_tool_failure_kind() {
        let tool = StaticTool::failing(ANOMALY_SIGNALS, ToolErrorKind::Transport, "down");
        let err = tool.call(&ToolArgs::new(Uuid::new_v4())).await.unwrap_err();
        assert!(err.is_transient());
    }
}

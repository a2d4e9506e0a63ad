//! Process-start configuration
//!
//! Thresholds, mode flags, and model identifiers are injected once at
//! startup and stay immutable for a request's duration.

use std::env;
use std::time::Duration;

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Admission gate thresholds.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Score at or above which a repair attempt is made.
    pub repair_threshold: f64,
    /// Score above which the request short-circuits.
    pub fail_fast_threshold: f64,
    /// Minimum score reduction for a repair candidate to be accepted.
    pub min_repair_delta: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            repair_threshold: 0.02,
            fail_fast_threshold: 0.3,
            min_repair_delta: 0.015,
        }
    }
}

/// Router and clarification policy thresholds.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub policy_version: String,
    pub min_confidence: f64,
    pub top2_gap_min: f64,
    pub scenario_confidence_min: f64,
    pub min_domain_relevance: f64,
    /// Hard upper bound on clarifying rounds per conversation.
    pub max_questions: u8,
    /// Schema-invalid extraction retries before forcing out_of_scope.
    pub extraction_max_retries: u8,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            policy_version: "route-policy/v3".to_string(),
            min_confidence: 0.6,
            top2_gap_min: 0.15,
            scenario_confidence_min: 0.55,
            min_domain_relevance: 0.35,
            max_questions: 2,
            extraction_max_retries: 1,
        }
    }
}

/// Fan-out pool and timeout settings.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Worker pool cap; effective size is min(cap, bundle size).
    pub max_workers: usize,
    pub overall_timeout: Duration,
    pub call_timeout: Duration,
    /// Transient-failure retries per tool call.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_workers: 6,
            overall_timeout: Duration::from_secs(20),
            call_timeout: Duration::from_secs(8),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

/// Synthesis loop bounds.
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Generation attempts: the initial one plus one corrective retry.
    pub max_attempts: u8,
    /// Facts listed by the deterministic fallback renderer.
    pub fallback_fact_limit: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            fallback_fact_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub gate: GateConfig,
    pub router: RouterConfig,
    pub fanout: FanoutConfig,
    pub synthesis: SynthesisConfig,
}

impl AgentConfig {
    /// Build configuration from the environment, falling back to defaults.
    /// Call after `dotenv::dotenv()` in the binaries.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gate: GateConfig {
                repair_threshold: env_f64(
                    "GATE_REPAIR_THRESHOLD",
                    defaults.gate.repair_threshold,
                ),
                fail_fast_threshold: env_f64(
                    "GATE_FAIL_FAST_THRESHOLD",
                    defaults.gate.fail_fast_threshold,
                ),
                min_repair_delta: env_f64(
                    "GATE_MIN_REPAIR_DELTA",
                    defaults.gate.min_repair_delta,
                ),
            },
            router: RouterConfig {
                policy_version: env::var("ROUTE_POLICY_VERSION")
                    .unwrap_or(defaults.router.policy_version),
                min_confidence: env_f64("ROUTE_MIN_CONFIDENCE", defaults.router.min_confidence),
                top2_gap_min: env_f64("ROUTE_TOP2_GAP_MIN", defaults.router.top2_gap_min),
                scenario_confidence_min: env_f64(
                    "ROUTE_SCENARIO_CONFIDENCE_MIN",
                    defaults.router.scenario_confidence_min,
                ),
                min_domain_relevance: env_f64(
                    "ROUTE_MIN_DOMAIN_RELEVANCE",
                    defaults.router.min_domain_relevance,
                ),
                max_questions: env_u64(
                    "ROUTE_MAX_QUESTIONS",
                    defaults.router.max_questions as u64,
                ) as u8,
                extraction_max_retries: env_u64(
                    "ROUTE_EXTRACTION_MAX_RETRIES",
                    defaults.router.extraction_max_retries as u64,
                ) as u8,
            },
            fanout: FanoutConfig {
                max_workers: env_u64("FANOUT_MAX_WORKERS", defaults.fanout.max_workers as u64)
                    as usize,
                overall_timeout: Duration::from_millis(env_u64(
                    "FANOUT_OVERALL_TIMEOUT_MS",
                    defaults.fanout.overall_timeout.as_millis() as u64,
                )),
                call_timeout: Duration::from_millis(env_u64(
                    "FANOUT_CALL_TIMEOUT_MS",
                    defaults.fanout.call_timeout.as_millis() as u64,
                )),
                max_retries: env_u64("FANOUT_MAX_RETRIES", defaults.fanout.max_retries as u64)
                    as u32,
                retry_base_delay: Duration::from_millis(env_u64(
                    "FANOUT_RETRY_BASE_DELAY_MS",
                    defaults.fanout.retry_base_delay.as_millis() as u64,
                )),
            },
            synthesis: SynthesisConfig {
                max_attempts: env_u64(
                    "SYNTHESIS_MAX_ATTEMPTS",
                    defaults.synthesis.max_attempts as u64,
                ) as u8,
                fallback_fact_limit: env_u64(
                    "SYNTHESIS_FALLBACK_FACT_LIMIT",
                    defaults.synthesis.fallback_fact_limit as u64,
                ) as usize,
            },
        }
    }
}

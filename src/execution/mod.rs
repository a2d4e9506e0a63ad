//! Tool execution fan-out
//!
//! Concurrent dispatch of the chosen tool bundle through a bounded worker
//! pool. Each call is isolated: a failure becomes a per-tool error entry
//! and never aborts siblings. Downstream stages wait for the fan-out to
//! fully settle or time out; partial results are acceptable, partial
//! waiting is not.

use crate::config::FanoutConfig;
use crate::models::{ToolErrorKind, ToolFailure};
use crate::tools::{Tool, ToolArgs, ToolCallError, ToolRegistry};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Merged outcome of one fan-out: successful outputs and failures keyed
/// by tool name. The two maps never share a key.
#[derive(Debug, Default)]
pub struct FanoutResult {
    pub outputs: BTreeMap<String, Value>,
    pub errors: BTreeMap<String, ToolFailure>,
}

pub struct FanoutEngine {
    registry: Arc<ToolRegistry>,
    config: FanoutConfig,
}

impl FanoutEngine {
    pub fn new(registry: Arc<ToolRegistry>, config: FanoutConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Dispatch every tool in the bundle concurrently and merge the
    /// settled results in one join step.
    pub async fn dispatch(&self, bundle: &[String], args: &ToolArgs) -> FanoutResult {
        let mut result = FanoutResult::default();
        if bundle.is_empty() {
            return result;
        }

        let pool_size = self.config.max_workers.min(bundle.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(pool_size));
        let mut join_set: JoinSet<(String, std::result::Result<Value, ToolCallError>)> =
            JoinSet::new();

        debug!(
            bundle_size = bundle.len(),
            pool_size, "Starting tool fan-out"
        );

        for name in bundle {
            let name = name.clone();

            let Some(tool) = self.registry.get(&name) else {
                result.errors.insert(
                    name.clone(),
                    ToolFailure {
                        error_kind: ToolErrorKind::Validation,
                        message: "tool not registered".to_string(),
                    },
                );
                warn!(tool_name = %name, "Tool not registered");
                continue;
            };

            let semaphore = semaphore.clone();
            let args = args.clone();
            let call_timeout = self.config.call_timeout;
            let max_retries = self.config.max_retries;
            let base_delay = self.config.retry_base_delay;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = call_with_retry(
                    tool.as_ref(),
                    &args,
                    call_timeout,
                    max_retries,
                    base_delay,
                )
                .await;
                (name, outcome)
            });
        }

        let collect = async {
            let mut settled = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(entry) => settled.push(entry),
                    Err(e) => warn!("Fan-out worker panicked: {}", e),
                }
            }
            settled
        };

        let collected = timeout(self.config.overall_timeout, collect).await;
        let settled = match collected {
            Ok(settled) => settled,
            Err(_) => {
                warn!(
                    timeout_ms = self.config.overall_timeout.as_millis() as u64,
                    "Fan-out deadline elapsed; abandoning unfinished calls"
                );
                join_set.abort_all();
                Vec::new()
            }
        };

        for (name, outcome) in settled {
            match outcome {
                Ok(output) => {
                    result.outputs.insert(name, output);
                }
                Err(e) => {
                    warn!(tool_name = %name, error = %e, "Tool call failed");
                    result.errors.insert(name, e.into());
                }
            }
        }

        // Calls still in flight at the deadline are recorded as timeouts.
        for name in bundle {
            if !result.outputs.contains_key(name) && !result.errors.contains_key(name) {
                result.errors.insert(
                    name.clone(),
                    ToolFailure {
                        error_kind: ToolErrorKind::Timeout,
                        message: "fan-out deadline elapsed".to_string(),
                    },
                );
            }
        }

        debug!(
            output_count = result.outputs.len(),
            error_count = result.errors.len(),
            "Fan-out settled"
        );

        result
    }
}

/// One tool call with per-attempt transport timeout and exponential
/// backoff. Only transient failures (connection errors, 5xx, timeouts)
/// are retried; validation and 4xx outcomes fail immediately.
async fn call_with_retry(
    tool: &dyn Tool,
    args: &ToolArgs,
    call_timeout: std::time::Duration,
    max_retries: u32,
    base_delay: std::time::Duration,
) -> std::result::Result<Value, ToolCallError> {
    let mut attempt = 0u32;
    loop {
        let outcome = match timeout(call_timeout, tool.call(args)).await {
            Ok(result) => result,
            Err(_) => Err(ToolCallError {
                kind: ToolErrorKind::Timeout,
                message: format!("call exceeded {}ms", call_timeout.as_millis()),
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => {
                let delay = base_delay * 2u32.saturating_pow(attempt);
                debug!(
                    tool_name = tool.name(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying transient tool failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::StaticTool;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn test_config() -> FanoutConfig {
        FanoutConfig {
            max_workers: 4,
            overall_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_millis(200),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(5),
        }
    }

    fn bundle(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Fails transiently a fixed number of times, then succeeds.
    struct FlakyTool {
        failures_left: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn description(&self) -> &'static str {
            "fails then recovers"
        }

        async fn call(&self, _args: &ToolArgs) -> std::result::Result<Value, ToolCallError> {
            if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(ToolCallError::transport("connection reset"))
            } else {
                Ok(json!({ "ok": true }))
            }
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn description(&self) -> &'static str {
            "never finishes in time"
        }

        async fn call(&self, _args: &ToolArgs) -> std::result::Result<Value, ToolCallError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn test_partial_failure_isolated() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::succeeding("a", json!({"v": 1}))));
        registry.register(Arc::new(StaticTool::succeeding("b", json!({"v": 2}))));
        registry.register(Arc::new(StaticTool::failing(
            "c",
            ToolErrorKind::Validation,
            "bad input",
        )));

        let engine = FanoutEngine::new(Arc::new(registry), test_config());
        let result = engine
            .dispatch(&bundle(&["a", "b", "c"]), &ToolArgs::new(Uuid::new_v4()))
            .await;

        assert_eq!(result.outputs.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors["c"].error_kind, ToolErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_unregistered_tool_becomes_error_entry() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::succeeding("a", json!({}))));

        let engine = FanoutEngine::new(Arc::new(registry), test_config());
        let result = engine
            .dispatch(&bundle(&["a", "ghost"]), &ToolArgs::new(Uuid::new_v4()))
            .await;

        assert!(result.outputs.contains_key("a"));
        assert_eq!(result.errors["ghost"].error_kind, ToolErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_to_success() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FlakyTool {
            failures_left: AtomicU32::new(2),
        }));

        let engine = FanoutEngine::new(Arc::new(registry), test_config());
        let result = engine
            .dispatch(&bundle(&["flaky"]), &ToolArgs::new(Uuid::new_v4()))
            .await;

        assert_eq!(result.outputs["flaky"], json!({ "ok": true }));
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_retried() {
        // failures_left = 1 with a non-transient error would succeed on a
        // retry; the error kind must prevent that.
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StaticTool::failing(
            "a",
            ToolErrorKind::Status,
            "422",
        )));

        let engine = FanoutEngine::new(Arc::new(registry), test_config());
        let result = engine
            .dispatch(&bundle(&["a"]), &ToolArgs::new(Uuid::new_v4()))
            .await;
        assert_eq!(result.errors["a"].error_kind, ToolErrorKind::Status);
    }

    #[tokio::test]
    async fn test_slow_call_times_out_without_blocking_siblings() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        registry.register(Arc::new(StaticTool::succeeding("fast", json!({"v": 1}))));

        let mut config = test_config();
        config.max_retries = 0;
        let engine = FanoutEngine::new(Arc::new(registry), config);
        let result = engine
            .dispatch(&bundle(&["slow", "fast"]), &ToolArgs::new(Uuid::new_v4()))
            .await;

        assert!(result.outputs.contains_key("fast"));
        assert_eq!(result.errors["slow"].error_kind, ToolErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_empty_bundle_is_noop() {
        let engine = FanoutEngine::new(Arc::new(ToolRegistry::new()), test_config());
        let result = engine.dispatch(&[], &ToolArgs::new(Uuid::new_v4())).await;
        assert!(result.outputs.is_empty());
        assert!(result.errors.is_empty());
    }
}

//! Tool execution
//!
//! Every tool invocation goes through here: lookup, parameter validation,
//! cache, timeout-guarded dispatch. Independent calls of one step run
//! concurrently. A failing tool never takes the step down with it; its
//! failure becomes a data gap. Only data-store unavailability escalates.

use crate::cache::{cache_key, Cache};
use crate::clock::Clock;
use crate::error::OrchestrationError;
use crate::models::{
    AccountScope, CollectedData, ExecutionStatus, ToolCall, ToolError, ToolExecutionResult,
    ToolOutput,
};
use crate::tools::ToolRegistry;
use crate::Result;
use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maximum calls allowed in one step (guard against runaway planners)
pub const MAX_CALLS_PER_STEP: usize = 16;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(20);

/// Outcome of a single invocation
#[derive(Debug)]
pub struct ExecutedCall {
    pub result: ToolExecutionResult,
    pub collected: CollectedData,
    /// Set when the failure must abort the turn
    pub fatal: Option<OrchestrationError>,
}

/// Outcome of one step (a batch of independent calls)
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub results: Vec<ToolExecutionResult>,
    pub collected: CollectedData,
    pub fatal: Option<OrchestrationError>,
}

impl StepOutcome {
    /// Per-tool output payloads, used as step findings
    pub fn findings(&self) -> Value {
        let mut map = Map::new();
        for result in &self.results {
            let value = match (&result.output, &result.error) {
                (Some(output), _) => output.clone(),
                (None, Some(error)) => json!({ "error": error.message }),
                (None, None) => Value::Null,
            };
            map.insert(result.tool_name.clone(), value);
        }
        Value::Object(map)
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status != ExecutionStatus::Success)
            .count()
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    cache: Arc<Cache<ToolOutput>>,
    clock: Arc<dyn Clock>,
    tool_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache: Arc<Cache<ToolOutput>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            cache,
            clock,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Cache<ToolOutput> {
        &self.cache
    }

    /// Restrict `account_ids` to the session scope wherever a tool accepts it.
    ///
    /// Caller-supplied ids are intersected with the scope. A missing list,
    /// a malformed one, or an empty intersection falls back to the scope.
    pub fn apply_scope(&self, calls: Vec<ToolCall>, scope: &AccountScope) -> Vec<ToolCall> {
        let Some(ids) = scope.account_ids() else {
            return calls;
        };

        calls
            .into_iter()
            .map(|mut call| {
                let accepts_scope = self
                    .registry
                    .get(&call.name)
                    .map(|tool| tool.schema().fields.iter().any(|f| f.name == "account_ids"))
                    .unwrap_or(false);

                if accepts_scope {
                    if call.arguments.is_null() {
                        call.arguments = json!({});
                    }
                    if let Some(args) = call.arguments.as_object_mut() {
                        let requested: Vec<&str> = args
                            .get("account_ids")
                            .and_then(Value::as_array)
                            .map(|items| items.iter().filter_map(Value::as_str).collect())
                            .unwrap_or_default();
                        let allowed: Vec<&String> = ids
                            .iter()
                            .filter(|id| requested.contains(&id.as_str()))
                            .collect();

                        if requested.len() > allowed.len() {
                            warn!(
                                tool = %call.name,
                                requested = ?requested,
                                "Dropping account ids outside the session scope"
                            );
                        }
                        let restricted = if allowed.is_empty() { json!(ids) } else { json!(allowed) };
                        args.insert("account_ids".to_string(), restricted);
                    }
                }
                call
            })
            .collect()
    }

    /// Execute one step's calls concurrently.
    ///
    /// Identical calls (same tool, same arguments) run once. Results come
    /// back in request order.
    pub async fn execute_step(&self, calls: &[ToolCall]) -> Result<StepOutcome> {
        if calls.len() > MAX_CALLS_PER_STEP {
            return Err(OrchestrationError::InvalidPlan(format!(
                "Step exceeds maximum allowed calls ({})",
                MAX_CALLS_PER_STEP
            )));
        }

        let mut seen = HashSet::new();
        let unique: Vec<&ToolCall> = calls
            .iter()
            .filter(|call| seen.insert(cache_key(&call.name, &call.arguments)))
            .collect();

        if unique.len() < calls.len() {
            debug!(
                requested = calls.len(),
                unique = unique.len(),
                "Deduplicated identical tool calls"
            );
        }

        let executed = join_all(unique.into_iter().map(|call| self.invoke(call))).await;

        let mut outcome = StepOutcome::default();
        for call in executed {
            outcome.collected = outcome.collected.merged(&call.collected);
            if outcome.fatal.is_none() {
                outcome.fatal = call.fatal;
            }
            outcome.results.push(call.result);
        }

        info!(
            calls = outcome.results.len(),
            failed = outcome.failed_count(),
            fatal = outcome.fatal.is_some(),
            "Step executed"
        );

        Ok(outcome)
    }

    /// Execute a single call. Never returns an error: failures are encoded
    /// in the result.
    pub async fn invoke(&self, call: &ToolCall) -> ExecutedCall {
        let start = Instant::now();

        let tool = match self.registry.lookup(&call.name) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool_name = %call.name, "Tool not registered");
                return self.failure(call, call.arguments.clone(), ExecutionStatus::Skipped, e, start);
            }
        };

        let params = match tool.schema().validate(&call.name, &call.arguments) {
            Ok(params) => params,
            Err(e) => {
                warn!(tool_name = %call.name, error = %e, "Tool parameters rejected");
                return self.failure(call, call.arguments.clone(), ExecutionStatus::Failed, e, start);
            }
        };

        let key = cache_key(&call.name, &params);
        if let Some(output) = self.cache.get(&key) {
            debug!(tool_name = %call.name, "Cache hit");
            return self.success(call, params, output, true, start);
        }

        let outcome = tokio::time::timeout(self.tool_timeout, tool.execute(&params)).await;

        match outcome {
            Ok(Ok(output)) => {
                self.cache.set(key, output.clone(), tool.cache_ttl_secs());
                self.success(call, params, output, false, start)
            }
            Ok(Err(e)) => {
                warn!(tool_name = %call.name, error = %e, "Tool execution failed");
                self.failure(call, params, ExecutionStatus::Failed, e, start)
            }
            Err(_) => {
                let e = OrchestrationError::ToolTimeout(format!(
                    "{} exceeded {:?}",
                    call.name, self.tool_timeout
                ));
                warn!(tool_name = %call.name, "Tool execution timed out");
                self.failure(call, params, ExecutionStatus::Failed, e, start)
            }
        }
    }

    fn success(
        &self,
        call: &ToolCall,
        params: Value,
        output: ToolOutput,
        cache_hit: bool,
        start: Instant,
    ) -> ExecutedCall {
        ExecutedCall {
            result: ToolExecutionResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                parameters: params,
                output: Some(output.data),
                error: None,
                status: ExecutionStatus::Success,
                duration_ms: start.elapsed().as_millis() as u64,
                cache_hit,
                executed_at: self.clock.now(),
            },
            collected: output.collected,
            fatal: None,
        }
    }

    fn failure(
        &self,
        call: &ToolCall,
        params: Value,
        status: ExecutionStatus,
        error: OrchestrationError,
        start: Instant,
    ) -> ExecutedCall {
        let message = error.to_string();
        ExecutedCall {
            result: ToolExecutionResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                parameters: params,
                output: None,
                error: Some(ToolError {
                    kind: error.kind().to_string(),
                    message: message.clone(),
                }),
                status,
                duration_ms: start.elapsed().as_millis() as u64,
                cache_hit: false,
                executed_at: self.clock.now(),
            },
            collected: CollectedData::with_gap(&call.name, message),
            fatal: error.is_fatal().then_some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::{fixed_now, CountingDataStore, FailingTool, SlowTool};
    use crate::tools::create_default_registry;
    use chrono::Duration as ChronoDuration;

    struct Harness {
        executor: ToolExecutor,
        store: Arc<CountingDataStore>,
        clock: ManualClock,
    }

    fn harness(extra: Vec<Arc<dyn crate::tools::Tool>>) -> Harness {
        let clock = ManualClock::new(fixed_now());
        let store = Arc::new(CountingDataStore::sample(fixed_now()));
        let mut registry = create_default_registry(store.clone(), Arc::new(clock.clone())).unwrap();
        for tool in extra {
            registry.register(tool).unwrap();
        }
        let cache = Arc::new(Cache::new(64, Arc::new(clock.clone())));
        let executor = ToolExecutor::new(Arc::new(registry), cache, Arc::new(clock.clone()))
            .with_timeout(Duration::from_secs(2));
        Harness { executor, store, clock }
    }

    #[tokio::test]
    async fn test_second_identical_call_is_served_from_cache() {
        let h = harness(vec![]);
        let call = ToolCall::new("get_cost_summary", json!({ "days": 30 }));

        let first = h.executor.invoke(&call).await;
        let second = h.executor.invoke(&call).await;

        assert_eq!(first.result.status, ExecutionStatus::Success);
        assert!(!first.result.cache_hit);
        assert!(second.result.cache_hit);
        assert_eq!(first.result.output, second.result.output);
        assert_eq!(h.store.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_entry_expires_after_ttl() {
        let h = harness(vec![]);
        let call = ToolCall::new("get_alerts", json!({}));

        h.executor.invoke(&call).await;
        h.clock.advance(ChronoDuration::seconds(crate::tools::TTL_VOLATILE_SECS as i64 + 1));
        let again = h.executor.invoke(&call).await;

        assert!(!again.result.cache_hit);
        assert_eq!(h.store.calls(), 2);
    }

    #[tokio::test]
    async fn test_defaults_make_calls_equivalent() {
        let h = harness(vec![]);
        h.executor
            .invoke(&ToolCall::new("get_cost_summary", json!({})))
            .await;
        let explicit = h
            .executor
            .invoke(&ToolCall::new("get_cost_summary", json!({ "days": 30 })))
            .await;
        assert!(explicit.result.cache_hit);
    }

    #[tokio::test]
    async fn test_validation_failure_is_not_dispatched() {
        let h = harness(vec![]);
        let executed = h
            .executor
            .invoke(&ToolCall::new("get_cost_summary", json!({ "days": "thirty" })))
            .await;

        assert_eq!(executed.result.status, ExecutionStatus::Failed);
        assert_eq!(executed.result.error.unwrap().kind, "validation");
        assert_eq!(executed.collected.gaps.len(), 1);
        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_skipped() {
        let h = harness(vec![]);
        let executed = h.executor.invoke(&ToolCall::new("drop_tables", json!({}))).await;
        assert_eq!(executed.result.status, ExecutionStatus::Skipped);
        assert!(executed.fatal.is_none());
    }

    #[tokio::test]
    async fn test_failing_tool_does_not_affect_siblings() {
        let h = harness(vec![Arc::new(FailingTool::new("get_pricing", || {
            OrchestrationError::ToolExecution("pricing api down".into())
        }))]);

        let outcome = h
            .executor
            .execute_step(&[
                ToolCall::new("get_pricing", json!({})),
                ToolCall::new("get_cost_summary", json!({})),
                ToolCall::new("find_idle_resources", json!({})),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[0].status, ExecutionStatus::Failed);
        assert_eq!(outcome.results[1].status, ExecutionStatus::Success);
        assert_eq!(outcome.results[2].status, ExecutionStatus::Success);
        assert!(outcome.fatal.is_none());
        assert_eq!(outcome.collected.gaps.len(), 1);
        assert!(!outcome.collected.costs.is_empty());
        assert!(!outcome.collected.resources.is_empty());
    }

    #[tokio::test]
    async fn test_data_store_unavailable_is_fatal() {
        let h = harness(vec![Arc::new(FailingTool::new("get_pricing", || {
            OrchestrationError::DataStoreUnavailable("connection refused".into())
        }))]);

        let outcome = h
            .executor
            .execute_step(&[ToolCall::new("get_pricing", json!({}))])
            .await
            .unwrap();

        assert!(matches!(
            outcome.fatal,
            Some(OrchestrationError::DataStoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let h = harness(vec![Arc::new(FailingTool::new("get_pricing", || {
            OrchestrationError::ToolExecution("boom".into())
        }))]);
        h.executor.invoke(&ToolCall::new("get_pricing", json!({}))).await;
        assert!(h.executor.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tool_times_out() {
        let h = harness(vec![Arc::new(SlowTool::new("get_pricing", Duration::from_secs(30)))]);
        let executed = h.executor.invoke(&ToolCall::new("get_pricing", json!({}))).await;

        assert_eq!(executed.result.status, ExecutionStatus::Failed);
        assert_eq!(executed.result.error.unwrap().kind, "tool_timeout");
    }

    #[tokio::test]
    async fn test_identical_calls_in_a_step_run_once() {
        let h = harness(vec![]);
        let outcome = h
            .executor
            .execute_step(&[
                ToolCall::new("get_resources", json!({ "status": "running" })),
                ToolCall::new("get_resources", json!({ "status": "running" })),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 1);
        assert_eq!(h.store.calls(), 1);
    }

    #[tokio::test]
    async fn test_absurd_cost_window_fails_the_call_only() {
        let h = harness(vec![]);
        let executed = h
            .executor
            .invoke(&ToolCall::new("get_cost_summary", json!({ "days": 1_000_000_000u64 })))
            .await;

        assert_eq!(executed.result.status, ExecutionStatus::Failed);
        assert_eq!(executed.result.error.unwrap().kind, "validation");
        assert!(executed.fatal.is_none());
        assert_eq!(h.store.calls(), 0);
    }

    #[tokio::test]
    async fn test_oversized_step_rejected() {
        let h = harness(vec![]);
        let calls: Vec<ToolCall> = (0..=MAX_CALLS_PER_STEP)
            .map(|i| ToolCall::new("get_resources", json!({ "limit": i })))
            .collect();
        assert!(matches!(
            h.executor.execute_step(&calls).await,
            Err(OrchestrationError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_scope_injection() {
        let h = harness(vec![]);
        let scoped = h.executor.apply_scope(
            vec![
                ToolCall::new("get_alerts", json!({})),
                ToolCall::new("get_accounts", Value::Null),
                ToolCall::new("get_resources", json!({ "account_ids": ["other"] })),
            ],
            &AccountScope::Account("prod-001".into()),
        );

        assert_eq!(scoped[0].arguments["account_ids"], json!(["prod-001"]));
        assert_eq!(scoped[2].arguments["account_ids"], json!(["prod-001"]));

        let unscoped = h
            .executor
            .apply_scope(vec![ToolCall::new("get_alerts", json!({}))], &AccountScope::All);
        assert!(unscoped[0].arguments.get("account_ids").is_none());
    }

    #[test]
    fn test_scope_narrows_requested_accounts() {
        let h = harness(vec![]);
        let scope = AccountScope::Accounts(vec!["prod-001".into(), "stage-002".into()]);
        let scoped = h.executor.apply_scope(
            vec![
                ToolCall::new("get_alerts", json!({ "account_ids": ["stage-002", "other"] })),
                ToolCall::new("get_alerts", json!({ "account_ids": "prod-001" })),
            ],
            &scope,
        );

        assert_eq!(scoped[0].arguments["account_ids"], json!(["stage-002"]));
        assert_eq!(scoped[1].arguments["account_ids"], json!(["prod-001", "stage-002"]));
    }

    #[tokio::test]
    async fn test_out_of_scope_accounts_never_reach_the_store() {
        let h = harness(vec![]);
        let scoped = h.executor.apply_scope(
            vec![ToolCall::new("get_alerts", json!({ "account_ids": ["prod-001"] }))],
            &AccountScope::Account("stage-002".into()),
        );

        let executed = h.executor.invoke(&scoped[0]).await;
        assert_eq!(executed.result.status, ExecutionStatus::Success);
        // both sample alerts belong to prod-001
        assert!(executed.collected.alerts.is_empty());
        assert_eq!(executed.result.parameters["account_ids"], json!(["stage-002"]));
    }
}

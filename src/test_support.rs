//! Shared fixtures for unit tests

use crate::cache::Cache;
use crate::clock::{Clock, ManualClock};
use crate::datastore::{DataStore, DateRange, InMemoryDataStore, ResourceFilter};
use crate::error::OrchestrationError;
use crate::execution::ToolExecutor;
use crate::formatter::{ResponseFormatter, TemplateFormatter};
use crate::insights::{create_default_insight_engine, InsightEngine, InsightThresholds};
use crate::llm::{ChatMessage, LlmProvider, LlmResponse, ToolSpec};
use crate::models::{Account, Alert, CostRecord, Resource, ToolOutput};
use crate::tools::{create_default_registry, ParamSchema, Tool};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

/// A resource whose last state change was `age_days` before `fixed_now()`
pub fn resource(id: &str, status: &str, monthly_cost: Option<&str>, age_days: i64) -> Resource {
    Resource {
        id: id.to_string(),
        account_id: "prod-001".to_string(),
        resource_type: "ec2".to_string(),
        name: format!("test-{}", id),
        region: "us-east-1".to_string(),
        status: status.to_string(),
        monthly_cost: monthly_cost.map(str::to_string),
        created_at: fixed_now() - ChronoDuration::days(age_days + 30),
        last_state_change: Some(fixed_now() - ChronoDuration::days(age_days)),
    }
}

//
// ================= LLM =================
//

type Responder = Box<dyn Fn() -> Result<LlmResponse> + Send + Sync>;

/// Replays queued responses in order, then the repeating responder (if any)
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<LlmResponse>>>,
    repeat: Option<Responder>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<LlmResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn repeating(responder: impl Fn() -> Result<LlmResponse> + Send + Sync + 'static) -> Self {
        Self {
            repeat: Some(Box::new(responder)),
            ..Self::new(Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _tools: Option<&[ToolSpec]>,
    ) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.repeat) {
            (Some(response), _) => response,
            (None, Some(repeat)) => repeat(),
            (None, None) => Err(OrchestrationError::Provider("script exhausted".into())),
        }
    }
}

//
// ================= Data stores =================
//

/// Sample data store that counts every read
pub struct CountingDataStore {
    inner: InMemoryDataStore,
    calls: AtomicUsize,
}

impl CountingDataStore {
    pub fn sample(now: DateTime<Utc>) -> Self {
        Self {
            inner: InMemoryDataStore::sample(now),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataStore for CountingDataStore {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.hit();
        self.inner.list_accounts().await
    }

    async fn list_resources(
        &self,
        account_ids: Option<&[String]>,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        self.hit();
        self.inner.list_resources(account_ids, filter).await
    }

    async fn list_costs(
        &self,
        account_ids: Option<&[String]>,
        range: Option<DateRange>,
    ) -> Result<Vec<CostRecord>> {
        self.hit();
        self.inner.list_costs(account_ids, range).await
    }

    async fn list_alerts(
        &self,
        account_ids: Option<&[String]>,
        unread_only: bool,
    ) -> Result<Vec<Alert>> {
        self.hit();
        self.inner.list_alerts(account_ids, unread_only).await
    }
}

/// Every read fails with the same error
pub struct FailingDataStore {
    error: fn() -> OrchestrationError,
}

impl FailingDataStore {
    pub fn unavailable() -> Self {
        Self {
            error: || OrchestrationError::DataStoreUnavailable("connection refused".into()),
        }
    }
}

#[async_trait]
impl DataStore for FailingDataStore {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Err((self.error)())
    }

    async fn list_resources(
        &self,
        _account_ids: Option<&[String]>,
        _filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        Err((self.error)())
    }

    async fn list_costs(
        &self,
        _account_ids: Option<&[String]>,
        _range: Option<DateRange>,
    ) -> Result<Vec<CostRecord>> {
        Err((self.error)())
    }

    async fn list_alerts(
        &self,
        _account_ids: Option<&[String]>,
        _unread_only: bool,
    ) -> Result<Vec<Alert>> {
        Err((self.error)())
    }
}

//
// ================= Tools =================
//

/// Parameterless tool that always fails with the given error
pub struct FailingTool {
    name: &'static str,
    error: Box<dyn Fn() -> OrchestrationError + Send + Sync>,
}

impl FailingTool {
    pub fn new(
        name: &'static str,
        error: impl Fn() -> OrchestrationError + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            error: Box::new(error),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Always fails"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(Vec::new())
    }

    async fn execute(&self, _params: &Value) -> Result<ToolOutput> {
        Err((self.error)())
    }
}

/// Parameterless tool that sleeps before answering
pub struct SlowTool {
    name: &'static str,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self { name, delay }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Sleeps, then returns nothing"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(Vec::new())
    }

    async fn execute(&self, _params: &Value) -> Result<ToolOutput> {
        tokio::time::sleep(self.delay).await;
        Ok(ToolOutput {
            data: Value::Null,
            collected: Default::default(),
        })
    }
}

//
// ================= Graph =================
//

/// Everything a `GraphEngine` needs apart from the planner
pub struct EngineParts {
    pub executor: Arc<ToolExecutor>,
    pub insights: Arc<InsightEngine>,
    pub formatter: Arc<dyn ResponseFormatter>,
    pub clock: Arc<dyn Clock>,
}

/// Sample dataset, default tools plus `extra`, template formatter
pub fn engine_parts(extra: Vec<Arc<dyn Tool>>) -> EngineParts {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(fixed_now()));
    let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::sample(fixed_now()));

    let mut registry = create_default_registry(store, clock.clone()).unwrap();
    for tool in extra {
        registry.register(tool).unwrap();
    }

    let cache = Arc::new(Cache::new(64, clock.clone()));
    EngineParts {
        executor: Arc::new(ToolExecutor::new(Arc::new(registry), cache, clock.clone())),
        insights: Arc::new(create_default_insight_engine(InsightThresholds::default())),
        formatter: Arc::new(TemplateFormatter),
        clock,
    }
}

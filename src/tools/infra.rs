//! Built-in infrastructure tools
//!
//! Every tool reads through the `DataStore` and returns both a compact JSON
//! summary (for the LLM and callers) and the typed records it saw (for the
//! insight rules). None of them write.

use super::{
    ParamField, ParamKind, ParamSchema, Tool, TTL_ACCOUNTS_SECS, TTL_AGGREGATE_SECS,
    TTL_INVENTORY_SECS, TTL_VOLATILE_SECS,
};
use crate::clock::Clock;
use crate::datastore::{DataStore, DateRange, ResourceFilter};
use crate::error::OrchestrationError;
use crate::models::{CollectedData, CostRecord, Resource, ToolOutput};
use crate::Result;
use chrono::{Duration, NaiveDate};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const SAMPLE_SIZE: usize = 5;
/// Longest trailing cost window, in days
pub const MAX_WINDOW_DAYS: i64 = 3650;

fn scope_field() -> ParamField {
    ParamField::optional(
        "account_ids",
        ParamKind::StringArray,
        "Restrict to these account ids; omit for all accounts",
    )
}

fn account_ids(params: &Value) -> Option<Vec<String>> {
    params.get("account_ids").and_then(Value::as_array).map(|ids| {
        ids.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

fn opt_str(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn int_param(params: &Value, key: &str, default: i64) -> i64 {
    params.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Trailing window of `days` days ending today (inclusive)
fn trailing_window(clock: &dyn Clock, days: i64) -> Result<DateRange> {
    let end = clock.now().date_naive();
    let span = days.clamp(1, MAX_WINDOW_DAYS) - 1;
    let start = end
        .checked_sub_signed(Duration::days(span))
        .ok_or_else(|| {
            OrchestrationError::Validation(format!("window of {} days is out of range", days))
        })?;
    Ok(DateRange { start, end })
}

fn counts_by<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value.to_lowercase()).or_insert(0) += 1;
    }
    counts
}

fn resource_summary(resource: &Resource) -> Value {
    json!({
        "id": resource.id,
        "type": resource.resource_type,
        "status": resource.status,
        "region": resource.region,
        "monthly_cost": resource.monthly_cost,
    })
}

/// Totals per service, largest first (ties by name)
pub fn cost_by_service(costs: &[CostRecord]) -> Vec<(String, f64)> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for record in costs {
        *totals.entry(record.service.clone()).or_insert(0.0) += record.amount;
    }
    let mut sorted: Vec<(String, f64)> = totals.into_iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Daily totals in date order
pub fn daily_totals(costs: &[CostRecord]) -> Vec<(NaiveDate, f64)> {
    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in costs {
        *totals.entry(record.date).or_insert(0.0) += record.amount;
    }
    totals.into_iter().collect()
}

//
// ================= Accounts =================
//

pub struct GetAccountsTool {
    store: Arc<dyn DataStore>,
}

impl GetAccountsTool {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for GetAccountsTool {
    fn name(&self) -> &'static str {
        "get_accounts"
    }

    fn description(&self) -> &'static str {
        "List the cloud accounts in scope with their provider and status"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![scope_field()])
    }

    fn cache_ttl_secs(&self) -> u64 {
        TTL_ACCOUNTS_SECS
    }

    async fn execute(&self, params: &Value) -> Result<ToolOutput> {
        let ids = account_ids(params);
        let accounts: Vec<_> = self
            .store
            .list_accounts()
            .await?
            .into_iter()
            .filter(|a| ids.as_ref().map(|ids| ids.contains(&a.id)).unwrap_or(true))
            .collect();

        Ok(ToolOutput {
            data: json!({
                "count": accounts.len(),
                "accounts": accounts
                    .iter()
                    .map(|a| json!({ "id": a.id, "name": a.name, "provider": a.provider, "status": a.status }))
                    .collect::<Vec<_>>(),
            }),
            collected: CollectedData {
                accounts,
                ..CollectedData::default()
            },
        })
    }
}

//
// ================= Resources =================
//

pub struct GetResourcesTool {
    store: Arc<dyn DataStore>,
}

impl GetResourcesTool {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for GetResourcesTool {
    fn name(&self) -> &'static str {
        "get_resources"
    }

    fn description(&self) -> &'static str {
        "List infrastructure resources (instances, volumes, databases) filtered by type, status or region"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![
            scope_field(),
            ParamField::optional("resource_type", ParamKind::String, "e.g. ec2, ebs, rds"),
            ParamField::optional("status", ParamKind::String, "e.g. running, stopped"),
            ParamField::optional("region", ParamKind::String, "e.g. us-east-1"),
            ParamField::optional("limit", ParamKind::Integer, "Maximum resources returned")
                .with_default(json!(100)),
        ])
    }

    fn cache_ttl_secs(&self) -> u64 {
        TTL_INVENTORY_SECS
    }

    async fn execute(&self, params: &Value) -> Result<ToolOutput> {
        let ids = account_ids(params);
        let filter = ResourceFilter {
            resource_type: opt_str(params, "resource_type"),
            status: opt_str(params, "status"),
            region: opt_str(params, "region"),
        };
        let limit = int_param(params, "limit", 100).max(0) as usize;

        let mut resources = self.store.list_resources(ids.as_deref(), &filter).await?;
        let total = resources.len();
        resources.truncate(limit);

        Ok(ToolOutput {
            data: json!({
                "total": total,
                "returned": resources.len(),
                "by_status": counts_by(resources.iter().map(|r| r.status.as_str())),
                "sample": resources.iter().take(SAMPLE_SIZE).map(resource_summary).collect::<Vec<_>>(),
            }),
            collected: CollectedData {
                resources,
                ..CollectedData::default()
            },
        })
    }
}

pub struct ResourceStatisticsTool {
    store: Arc<dyn DataStore>,
}

impl ResourceStatisticsTool {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for ResourceStatisticsTool {
    fn name(&self) -> &'static str {
        "get_resource_statistics"
    }

    fn description(&self) -> &'static str {
        "Aggregate resource counts by type, status and region plus total monthly cost"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![scope_field()])
    }

    async fn execute(&self, params: &Value) -> Result<ToolOutput> {
        let ids = account_ids(params);
        let resources = self
            .store
            .list_resources(ids.as_deref(), &ResourceFilter::default())
            .await?;

        let total_monthly_cost: f64 = resources.iter().map(Resource::monthly_cost_value).sum();
        let stats = json!({
            "total": resources.len(),
            "by_type": counts_by(resources.iter().map(|r| r.resource_type.as_str())),
            "by_status": counts_by(resources.iter().map(|r| r.status.as_str())),
            "by_region": counts_by(resources.iter().map(|r| r.region.as_str())),
            "total_monthly_cost": round2(total_monthly_cost),
        });

        let mut collected = CollectedData::default();
        collected
            .statistics
            .insert("resource_statistics".to_string(), stats.clone());

        Ok(ToolOutput {
            data: stats,
            collected,
        })
    }
}

pub struct FindIdleResourcesTool {
    store: Arc<dyn DataStore>,
}

impl FindIdleResourcesTool {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for FindIdleResourcesTool {
    fn name(&self) -> &'static str {
        "find_idle_resources"
    }

    fn description(&self) -> &'static str {
        "Find stopped or unattached resources that still accrue monthly cost"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![
            scope_field(),
            ParamField::optional(
                "min_monthly_cost",
                ParamKind::Number,
                "Ignore idle resources cheaper than this",
            )
            .with_default(json!(0)),
        ])
    }

    async fn execute(&self, params: &Value) -> Result<ToolOutput> {
        let ids = account_ids(params);
        let min_cost = params
            .get("min_monthly_cost")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let idle: Vec<Resource> = self
            .store
            .list_resources(ids.as_deref(), &ResourceFilter::default())
            .await?
            .into_iter()
            .filter(|r| r.is_idle() && r.monthly_cost_value() >= min_cost)
            .collect();

        let savings: f64 = idle.iter().map(Resource::monthly_cost_value).sum();
        let stats = json!({
            "count": idle.len(),
            "potential_monthly_savings": round2(savings),
        });

        let mut collected = CollectedData::default();
        collected
            .statistics
            .insert("idle_resources".to_string(), stats.clone());

        Ok(ToolOutput {
            data: json!({
                "count": idle.len(),
                "potential_monthly_savings": round2(savings),
                "sample": idle.iter().take(SAMPLE_SIZE).map(resource_summary).collect::<Vec<_>>(),
            }),
            collected: CollectedData {
                resources: idle,
                ..collected
            },
        })
    }
}

//
// ================= Costs =================
//

fn window_fields() -> Vec<ParamField> {
    vec![
        scope_field(),
        ParamField::optional("days", ParamKind::Integer, "Trailing window in days")
            .with_default(json!(30))
            .with_range(1, MAX_WINDOW_DAYS),
    ]
}

pub struct CostSummaryTool {
    store: Arc<dyn DataStore>,
    clock: Arc<dyn Clock>,
}

impl CostSummaryTool {
    pub fn new(store: Arc<dyn DataStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait::async_trait]
impl Tool for CostSummaryTool {
    fn name(&self) -> &'static str {
        "get_cost_summary"
    }

    fn description(&self) -> &'static str {
        "Summarize spend over a trailing window, broken down by service"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(window_fields())
    }

    fn cache_ttl_secs(&self) -> u64 {
        TTL_AGGREGATE_SECS
    }

    async fn execute(&self, params: &Value) -> Result<ToolOutput> {
        let ids = account_ids(params);
        let days = int_param(params, "days", 30);
        let range = trailing_window(self.clock.as_ref(), days)?;

        let costs = self.store.list_costs(ids.as_deref(), Some(range)).await?;
        let total: f64 = costs.iter().map(|c| c.amount).sum();
        let by_service: Vec<Value> = cost_by_service(&costs)
            .into_iter()
            .map(|(service, amount)| json!({ "service": service, "amount": round2(amount) }))
            .collect();

        let stats = json!({
            "total": round2(total),
            "days": days,
            "start": range.start,
            "end": range.end,
            "by_service": by_service,
        });

        let mut collected = CollectedData {
            costs,
            ..CollectedData::default()
        };
        collected
            .statistics
            .insert("cost_summary".to_string(), stats.clone());

        Ok(ToolOutput {
            data: stats,
            collected,
        })
    }
}

pub struct CostTrendTool {
    store: Arc<dyn DataStore>,
    clock: Arc<dyn Clock>,
}

impl CostTrendTool {
    pub fn new(store: Arc<dyn DataStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait::async_trait]
impl Tool for CostTrendTool {
    fn name(&self) -> &'static str {
        "get_cost_trend"
    }

    fn description(&self) -> &'static str {
        "Daily spend series over a trailing window with the change between its halves"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(window_fields())
    }

    fn cache_ttl_secs(&self) -> u64 {
        TTL_AGGREGATE_SECS
    }

    async fn execute(&self, params: &Value) -> Result<ToolOutput> {
        let ids = account_ids(params);
        let days = int_param(params, "days", 30);
        let range = trailing_window(self.clock.as_ref(), days)?;

        let costs = self.store.list_costs(ids.as_deref(), Some(range)).await?;
        let daily = daily_totals(&costs);

        let stats = json!({
            "days": days,
            "daily": daily
                .iter()
                .map(|(date, total)| json!({ "date": date, "total": round2(*total) }))
                .collect::<Vec<_>>(),
        });

        let mut collected = CollectedData {
            costs,
            ..CollectedData::default()
        };
        collected
            .statistics
            .insert("cost_trend".to_string(), stats.clone());

        Ok(ToolOutput {
            data: stats,
            collected,
        })
    }
}

//
// ================= Alerts =================
//

pub struct GetAlertsTool {
    store: Arc<dyn DataStore>,
}

impl GetAlertsTool {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for GetAlertsTool {
    fn name(&self) -> &'static str {
        "get_alerts"
    }

    fn description(&self) -> &'static str {
        "List active alerts (security, compliance, performance, cost), unread only by default"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(vec![
            scope_field(),
            ParamField::optional("unread_only", ParamKind::Boolean, "Only unread alerts")
                .with_default(json!(true)),
            ParamField::optional(
                "alert_type",
                ParamKind::String,
                "security | compliance | performance | cost",
            ),
        ])
    }

    fn cache_ttl_secs(&self) -> u64 {
        TTL_VOLATILE_SECS
    }

    async fn execute(&self, params: &Value) -> Result<ToolOutput> {
        let ids = account_ids(params);
        let unread_only = params
            .get("unread_only")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let alert_type = opt_str(params, "alert_type");

        let alerts: Vec<_> = self
            .store
            .list_alerts(ids.as_deref(), unread_only)
            .await?
            .into_iter()
            .filter(|a| {
                alert_type
                    .as_deref()
                    .map(|t| a.alert_type.eq_ignore_ascii_case(t))
                    .unwrap_or(true)
            })
            .collect();

        let by_severity = counts_by(alerts.iter().map(|a| match a.severity {
            crate::models::Severity::Critical => "critical",
            crate::models::Severity::Warning => "warning",
            crate::models::Severity::Info => "info",
        }));

        Ok(ToolOutput {
            data: json!({
                "count": alerts.len(),
                "by_severity": by_severity,
                "titles": alerts.iter().take(SAMPLE_SIZE).map(|a| a.title.clone()).collect::<Vec<_>>(),
            }),
            collected: CollectedData {
                alerts,
                ..CollectedData::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::datastore::InMemoryDataStore;
    use chrono::Utc;

    fn store_and_clock() -> (Arc<dyn DataStore>, Arc<dyn Clock>) {
        let now = Utc::now();
        (
            Arc::new(InMemoryDataStore::sample(now)),
            Arc::new(ManualClock::new(now)),
        )
    }

    #[tokio::test]
    async fn test_idle_resources_tool() {
        let (store, _) = store_and_clock();
        let tool = FindIdleResourcesTool::new(store);
        let output = tool.execute(&json!({ "min_monthly_cost": 0 })).await.unwrap();

        assert_eq!(output.data["count"], json!(3));
        assert_eq!(output.data["potential_monthly_savings"], json!(147.5));
        assert!(output.collected.resources.iter().all(Resource::is_idle));
    }

    #[tokio::test]
    async fn test_cost_summary_tool_scoped() {
        let (store, clock) = store_and_clock();
        let tool = CostSummaryTool::new(store, clock);
        let output = tool
            .execute(&json!({ "days": 30, "account_ids": ["stage-002"] }))
            .await
            .unwrap();

        assert_eq!(output.data["total"], json!(105.0));
        assert_eq!(output.data["by_service"][0]["service"], json!("S3"));
        assert!(output.collected.statistics.contains_key("cost_summary"));
    }

    #[tokio::test]
    async fn test_alert_type_filter() {
        let (store, _) = store_and_clock();
        let tool = GetAlertsTool::new(store);
        let output = tool
            .execute(&json!({ "unread_only": true, "alert_type": "security" }))
            .await
            .unwrap();
        assert_eq!(output.collected.alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_huge_window_is_rejected_not_panicking() {
        let (store, clock) = store_and_clock();

        let schema = CostSummaryTool::new(store.clone(), clock.clone()).schema();
        let err = schema
            .validate("get_cost_summary", &json!({ "days": 1_000_000_000 }))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(_)));

        // bypassing validation still yields a bounded window
        let output = CostTrendTool::new(store, clock.clone())
            .execute(&json!({ "days": i64::MAX }))
            .await
            .unwrap();
        assert_eq!(output.data["days"], json!(i64::MAX));

        let range = trailing_window(clock.as_ref(), i64::MAX).unwrap();
        assert_eq!(range.end - range.start, Duration::days(MAX_WINDOW_DAYS - 1));
    }

    #[test]
    fn test_cost_by_service_ordering() {
        let date = Utc::now().date_naive();
        let record = |service: &str, amount: f64| CostRecord {
            id: format!("{}-{}", service, amount),
            account_id: "a".into(),
            service: service.into(),
            amount,
            date,
        };
        let totals = cost_by_service(&[record("S3", 30.0), record("EC2", 100.0), record("EC2", 20.0)]);
        assert_eq!(totals[0], ("EC2".to_string(), 120.0));
        assert_eq!(totals[1], ("S3".to_string(), 30.0));
    }
}

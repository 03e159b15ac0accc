//! Postgres-backed data store
//!
//! Read-only SELECTs over the infrastructure tables. Connection-level
//! failures are retried a bounded number of times before the store is
//! reported unavailable.

use super::{DataStore, DateRange, ResourceFilter};
use crate::error::OrchestrationError;
use crate::models::{Account, Alert, CostRecord, Resource, Severity};
use crate::Result;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

pub struct PgDataStore {
    pool: PgPool,
    max_attempts: u32,
}

impl PgDataStore {
    /// Lazily connecting pool; nothing touches the network until first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(database_url)
            .map_err(|e| {
                OrchestrationError::Config(format!("Invalid DATABASE_URL: {}", e))
            })?;

        info!("Data store backend: postgres");

        Ok(Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut query: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut attempt = 1;
        loop {
            match query().await {
                Ok(value) => return Ok(value),
                Err(e) if is_connection_error(&e) && attempt < self.max_attempts => {
                    warn!(operation, attempt, error = %e, "Data store connection failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) if is_connection_error(&e) => {
                    return Err(OrchestrationError::DataStoreUnavailable(format!(
                        "{} failed after {} attempts: {}",
                        operation, attempt, e
                    )));
                }
                Err(e) => {
                    return Err(OrchestrationError::DataStore(format!(
                        "{} failed: {}",
                        operation, e
                    )));
                }
            }
        }
    }
}

fn is_connection_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

fn parse_severity(value: &str) -> Severity {
    match value.to_lowercase().as_str() {
        "critical" | "high" => Severity::Critical,
        "warning" | "medium" => Severity::Warning,
        _ => Severity::Info,
    }
}

fn account_from_row(row: &PgRow) -> std::result::Result<Account, sqlx::Error> {
    Ok(Account {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        provider: row.try_get("provider")?,
        status: row.try_get("status")?,
    })
}

fn resource_from_row(row: &PgRow) -> std::result::Result<Resource, sqlx::Error> {
    Ok(Resource {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        resource_type: row.try_get("resource_type")?,
        name: row.try_get("name")?,
        region: row.try_get("region")?,
        status: row.try_get("status")?,
        monthly_cost: row.try_get("monthly_cost")?,
        created_at: row.try_get("created_at")?,
        last_state_change: row.try_get("last_state_change")?,
    })
}

fn cost_from_row(row: &PgRow) -> std::result::Result<CostRecord, sqlx::Error> {
    Ok(CostRecord {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        service: row.try_get("service")?,
        amount: row.try_get("amount")?,
        date: row.try_get("date")?,
    })
}

fn alert_from_row(row: &PgRow) -> std::result::Result<Alert, sqlx::Error> {
    let severity: String = row.try_get("severity")?;
    Ok(Alert {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        severity: parse_severity(&severity),
        alert_type: row.try_get("alert_type")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

type RowResult<T> = std::result::Result<Vec<T>, sqlx::Error>;

#[async_trait::async_trait]
impl DataStore for PgDataStore {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.with_retry("list_accounts", || {
            let pool = self.pool.clone();
            async move {
                let rows = sqlx::query(
                    "SELECT id, name, provider, status FROM cloud_accounts ORDER BY name",
                )
                .fetch_all(&pool)
                .await?;
                rows.iter().map(account_from_row).collect::<RowResult<_>>()
            }
        })
        .await
    }

    async fn list_resources(
        &self,
        account_ids: Option<&[String]>,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        let ids = account_ids.map(|ids| ids.to_vec());
        self.with_retry("list_resources", || {
            let pool = self.pool.clone();
            let ids = ids.clone();
            let filter = filter.clone();
            async move {
                let rows = sqlx::query(
                    r#"
                    SELECT id, account_id, resource_type, name, region, status,
                           monthly_cost::text AS monthly_cost, created_at, last_state_change
                    FROM resources
                    WHERE ($1::text[] IS NULL OR account_id = ANY($1))
                      AND ($2::text IS NULL OR lower(resource_type) = lower($2))
                      AND ($3::text IS NULL OR lower(status) = lower($3))
                      AND ($4::text IS NULL OR lower(region) = lower($4))
                    ORDER BY account_id, id
                    "#,
                )
                .bind(ids)
                .bind(filter.resource_type)
                .bind(filter.status)
                .bind(filter.region)
                .fetch_all(&pool)
                .await?;
                rows.iter().map(resource_from_row).collect::<RowResult<_>>()
            }
        })
        .await
    }

    async fn list_costs(
        &self,
        account_ids: Option<&[String]>,
        range: Option<DateRange>,
    ) -> Result<Vec<CostRecord>> {
        let ids = account_ids.map(|ids| ids.to_vec());
        self.with_retry("list_costs", || {
            let pool = self.pool.clone();
            let ids = ids.clone();
            async move {
                let rows = sqlx::query(
                    r#"
                    SELECT id::text AS id, account_id, service, amount::float8 AS amount, date
                    FROM costs
                    WHERE ($1::text[] IS NULL OR account_id = ANY($1))
                      AND ($2::date IS NULL OR date >= $2)
                      AND ($3::date IS NULL OR date <= $3)
                    ORDER BY date, account_id, service
                    "#,
                )
                .bind(ids)
                .bind(range.map(|r| r.start))
                .bind(range.map(|r| r.end))
                .fetch_all(&pool)
                .await?;
                rows.iter().map(cost_from_row).collect::<RowResult<_>>()
            }
        })
        .await
    }

    async fn list_alerts(
        &self,
        account_ids: Option<&[String]>,
        unread_only: bool,
    ) -> Result<Vec<Alert>> {
        let ids = account_ids.map(|ids| ids.to_vec());
        self.with_retry("list_alerts", || {
            let pool = self.pool.clone();
            let ids = ids.clone();
            async move {
                let rows = sqlx::query(
                    r#"
                    SELECT id, account_id, severity, alert_type, title, message, is_read, created_at
                    FROM alerts
                    WHERE ($1::text[] IS NULL OR account_id = ANY($1))
                      AND (NOT $2 OR is_read = FALSE)
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(ids)
                .bind(unread_only)
                .fetch_all(&pool)
                .await?;
                rows.iter().map(alert_from_row).collect::<RowResult<_>>()
            }
        })
        .await
    }
}

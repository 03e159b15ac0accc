//! In-memory data store for development, demos and tests

use super::{in_scope, DataStore, DateRange, ResourceFilter};
use crate::models::{Account, Alert, CostRecord, Resource, Severity};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
pub struct Dataset {
    pub accounts: Vec<Account>,
    pub resources: Vec<Resource>,
    pub costs: Vec<CostRecord>,
    pub alerts: Vec<Alert>,
}

pub struct InMemoryDataStore {
    data: Arc<RwLock<Dataset>>,
}

impl InMemoryDataStore {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            data: Arc::new(RwLock::new(dataset)),
        }
    }

    /// Replace the dataset wholesale (simulates an external resource sync)
    pub async fn replace(&self, dataset: Dataset) {
        let mut data = self.data.write().await;
        *data = dataset;
    }

    /// Small, realistic dataset anchored at `now`
    pub fn sample(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();

        let accounts = vec![
            Account {
                id: "prod-001".to_string(),
                name: "Production".to_string(),
                provider: "aws".to_string(),
                status: "active".to_string(),
            },
            Account {
                id: "stage-002".to_string(),
                name: "Staging".to_string(),
                provider: "aws".to_string(),
                status: "active".to_string(),
            },
        ];

        let resource = |id: &str, account: &str, kind: &str, status: &str, cost: &str, age: i64| {
            Resource {
                id: id.to_string(),
                account_id: account.to_string(),
                resource_type: kind.to_string(),
                name: format!("{}-{}", kind, id),
                region: "us-east-1".to_string(),
                status: status.to_string(),
                monthly_cost: Some(cost.to_string()),
                created_at: now - Duration::days(age + 30),
                last_state_change: Some(now - Duration::days(age)),
            }
        };

        let resources = vec![
            resource("i-0a1", "prod-001", "ec2", "running", "310.00", 12),
            resource("i-0b2", "prod-001", "ec2", "stopped", "85.50", 140),
            resource("vol-0c3", "prod-001", "ebs", "unattached", "40.00", 95),
            resource("db-0d4", "prod-001", "rds", "running", "620.00", 300),
            resource("i-0e5", "stage-002", "ec2", "stopped", "22.00", 10),
        ];

        let mut costs = Vec::new();
        for day in 0..30 {
            let date = today - Duration::days(day);
            let ramp = (30 - day) as f64;
            costs.push(CostRecord {
                id: format!("prod-001-ec2-{}", date),
                account_id: "prod-001".to_string(),
                service: "EC2".to_string(),
                amount: 40.0 + ramp,
                date,
            });
            costs.push(CostRecord {
                id: format!("prod-001-rds-{}", date),
                account_id: "prod-001".to_string(),
                service: "RDS".to_string(),
                amount: 20.0,
                date,
            });
            costs.push(CostRecord {
                id: format!("stage-002-s3-{}", date),
                account_id: "stage-002".to_string(),
                service: "S3".to_string(),
                amount: 3.5,
                date,
            });
        }

        let alerts = vec![
            Alert {
                id: "alert-1".to_string(),
                account_id: "prod-001".to_string(),
                severity: Severity::Critical,
                alert_type: "security".to_string(),
                title: "Security group open to the world".to_string(),
                message: "sg-123 allows 0.0.0.0/0 on port 22".to_string(),
                is_read: false,
                created_at: now - Duration::hours(3),
            },
            Alert {
                id: "alert-2".to_string(),
                account_id: "prod-001".to_string(),
                severity: Severity::Warning,
                alert_type: "performance".to_string(),
                title: "High CPU".to_string(),
                message: "i-0a1 averaged 92% CPU over 24h".to_string(),
                is_read: false,
                created_at: now - Duration::hours(6),
            },
        ];

        Self::new(Dataset {
            accounts,
            resources,
            costs,
            alerts,
        })
    }
}

impl Default for InMemoryDataStore {
    fn default() -> Self {
        Self::new(Dataset::default())
    }
}

#[async_trait::async_trait]
impl DataStore for InMemoryDataStore {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        let data = self.data.read().await;
        Ok(data.accounts.clone())
    }

    async fn list_resources(
        &self,
        account_ids: Option<&[String]>,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>> {
        let data = self.data.read().await;
        Ok(data
            .resources
            .iter()
            .filter(|r| in_scope(account_ids, &r.account_id) && filter.matches(r))
            .cloned()
            .collect())
    }

    async fn list_costs(
        &self,
        account_ids: Option<&[String]>,
        range: Option<DateRange>,
    ) -> Result<Vec<CostRecord>> {
        let data = self.data.read().await;
        Ok(data
            .costs
            .iter()
            .filter(|c| in_scope(account_ids, &c.account_id))
            .filter(|c| range.map(|r| r.contains(c.date)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn list_alerts(
        &self,
        account_ids: Option<&[String]>,
        unread_only: bool,
    ) -> Result<Vec<Alert>> {
        let data = self.data.read().await;
        Ok(data
            .alerts
            .iter()
            .filter(|a| in_scope(account_ids, &a.account_id))
            .filter(|a| !unread_only || !a.is_read)
            .cloned()
            .collect())
    }
}

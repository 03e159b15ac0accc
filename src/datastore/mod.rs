//! Read-only data-store interface
//!
//! Accounts, resources, costs and alerts live behind this trait. No
//! orchestrator component writes through it, so every call is safe to retry.

use crate::models::{Account, Alert, CostRecord, Resource};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

pub mod memory;
pub mod postgres;

pub use memory::{Dataset, InMemoryDataStore};
pub use postgres::PgDataStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceFilter {
    pub resource_type: Option<String>,
    pub status: Option<String>,
    pub region: Option<String>,
}

impl ResourceFilter {
    pub fn matches(&self, resource: &Resource) -> bool {
        let eq = |want: &Option<String>, have: &str| {
            want.as_deref()
                .map(|w| w.eq_ignore_ascii_case(have))
                .unwrap_or(true)
        };

        eq(&self.resource_type, &resource.resource_type)
            && eq(&self.status, &resource.status)
            && eq(&self.region, &resource.region)
    }
}

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    async fn list_resources(
        &self,
        account_ids: Option<&[String]>,
        filter: &ResourceFilter,
    ) -> Result<Vec<Resource>>;

    async fn list_costs(
        &self,
        account_ids: Option<&[String]>,
        range: Option<DateRange>,
    ) -> Result<Vec<CostRecord>>;

    async fn list_alerts(
        &self,
        account_ids: Option<&[String]>,
        unread_only: bool,
    ) -> Result<Vec<Alert>>;
}

pub(crate) fn in_scope(account_ids: Option<&[String]>, account_id: &str) -> bool {
    account_ids
        .map(|ids| ids.iter().any(|id| id == account_id))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_resource_filter_is_case_insensitive() {
        let resource = Resource {
            id: "i-1".into(),
            account_id: "a".into(),
            resource_type: "EC2".into(),
            name: "web".into(),
            region: "us-east-1".into(),
            status: "Stopped".into(),
            monthly_cost: None,
            created_at: Utc::now(),
            last_state_change: None,
        };

        let filter = ResourceFilter {
            resource_type: Some("ec2".into()),
            status: Some("stopped".into()),
            region: None,
        };
        assert!(filter.matches(&resource));
        assert!(ResourceFilter::default().matches(&resource));

        let other = ResourceFilter {
            region: Some("eu-west-1".into()),
            ..ResourceFilter::default()
        };
        assert!(!other.matches(&resource));
    }

    #[test]
    fn test_scope_check() {
        let ids = vec!["a".to_string()];
        assert!(in_scope(Some(&ids), "a"));
        assert!(!in_scope(Some(&ids), "b"));
        assert!(in_scope(None, "b"));
    }
}

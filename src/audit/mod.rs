//! Turn audit trail
//!
//! Every completed turn is recorded with a digest of what the caller was
//! told, so a stored record can later be checked for tampering.

use crate::models::{AccountScope, Insight, ResearchPlan, ToolExecutionResult};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub turn_id: Uuid,
    pub session_id: String,
    pub query: String,
    pub scope: AccountScope,
    pub plan: Arc<ResearchPlan>,
    pub tool_results: Arc<Vec<ToolExecutionResult>>,
    pub findings: Arc<Vec<Insight>>,
    pub answer: String,
    /// SHA-256 over findings and answer
    pub output_hash: String,
    pub reasoning_trace: Arc<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, TurnRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, record: TurnRecord) -> Result<Uuid> {
        let turn_id = record.turn_id;
        let mut records = self.records.write().await;
        records.insert(turn_id, record);
        Ok(turn_id)
    }

    pub async fn get(&self, turn_id: Uuid) -> Result<Option<TurnRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&turn_id).cloned())
    }

    /// Turn ids of one session, oldest first
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.session_id == session_id)
            .map(|record| (record.turn_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    pub async fn verify_integrity(&self, turn_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;

        Ok(records
            .get(&turn_id)
            .map(|record| compute_output_hash(&record.findings, &record.answer) == record.output_hash)
            .unwrap_or(false))
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the findings JSON followed by the answer text.
/// Streams serialization straight into the hasher.
pub fn compute_output_hash(findings: &[Insight], answer: &str) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), findings).is_err() {
        return String::new();
    }
    hasher.update(answer.as_bytes());

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Complexity, Intent, Priority};

    fn record(session_id: &str, created_at: DateTime<Utc>, answer: &str) -> TurnRecord {
        TurnRecord {
            turn_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            query: "q".to_string(),
            scope: AccountScope::All,
            plan: Arc::new(ResearchPlan {
                plan_id: Uuid::new_v4(),
                query: "q".to_string(),
                intent: Intent::General,
                priority: Priority::Low,
                complexity: Complexity::Simple,
                steps: Vec::new(),
                created_at,
            }),
            tool_results: Arc::new(Vec::new()),
            findings: Arc::new(Vec::new()),
            answer: answer.to_string(),
            output_hash: compute_output_hash(&[], answer),
            reasoning_trace: Arc::new(Vec::new()),
            created_at,
            duration_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_record_list_and_verify() {
        let log = AuditLog::new();
        let now = Utc::now();
        let later = log
            .record(record("s1", now + chrono::Duration::seconds(5), "b"))
            .await
            .unwrap();
        let earlier = log.record(record("s1", now, "a")).await.unwrap();
        log.record(record("s2", now, "c")).await.unwrap();

        assert_eq!(log.list_for_session("s1").await.unwrap(), vec![earlier, later]);
        assert!(log.verify_integrity(earlier).await.unwrap());
        assert!(!log.verify_integrity(Uuid::new_v4()).await.unwrap());
    }

    #[test]
    fn test_hash_depends_on_answer() {
        assert_ne!(compute_output_hash(&[], "a"), compute_output_hash(&[], "b"));
        assert_eq!(compute_output_hash(&[], "a").len(), 64);
    }
}

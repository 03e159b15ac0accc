//! Core data models for the analysis orchestrator

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum InsightCategory {
    CostOptimization,
    Performance,
    Security,
    Compliance,
    Trend,
}

impl InsightCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightCategory::CostOptimization => "cost-optimization",
            InsightCategory::Performance => "performance",
            InsightCategory::Security => "security",
            InsightCategory::Compliance => "compliance",
            InsightCategory::Trend => "trend",
        }
    }
}

/// Coarse intent used by the deterministic planner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Cost,
    Performance,
    Security,
    General,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::Cost,
        Intent::Performance,
        Intent::Security,
        Intent::General,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

impl Complexity {
    pub fn from_invocation_count(count: usize) -> Self {
        match count {
            0..=2 => Complexity::Simple,
            3..=5 => Complexity::Moderate,
            _ => Complexity::Complex,
        }
    }
}

//
// ================= Data-store records =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: String,
    pub account_id: String,
    pub resource_type: String,
    pub name: String,
    pub region: String,
    pub status: String,
    /// Decimal string as stored, e.g. "25.00"
    pub monthly_cost: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_state_change: Option<DateTime<Utc>>,
}

const IDLE_STATUSES: &[&str] = &["stopped", "unattached", "available", "idle", "detached"];

impl Resource {
    /// Stopped or unattached resources that still accrue cost
    pub fn is_idle(&self) -> bool {
        let status = self.status.to_lowercase();
        IDLE_STATUSES.iter().any(|s| *s == status)
    }

    pub fn monthly_cost_value(&self) -> f64 {
        self.monthly_cost
            .as_deref()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    /// Whole days since the last state change (or creation)
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        let since = self.last_state_change.unwrap_or(self.created_at);
        (now - since).num_days().max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CostRecord {
    /// Row identity; several rows may share account, service and date
    #[serde(default)]
    pub id: String,
    pub account_id: String,
    pub service: String,
    pub amount: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub account_id: String,
    pub severity: Severity,
    /// security | compliance | performance | cost
    pub alert_type: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

//
// ================= Scope =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", content = "ids", rename_all = "lowercase")]
pub enum AccountScope {
    #[default]
    All,
    Account(String),
    Accounts(Vec<String>),
}

impl AccountScope {
    pub fn from_ids(ids: Vec<String>) -> Self {
        match ids.len() {
            0 => AccountScope::All,
            1 => AccountScope::Account(ids.into_iter().next().unwrap_or_default()),
            _ => AccountScope::Accounts(ids),
        }
    }

    /// `None` means unrestricted
    pub fn account_ids(&self) -> Option<Vec<String>> {
        match self {
            AccountScope::All => None,
            AccountScope::Account(id) => Some(vec![id.clone()]),
            AccountScope::Accounts(ids) => Some(ids.clone()),
        }
    }
}

impl fmt::Display for AccountScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountScope::All => write!(f, "all accounts"),
            AccountScope::Account(id) => write!(f, "account {}", id),
            AccountScope::Accounts(ids) => write!(f, "{} accounts", ids.len()),
        }
    }
}

//
// ================= Collected Data =================
//

/// A tool invocation that failed; synthesis reports it as missing data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataGap {
    pub tool_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CollectedData {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub costs: Vec<CostRecord>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub statistics: BTreeMap<String, Value>,
    #[serde(default)]
    pub gaps: Vec<DataGap>,
}

impl CollectedData {
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
            && self.costs.is_empty()
            && self.accounts.is_empty()
            && self.alerts.is_empty()
            && self.statistics.is_empty()
            && self.gaps.is_empty()
    }

    pub fn with_gap(tool_name: &str, message: impl Into<String>) -> Self {
        Self {
            gaps: vec![DataGap {
                tool_name: tool_name.to_string(),
                message: message.into(),
            }],
            ..Self::default()
        }
    }

    /// Union-merge `other` into a copy of `self`.
    ///
    /// Records with the same identity are replaced in place, statistics are
    /// replaced per key, gaps are appended.
    pub fn merged(&self, other: &CollectedData) -> CollectedData {
        let mut statistics = self.statistics.clone();
        for (key, value) in &other.statistics {
            statistics.insert(key.clone(), value.clone());
        }

        let mut gaps = self.gaps.clone();
        gaps.extend(other.gaps.iter().cloned());

        CollectedData {
            resources: union_by(&self.resources, &other.resources, |r| r.id.clone()),
            costs: union_by(&self.costs, &other.costs, |c| c.id.clone()),
            accounts: union_by(&self.accounts, &other.accounts, |a| a.id.clone()),
            alerts: union_by(&self.alerts, &other.alerts, |a| a.id.clone()),
            statistics,
            gaps,
        }
    }
}

fn union_by<T: Clone>(existing: &[T], incoming: &[T], key: impl Fn(&T) -> String) -> Vec<T> {
    let mut out: Vec<T> = existing.to_vec();
    let mut index: HashMap<String, usize> = out
        .iter()
        .enumerate()
        .map(|(i, item)| (key(item), i))
        .collect();

    for item in incoming {
        let k = key(item);
        match index.get(&k) {
            Some(&pos) => out[pos] = item.clone(),
            None => {
                index.insert(k, out.len());
                out.push(item.clone());
            }
        }
    }

    out
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp,
        }
    }
}

/// Per-session conversation state.
///
/// Transitions never mutate in place: each returns the next state, so a
/// failed turn can simply drop the candidate and keep the previous value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub session_id: String,
    messages: Vec<Message>,
    pub scope: AccountScope,
    pub collected: CollectedData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>, scope: AccountScope, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            scope,
            collected: CollectedData::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Last `count` messages, oldest first
    pub fn recent_messages(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Append rule: order is preserved, nothing is ever removed.
    pub fn with_message(&self, message: Message) -> Self {
        let mut next = self.clone();
        next.updated_at = message.timestamp.max(self.updated_at);
        next.messages.push(message);
        next
    }

    /// Union-merge rule for collected data. Gaps describe the latest turn
    /// only, so they are replaced rather than accumulated.
    pub fn with_collected(&self, data: &CollectedData) -> Self {
        let mut next = self.clone();
        next.collected = self.collected.merged(data);
        next.collected.gaps = data.gaps.clone();
        next
    }

    /// Replace-if-present rule for scalars.
    pub fn with_scope(&self, scope: Option<AccountScope>) -> Self {
        let mut next = self.clone();
        if let Some(scope) = scope {
            next.scope = scope;
        }
        next
    }
}

//
// ================= Plan =================
//

/// One tool invocation requested by the planner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub description: String,
    pub tool_calls: Vec<ToolCall>,
    pub completed: bool,
    pub findings: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub plan_id: Uuid,
    pub query: String,
    pub intent: Intent,
    pub priority: Priority,
    pub complexity: Complexity,
    pub steps: Vec<PlanStep>,
    pub created_at: DateTime<Utc>,
}

impl ResearchPlan {
    pub fn next_open_step(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|s| !s.completed)
    }

    pub fn complete_step(&mut self, step_id: &str, findings: Value) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.step_id == step_id) {
            step.completed = true;
            step.findings = Some(findings);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.completed)
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .flat_map(|s| s.tool_calls.iter())
            .map(|c| c.name.as_str())
    }
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Summary payload shown to the LLM and to callers
    pub data: Value,
    /// Typed records merged into the turn's collected data
    pub collected: CollectedData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub call_id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub output: Option<Value>,
    pub error: Option<ToolError>,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    pub cache_hit: bool,
    pub executed_at: DateTime<Utc>,
}

//
// ================= Insight =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insight {
    pub category: InsightCategory,
    pub severity: Severity,
    pub risk: RiskLevel,
    pub finding: String,
    /// Bounded sample of the records behind the finding
    pub evidence: Vec<Value>,
    pub recommendation: String,
    pub impact: String,
    /// Dollar figure used for ranking, when one exists
    pub impact_amount: Option<f64>,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::Cost => "cost",
            Intent::Performance => "performance",
            Intent::Security => "security",
            Intent::General => "general",
        };
        write!(f, "{}", s)
    }
}

//! Planner trait and implementations
//!
//! A planner turns a question into a `ResearchPlan` and, once per reasoning
//! cycle, decides which tool calls to run next. An empty decision means
//! "enough data, go synthesize". The graph engine owns the cycle cap, so a
//! planner never has to terminate on its own.

use crate::classifier::IntentClassifier;
use crate::error::OrchestrationError;
use crate::models::{
    AccountScope, Complexity, Intent, Message, PlanStep, ResearchPlan, ToolCall,
    ToolExecutionResult,
};
use crate::tools::ToolDescriptor;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;

pub mod delegated;
pub use delegated::DelegatedPlanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerStrategy {
    Deterministic,
    Delegated,
}

impl FromStr for PlannerStrategy {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "deterministic" => Ok(PlannerStrategy::Deterministic),
            "delegated" | "llm" => Ok(PlannerStrategy::Delegated),
            other => Err(OrchestrationError::Config(format!(
                "unknown planner strategy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for PlannerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerStrategy::Deterministic => write!(f, "deterministic"),
            PlannerStrategy::Delegated => write!(f, "delegated"),
        }
    }
}

/// Everything a planner may look at for one turn
pub struct PlanningContext<'a> {
    pub query: &'a str,
    pub scope: &'a AccountScope,
    /// Bounded window of prior conversation, oldest first
    pub history: &'a [Message],
    pub tools: &'a [ToolDescriptor],
    pub now: DateTime<Utc>,
}

/// What to do in the next cycle
#[derive(Debug, Clone, Default)]
pub struct PlannerDecision {
    /// Plan step these calls belong to, when the plan was laid out upfront
    pub step_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Free-text reasoning returned alongside the calls
    pub content: Option<String>,
}

impl PlannerDecision {
    pub fn finish(content: Option<String>) -> Self {
        Self {
            content,
            ..Self::default()
        }
    }

    pub fn is_finished(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    fn strategy(&self) -> PlannerStrategy;

    async fn create_plan(&self, ctx: &PlanningContext<'_>) -> Result<ResearchPlan>;

    /// `results` holds every tool result of this turn so far, oldest first.
    async fn next_calls(
        &self,
        plan: &ResearchPlan,
        ctx: &PlanningContext<'_>,
        results: &[ToolExecutionResult],
    ) -> Result<PlannerDecision>;
}

/// Keyword-driven planner with a fixed step list per intent.
///
/// Keeps the system functional without any LLM dependency.
pub struct DeterministicPlanner;

/// (description, [(tool, extra arguments)])
type StepTemplate = (&'static str, Vec<(&'static str, Value)>);

impl DeterministicPlanner {
    fn templates(intent: Intent) -> Vec<StepTemplate> {
        match intent {
            Intent::Cost => vec![
                (
                    "Summarize spend and its trend",
                    vec![("get_cost_summary", json!({})), ("get_cost_trend", json!({}))],
                ),
                (
                    "Find idle resources and potential savings",
                    vec![("find_idle_resources", json!({}))],
                ),
            ],
            Intent::Performance => vec![
                (
                    "Inventory running resources",
                    vec![
                        ("get_resources", json!({ "status": "running" })),
                        ("get_resource_statistics", json!({})),
                    ],
                ),
                (
                    "Check performance alerts",
                    vec![("get_alerts", json!({ "alert_type": "performance" }))],
                ),
            ],
            Intent::Security => vec![
                ("Collect unread alerts", vec![("get_alerts", json!({}))]),
                (
                    "Inventory exposed resources",
                    vec![
                        ("get_resources", json!({})),
                        ("get_resource_statistics", json!({})),
                    ],
                ),
            ],
            Intent::General => vec![
                (
                    "Inventory accounts and resources",
                    vec![("get_accounts", json!({})), ("get_resources", json!({}))],
                ),
                (
                    "Review spend, alerts and idle capacity",
                    vec![
                        ("get_cost_summary", json!({})),
                        ("get_alerts", json!({})),
                        ("find_idle_resources", json!({})),
                    ],
                ),
            ],
        }
    }

    /// Build the plan for an already-classified intent.
    pub fn plan_for(&self, intent: Intent, ctx: &PlanningContext<'_>) -> Result<ResearchPlan> {
        let scope_ids = ctx.scope.account_ids();

        let steps: Vec<PlanStep> = Self::templates(intent)
            .into_iter()
            .enumerate()
            .filter_map(|(index, (description, calls))| {
                let tool_calls: Vec<ToolCall> = calls
                    .into_iter()
                    .filter(|(name, _)| ctx.tools.iter().any(|t| t.name == *name))
                    .map(|(name, mut args)| {
                        if let (Some(ids), Some(obj)) = (&scope_ids, args.as_object_mut()) {
                            obj.insert("account_ids".to_string(), json!(ids));
                        }
                        ToolCall::new(name, args)
                    })
                    .collect();

                (!tool_calls.is_empty()).then(|| PlanStep {
                    step_id: format!("step-{}", index + 1),
                    description: description.to_string(),
                    tool_calls,
                    completed: false,
                    findings: None,
                })
            })
            .collect();

        if steps.is_empty() {
            return Err(OrchestrationError::InvalidPlan(format!(
                "no registered tools for intent '{}'",
                intent
            )));
        }

        let invocations: usize = steps.iter().map(|s| s.tool_calls.len()).sum();

        Ok(ResearchPlan {
            plan_id: Uuid::new_v4(),
            query: ctx.query.to_string(),
            intent,
            priority: IntentClassifier::priority(intent),
            complexity: Complexity::from_invocation_count(invocations),
            steps,
            created_at: ctx.now,
        })
    }
}

#[async_trait]
impl Planner for DeterministicPlanner {
    fn strategy(&self) -> PlannerStrategy {
        PlannerStrategy::Deterministic
    }

    async fn create_plan(&self, ctx: &PlanningContext<'_>) -> Result<ResearchPlan> {
        let intent = IntentClassifier::classify(ctx.query);
        debug!(%intent, "Classified query");
        self.plan_for(intent, ctx)
    }

    async fn next_calls(
        &self,
        plan: &ResearchPlan,
        _ctx: &PlanningContext<'_>,
        _results: &[ToolExecutionResult],
    ) -> Result<PlannerDecision> {
        Ok(match plan.next_open_step() {
            Some(step) => PlannerDecision {
                step_id: Some(step.step_id.clone()),
                tool_calls: step.tool_calls.clone(),
                content: Some(step.description.clone()),
            },
            None => PlannerDecision::finish(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::datastore::InMemoryDataStore;
    use crate::tools::create_default_registry;
    use std::sync::Arc;

    fn descriptors() -> Vec<ToolDescriptor> {
        create_default_registry(Arc::new(InMemoryDataStore::default()), Arc::new(SystemClock))
            .unwrap()
            .list()
    }

    fn ctx<'a>(
        query: &'a str,
        scope: &'a AccountScope,
        tools: &'a [ToolDescriptor],
    ) -> PlanningContext<'a> {
        PlanningContext {
            query,
            scope,
            history: &[],
            tools,
            now: Utc::now(),
        }
    }

    #[test]
    fn test_every_intent_yields_finite_plan_of_registered_tools() {
        let tools = descriptors();
        let scope = AccountScope::All;
        let planner = DeterministicPlanner;

        for intent in Intent::ALL {
            let plan = planner.plan_for(intent, &ctx("q", &scope, &tools)).unwrap();
            assert!(!plan.steps.is_empty(), "{}", intent);
            for name in plan.tool_names() {
                assert!(tools.iter().any(|t| t.name == name), "{} -> {}", intent, name);
            }
        }
    }

    #[tokio::test]
    async fn test_cost_plan_layout() {
        let tools = descriptors();
        let scope = AccountScope::All;
        let plan = DeterministicPlanner
            .create_plan(&ctx("what are our biggest cost drivers", &scope, &tools))
            .await
            .unwrap();

        assert_eq!(plan.intent, Intent::Cost);
        assert_eq!(plan.priority, crate::models::Priority::High);
        assert_eq!(plan.complexity, Complexity::Moderate);
        let names: Vec<&str> = plan.tool_names().collect();
        assert_eq!(
            names,
            vec!["get_cost_summary", "get_cost_trend", "find_idle_resources"]
        );
    }

    #[tokio::test]
    async fn test_scope_is_injected() {
        let tools = descriptors();
        let scope = AccountScope::Accounts(vec!["a".into(), "b".into()]);
        let plan = DeterministicPlanner
            .create_plan(&ctx("overview please", &scope, &tools))
            .await
            .unwrap();

        for call in plan.steps.iter().flat_map(|s| &s.tool_calls) {
            assert_eq!(call.arguments["account_ids"], json!(["a", "b"]));
        }
    }

    #[tokio::test]
    async fn test_steps_are_emitted_in_order_then_finish() {
        let tools = descriptors();
        let scope = AccountScope::All;
        let c = ctx("find idle stuff", &scope, &tools);
        let planner = DeterministicPlanner;
        let mut plan = planner.create_plan(&c).await.unwrap();

        let mut emitted = Vec::new();
        loop {
            let decision = planner.next_calls(&plan, &c, &[]).await.unwrap();
            if decision.is_finished() {
                break;
            }
            let step_id = decision.step_id.unwrap();
            plan.complete_step(&step_id, json!({}));
            emitted.push(step_id);
        }

        assert_eq!(emitted, vec!["step-1", "step-2"]);
        assert!(plan.is_complete());
    }

    #[test]
    fn test_missing_tools_are_dropped_from_plan() {
        let tools: Vec<ToolDescriptor> = descriptors()
            .into_iter()
            .filter(|t| t.name != "get_cost_trend")
            .collect();
        let scope = AccountScope::All;
        let plan = DeterministicPlanner
            .plan_for(Intent::Cost, &ctx("q", &scope, &tools))
            .unwrap();
        assert!(!plan.tool_names().any(|n| n == "get_cost_trend"));

        let err = DeterministicPlanner
            .plan_for(Intent::Cost, &ctx("q", &scope, &[]))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidPlan(_)));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "Deterministic".parse::<PlannerStrategy>().unwrap(),
            PlannerStrategy::Deterministic
        );
        assert_eq!("delegated".parse::<PlannerStrategy>().unwrap(), PlannerStrategy::Delegated);
        assert!("random".parse::<PlannerStrategy>().is_err());
    }
}

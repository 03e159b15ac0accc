//! LLM-delegated planner
//!
//! The provider sees the system prompt, a bounded slice of conversation
//! history, the question, and this turn's tool results, and picks the next
//! tool calls itself. The plan starts empty; the engine records one step per
//! cycle as calls come back.

use super::{Planner, PlannerDecision, PlannerStrategy, PlanningContext};
use crate::classifier::IntentClassifier;
use crate::llm::{ChatMessage, ChatRole, LlmProvider, ToolSpec};
use crate::models::{Complexity, MessageRole, ResearchPlan, ToolCall, ToolExecutionResult};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct DelegatedPlanner {
    provider: Arc<dyn LlmProvider>,
}

impl DelegatedPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    /// Build the full message list for one reasoning call
    pub fn build_messages(
        ctx: &PlanningContext<'_>,
        results: &[ToolExecutionResult],
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(ctx.history.len() + results.len() * 2 + 2);

        messages.push(ChatMessage::system(system_prompt(ctx)));

        for message in ctx.history {
            let role = match message.role {
                MessageRole::User => ChatRole::User,
                MessageRole::Assistant => ChatRole::Assistant,
            };
            messages.push(ChatMessage::new(role, message.content.clone()));
        }

        messages.push(ChatMessage::user(ctx.query));

        for result in results {
            let call = ToolCall {
                id: result.call_id.clone(),
                name: result.tool_name.clone(),
                arguments: result.parameters.clone(),
            };
            let payload = match (&result.output, &result.error) {
                (Some(output), _) => output.to_string(),
                (None, Some(error)) => json!({ "error": error.message }).to_string(),
                (None, None) => "null".to_string(),
            };
            messages.push(ChatMessage::assistant_calls(vec![call]));
            messages.push(ChatMessage::tool_result(&result.tool_name, payload));
        }

        messages
    }
}

fn system_prompt(ctx: &PlanningContext<'_>) -> String {
    format!(
        r#"You are an infrastructure analyst for cloud accounts.

Guidelines:
- Use the available tools to gather facts before answering
- Request several independent tools at once when they do not depend on each other
- Never request the same tool with the same parameters twice
- Stop calling tools as soon as the collected data answers the question
- Scope: {}
- Current time: {}

When you have enough data, reply with a short plain-text summary and no tool calls."#,
        ctx.scope,
        ctx.now.to_rfc3339()
    )
}

#[async_trait]
impl Planner for DelegatedPlanner {
    fn strategy(&self) -> PlannerStrategy {
        PlannerStrategy::Delegated
    }

    async fn create_plan(&self, ctx: &PlanningContext<'_>) -> Result<ResearchPlan> {
        let intent = IntentClassifier::classify(ctx.query);

        Ok(ResearchPlan {
            plan_id: Uuid::new_v4(),
            query: ctx.query.to_string(),
            intent,
            priority: IntentClassifier::priority(intent),
            complexity: Complexity::Simple,
            steps: Vec::new(),
            created_at: ctx.now,
        })
    }

    async fn next_calls(
        &self,
        plan: &ResearchPlan,
        ctx: &PlanningContext<'_>,
        results: &[ToolExecutionResult],
    ) -> Result<PlannerDecision> {
        let messages = Self::build_messages(ctx, results);
        let specs: Vec<ToolSpec> = ctx.tools.iter().map(ToolSpec::from).collect();

        debug!(
            plan_id = %plan.plan_id,
            messages = messages.len(),
            prior_results = results.len(),
            "Requesting next tool calls"
        );

        let response = self.provider.complete(&messages, Some(&specs)).await?;

        info!(
            model = self.provider.model(),
            tool_calls = response.tool_calls.len(),
            finished = !response.has_tool_calls(),
            "Delegated reasoning step"
        );

        Ok(PlannerDecision {
            step_id: None,
            content: response.text_content().map(str::to_string),
            tool_calls: response.tool_calls,
        })
    }
}

//! Graph engine
//!
//! One turn is an explicit finite-state machine:
//!
//! PLANNING → EXECUTING ⟲ → SYNTHESIZING → RESPONDING → DONE
//!
//! `executing` loops while the planner keeps requesting tools, up to the
//! cycle cap. Every phase change goes through `transition`, so an illegal
//! move is an error instead of a silent branch.

use crate::clock::Clock;
use crate::error::OrchestrationError;
use crate::execution::ToolExecutor;
use crate::formatter::{FormatInput, FormattedResponse, ResponseFormatter};
use crate::insights::InsightEngine;
use crate::models::{
    AccountScope, CollectedData, Complexity, Insight, Message, PlanStep, ResearchPlan,
    ToolExecutionResult,
};
use crate::planner::{Planner, PlannerDecision, PlannerStrategy, PlanningContext};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CYCLES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphPhase {
    Planning,
    Executing,
    Synthesizing,
    Responding,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphEvent {
    PlanReady,
    ToolsRequested,
    NoToolCalls,
    CycleCapReached,
    InsightsReady,
    ResponseReady,
}

impl fmt::Display for GraphPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GraphPhase::Planning => "planning",
            GraphPhase::Executing => "executing",
            GraphPhase::Synthesizing => "synthesizing",
            GraphPhase::Responding => "responding",
            GraphPhase::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// The transition table. Anything not listed is invalid.
pub fn transition(phase: GraphPhase, event: GraphEvent) -> Result<GraphPhase> {
    use GraphEvent::*;
    use GraphPhase::*;

    match (phase, event) {
        (Planning, PlanReady) => Ok(Executing),
        (Executing, ToolsRequested) => Ok(Executing),
        (Executing, NoToolCalls) | (Executing, CycleCapReached) => Ok(Synthesizing),
        (Synthesizing, InsightsReady) => Ok(Responding),
        (Responding, ResponseReady) => Ok(Done),
        (phase, event) => Err(OrchestrationError::InvalidTransition(format!(
            "{:?} in phase {}",
            event, phase
        ))),
    }
}

/// Current phase plus every phase entered so far
#[derive(Debug, Clone)]
pub struct StateMachine {
    phase: GraphPhase,
    trace: Vec<GraphPhase>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            phase: GraphPhase::Planning,
            trace: vec![GraphPhase::Planning],
        }
    }

    pub fn phase(&self) -> GraphPhase {
        self.phase
    }

    pub fn fire(&mut self, event: GraphEvent) -> Result<GraphPhase> {
        let next = transition(self.phase, event)?;
        debug!(from = %self.phase, to = %next, ?event, "Phase transition");
        self.phase = next;
        self.trace.push(next);
        Ok(next)
    }

    pub fn trace(&self) -> &[GraphPhase] {
        &self.trace
    }

    pub fn into_trace(self) -> Vec<GraphPhase> {
        self.trace
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-turn input
pub struct GraphInput<'a> {
    pub query: &'a str,
    pub scope: &'a AccountScope,
    pub history: &'a [Message],
}

/// Everything one run of the graph produced
#[derive(Debug)]
pub struct GraphOutcome {
    pub plan: ResearchPlan,
    pub tool_results: Vec<ToolExecutionResult>,
    /// Data collected during this turn only
    pub collected: CollectedData,
    pub insights: Vec<Insight>,
    pub response: FormattedResponse,
    pub reasoning_trace: Vec<String>,
    pub phase_trace: Vec<GraphPhase>,
    /// Reasoning cycles used (planner consultations)
    pub cycles: u32,
    pub planning_exhausted: bool,
}

pub struct GraphEngine {
    planner: Arc<dyn Planner>,
    executor: Arc<ToolExecutor>,
    insights: Arc<InsightEngine>,
    formatter: Arc<dyn ResponseFormatter>,
    clock: Arc<dyn Clock>,
    max_cycles: u32,
}

impl GraphEngine {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: Arc<ToolExecutor>,
        insights: Arc<InsightEngine>,
        formatter: Arc<dyn ResponseFormatter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            planner,
            executor,
            insights,
            formatter,
            clock,
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }

    pub fn with_max_cycles(mut self, max_cycles: u32) -> Self {
        self.max_cycles = max_cycles.max(1);
        self
    }

    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }

    /// Run one turn through every phase.
    ///
    /// Returns an error only for fatal conditions; the caller must then
    /// discard everything this run produced.
    pub async fn run(&self, input: &GraphInput<'_>) -> Result<GraphOutcome> {
        let mut machine = StateMachine::new();
        let mut reasoning_trace = Vec::new();
        let tools = self.executor.registry().list();
        let ctx = PlanningContext {
            query: input.query,
            scope: input.scope,
            history: input.history,
            tools: &tools,
            now: self.clock.now(),
        };

        // -------------------------------------------------
        // PLANNING
        // -------------------------------------------------
        let mut plan = self.planner.create_plan(&ctx).await?;
        reasoning_trace.push(format!(
            "Planned ({} strategy): intent={}, priority={:?}, steps={}",
            self.planner.strategy(),
            plan.intent,
            plan.priority,
            plan.steps.len()
        ));
        machine.fire(GraphEvent::PlanReady)?;

        // -------------------------------------------------
        // EXECUTING
        // -------------------------------------------------
        let mut collected = CollectedData::default();
        let mut tool_results: Vec<ToolExecutionResult> = Vec::new();
        let mut cycles: u32 = 0;
        let mut planning_exhausted = false;

        loop {
            if cycles >= self.max_cycles {
                let finished = self.planner.strategy() == PlannerStrategy::Deterministic
                    && plan.is_complete();
                if finished {
                    machine.fire(GraphEvent::NoToolCalls)?;
                } else {
                    let exhausted = OrchestrationError::PlanningExhausted(format!(
                        "stopped after {} reasoning cycles",
                        cycles
                    ));
                    warn!(cycles, "{}", exhausted);
                    reasoning_trace.push(format!("{}; continuing with collected data", exhausted));
                    planning_exhausted = true;
                    machine.fire(GraphEvent::CycleCapReached)?;
                }
                break;
            }

            cycles += 1;

            let decision = match self.planner.next_calls(&plan, &ctx, &tool_results).await {
                Ok(decision) => decision,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, cycle = cycles, "Reasoning failed, continuing with partial data");
                    reasoning_trace.push(format!("Cycle {}: reasoning failed ({})", cycles, e));
                    PlannerDecision::finish(None)
                }
            };

            if decision.is_finished() {
                if let Some(content) = &decision.content {
                    reasoning_trace.push(format!("Cycle {}: {}", cycles, content));
                }
                reasoning_trace.push(format!("Cycle {}: no further tool calls", cycles));
                machine.fire(GraphEvent::NoToolCalls)?;
                break;
            }

            machine.fire(GraphEvent::ToolsRequested)?;

            let calls = self.executor.apply_scope(decision.tool_calls, input.scope);
            let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            reasoning_trace.push(format!(
                "Cycle {}: {} -> [{}]",
                cycles,
                decision.content.as_deref().unwrap_or("tool calls"),
                names.join(", ")
            ));

            let outcome = match self.executor.execute_step(&calls).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, cycle = cycles, "Step rejected");
                    reasoning_trace.push(format!("Cycle {}: step rejected ({})", cycles, e));
                    machine.fire(GraphEvent::NoToolCalls)?;
                    break;
                }
            };

            if let Some(fatal) = outcome.fatal {
                warn!(error = %fatal, "Fatal tool failure, aborting turn");
                return Err(fatal);
            }

            collected = collected.merged(&outcome.collected);
            let findings = outcome.findings();

            match decision.step_id {
                Some(step_id) => plan.complete_step(&step_id, findings),
                None => {
                    plan.steps.push(PlanStep {
                        step_id: format!("cycle-{}", cycles),
                        description: decision
                            .content
                            .unwrap_or_else(|| "Delegated tool calls".to_string()),
                        tool_calls: calls,
                        completed: true,
                        findings: Some(findings),
                    });
                    plan.complexity = Complexity::from_invocation_count(plan.tool_names().count());
                }
            }

            tool_results.extend(outcome.results);
        }

        // -------------------------------------------------
        // SYNTHESIZING
        // -------------------------------------------------
        let insights = self.insights.synthesize(&collected, self.clock.now());
        reasoning_trace.push(format!("Synthesized {} insight(s)", insights.len()));
        machine.fire(GraphEvent::InsightsReady)?;

        // -------------------------------------------------
        // RESPONDING
        // -------------------------------------------------
        let response = self
            .formatter
            .format(&FormatInput {
                query: input.query,
                scope: input.scope,
                insights: &insights,
                collected: &collected,
            })
            .await?;
        machine.fire(GraphEvent::ResponseReady)?;

        info!(
            plan_id = %plan.plan_id,
            cycles,
            tool_calls = tool_results.len(),
            insights = insights.len(),
            planning_exhausted,
            "Graph run completed"
        );

        Ok(GraphOutcome {
            plan,
            tool_results,
            collected,
            insights,
            response,
            reasoning_trace,
            phase_trace: machine.into_trace(),
            cycles,
            planning_exhausted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmResponse;
    use crate::models::{ExecutionStatus, ToolCall};
    use crate::planner::{DelegatedPlanner, DeterministicPlanner};
    use crate::test_support::{engine_parts, EngineParts, FailingTool, ScriptedProvider};
    use serde_json::json;

    fn engine(parts: &EngineParts, planner: Arc<dyn Planner>) -> GraphEngine {
        GraphEngine::new(
            planner,
            parts.executor.clone(),
            parts.insights.clone(),
            parts.formatter.clone(),
            parts.clock.clone(),
        )
    }

    fn input<'a>(query: &'a str, scope: &'a AccountScope) -> GraphInput<'a> {
        GraphInput {
            query,
            scope,
            history: &[],
        }
    }

    #[test]
    fn test_transition_table() {
        use GraphEvent::*;
        use GraphPhase::*;

        assert_eq!(transition(Planning, PlanReady).unwrap(), Executing);
        assert_eq!(transition(Executing, ToolsRequested).unwrap(), Executing);
        assert_eq!(transition(Executing, NoToolCalls).unwrap(), Synthesizing);
        assert_eq!(transition(Executing, CycleCapReached).unwrap(), Synthesizing);
        assert_eq!(transition(Synthesizing, InsightsReady).unwrap(), Responding);
        assert_eq!(transition(Responding, ResponseReady).unwrap(), Done);
    }

    #[test]
    fn test_invalid_transitions() {
        use GraphEvent::*;
        use GraphPhase::*;

        for (phase, event) in [
            (Planning, ToolsRequested),
            (Planning, ResponseReady),
            (Executing, InsightsReady),
            (Synthesizing, ToolsRequested),
            (Done, PlanReady),
            (Done, ResponseReady),
        ] {
            assert!(
                matches!(transition(phase, event), Err(OrchestrationError::InvalidTransition(_))),
                "{:?} {:?}",
                phase,
                event
            );
        }

        let mut machine = StateMachine::new();
        assert!(machine.fire(InsightsReady).is_err());
        assert_eq!(machine.phase(), Planning);
    }

    #[tokio::test]
    async fn test_deterministic_run_reaches_done() {
        let parts = engine_parts(vec![]);
        let scope = AccountScope::All;
        let outcome = engine(&parts, Arc::new(DeterministicPlanner))
            .run(&input("find idle resources", &scope))
            .await
            .unwrap();

        assert_eq!(
            outcome.phase_trace,
            vec![
                GraphPhase::Planning,
                GraphPhase::Executing,
                GraphPhase::Executing,
                GraphPhase::Executing,
                GraphPhase::Synthesizing,
                GraphPhase::Responding,
                GraphPhase::Done,
            ]
        );
        assert!(outcome.plan.is_complete());
        assert_eq!(outcome.cycles, 3);
        assert!(!outcome.planning_exhausted);
        assert_eq!(outcome.tool_results.len(), 3);
        assert!(!outcome.insights.is_empty());
    }

    #[tokio::test]
    async fn test_delegated_loop_stops_at_cycle_cap() {
        let parts = engine_parts(vec![]);
        let provider = Arc::new(ScriptedProvider::repeating(|| {
            Ok(LlmResponse {
                content: None,
                tool_calls: vec![ToolCall::new("get_alerts", json!({}))],
            })
        }));
        let scope = AccountScope::All;
        let outcome = engine(&parts, Arc::new(DelegatedPlanner::new(provider.clone())))
            .with_max_cycles(5)
            .run(&input("anything new?", &scope))
            .await
            .unwrap();

        assert_eq!(provider.calls(), 5);
        assert_eq!(outcome.cycles, 5);
        assert!(outcome.planning_exhausted);
        assert_eq!(outcome.plan.steps.len(), 5);
        assert_eq!(outcome.phase_trace.last(), Some(&GraphPhase::Done));
    }

    #[tokio::test]
    async fn test_tool_failure_is_isolated() {
        let parts = engine_parts(vec![Arc::new(FailingTool::new("get_pricing", || {
            OrchestrationError::ToolExecution("pricing api down".into())
        }))]);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(LlmResponse {
                content: Some("Checking pricing and spend".into()),
                tool_calls: vec![
                    ToolCall::new("get_pricing", json!({})),
                    ToolCall::new("get_cost_summary", json!({})),
                ],
            }),
            Ok(LlmResponse::text("Enough data.")),
        ]));
        let scope = AccountScope::All;
        let outcome = engine(&parts, Arc::new(DelegatedPlanner::new(provider)))
            .run(&input("what do we spend?", &scope))
            .await
            .unwrap();

        assert!(outcome.phase_trace.contains(&GraphPhase::Responding));
        assert_eq!(outcome.tool_results[0].status, ExecutionStatus::Failed);
        assert_eq!(outcome.tool_results[1].status, ExecutionStatus::Success);
        assert!(!outcome.collected.costs.is_empty());
        assert_eq!(outcome.collected.gaps[0].tool_name, "get_pricing");
        assert!(outcome.response.answer.contains("get_pricing"));
    }

    #[tokio::test]
    async fn test_non_fatal_reasoning_error_still_responds() {
        let parts = engine_parts(vec![]);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(LlmResponse {
                content: None,
                tool_calls: vec![ToolCall::new("find_idle_resources", json!({}))],
            }),
            Err(OrchestrationError::Provider("malformed response".into())),
        ]));
        let scope = AccountScope::All;
        let outcome = engine(&parts, Arc::new(DelegatedPlanner::new(provider)))
            .run(&input("idle?", &scope))
            .await
            .unwrap();

        assert_eq!(outcome.cycles, 2);
        assert!(!outcome.planning_exhausted);
        assert!(!outcome.insights.is_empty());
        assert!(outcome
            .reasoning_trace
            .iter()
            .any(|line| line.contains("reasoning failed")));
    }

    #[tokio::test]
    async fn test_provider_unavailable_is_fatal() {
        let parts = engine_parts(vec![]);
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            OrchestrationError::ProviderUnavailable("connection refused".into()),
        )]));
        let scope = AccountScope::All;
        let result = engine(&parts, Arc::new(DelegatedPlanner::new(provider)))
            .run(&input("anything?", &scope))
            .await;

        assert!(matches!(result, Err(OrchestrationError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_data_store_unavailable_is_fatal() {
        let parts = engine_parts(vec![Arc::new(FailingTool::new("get_pricing", || {
            OrchestrationError::DataStoreUnavailable("connection refused".into())
        }))]);
        let provider = Arc::new(ScriptedProvider::repeating(|| {
            Ok(LlmResponse {
                content: None,
                tool_calls: vec![ToolCall::new("get_pricing", json!({}))],
            })
        }));
        let scope = AccountScope::All;
        let result = engine(&parts, Arc::new(DelegatedPlanner::new(provider)))
            .run(&input("prices?", &scope))
            .await;

        assert!(matches!(result, Err(OrchestrationError::DataStoreUnavailable(_))));
    }
}

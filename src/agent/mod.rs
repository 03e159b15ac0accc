//! Main orchestrator - one chat turn end to end
//!
//! LOAD STATE → GRAPH (plan → execute ⟲ → synthesize → respond) → COMMIT
//!
//! State is committed only after the whole turn succeeded. A failed turn
//! leaves the stored session exactly as it was.

use crate::audit::{compute_output_hash, AuditLog, TurnRecord};
use crate::cache::Cache;
use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::datastore::DataStore;
use crate::error::OrchestrationError;
use crate::execution::ToolExecutor;
use crate::formatter::{LlmFormatter, ResponseFormatter, TemplateFormatter, Visualization};
use crate::graph::{GraphEngine, GraphInput, GraphPhase};
use crate::insights::create_default_insight_engine;
use crate::llm::{LlmProvider, RetryingProvider};
use crate::models::{
    AccountScope, ConversationState, Insight, Message, ResearchPlan, ToolExecutionResult, ToolOutput,
};
use crate::planner::{DelegatedPlanner, DeterministicPlanner, Planner, PlannerStrategy};
use crate::state::{InMemorySessionStore, SessionStore};
use crate::tools::create_default_registry;
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the caller gets back for one turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    pub turn_id: Uuid,
    pub answer: String,
    pub findings: Vec<Insight>,
    pub updated_state: ConversationState,
    pub tool_results: Vec<ToolExecutionResult>,
    pub visualization: Option<Visualization>,
    pub plan: ResearchPlan,
    pub reasoning_trace: Vec<String>,
    pub phase_trace: Vec<GraphPhase>,
    pub cycles: u32,
    pub planning_exhausted: bool,
    pub duration_ms: u64,
}

pub struct Orchestrator {
    graph: GraphEngine,
    sessions: Arc<dyn SessionStore>,
    audit_log: AuditLog,
    cache: Option<Arc<Cache<ToolOutput>>>,
    /// One lock per session id; turns of the same session run one at a time
    session_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    clock: Arc<dyn Clock>,
    history_window: usize,
}

impl Orchestrator {
    pub fn new(graph: GraphEngine, sessions: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            graph,
            sessions,
            audit_log: AuditLog::new(),
            cache: None,
            session_locks: StdMutex::new(HashMap::new()),
            clock,
            history_window: crate::config::DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_history_window(mut self, history_window: usize) -> Self {
        self.history_window = history_window;
        self
    }

    /// Attach the tool-result cache so callers can invalidate it
    pub fn with_cache(mut self, cache: Arc<Cache<ToolOutput>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Wire every component from configuration.
    ///
    /// The delegated strategy requires a provider. With a provider present
    /// the answer prose is LLM-written (template fallback); without one the
    /// template formatter is used.
    pub fn from_config(
        config: &OrchestratorConfig,
        data_store: Arc<dyn DataStore>,
        provider: Option<Arc<dyn LlmProvider>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let provider = provider.map(|inner| {
            Arc::new(RetryingProvider::new(inner, config.provider_retry)) as Arc<dyn LlmProvider>
        });
        let registry = Arc::new(create_default_registry(data_store, clock.clone())?);
        let cache = Arc::new(Cache::new(config.cache_capacity, clock.clone()));
        let executor = Arc::new(
            ToolExecutor::new(registry, cache.clone(), clock.clone())
                .with_timeout(config.tool_timeout),
        );

        let planner: Arc<dyn Planner> = match (config.planner_strategy, &provider) {
            (PlannerStrategy::Deterministic, _) => Arc::new(DeterministicPlanner),
            (PlannerStrategy::Delegated, Some(provider)) => {
                Arc::new(DelegatedPlanner::new(provider.clone()))
            }
            (PlannerStrategy::Delegated, None) => {
                return Err(OrchestrationError::Config(
                    "delegated planner requires an LLM provider (set GEMINI_API_KEY)".to_string(),
                ))
            }
        };

        let formatter: Arc<dyn ResponseFormatter> = match provider {
            Some(provider) => Arc::new(LlmFormatter::new(provider)),
            None => Arc::new(TemplateFormatter),
        };

        let graph = GraphEngine::new(
            planner,
            executor,
            Arc::new(create_default_insight_engine(config.thresholds)),
            formatter,
            clock.clone(),
        )
        .with_max_cycles(config.max_cycles);

        info!(
            strategy = %config.planner_strategy,
            max_cycles = config.max_cycles,
            cache_capacity = config.cache_capacity,
            "Orchestrator initialized"
        );

        Ok(Self::new(graph, Arc::new(InMemorySessionStore::new()), clock)
            .with_history_window(config.history_window)
            .with_cache(cache))
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    /// Drop cached tool results whose key contains `pattern` (e.g. a tool
    /// name) after the underlying data changed. Returns how many went.
    pub fn invalidate_cache(&self, pattern: &str) -> usize {
        let removed = self.cache.as_ref().map_or(0, |cache| cache.invalidate(pattern));
        info!(pattern, removed, "Tool cache invalidated");
        removed
    }

    /// Drop every cached tool result; returns how many went.
    pub fn clear_cache(&self) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };
        let removed = cache.len();
        cache.clear();
        info!(removed, "Tool cache cleared");
        removed
    }

    fn session_lock(&self, session_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .session_locks
            .lock()
            .map_err(|_| OrchestrationError::SessionError("session lock poisoned".to_string()))?;
        Ok(locks.entry(session_id.to_string()).or_default().clone())
    }

    /// Process one turn of a stored session and commit the new state.
    ///
    /// A missing session is created with `scope` (or all accounts). On any
    /// error nothing is written. Turns of one session are serialized so
    /// neither overwrites the other's messages.
    pub async fn process_turn(
        &self,
        session_id: &str,
        query: &str,
        scope: Option<AccountScope>,
    ) -> Result<TurnResult> {
        if session_id.trim().is_empty() {
            return Err(OrchestrationError::SessionError(
                "session id must not be empty".to_string(),
            ));
        }

        let lock = self.session_lock(session_id)?;
        let _turn = lock.lock().await;
        debug!(session_id, "Session lock acquired");

        let state = match self.sessions.load(session_id).await? {
            Some(state) => state,
            None => {
                info!(session_id, "Creating session");
                ConversationState::new(session_id, scope.clone().unwrap_or_default(), self.clock.now())
            }
        };

        let result = self.run_turn(&state, query, scope).await?;
        self.sessions.save(result.updated_state.clone()).await?;

        Ok(result)
    }

    /// Run one turn against `state` without touching the session store.
    pub async fn run_turn(
        &self,
        state: &ConversationState,
        query: &str,
        scope: Option<AccountScope>,
    ) -> Result<TurnResult> {
        let start_time = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return Err(OrchestrationError::Validation("query must not be empty".to_string()));
        }

        let received_at = self.clock.now();
        let scoped = state.with_scope(scope);

        info!(
            session_id = %scoped.session_id,
            scope = %scoped.scope,
            query,
            "Orchestrator: starting turn"
        );

        let outcome = match self
            .graph
            .run(&GraphInput {
                query,
                scope: &scoped.scope,
                history: scoped.recent_messages(self.history_window),
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(session_id = %scoped.session_id, error = %e, "Turn failed, state unchanged");
                return Err(e);
            }
        };

        let answer = outcome.response.answer;
        let updated_state = scoped
            .with_message(Message::user(query, received_at))
            .with_collected(&outcome.collected)
            .with_message(Message::assistant(answer.clone(), self.clock.now()));

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let plan = Arc::new(outcome.plan);
        let tool_results = Arc::new(outcome.tool_results);
        let findings = Arc::new(outcome.insights);
        let reasoning_trace = Arc::new(outcome.reasoning_trace);

        let turn_id = self
            .audit_log
            .record(TurnRecord {
                turn_id: Uuid::new_v4(),
                session_id: updated_state.session_id.clone(),
                query: query.to_string(),
                scope: updated_state.scope.clone(),
                plan: plan.clone(),
                tool_results: tool_results.clone(),
                findings: findings.clone(),
                answer: answer.clone(),
                output_hash: compute_output_hash(&findings, &answer),
                reasoning_trace: reasoning_trace.clone(),
                created_at: self.clock.now(),
                duration_ms,
            })
            .await?;

        info!(
            %turn_id,
            session_id = %updated_state.session_id,
            findings = findings.len(),
            cycles = outcome.cycles,
            duration_ms,
            "Turn completed"
        );

        Ok(TurnResult {
            turn_id,
            answer,
            findings: findings.as_ref().clone(),
            updated_state,
            tool_results: tool_results.as_ref().clone(),
            visualization: outcome.response.visualization,
            plan: plan.as_ref().clone(),
            reasoning_trace: reasoning_trace.as_ref().clone(),
            phase_trace: outcome.phase_trace,
            cycles: outcome.cycles,
            planning_exhausted: outcome.planning_exhausted,
            duration_ms,
        })
    }
}

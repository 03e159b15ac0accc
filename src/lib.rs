//! Infrastructure Analysis Orchestrator
//!
//! A stateful analysis engine that:
//! - Answers natural-language questions about cloud accounts, resources, costs and alerts
//! - Plans which read-only tools to run (keyword rules or an LLM)
//! - Executes tools concurrently with caching, timeouts and error isolation
//! - Derives ranked findings with deterministic rules (no LLM in the numbers)
//! - Keeps per-session conversation state and an auditable turn log
//!
//! TURN LOOP:
//! PLANNING → EXECUTING ⟲ → SYNTHESIZING → RESPONDING → DONE

pub mod agent;
pub mod api;
pub mod audit;
pub mod cache;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod datastore;
pub mod error;
pub mod execution;
pub mod formatter;
pub mod graph;
pub mod insights;
pub mod llm;
pub mod models;
pub mod planner;
pub mod state;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::{Orchestrator, TurnResult};
pub use config::OrchestratorConfig;

//! Tool trait and registry
//!
//! Tools are named, schema-validated, read-only operations over the
//! infrastructure data store. The registry is built once at startup and
//! never mutated afterwards.

use crate::clock::Clock;
use crate::datastore::DataStore;
use crate::error::OrchestrationError;
use crate::models::ToolOutput;
use crate::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub mod infra;
pub mod schema;

pub use schema::{ParamField, ParamKind, ParamSchema};

/// TTL for cheap, volatile data such as active alerts
pub const TTL_VOLATILE_SECS: u64 = 60;
/// TTL for resource inventories
pub const TTL_INVENTORY_SECS: u64 = 300;
/// TTL for account metadata
pub const TTL_ACCOUNTS_SECS: u64 = 600;
/// TTL for expensive, stable cost aggregates
pub const TTL_AGGREGATE_SECS: u64 = 900;

/// Trait for a single tool (read-only execution)
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> ParamSchema;

    /// Freshness window for cached results of this tool
    fn cache_ttl_secs(&self) -> u64 {
        TTL_INVENTORY_SECS
    }

    /// `params` has already been validated against `schema()`
    async fn execute(&self, params: &Value) -> Result<ToolOutput>;
}

/// What the planner and the LLM get to see about a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: ParamSchema,
    pub cache_ttl_secs: u64,
}

impl ToolDescriptor {
    fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            schema: tool.schema(),
            cache_ttl_secs: tool.cache_ttl_secs(),
        }
    }
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Names are globally unique; a second registration is an error.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(OrchestrationError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| OrchestrationError::ToolNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All descriptors, sorted by name for stable prompts
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .values()
            .map(|tool| ToolDescriptor::of(tool.as_ref()))
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the registry with every built-in infrastructure tool.
pub fn create_default_registry(
    data_store: Arc<dyn DataStore>,
    clock: Arc<dyn Clock>,
) -> Result<ToolRegistry> {
    use infra::*;

    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(GetAccountsTool::new(data_store.clone())))?;
    registry.register(Arc::new(GetResourcesTool::new(data_store.clone())))?;
    registry.register(Arc::new(ResourceStatisticsTool::new(data_store.clone())))?;
    registry.register(Arc::new(FindIdleResourcesTool::new(data_store.clone())))?;
    registry.register(Arc::new(CostSummaryTool::new(data_store.clone(), clock.clone())))?;
    registry.register(Arc::new(CostTrendTool::new(data_store.clone(), clock)))?;
    registry.register(Arc::new(GetAlertsTool::new(data_store)))?;

    Ok(registry)
}

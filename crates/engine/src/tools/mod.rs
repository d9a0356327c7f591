//! The closed tool set behind the executor
//!
//! Tools are statically registered and dispatched on [`ToolId`]; an
//! unknown-tool reference cannot be expressed.

mod knowledge;
mod structured;

pub use knowledge::{
    InMemoryIndex, KnowledgeChunk, KnowledgeIndex, KnowledgeParams, KnowledgeRetriever, Namespace,
    RetrieverConfig,
};
pub use structured::{
    fact_key, InMemoryTableStore, MetricCatalog, MetricExpr, QueryMode, RowFilter, ScanResult,
    StatRecord, StructuredParams, StructuredQueryEngine, TableStore,
};

use crate::types::{ToolId, ToolOutput};
use async_trait::async_trait;
use rinkside_common::auth::Scope;
use rinkside_common::errors::Result;
use serde_json::Value;
use std::collections::BTreeSet;

/// Common interface every tool implements
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> ToolId;

    /// Execute with normalized params under the caller's permitted scopes.
    /// Implementations must never emit evidence outside `scopes`.
    async fn execute(&self, params: &Value, scopes: &BTreeSet<Scope>) -> Result<ToolOutput>;
}

/// Statically registered tool set
pub struct ToolRegistry {
    knowledge: KnowledgeRetriever,
    structured: StructuredQueryEngine,
}

impl ToolRegistry {
    pub fn new(knowledge: KnowledgeRetriever, structured: StructuredQueryEngine) -> Self {
        Self {
            knowledge,
            structured,
        }
    }

    /// Tagged-variant dispatch; total over the closed tool set
    pub fn get(&self, id: ToolId) -> &dyn Tool {
        match id {
            ToolId::KnowledgeSearch => &self.knowledge,
            ToolId::StructuredQuery => &self.structured,
        }
    }
}

//! Knowledge Retriever - semantic search over indexed text chunks
//!
//! Two logical namespaces: general domain knowledge and entity-specific
//! context. Ranking combines lexical relevance with metadata filtering;
//! results are a bounded top-K, deduplicated by underlying source id.
//!
//! The index itself is produced by an external builder and consumed
//! read-only; chunk ids are globally unique by that collaborator's
//! contract.

use super::Tool;
use crate::types::{EvidenceItem, EvidenceKind, ToolId, ToolOutput};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rinkside_common::auth::Scope;
use rinkside_common::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// Logical index namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// General hockey knowledge: rules, concepts, strategy
    Domain,
    /// Entity-specific context: player and team notes
    Entity,
}

/// One indexed text chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Globally unique chunk id (index builder contract)
    pub chunk_id: String,

    /// Underlying document id; duplicates collapse on this
    pub source_id: String,

    pub namespace: Namespace,
    pub title: String,
    pub content: String,

    /// Scope tag the source material carries
    pub scope: Scope,

    /// Canonical entity name for entity-namespace chunks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,

    /// Fact this chunk makes a numeric claim about, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_key: Option<String>,

    /// The claimed numeric value for that fact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_value: Option<f64>,

    /// When the source material was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

/// Read-only access to the chunk index
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Fetch the chunks of one namespace
    async fn fetch(&self, namespace: Namespace) -> Result<Vec<KnowledgeChunk>>;
}

/// Index snapshot held in memory, loaded from the builder's chunk export
pub struct InMemoryIndex {
    domain: Vec<KnowledgeChunk>,
    entity: Vec<KnowledgeChunk>,
}

impl InMemoryIndex {
    pub fn from_chunks(chunks: Vec<KnowledgeChunk>) -> Self {
        let (entity, domain) = chunks
            .into_iter()
            .partition(|c| c.namespace == Namespace::Entity);
        Self { domain, entity }
    }
}

#[async_trait]
impl KnowledgeIndex for InMemoryIndex {
    async fn fetch(&self, namespace: Namespace) -> Result<Vec<KnowledgeChunk>> {
        Ok(match namespace {
            Namespace::Domain => self.domain.clone(),
            Namespace::Entity => self.entity.clone(),
        })
    }
}

/// Knowledge search parameters (normalized; part of the cache fingerprint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeParams {
    pub text: String,
    pub namespace: Namespace,

    /// Restrict entity-namespace results to one canonical entity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Bounded top-K results
    pub top_k: usize,

    /// Minimum relevance score to keep a chunk
    pub min_score: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            min_score: 0.25,
        }
    }
}

/// The knowledge search tool
pub struct KnowledgeRetriever {
    index: Arc<dyn KnowledgeIndex>,
    config: RetrieverConfig,
}

impl KnowledgeRetriever {
    pub fn new(index: Arc<dyn KnowledgeIndex>, config: RetrieverConfig) -> Self {
        Self { index, config }
    }

    /// Lexical relevance: matched query terms over total, with a small
    /// bonus for title matches.
    fn score(query_terms: &[&str], chunk: &KnowledgeChunk) -> f32 {
        if query_terms.is_empty() {
            return 0.0;
        }
        let content = chunk.content.to_lowercase();
        let title = chunk.title.to_lowercase();

        let matched = query_terms
            .iter()
            .filter(|t| content.contains(**t))
            .count() as f32;
        let title_matched = query_terms
            .iter()
            .filter(|t| title.contains(**t))
            .count() as f32;

        let base = matched / query_terms.len() as f32;
        let boost = 0.2 * (title_matched / query_terms.len() as f32);
        (base + boost).min(1.0)
    }

    fn significant_terms(text: &str) -> Vec<&str> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .collect()
    }

    async fn search(
        &self,
        params: &KnowledgeParams,
        scopes: &BTreeSet<Scope>,
    ) -> Result<Vec<EvidenceItem>> {
        let chunks = self.index.fetch(params.namespace).await?;
        let terms = Self::significant_terms(&params.text);

        let mut scored: Vec<(f32, KnowledgeChunk)> = chunks
            .into_iter()
            // Scope filter before any ranking work
            .filter(|c| scopes.contains(&c.scope))
            // Metadata filter: entity restriction
            .filter(|c| match (&params.entity, &c.entity) {
                (Some(wanted), Some(have)) => wanted.eq_ignore_ascii_case(have),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(|c| (Self::score(&terms, &c), c))
            .filter(|(score, _)| *score >= self.config.min_score)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // Dedup by source id, best score wins
        let mut seen: HashMap<String, ()> = HashMap::new();
        let mut items = Vec::new();
        for (score, chunk) in scored {
            if seen.insert(chunk.source_id.clone(), ()).is_some() {
                continue;
            }
            items.push(EvidenceItem {
                id: Uuid::new_v4(),
                kind: EvidenceKind::Knowledge,
                citation: format!("{} ({})", chunk.title, chunk.source_id),
                source_id: chunk.chunk_id,
                content: chunk.content,
                value: chunk.claimed_value,
                fact_key: chunk.fact_key,
                confidence: score,
                source_scope: chunk.scope,
                as_of: chunk.as_of,
            });
            if items.len() >= self.config.top_k {
                break;
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl Tool for KnowledgeRetriever {
    fn id(&self) -> ToolId {
        ToolId::KnowledgeSearch
    }

    async fn execute(&self, params: &Value, scopes: &BTreeSet<Scope>) -> Result<ToolOutput> {
        let params: KnowledgeParams = serde_json::from_value(params.clone())?;
        let evidence = self.search(&params, scopes).await?;
        Ok(ToolOutput {
            evidence,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use rinkside_common::auth::{scopes_for_role, UserRole};

    fn retriever() -> KnowledgeRetriever {
        KnowledgeRetriever::new(
            Arc::new(InMemoryIndex::from_chunks(fixtures::knowledge_chunks())),
            RetrieverConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_domain_search_ranks_relevant_chunks() {
        let scopes = scopes_for_role(UserRole::Coach);
        let params = KnowledgeParams {
            text: "why do zone entries matter".to_string(),
            namespace: Namespace::Domain,
            entity: None,
        };

        let items = retriever().search(&params, &scopes).await.unwrap();

        assert!(!items.is_empty());
        assert!(items.len() <= 4);
        assert!(items[0].content.to_lowercase().contains("zone"));
        assert!(items
            .iter()
            .all(|i| i.kind == EvidenceKind::Knowledge));
    }

    #[tokio::test]
    async fn test_entity_namespace_filters_by_entity() {
        let scopes = scopes_for_role(UserRole::Coach);
        let params = KnowledgeParams {
            text: "suzuki scoring touch".to_string(),
            namespace: Namespace::Entity,
            entity: Some("Nick Suzuki".to_string()),
        };

        let items = retriever().search(&params, &scopes).await.unwrap();

        assert!(items
            .iter()
            .all(|i| i.content.to_lowercase().contains("suzuki")));
    }

    #[tokio::test]
    async fn test_scope_filter_excludes_strategy_for_staff() {
        let scopes = scopes_for_role(UserRole::Staff);
        let params = KnowledgeParams {
            text: "forecheck strategy structure".to_string(),
            namespace: Namespace::Domain,
            entity: None,
        };

        let items = retriever().search(&params, &scopes).await.unwrap();

        assert!(items
            .iter()
            .all(|i| scopes.contains(&i.source_scope)));
    }

    #[tokio::test]
    async fn test_dedup_by_source_id() {
        let scopes = scopes_for_role(UserRole::Analyst);
        let params = KnowledgeParams {
            text: "zone entries controlled possession".to_string(),
            namespace: Namespace::Domain,
            entity: None,
        };

        let items = retriever().search(&params, &scopes).await.unwrap();

        // Fixture contains two chunks from the same source document; at
        // most one survives, keyed by the document they came from.
        let mut sources: Vec<&str> = items
            .iter()
            .map(|i| i.citation.as_str())
            .collect();
        sources.sort();
        sources.dedup();
        assert_eq!(sources.len(), items.len());
    }
}

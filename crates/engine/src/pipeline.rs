//! Query pipeline facade
//!
//! Drives one query through classification, routing, execution, and
//! synthesis: received -> classified -> (routed | clarification_needed) ->
//! executing -> synthesizing -> terminal. Clarification and fatal
//! validation/permission errors terminate with zero tool execution.

use crate::executor::ToolExecutor;
use crate::history::{ConversationStore, ConversationStoreConfig, Speaker};
use crate::intent::{ClassifierConfig, IntentClassifier};
use crate::router::Router;
use crate::synthesizer::Synthesizer;
use crate::tools::{
    KnowledgeIndex, KnowledgeRetriever, MetricCatalog, RetrieverConfig, StructuredQueryEngine,
    TableStore, ToolRegistry,
};
use crate::types::{Query, ResponseStatus, SynthesizedResponse, ToolInvocation, TraceEntry};
use rinkside_common::auth::{emit_audit, Scope, UserContext};
use rinkside_common::cache::FlightCache;
use rinkside_common::config::AppConfig;
use rinkside_common::errors::{EngineError, Result};
use rinkside_common::metrics::{record_clarification, QueryMetrics};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Maximum accepted query length
const MAX_QUERY_CHARS: usize = 2_000;

/// The engine's answer plus its diagnostic trace
#[derive(Debug, Clone)]
pub struct EngineReply {
    pub query_id: uuid::Uuid,
    pub response: SynthesizedResponse,
    pub trace: Vec<TraceEntry>,
    pub processing_time_ms: u64,
}

/// One engine instance serves many concurrent queries; all shared state
/// (cache, conversation store, snapshots) is concurrent-read-safe.
pub struct QueryEngine {
    classifier: IntentClassifier,
    router: Router,
    executor: ToolExecutor,
    synthesizer: Synthesizer,
    conversations: ConversationStore,
    history_window: usize,
}

impl QueryEngine {
    pub fn new(
        config: Arc<AppConfig>,
        index: Arc<dyn KnowledgeIndex>,
        store: Arc<dyn TableStore>,
    ) -> Self {
        let classifier = IntentClassifier::new(ClassifierConfig {
            clarification_threshold: config.orchestrator.clarification_threshold,
            history_window: config.orchestrator.history_window,
        });

        let retriever = KnowledgeRetriever::new(
            index,
            RetrieverConfig {
                top_k: config.retrieval.top_k_knowledge_chunks,
                min_score: config.retrieval.min_score,
            },
        );
        let structured = StructuredQueryEngine::new(
            store,
            MetricCatalog::standard(),
            config.analytics.clone(),
        );
        let registry = Arc::new(ToolRegistry::new(retriever, structured));
        let executor = ToolExecutor::new(
            registry,
            Arc::new(FlightCache::new()),
            config.orchestrator.clone(),
        );

        Self {
            classifier,
            router: Router::new(config.orchestrator.clone()),
            executor,
            synthesizer: Synthesizer::new(),
            conversations: ConversationStore::new(ConversationStoreConfig::default()),
            history_window: config.orchestrator.history_window,
        }
    }

    /// Answer one query. Fatal validation/permission problems and
    /// required-tool failures surface as errors; everything else terminates
    /// in an explicitly tagged response.
    pub async fn answer(&self, query: Query, user: &UserContext) -> Result<EngineReply> {
        let metrics = QueryMetrics::start(user.role.as_str());

        match self.answer_inner(&query, user).await {
            Ok(reply) => {
                let scopes_used: BTreeSet<Scope> = reply
                    .response
                    .evidence
                    .iter()
                    .map(|e| e.source_scope)
                    .collect();
                emit_audit(query.query_id, user, &scopes_used);
                metrics.finish(reply.response.status.as_str());
                Ok(reply)
            }
            Err(e) => {
                emit_audit(query.query_id, user, &BTreeSet::new());
                metrics.finish("error");
                Err(e)
            }
        }
    }

    async fn answer_inner(&self, query: &Query, user: &UserContext) -> Result<EngineReply> {
        let start = Instant::now();

        let text = query.text.trim();
        if text.is_empty() {
            return Err(EngineError::Validation {
                message: "query text is empty".to_string(),
                field: Some("text".to_string()),
            });
        }
        if text.len() > MAX_QUERY_CHARS {
            return Err(EngineError::Validation {
                message: format!("query text exceeds {} characters", MAX_QUERY_CHARS),
                field: Some("text".to_string()),
            });
        }

        let history = match query.conversation_id {
            Some(id) => self.conversations.window(id, self.history_window).await,
            None => Vec::new(),
        };

        let intent = self.classifier.classify(text, &history);
        debug!(
            query_id = %query.query_id,
            category = %intent.category,
            confidence = intent.confidence,
            "query classified"
        );

        if intent.category == crate::types::IntentCategory::Ambiguous {
            record_clarification(user.role.as_str());
            let response = self.synthesizer.clarification(&intent);
            let reply = EngineReply {
                query_id: query.query_id,
                response,
                trace: Vec::new(),
                processing_time_ms: start.elapsed().as_millis() as u64,
            };
            self.record_turns(query, &reply.response).await;
            info!(
                query_id = %query.query_id,
                status = "clarification_needed",
                latency_ms = reply.processing_time_ms,
                "query settled without tool execution"
            );
            return Ok(reply);
        }

        let plan = self.router.route(&intent, user)?;
        debug!(
            query_id = %query.query_id,
            tools = plan.invocations.len(),
            "plan routed"
        );

        let cancel = CancellationToken::new();
        let invocations = self.executor.execute(plan, user, cancel).await?;

        let response = self.synthesizer.synthesize(&intent, &invocations, user);
        let trace = build_trace(&invocations);

        let reply = EngineReply {
            query_id: query.query_id,
            response,
            trace,
            processing_time_ms: start.elapsed().as_millis() as u64,
        };
        self.record_turns(query, &reply.response).await;

        info!(
            query_id = %query.query_id,
            status = reply.response.status.as_str(),
            evidence = reply.response.evidence.len(),
            warnings = reply.response.warnings.len(),
            latency_ms = reply.processing_time_ms,
            "query answered"
        );
        Ok(reply)
    }

    async fn record_turns(&self, query: &Query, response: &SynthesizedResponse) {
        if let Some(id) = query.conversation_id {
            self.conversations
                .record(id, Speaker::User, query.text.clone())
                .await;
            if response.status != ResponseStatus::ClarificationNeeded {
                self.conversations
                    .record(id, Speaker::Assistant, response.narrative.clone())
                    .await;
            }
        }
    }
}

fn build_trace(invocations: &[ToolInvocation]) -> Vec<TraceEntry> {
    invocations
        .iter()
        .map(|inv| TraceEntry {
            tool: inv.tool_id,
            params_summary: inv.params_summary(),
            status: inv.status,
            latency_ms: inv.latency_ms,
            from_cache: inv.status == crate::types::InvocationStatus::Cached,
        })
        .collect()
}

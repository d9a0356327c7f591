//! Core data model for the orchestration pipeline

use chrono::{DateTime, Utc};
use rinkside_common::auth::Scope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// An accepted user query. Immutable once constructed; `query_id` threads
/// unchanged through the whole pipeline for audit purposes.
#[derive(Debug, Clone)]
pub struct Query {
    pub query_id: Uuid,
    pub text: String,
    pub conversation_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>, conversation_id: Option<Uuid>) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            text: text.into(),
            conversation_id,
            issued_at: Utc::now(),
        }
    }
}

/// Intent category for a classified query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    /// Single fact or current value
    Lookup,
    /// Entity vs entity
    Comparison,
    /// Change over a time window
    Trend,
    /// Forward-looking estimate
    Prediction,
    /// Chart or series output requested
    Visualization,
    /// Confidence too low to route; needs clarification
    Ambiguous,
}

impl IntentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::Lookup => "lookup",
            IntentCategory::Comparison => "comparison",
            IntentCategory::Trend => "trend",
            IntentCategory::Prediction => "prediction",
            IntentCategory::Visualization => "visualization",
            IntentCategory::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified intent. Produced once per query, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub category: IntentCategory,

    /// Normalized query text (lowercased, trimmed)
    pub text: String,

    /// Extracted slot values (player, team, opponent, metric, date_range)
    pub entities: BTreeMap<String, String>,

    /// Classification confidence in [0, 1]
    pub confidence: f32,

    /// Ranked candidate interpretations; populated only when Ambiguous
    pub candidates: Vec<String>,

    /// The question asks for explanation or background
    pub wants_context: bool,

    /// The question asks for current numbers
    pub wants_live: bool,
}

/// The closed set of tools the router may schedule.
///
/// Unknown-tool references are unrepresentable; dispatch is a match on
/// this enum, never a string lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    KnowledgeSearch,
    StructuredQuery,
}

impl ToolId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolId::KnowledgeSearch => "knowledge_search",
            ToolId::StructuredQuery => "structured_query",
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one tool invocation. Transitions are append-only:
/// Pending -> Running -> one terminal state. Cached is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Running,
    Ok,
    Timeout,
    Error,
    Cached,
}

impl InvocationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvocationStatus::Pending | InvocationStatus::Running)
    }

    /// Whether the invocation produced a usable result
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationStatus::Ok | InvocationStatus::Cached)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationStatus::Pending => "pending",
            InvocationStatus::Running => "running",
            InvocationStatus::Ok => "ok",
            InvocationStatus::Timeout => "timeout",
            InvocationStatus::Error => "error",
            InvocationStatus::Cached => "cached",
        }
    }
}

/// One scheduled tool call inside a plan. Created by the Router; mutated
/// only by the Executor; never altered once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: Uuid,
    pub tool_id: ToolId,

    /// Normalized tool parameters (also the fingerprint input)
    pub params: Value,

    /// Invocations that must reach Ok or Cached before this one starts
    pub dependency_ids: Vec<Uuid>,

    /// Failure of a required invocation aborts the whole query
    pub required: bool,

    pub status: InvocationStatus,
    pub result: Option<ToolOutput>,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ToolInvocation {
    pub fn new(tool_id: ToolId, params: Value, required: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_id,
            params,
            dependency_ids: Vec::new(),
            required,
            status: InvocationStatus::Pending,
            result: None,
            latency_ms: 0,
            error: None,
        }
    }

    pub fn depends_on(mut self, id: Uuid) -> Self {
        self.dependency_ids.push(id);
        self
    }

    /// Short parameter description for the diagnostic trace
    pub fn params_summary(&self) -> String {
        match &self.params {
            Value::Object(map) => {
                let mut parts: Vec<String> = Vec::new();
                for (k, v) in map {
                    match v {
                        Value::String(s) => parts.push(format!("{}={}", k, s)),
                        Value::Null => {}
                        other => parts.push(format!("{}={}", k, other)),
                    }
                }
                parts.join(" ")
            }
            other => other.to_string(),
        }
    }
}

/// Kind of a citable evidence unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Indexed text chunk
    Knowledge,
    /// Computed live value
    Metric,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Knowledge => "knowledge",
            EvidenceKind::Metric => "metric",
        }
    }
}

/// A discrete, citable unit backing a claim in a response.
/// Immutable once attached to a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: Uuid,
    pub kind: EvidenceKind,

    /// Human-readable source label shown next to the citation marker
    pub citation: String,

    /// Underlying source identifier (chunk id or table/metric key)
    pub source_id: String,

    /// Chunk text, or the formatted metric statement
    pub content: String,

    /// Computed value for metric evidence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// Identifies the underlying fact for conflict detection. Two items
    /// with the same key describe the same real-world quantity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_key: Option<String>,

    pub confidence: f32,

    /// Scope the backing data carries
    pub source_scope: Scope,

    /// Recency of the backing data, used for tie-breaks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

/// What a tool hands back to the executor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    pub evidence: Vec<EvidenceItem>,

    /// Renderable payloads for the presentation layer (tables, series)
    #[serde(default)]
    pub analytics: Vec<AnalyticsPayload>,

    /// A guard tripped and the result covers only part of the data
    #[serde(default)]
    pub truncated: bool,

    /// Rows examined before any guard tripped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_scanned: Option<usize>,
}

/// Structured payload the presentation layer can render directly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsPayload {
    /// Payload kind, e.g. "stat_summary" or "trend_series"
    pub kind: String,
    pub title: String,
    pub data: Value,
}

/// Terminal status of a synthesized response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Answered,
    Partial,
    ClarificationNeeded,
    Error,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Answered => "answered",
            ResponseStatus::Partial => "partial",
            ResponseStatus::ClarificationNeeded => "clarification_needed",
            ResponseStatus::Error => "error",
        }
    }
}

/// The synthesized answer handed to the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedResponse {
    pub narrative: String,
    pub evidence: Vec<EvidenceItem>,
    pub analytics: Vec<AnalyticsPayload>,
    pub warnings: Vec<String>,
    pub status: ResponseStatus,

    /// Ranked interpretations offered when clarification is needed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarification_candidates: Vec<String>,
}

/// One diagnostic trace entry per invocation, for observability only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub tool: ToolId,
    pub params_summary: String,
    pub status: InvocationStatus,
    pub latency_ms: u64,
    pub from_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_transitions() {
        assert!(!InvocationStatus::Pending.is_terminal());
        assert!(!InvocationStatus::Running.is_terminal());
        assert!(InvocationStatus::Ok.is_terminal());
        assert!(InvocationStatus::Cached.is_terminal());
        assert!(InvocationStatus::Cached.is_success());
        assert!(!InvocationStatus::Timeout.is_success());
    }

    #[test]
    fn test_params_summary() {
        let inv = ToolInvocation::new(
            ToolId::StructuredQuery,
            json!({"metric": "points", "entity": "nick suzuki", "opponent": null}),
            true,
        );
        let summary = inv.params_summary();
        assert!(summary.contains("metric=points"));
        assert!(summary.contains("entity=nick suzuki"));
        assert!(!summary.contains("opponent"));
    }

    #[test]
    fn test_tool_id_serde() {
        let s = serde_json::to_string(&ToolId::KnowledgeSearch).unwrap();
        assert_eq!(s, "\"knowledge_search\"");
    }
}

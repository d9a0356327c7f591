//! Query endpoint handler

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use rinkside_common::{
    auth::{extract_bearer, UserContext},
    errors::{EngineError, Result},
};
use rinkside_engine::types::{Query, TraceEntry};

/// Query request body
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 2000))]
    pub text: String,

    /// Continues an existing conversation when present
    pub conversation_id: Option<Uuid>,
}

/// Evidence entry as exposed to clients
#[derive(Debug, Serialize)]
pub struct EvidenceOut {
    #[serde(rename = "type")]
    pub kind: String,
    pub source_id: String,
    pub citation_text: String,
    pub confidence: f32,
}

/// Query response body
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub query_id: Uuid,
    pub narrative: String,
    pub evidence: Vec<EvidenceOut>,
    pub analytics: Vec<serde_json::Value>,
    pub warnings: Vec<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clarification_candidates: Vec<String>,
    pub processing_time_ms: u64,

    /// Diagnostic trace for observability; not rendered to end users
    pub trace: Vec<TraceEntry>,
}

/// Process one analytics question through the engine
pub async fn process_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    request.validate().map_err(|e| EngineError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let user = resolve_user(&state, &headers)?;

    let query = Query::new(request.text, request.conversation_id);
    let reply = state.engine.answer(query, &user).await?;

    tracing::info!(
        query_id = %reply.query_id,
        role = %user.role,
        status = reply.response.status.as_str(),
        latency_ms = reply.processing_time_ms,
        "query request completed"
    );

    let evidence = reply
        .response
        .evidence
        .iter()
        .map(|e| EvidenceOut {
            kind: e.kind.as_str().to_string(),
            source_id: e.source_id.clone(),
            citation_text: e.citation.clone(),
            confidence: e.confidence,
        })
        .collect();

    let analytics = reply
        .response
        .analytics
        .iter()
        .map(|p| {
            serde_json::json!({
                "kind": p.kind,
                "title": p.title,
                "data": p.data,
            })
        })
        .collect();

    Ok(Json(QueryResponse {
        query_id: reply.query_id,
        narrative: reply.response.narrative,
        evidence,
        analytics,
        warnings: reply.response.warnings,
        status: reply.response.status.as_str().to_string(),
        clarification_candidates: reply.response.clarification_candidates,
        processing_time_ms: reply.processing_time_ms,
        trace: reply.trace,
    }))
}

/// Resolve the caller's session token into a user context
fn resolve_user(state: &AppState, headers: &HeaderMap) -> Result<UserContext> {
    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| EngineError::PermissionDenied {
            message: "missing Authorization header".to_string(),
        })?;

    let token = extract_bearer(auth_header).ok_or_else(|| EngineError::PermissionDenied {
        message: "Authorization header is not a bearer token".to_string(),
    })?;

    state.guard.resolve(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation_bounds() {
        let ok = QueryRequest {
            text: "points".to_string(),
            conversation_id: None,
        };
        assert!(ok.validate().is_ok());

        let empty = QueryRequest {
            text: String::new(),
            conversation_id: None,
        };
        assert!(empty.validate().is_err());

        let oversized = QueryRequest {
            text: "x".repeat(2_001),
            conversation_id: None,
        };
        assert!(oversized.validate().is_err());
    }
}

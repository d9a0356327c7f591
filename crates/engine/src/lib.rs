//! Rinkside Orchestration Core
//!
//! The engine turns a natural-language hockey question into one
//! evidence-backed answer:
//! - Intent classification (category, entities, confidence)
//! - Routing to a tool plan (knowledge search, structured analytics, or both)
//! - Concurrent tool execution with timeouts, retries, scoped caching,
//!   and cancellation
//! - Citation-preserving synthesis with role-adapted framing

pub mod executor;
pub mod fixtures;
pub mod history;
pub mod intent;
pub mod pipeline;
pub mod router;
pub mod synthesizer;
pub mod tools;
pub mod types;

pub use intent::IntentClassifier;
pub use pipeline::{EngineReply, QueryEngine};
pub use router::{Router, ToolPlan};
pub use types::{
    EvidenceItem, EvidenceKind, Intent, IntentCategory, InvocationStatus, Query, ResponseStatus,
    SynthesizedResponse, ToolId, ToolInvocation, TraceEntry,
};

//! Configuration management for rinkside services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Orchestrator configuration (routing, execution, caching)
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Knowledge retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Structured analytics configuration
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Upper bound for any single tool timeout
    #[serde(default = "default_max_tool_timeout")]
    pub max_tool_timeout_ms: u64,

    /// Knowledge search timeout (short; it only seeds context)
    #[serde(default = "default_knowledge_timeout")]
    pub knowledge_timeout_ms: u64,

    /// Structured query timeout (longer; aggregation work)
    #[serde(default = "default_structured_timeout")]
    pub structured_timeout_ms: u64,

    /// Overall per-query deadline
    #[serde(default = "default_overall_deadline")]
    pub overall_deadline_ms: u64,

    /// TTL for cached tool results
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Bounded retry count for transient tool failures
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Concurrency cap for tool invocations within one query
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    /// Intent confidence below this falls back to clarification
    #[serde(default = "default_clarification_threshold")]
    pub clarification_threshold: f32,

    /// Conversation turns visible to the classifier
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Which tools are required (abort on failure) per intent category
    #[serde(default = "default_required_tools")]
    pub required_tools_per_category: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Bounded top-K knowledge chunks per search
    #[serde(default = "default_top_k")]
    pub top_k_knowledge_chunks: usize,

    /// Minimum relevance score to keep a chunk
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Path to the index builder's chunk export (JSON)
    pub index_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyticsConfig {
    /// Scan guard: maximum rows examined per structured query
    #[serde(default = "default_max_rows")]
    pub max_rows_per_query: usize,

    /// Time guard for one structured query evaluation
    #[serde(default = "default_scan_budget")]
    pub scan_budget_ms: u64,

    /// Path to the ETL's stats snapshot (JSON)
    pub table_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the session-issuing service
    pub session_secret: Option<String>,

    /// Session token lifetime in seconds
    #[serde(default = "default_session_expiration")]
    pub session_expiration_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_max_tool_timeout() -> u64 {
    5_000
}
fn default_knowledge_timeout() -> u64 {
    800
}
fn default_structured_timeout() -> u64 {
    2_500
}
fn default_overall_deadline() -> u64 {
    8_000
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_retry_count() -> u32 {
    2
}
fn default_max_parallel_tools() -> usize {
    3
}
fn default_clarification_threshold() -> f32 {
    0.45
}
fn default_history_window() -> usize {
    6
}
fn default_required_tools() -> HashMap<String, Vec<String>> {
    HashMap::from([
        ("lookup".to_string(), vec!["structured_query".to_string()]),
        (
            "comparison".to_string(),
            vec!["structured_query".to_string()],
        ),
        ("trend".to_string(), vec!["structured_query".to_string()]),
        (
            "visualization".to_string(),
            vec!["structured_query".to_string()],
        ),
        ("prediction".to_string(), vec![]),
    ])
}
fn default_top_k() -> usize {
    4
}
fn default_min_score() -> f32 {
    0.25
}
fn default_max_rows() -> usize {
    10_000
}
fn default_scan_budget() -> u64 {
    2_000
}
fn default_session_expiration() -> u64 {
    3_600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_service_name() -> String {
    "rinkside".to_string()
}
fn default_rate_limit() -> u32 {
    50
}
fn default_burst() -> u32 {
    100
}
fn default_enabled() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__ORCHESTRATOR__OVERALL_DEADLINE_MS=10000
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get overall query deadline as Duration
    pub fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.orchestrator.overall_deadline_ms)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl OrchestratorConfig {
    /// Per-tool timeout, clamped to the configured ceiling
    pub fn tool_timeout(&self, tool_name: &str) -> Duration {
        let ms = match tool_name {
            "knowledge_search" => self.knowledge_timeout_ms,
            "structured_query" => self.structured_timeout_ms,
            _ => self.max_tool_timeout_ms,
        };
        Duration::from_millis(ms.min(self.max_tool_timeout_ms))
    }

    /// Whether a tool is required for a category (failure aborts the query)
    pub fn is_required(&self, category: &str, tool_name: &str) -> bool {
        self.required_tools_per_category
            .get(category)
            .map(|tools| tools.iter().any(|t| t == tool_name))
            .unwrap_or(false)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_timeout_ms: default_max_tool_timeout(),
            knowledge_timeout_ms: default_knowledge_timeout(),
            structured_timeout_ms: default_structured_timeout(),
            overall_deadline_ms: default_overall_deadline(),
            cache_ttl_seconds: default_cache_ttl(),
            retry_count: default_retry_count(),
            max_parallel_tools: default_max_parallel_tools(),
            clarification_threshold: default_clarification_threshold(),
            history_window: default_history_window(),
            required_tools_per_category: default_required_tools(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_knowledge_chunks: default_top_k(),
            min_score: default_min_score(),
            index_path: None,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_rows_per_query: default_max_rows(),
            scan_budget_ms: default_scan_budget(),
            table_path: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: None,
            session_expiration_secs: default_session_expiration(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            retrieval: RetrievalConfig::default(),
            analytics: AnalyticsConfig::default(),
            auth: AuthConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.orchestrator.overall_deadline_ms, 8_000);
        assert_eq!(config.retrieval.top_k_knowledge_chunks, 4);
    }

    #[test]
    fn test_tool_timeout_clamped() {
        let mut orch = OrchestratorConfig::default();
        orch.structured_timeout_ms = 60_000;
        assert_eq!(
            orch.tool_timeout("structured_query"),
            Duration::from_millis(orch.max_tool_timeout_ms)
        );
        assert_eq!(
            orch.tool_timeout("knowledge_search"),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn test_required_tools_defaults() {
        let orch = OrchestratorConfig::default();
        assert!(orch.is_required("lookup", "structured_query"));
        assert!(!orch.is_required("lookup", "knowledge_search"));
        assert!(!orch.is_required("prediction", "structured_query"));
    }
}

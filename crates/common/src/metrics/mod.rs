//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all rinkside metrics
pub const METRICS_PREFIX: &str = "rinkside";

/// SLO-aligned histogram buckets for query latency (in seconds)
/// Targets: P50 < 250ms, P99 < overall deadline
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms - P50 target
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    8.000, // 8s - default overall deadline
    10.00, // 10s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Query pipeline metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total queries processed, labeled by terminal status"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query latency in seconds"
    );

    // Tool execution metrics
    describe_counter!(
        format!("{}_tool_invocations_total", METRICS_PREFIX),
        Unit::Count,
        "Total tool invocations, labeled by tool and terminal status"
    );

    describe_histogram!(
        format!("{}_tool_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Tool invocation latency in seconds"
    );

    describe_counter!(
        format!("{}_tool_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Transient tool failures that were retried"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    // Clarification metrics
    describe_counter!(
        format!("{}_clarifications_total", METRICS_PREFIX),
        Unit::Count,
        "Queries short-circuited to clarification"
    );

    // Conversation store
    describe_gauge!(
        format!("{}_conversations_active", METRICS_PREFIX),
        Unit::Count,
        "Conversations currently held in the bounded store"
    );

    tracing::info!("Metrics registered");
}

/// Helper to track one query end to end
pub struct QueryMetrics {
    start: Instant,
    role: String,
}

impl QueryMetrics {
    /// Start tracking a query
    pub fn start(role: &str) -> Self {
        Self {
            start: Instant::now(),
            role: role.to_string(),
        }
    }

    /// Record query completion with its terminal status
    pub fn finish(self, status: &str) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_queries_total", METRICS_PREFIX),
            "role" => self.role.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_query_duration_seconds", METRICS_PREFIX),
            "role" => self.role
        )
        .record(duration);
    }
}

/// Helper to record tool invocation metrics
pub fn record_tool(tool: &str, status: &str, duration_secs: f64) {
    counter!(
        format!("{}_tool_invocations_total", METRICS_PREFIX),
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_tool_duration_seconds", METRICS_PREFIX),
        "tool" => tool.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a retried transient failure
pub fn record_retry(tool: &str) {
    counter!(
        format!("{}_tool_retries_total", METRICS_PREFIX),
        "tool" => tool.to_string()
    )
    .increment(1);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a clarification short-circuit
pub fn record_clarification(role: &str) {
    counter!(
        format!("{}_clarifications_total", METRICS_PREFIX),
        "role" => role.to_string()
    )
    .increment(1);
}

/// Helper to track the bounded conversation store size
pub fn record_active_conversations(count: usize) {
    gauge!(format!("{}_conversations_active", METRICS_PREFIX)).set(count as f64);
}

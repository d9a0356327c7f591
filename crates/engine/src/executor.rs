//! Tool Executor / Scheduler
//!
//! Runs a tool plan to completion under structured concurrency:
//! - Invocations with no unresolved dependencies run concurrently, capped
//!   by `max_parallel_tools`; dependents start once their dependencies
//!   reach Ok or Cached
//! - Every execution goes through the scoped fingerprint cache, so
//!   identical concurrent calls collapse into one (single-flight)
//! - Per-tool timeouts and the overall query deadline are both enforced;
//!   a breached deadline cancels in-flight work and settles the remainder
//!   as timed out
//! - Transient failures retry with exponential backoff; permission and
//!   validation failures never retry
//! - The per-query cancellation token reaches every spawned invocation;
//!   results arriving after cancellation are discarded, never cached

use crate::router::ToolPlan;
use crate::tools::ToolRegistry;
use crate::types::{InvocationStatus, ToolId, ToolInvocation, ToolOutput};
use rinkside_common::auth::{Scope, UserContext};
use rinkside_common::cache::{fingerprint, FlightCache};
use rinkside_common::config::OrchestratorConfig;
use rinkside_common::errors::{EngineError, Result};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    cache: Arc<FlightCache>,
    config: OrchestratorConfig,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache: Arc<FlightCache>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            config,
        }
    }

    /// Execute a plan to all-terminal state.
    ///
    /// Returns the invocations in plan order. Fails with `ToolFailure`
    /// when a required invocation did not succeed; a breached overall
    /// deadline instead settles the rest as timed out so the synthesizer
    /// can produce a best-effort partial answer.
    pub async fn execute(
        &self,
        plan: ToolPlan,
        user: &UserContext,
        cancel: CancellationToken,
    ) -> Result<Vec<ToolInvocation>> {
        let order: Vec<Uuid> = plan.invocations.iter().map(|i| i.id).collect();
        let originals: HashMap<Uuid, ToolInvocation> = plan
            .invocations
            .iter()
            .map(|i| (i.id, i.clone()))
            .collect();

        let mut waiting: HashMap<Uuid, ToolInvocation> = plan
            .invocations
            .into_iter()
            .map(|i| (i.id, i))
            .collect();
        let mut done: HashMap<Uuid, ToolInvocation> = HashMap::new();
        let mut in_flight: HashSet<Uuid> = HashSet::new();
        let mut join_set: JoinSet<ToolInvocation> = JoinSet::new();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tools.max(1)));
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.overall_deadline_ms);
        let mut deadline_hit = false;

        loop {
            // Invocations whose dependencies terminally failed cannot run
            let blocked: Vec<Uuid> = order
                .iter()
                .copied()
                .filter(|id| {
                    waiting.get(id).is_some_and(|inv| {
                        inv.dependency_ids.iter().any(|d| {
                            done.get(d)
                                .map(|dep| dep.status.is_terminal() && !dep.status.is_success())
                                .unwrap_or(false)
                        })
                    })
                })
                .collect();
            for id in blocked {
                if let Some(mut inv) = waiting.remove(&id) {
                    inv.status = InvocationStatus::Error;
                    inv.error = Some("dependency did not complete".to_string());
                    done.insert(id, inv);
                }
            }

            // Spawn everything whose dependencies are satisfied, in plan
            // order so context-seeding tools start first
            let ready: Vec<Uuid> = order
                .iter()
                .copied()
                .filter(|id| {
                    waiting.get(id).is_some_and(|inv| {
                        inv.dependency_ids.iter().all(|d| {
                            done.get(d)
                                .map(|dep| dep.status.is_success())
                                .unwrap_or(false)
                        })
                    })
                })
                .collect();
            for id in ready {
                if let Some(mut inv) = waiting.remove(&id) {
                    inv.status = InvocationStatus::Running;
                    in_flight.insert(id);

                    let registry = self.registry.clone();
                    let cache = self.cache.clone();
                    let config = self.config.clone();
                    let user = user.clone();
                    let cancel = cancel.clone();
                    let semaphore = semaphore.clone();
                    join_set.spawn(async move {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => {
                                inv.status = InvocationStatus::Error;
                                inv.error = Some("scheduler shut down".to_string());
                                return inv;
                            }
                        };
                        run_invocation(inv, registry, cache, config, user, cancel).await
                    });
                }
            }

            if join_set.is_empty() {
                if waiting.is_empty() {
                    break;
                }
                // Nothing running and nothing became ready: the remaining
                // dependency edges cannot be satisfied.
                let stuck: Vec<Uuid> = waiting.keys().copied().collect();
                for id in stuck {
                    if let Some(mut inv) = waiting.remove(&id) {
                        inv.status = InvocationStatus::Error;
                        inv.error = Some("unsatisfiable dependencies".to_string());
                        done.insert(id, inv);
                    }
                }
                break;
            }

            match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok(inv))) => {
                    in_flight.remove(&inv.id);
                    done.insert(inv.id, inv);
                }
                Ok(Some(Err(join_err))) => {
                    // The task itself died; its invocation settles from the
                    // originals snapshot after the loop.
                    warn!(error = %join_err, "invocation task failed to join");
                }
                Ok(None) => continue,
                Err(_) => {
                    warn!(
                        deadline_ms = self.config.overall_deadline_ms,
                        "overall deadline exceeded, cancelling in-flight invocations"
                    );
                    deadline_hit = true;
                    cancel.cancel();
                    join_set.shutdown().await;
                    break;
                }
            }
        }

        // Settle anything that never reached a terminal state
        let mut results = Vec::with_capacity(order.len());
        for id in order {
            let inv = match done.remove(&id) {
                Some(inv) => inv,
                None => {
                    let mut inv = originals
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| ToolInvocation::new(ToolId::KnowledgeSearch, Value::Null, false));
                    if deadline_hit {
                        inv.status = InvocationStatus::Timeout;
                        inv.error = Some("overall deadline exceeded".to_string());
                    } else {
                        inv.status = InvocationStatus::Error;
                        inv.error = Some("invocation did not complete".to_string());
                    }
                    inv
                }
            };
            results.push(inv);
        }

        // A breached overall deadline degrades to best-effort synthesis;
        // required-tool enforcement applies on the normal path.
        if !deadline_hit {
            if let Some(failed) = results
                .iter()
                .find(|inv| inv.required && !inv.status.is_success())
            {
                return Err(EngineError::ToolFailure {
                    tool: failed.tool_id.to_string(),
                    message: failed
                        .error
                        .clone()
                        .unwrap_or_else(|| "required tool did not succeed".to_string()),
                });
            }
        }

        Ok(results)
    }
}

async fn run_invocation(
    mut inv: ToolInvocation,
    registry: Arc<ToolRegistry>,
    cache: Arc<FlightCache>,
    config: OrchestratorConfig,
    user: UserContext,
    cancel: CancellationToken,
) -> ToolInvocation {
    let start = std::time::Instant::now();
    let tool_name = inv.tool_id.as_str();
    let fp = fingerprint(tool_name, &inv.params, &user.scope_key());
    let ttl = Duration::from_secs(config.cache_ttl_seconds);
    let timeout = config.tool_timeout(tool_name);
    let retries = config.retry_count;

    let tool_id = inv.tool_id;
    let params = inv.params.clone();
    let scopes = user.permitted_scopes.clone();
    let run_cancel = cancel.clone();

    let outcome = cache
        .get_or_run(tool_name, &fp, ttl, || async move {
            execute_with_retry(registry, tool_id, params, scopes, timeout, retries, run_cancel)
                .await
        })
        .await;

    inv.latency_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(cached) => match serde_json::from_value::<ToolOutput>(cached.value) {
            Ok(output) => {
                inv.status = if cached.from_cache {
                    InvocationStatus::Cached
                } else {
                    InvocationStatus::Ok
                };
                inv.result = Some(output);
            }
            Err(e) => {
                inv.status = InvocationStatus::Error;
                inv.error = Some(format!("malformed tool result: {}", e));
            }
        },
        Err(EngineError::ToolTimeout { timeout_ms, .. }) => {
            inv.status = InvocationStatus::Timeout;
            inv.error = Some(format!("timed out after {}ms", timeout_ms));
        }
        Err(e) => {
            inv.status = InvocationStatus::Error;
            inv.error = Some(e.to_string());
        }
    }

    rinkside_common::metrics::record_tool(
        tool_name,
        inv.status.as_str(),
        start.elapsed().as_secs_f64(),
    );
    debug!(
        tool = %tool_name,
        status = inv.status.as_str(),
        latency_ms = inv.latency_ms,
        "invocation settled"
    );
    inv
}

async fn execute_with_retry(
    registry: Arc<ToolRegistry>,
    tool_id: ToolId,
    params: Value,
    scopes: BTreeSet<Scope>,
    timeout: Duration,
    retries: u32,
    cancel: CancellationToken,
) -> Result<Value> {
    let tool_name = tool_id.as_str();
    let mut last_error: Option<EngineError> = None;

    for attempt in 0..=retries {
        if attempt > 0 {
            // Exponential backoff
            let delay = Duration::from_millis(50 * 2_u64.pow(attempt - 1));
            tokio::time::sleep(delay).await;
            rinkside_common::metrics::record_retry(tool_name);
        }

        let tool = registry.get(tool_id);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Internal {
                message: "query cancelled".to_string(),
            }),
            res = tokio::time::timeout(timeout, tool.execute(&params, &scopes)) => match res {
                Ok(r) => r,
                Err(_) => Err(EngineError::ToolTimeout {
                    tool: tool_name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
        };

        match result {
            Ok(output) => {
                // A result landing after cancellation is discarded and
                // must never reach the cache.
                if cancel.is_cancelled() {
                    return Err(EngineError::Internal {
                        message: "query cancelled".to_string(),
                    });
                }
                return Ok(serde_json::to_value(output)?);
            }
            Err(e) if e.is_transient() && attempt < retries => {
                warn!(
                    tool = %tool_name,
                    attempt = attempt + 1,
                    error = %e,
                    "transient tool failure, retrying"
                );
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| EngineError::Internal {
        message: "retry loop exhausted without an error".to_string(),
    }))
}

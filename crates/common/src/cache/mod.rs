//! Scope-aware fingerprint cache with single-flight execution
//!
//! Provides:
//! - TTL-bounded caching of tool results keyed by execution fingerprint
//! - Single-flight de-duplication: one execution per in-flight fingerprint,
//!   concurrent callers await the leader's outcome
//! - Scope isolation: the caller's scope set is baked into the fingerprint,
//!   so no context ever reads an entry produced under different permissions
//!
//! Failed or cancelled executions publish their error to waiters and are
//! never committed to the cache.

use crate::errors::{EngineError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Compute the execution fingerprint for a tool call.
///
/// `params` must already be normalized; serde_json maps serialize with
/// sorted keys, so structurally equal params hash identically.
pub fn fingerprint(tool_id: &str, params: &Value, scope_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(params.to_string().as_bytes());
    hasher.update(b"\x00");
    hasher.update(scope_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Outcome broadcast from the single-flight leader to its waiters
type FlightOutcome = std::result::Result<Value, String>;

enum Slot {
    Ready {
        value: Value,
        stored_at: Instant,
        ttl: Duration,
    },
    InFlight {
        rx: watch::Receiver<Option<FlightOutcome>>,
    },
}

enum Role {
    Hit(Value),
    Waiter(watch::Receiver<Option<FlightOutcome>>),
    Leader(watch::Sender<Option<FlightOutcome>>),
}

/// Result of a cache lookup-or-execute
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub value: Value,
    /// True when the value came from a stored entry or another caller's
    /// in-flight execution rather than an execution of our own
    pub from_cache: bool,
}

/// In-process fingerprint cache with single-flight coordination
#[derive(Default)]
pub struct FlightCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl FlightCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `fp`; on a miss, run `run` as the single-flight leader and
    /// store its result for `ttl`. Concurrent callers with the same
    /// fingerprint await the leader instead of executing.
    pub async fn get_or_run<F, Fut>(
        &self,
        tool_id: &str,
        fp: &str,
        ttl: Duration,
        run: F,
    ) -> Result<CacheOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let role = {
            let mut slots = self.slots.lock().await;
            match slots.get(fp) {
                Some(Slot::Ready {
                    value,
                    stored_at,
                    ttl,
                }) if stored_at.elapsed() < *ttl => Role::Hit(value.clone()),
                Some(Slot::InFlight { rx }) if rx.has_changed().is_ok() => {
                    Role::Waiter(rx.clone())
                }
                _ => {
                    // Expired entry, abandoned flight, or plain miss:
                    // this caller becomes the leader.
                    let (tx, rx) = watch::channel(None);
                    slots.insert(fp.to_string(), Slot::InFlight { rx });
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Hit(value) => {
                debug!(fingerprint = %fp, tool = %tool_id, "Cache hit");
                crate::metrics::record_cache(true, "tool_results");
                Ok(CacheOutcome {
                    value,
                    from_cache: true,
                })
            }
            Role::Waiter(rx) => self.await_leader(tool_id, fp, rx).await,
            Role::Leader(tx) => {
                debug!(fingerprint = %fp, tool = %tool_id, "Cache miss, executing");
                crate::metrics::record_cache(false, "tool_results");
                self.lead(fp, ttl, tx, run).await
            }
        }
    }

    async fn await_leader(
        &self,
        tool_id: &str,
        fp: &str,
        mut rx: watch::Receiver<Option<FlightOutcome>>,
    ) -> Result<CacheOutcome> {
        debug!(fingerprint = %fp, tool = %tool_id, "Awaiting in-flight execution");
        let wait_result = rx.wait_for(|v| v.is_some()).await.map(|guard| guard.clone());
        let outcome = match wait_result {
            Ok(outcome) => outcome,
            Err(_) => {
                // Leader vanished without publishing; clear the dead slot so
                // the next caller can retry.
                let mut slots = self.slots.lock().await;
                if let Some(Slot::InFlight { rx }) = slots.get(fp) {
                    if rx.has_changed().is_err() {
                        slots.remove(fp);
                    }
                }
                return Err(EngineError::CacheError {
                    message: "in-flight execution was abandoned".to_string(),
                });
            }
        };

        match outcome {
            Some(Ok(value)) => {
                crate::metrics::record_cache(true, "tool_results");
                Ok(CacheOutcome {
                    value,
                    from_cache: true,
                })
            }
            Some(Err(message)) => Err(EngineError::ToolFailure {
                tool: tool_id.to_string(),
                message,
            }),
            None => Err(EngineError::CacheError {
                message: "in-flight execution published no outcome".to_string(),
            }),
        }
    }

    async fn lead<F, Fut>(
        &self,
        fp: &str,
        ttl: Duration,
        tx: watch::Sender<Option<FlightOutcome>>,
        run: F,
    ) -> Result<CacheOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let result = run().await;

        let mut slots = self.slots.lock().await;
        match &result {
            Ok(value) => {
                slots.insert(
                    fp.to_string(),
                    Slot::Ready {
                        value: value.clone(),
                        stored_at: Instant::now(),
                        ttl,
                    },
                );
                let _ = tx.send(Some(Ok(value.clone())));
            }
            Err(e) => {
                // Failures and cancellations are never cached
                slots.remove(fp);
                let _ = tx.send(Some(Err(e.to_string())));
            }
        }
        drop(slots);

        result.map(|value| CacheOutcome {
            value,
            from_cache: false,
        })
    }

    /// Drop expired entries. Callers may run this periodically; correctness
    /// does not depend on it since reads check freshness themselves.
    pub async fn purge_expired(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready { stored_at, ttl, .. } => stored_at.elapsed() < *ttl,
            Slot::InFlight { rx } => rx.has_changed().is_ok(),
        });
        before - slots.len()
    }

    /// Number of live slots (stored entries plus in-flight executions)
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fingerprint_scope_isolation() {
        let params = json!({"metric": "points", "entity": "suzuki"});
        let coach = fingerprint("structured_query", &params, "game,opponent,player,strategy,team");
        let staff = fingerprint("structured_query", &params, "game,team");
        assert_ne!(coach, staff);

        // Same inputs hash identically
        let again = fingerprint("structured_query", &params, "game,team");
        assert_eq!(staff, again);
    }

    #[test]
    fn test_fingerprint_param_normalization() {
        // serde_json maps are key-sorted, so field order cannot matter
        let a = json!({"entity": "suzuki", "metric": "points"});
        let b = json!({"metric": "points", "entity": "suzuki"});
        assert_eq!(
            fingerprint("t", &a, "team"),
            fingerprint("t", &b, "team")
        );
    }

    #[tokio::test]
    async fn test_single_flight_deduplicates() {
        let cache = Arc::new(FlightCache::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let executions = executions.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_run("tool", "same-fp", Duration::from_secs(60), || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(json!({"value": 42}))
                    })
                    .await
            }));
        }

        let mut from_cache_count = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.value, json!({"value": 42}));
            if outcome.from_cache {
                from_cache_count += 1;
            }
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(from_cache_count, 7);
    }

    #[tokio::test]
    async fn test_ttl_expiry_triggers_reexecution() {
        let cache = FlightCache::new();
        let executions = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_run("tool", "fp", Duration::from_millis(20), || async {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(1))
                })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
        }

        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let cache = FlightCache::new();

        let err = cache
            .get_or_run("tool", "fp", Duration::from_secs(60), || async {
                Err(EngineError::ToolUnavailable {
                    tool: "tool".into(),
                    message: "hiccup".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ToolUnavailable { .. }));

        // The follow-up call executes again and succeeds
        let outcome = cache
            .get_or_run("tool", "fp", Duration::from_secs(60), || async {
                Ok(json!("recovered"))
            })
            .await
            .unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(outcome.value, json!("recovered"));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = FlightCache::new();
        cache
            .get_or_run("tool", "fp", Duration::from_millis(10), || async {
                Ok(json!(1))
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.is_empty().await);
    }
}

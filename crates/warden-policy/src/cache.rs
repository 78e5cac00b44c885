//! Decision cache with single-flight evaluation.
//!
//! Entries are keyed by [`DecisionKey`] and spread across independently
//! locked shards. Each shard also holds the in-flight evaluation for keys
//! that are being computed, so concurrent misses for one key share a single
//! call to the policy engine.
//!
//! CRITICAL entries in the last 30% of their TTL are served as-is while a
//! background evaluation refreshes them, when `stale_while_revalidate` is on.
//!
//! Shard locks are plain `std::sync::Mutex`es and are never held across an
//! await. The evaluation itself runs in a spawned task, which stores the
//! entry and clears the in-flight slot under one shard lock before any
//! waiter sees the result.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use warden_core::Metrics;
use warden_core::config::{CacheConfig, MAX_DURATION_SECS};
use warden_core::decision::{DecisionKey, DecisionRequest, DecisionResult, Sensitivity};

use crate::client::PolicyEvaluatorClient;

type SharedEvaluation = Shared<BoxFuture<'static, DecisionResult>>;

/// Share of the TTL, counted from the start, after which a CRITICAL entry is
/// refreshed in the background.
const FRESH_RATIO: f64 = 0.7;

#[derive(Debug, Clone)]
struct CacheEntry {
    result: DecisionResult,
    expires_at: Instant,
    /// When set, a hit at or after this instant starts a background refresh.
    stale_at: Option<Instant>,
}

/// `now + ttl`, clamped so that no configured TTL can overflow.
fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .unwrap_or_else(|| now + Duration::from_secs(MAX_DURATION_SECS))
}

#[derive(Default)]
struct Shard {
    entries: HashMap<DecisionKey, CacheEntry>,
    in_flight: HashMap<DecisionKey, SharedEvaluation>,
}

struct CacheInner {
    shards: Vec<Mutex<Shard>>,
    client: Arc<PolicyEvaluatorClient>,
    config: CacheConfig,
    policy_version: AtomicU64,
    metrics: Arc<Metrics>,
}

impl CacheInner {
    fn shard_index(&self, key: &DecisionKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn lock_shard(&self, index: usize) -> MutexGuard<'_, Shard> {
        self.shards[index]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// TTL-tiered, fail-closed authorization cache.
///
/// Cloning is cheap and every clone shares the same entries.
#[derive(Clone)]
pub struct DecisionCache {
    inner: Arc<CacheInner>,
}

impl DecisionCache {
    pub fn new(client: Arc<PolicyEvaluatorClient>, config: CacheConfig, metrics: Arc<Metrics>) -> Self {
        let shard_count = config.shards.max(1);
        let shards = (0..shard_count).map(|_| Mutex::new(Shard::default())).collect();
        Self {
            inner: Arc::new(CacheInner {
                shards,
                client,
                config,
                policy_version: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    /// Return the decision for `request`, evaluating it on a miss.
    ///
    /// Never fails: when the engine is unavailable the result is a deny with
    /// [`warden_core::EVALUATION_UNAVAILABLE_REASON`], which is not cached.
    pub async fn get_or_evaluate(&self, request: &DecisionRequest) -> DecisionResult {
        let key = DecisionKey::derive(request, self.policy_version());
        let index = self.inner.shard_index(&key);

        let evaluation = {
            let mut shard = self.inner.lock_shard(index);

            let now = Instant::now();
            let cached = shard
                .entries
                .get(&key)
                .filter(|entry| now < entry.expires_at)
                .map(|entry| (entry.result.clone(), entry.stale_at.is_some_and(|at| now >= at)));
            if let Some((result, stale)) = cached {
                if stale && !shard.in_flight.contains_key(&key) {
                    self.inner.metrics.record_cache_stale_hit();
                    tracing::debug!(key = %key, "Serving stale decision, refreshing in background");
                    let pending = self.start_evaluation(key.clone(), index, request.clone());
                    shard.in_flight.insert(key, pending);
                } else {
                    self.inner.metrics.record_cache_hit();
                    tracing::debug!(key = %key, "Decision cache hit");
                }
                return result;
            }

            let joined = shard.in_flight.get(&key).cloned();
            match joined {
                Some(pending) => {
                    self.inner.metrics.record_cache_coalesced();
                    tracing::debug!(key = %key, "Joining in-flight evaluation");
                    pending
                }
                None => {
                    self.inner.metrics.record_cache_miss();
                    tracing::debug!(key = %key, "Decision cache miss");
                    let pending = self.start_evaluation(key.clone(), index, request.clone());
                    shard.in_flight.insert(key, pending.clone());
                    pending
                }
            }
        };

        evaluation.await
    }

    fn start_evaluation(
        &self,
        key: DecisionKey,
        index: usize,
        request: DecisionRequest,
    ) -> SharedEvaluation {
        let sensitivity = request.sensitivity;
        let task: JoinHandle<DecisionResult> =
            tokio::spawn(evaluate_and_store(self.inner.clone(), key.clone(), index, request));

        let inner = self.inner.clone();
        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Policy evaluation task failed");
                    inner.lock_shard(index).in_flight.remove(&key);
                    inner.metrics.record_fail_closed();
                    DecisionResult::unavailable(sensitivity)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Make every entry computed under the current policy version unreachable.
    /// Returns the new version.
    pub fn bump_policy_version(&self) -> u64 {
        let version = self.inner.policy_version.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(policy_version = version, "Policy version bumped");
        version
    }

    pub fn policy_version(&self) -> u64 {
        self.inner.policy_version.load(Ordering::Acquire)
    }

    /// Drop the cached decision for `request` under the current version.
    pub fn invalidate(&self, request: &DecisionRequest) -> bool {
        let key = DecisionKey::derive(request, self.policy_version());
        let index = self.inner.shard_index(&key);
        self.inner.lock_shard(index).entries.remove(&key).is_some()
    }

    /// Drop every cached decision. In-flight evaluations are unaffected.
    pub fn clear(&self) {
        for index in 0..self.inner.shards.len() {
            self.inner.lock_shard(index).entries.clear();
        }
        tracing::info!("Decision cache cleared");
    }

    /// Remove expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for index in 0..self.inner.shards.len() {
            let mut shard = self.inner.lock_shard(index);
            let before = shard.entries.len();
            shard.entries.retain(|_, entry| entry.expires_at > now);
            removed += before - shard.entries.len();
        }
        if removed > 0 {
            tracing::debug!(removed, "Purged expired decisions");
        }
        removed
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        (0..self.inner.shards.len())
            .map(|index| self.inner.lock_shard(index).entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn client(&self) -> &Arc<PolicyEvaluatorClient> {
        &self.inner.client
    }

    /// Spawn the periodic expiry sweep, if enabled in the configuration.
    /// The task runs until aborted.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let period = self.inner.config.sweep_interval()?;
        let cache = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.purge_expired();
            }
        }))
    }
}

async fn evaluate_and_store(
    inner: Arc<CacheInner>,
    key: DecisionKey,
    index: usize,
    request: DecisionRequest,
) -> DecisionResult {
    let outcome = inner.client.evaluate(&request).await;

    let mut shard = inner.lock_shard(index);
    shard.in_flight.remove(&key);

    match outcome {
        Ok(verdict) => {
            let result = DecisionResult::new(verdict.allow, verdict.reason, request.sensitivity);
            let ttl = inner.config.ttl_for(request.sensitivity);
            let now = Instant::now();
            let stale_at = (inner.config.stale_while_revalidate
                && request.sensitivity == Sensitivity::Critical)
                .then(|| deadline(now, ttl.mul_f64(FRESH_RATIO)));
            shard.entries.insert(
                key,
                CacheEntry {
                    result: result.clone(),
                    expires_at: deadline(now, ttl),
                    stale_at,
                },
            );
            result
        }
        Err(e) => {
            drop(shard);
            inner.metrics.record_fail_closed();
            tracing::warn!(
                subject = %request.subject,
                action = %request.action,
                resource = %request.resource,
                error = %e,
                "Policy evaluation unavailable, failing closed"
            );
            DecisionResult::unavailable(request.sensitivity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvaluationError;
    use crate::evaluator::{PolicyEvaluator, PolicyVerdict};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use warden_circuit::{CircuitBreaker, CircuitBreakerConfig};
    use warden_core::EVALUATION_UNAVAILABLE_REASON;
    use warden_core::decision::Sensitivity;

    struct StubEvaluator {
        calls: AtomicUsize,
        delay: Duration,
        available: bool,
    }

    impl StubEvaluator {
        fn new(delay: Duration, available: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                available,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PolicyEvaluator for StubEvaluator {
        async fn evaluate(&self, request: &DecisionRequest) -> Result<PolicyVerdict, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if !self.available {
                return Err(EvaluationError::Status { status: 500 });
            }
            Ok(PolicyVerdict::allow(format!("{} may {}", request.subject, request.action)))
        }
    }

    fn cache_with(evaluator: Arc<StubEvaluator>, threshold: u32) -> (DecisionCache, Arc<Metrics>) {
        let config = CacheConfig {
            stale_while_revalidate: false,
            ..Default::default()
        };
        cache_with_config(evaluator, threshold, config)
    }

    fn cache_with_config(
        evaluator: Arc<dyn PolicyEvaluator>,
        threshold: u32,
        config: CacheConfig,
    ) -> (DecisionCache, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let breaker = CircuitBreaker::new(
            "evaluator",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_secs(30),
                call_timeout: Some(Duration::from_secs(5)),
            },
        );
        let client = Arc::new(PolicyEvaluatorClient::new(evaluator, breaker));
        let cache = DecisionCache::new(client, config, metrics.clone());
        (cache, metrics)
    }

    fn request(sensitivity: Sensitivity) -> DecisionRequest {
        DecisionRequest::new("user:alice", "tool:invoke", "server:billing", sensitivity)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_evaluation() {
        let evaluator = StubEvaluator::new(Duration::from_millis(50), true);
        let (cache, metrics) = cache_with(evaluator.clone(), 5);

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_or_evaluate(&request(Sensitivity::Medium)).await })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert_eq!(evaluator.calls(), 1);
        assert!(results.iter().all(|r| r == &results[0]));
        assert!(results[0].allow);
        assert_eq!(metrics.cache_misses(), 1);
        assert_eq!(metrics.cache_coalesced() + metrics.cache_hits(), 31);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_ttl_is_thirty_seconds() {
        let evaluator = StubEvaluator::new(Duration::ZERO, true);
        let (cache, metrics) = cache_with(evaluator.clone(), 5);
        let req = request(Sensitivity::Critical);

        let first = cache.get_or_evaluate(&req).await;
        tokio::time::advance(Duration::from_secs(29)).await;
        let second = cache.get_or_evaluate(&req).await;
        assert_eq!(first, second);
        assert_eq!(evaluator.calls(), 1);
        assert_eq!(metrics.cache_hits(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get_or_evaluate(&req).await;
        assert_eq!(evaluator.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_outlives_high() {
        let evaluator = StubEvaluator::new(Duration::ZERO, true);
        let (cache, _) = cache_with(evaluator.clone(), 5);
        let low = DecisionRequest::new("a", "read", "docs", Sensitivity::Low);
        let high = DecisionRequest::new("a", "read", "payroll", Sensitivity::High);

        cache.get_or_evaluate(&low).await;
        cache.get_or_evaluate(&high).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        cache.get_or_evaluate(&low).await;
        cache.get_or_evaluate(&high).await;

        assert_eq!(evaluator.calls(), 3);
    }

    #[tokio::test]
    async fn test_fail_closed_is_not_cached() {
        let evaluator = StubEvaluator::new(Duration::ZERO, false);
        let (cache, metrics) = cache_with(evaluator.clone(), 5);
        let req = request(Sensitivity::Low);

        let result = cache.get_or_evaluate(&req).await;
        assert!(!result.allow);
        assert_eq!(result.reason, EVALUATION_UNAVAILABLE_REASON);
        assert!(cache.is_empty());

        cache.get_or_evaluate(&req).await;
        assert_eq!(evaluator.calls(), 2);
        assert_eq!(metrics.fail_closed(), 2);
    }

    #[tokio::test]
    async fn test_open_circuit_denies_without_calling() {
        let evaluator = StubEvaluator::new(Duration::ZERO, false);
        let (cache, _) = cache_with(evaluator.clone(), 2);

        for _ in 0..2 {
            cache.get_or_evaluate(&request(Sensitivity::Medium)).await;
        }
        let result = cache.get_or_evaluate(&request(Sensitivity::Medium)).await;

        assert!(!result.allow);
        assert_eq!(result.reason, EVALUATION_UNAVAILABLE_REASON);
        assert_eq!(evaluator.calls(), 2);
    }

    #[tokio::test]
    async fn test_policy_version_bump_forces_reevaluation() {
        let evaluator = StubEvaluator::new(Duration::ZERO, true);
        let (cache, _) = cache_with(evaluator.clone(), 5);
        let req = request(Sensitivity::Low);

        cache.get_or_evaluate(&req).await;
        cache.get_or_evaluate(&req).await;
        assert_eq!(evaluator.calls(), 1);

        assert_eq!(cache.bump_policy_version(), 1);
        cache.get_or_evaluate(&req).await;
        assert_eq!(evaluator.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let evaluator = StubEvaluator::new(Duration::ZERO, true);
        let (cache, _) = cache_with(evaluator.clone(), 5);
        let req = request(Sensitivity::Low);
        let other = DecisionRequest::new("user:bob", "read", "docs", Sensitivity::Low);

        cache.get_or_evaluate(&req).await;
        cache.get_or_evaluate(&other).await;
        assert_eq!(cache.len(), 2);

        assert!(cache.invalidate(&req));
        assert!(!cache.invalidate(&req));
        cache.get_or_evaluate(&req).await;
        assert_eq!(evaluator.calls(), 3);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let evaluator = StubEvaluator::new(Duration::ZERO, true);
        let (cache, _) = cache_with(evaluator, 5);

        cache.get_or_evaluate(&request(Sensitivity::Critical)).await;
        cache
            .get_or_evaluate(&DecisionRequest::new("b", "read", "docs", Sensitivity::Low))
            .await;

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    /// Denies CRITICAL requests, allows everything else.
    struct CriticalDenied;

    #[async_trait]
    impl PolicyEvaluator for CriticalDenied {
        async fn evaluate(&self, request: &DecisionRequest) -> Result<PolicyVerdict, EvaluationError> {
            if request.sensitivity == Sensitivity::Critical {
                Ok(PolicyVerdict::deny("critical data requires approval"))
            } else {
                Ok(PolicyVerdict::allow("ok"))
            }
        }
    }

    #[tokio::test]
    async fn test_decision_is_not_shared_across_sensitivities() {
        let (cache, metrics) = cache_with_config(Arc::new(CriticalDenied), 5, CacheConfig::default());

        let low = cache.get_or_evaluate(&request(Sensitivity::Low)).await;
        let critical = cache.get_or_evaluate(&request(Sensitivity::Critical)).await;

        assert!(low.allow);
        assert!(!critical.allow);
        assert_eq!(critical.sensitivity, Sensitivity::Critical);
        assert_eq!(metrics.cache_misses(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_critical_entry_refreshes_in_background() {
        let evaluator = StubEvaluator::new(Duration::ZERO, true);
        let (cache, metrics) =
            cache_with_config(evaluator.clone(), 5, CacheConfig::default());
        let req = request(Sensitivity::Critical);

        let first = cache.get_or_evaluate(&req).await;
        tokio::time::advance(Duration::from_secs(20)).await;
        cache.get_or_evaluate(&req).await;
        assert_eq!(metrics.cache_hits(), 1);
        assert_eq!(evaluator.calls(), 1);

        // Past 70% of the 30s TTL: the cached decision is served and a
        // refresh starts.
        tokio::time::advance(Duration::from_secs(2)).await;
        let stale = cache.get_or_evaluate(&req).await;
        assert_eq!(stale, first);
        assert_eq!(metrics.cache_stale_hits(), 1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(evaluator.calls(), 2);

        // The refreshed entry outlives the original 30s expiry.
        tokio::time::advance(Duration::from_secs(18)).await;
        cache.get_or_evaluate(&req).await;
        assert_eq!(evaluator.calls(), 2);
        assert_eq!(metrics.cache_hits(), 2);
        assert_eq!(metrics.cache_misses(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_ttl_is_cached() {
        let config = CacheConfig {
            ttl_low: u64::MAX,
            ..Default::default()
        };
        let evaluator = StubEvaluator::new(Duration::ZERO, true);
        let (cache, metrics) = cache_with_config(evaluator.clone(), 5, config);

        assert!(cache.get_or_evaluate(&request(Sensitivity::Low)).await.allow);
        assert!(cache.get_or_evaluate(&request(Sensitivity::Low)).await.allow);
        assert_eq!(evaluator.calls(), 1);
        assert_eq!(metrics.fail_closed(), 0);
    }
}

//! Hook pipeline
//!
//! Accepts [`HookEvent`]s, resolves the hooks that apply, and runs them under
//! a hard per-event time budget. The circuit breaker short-circuits execution
//! with a fallback result; low-priority events whose hooks are all
//! cache-enabled are served from the result cache.
//!
//! # Single event
//!
//! ```text
//! validate ─▶ resolve ─▶ breaker ─▶ cache? ─▶ execute layers ─▶ aggregate
//!                          │          │
//!                          ▼          ▼
//!                      fallback    cached hit
//! ```
//!
//! # Batch
//!
//! Events are bucketed by priority and the buckets run critical → high →
//! medium → low. Events inside a bucket run concurrently and all hook
//! executions share one semaphore; critical hooks skip it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{CacheStats, ResultCache};
use super::circuit_breaker::{CircuitBreaker, CircuitSnapshot, Transition};
use super::registry::HookRegistry;
use super::types::{
    HandlerError, Hook, HookError, HookErrorCode, HookEvent, HookPriority, HookResult,
};
use crate::config::PipelineConfig;
use crate::events::{CoordinationEvent, Notifier};

/// Outcome of one hook within an event
#[derive(Debug)]
struct HookOutcome {
    hook_id: String,
    success: bool,
    executed: bool,
    retries: u32,
    fallback_enabled: bool,
    data: Option<Value>,
    error: Option<HookError>,
}

impl HookOutcome {
    fn skipped(hook: &Hook, error: HookError) -> Self {
        Self {
            hook_id: hook.id.clone(),
            success: false,
            executed: false,
            retries: 0,
            fallback_enabled: hook.configuration.fallback_enabled,
            data: None,
            error: Some(error),
        }
    }

    /// Whether this outcome fails the aggregate result
    fn is_fatal(&self) -> bool {
        if self.success {
            return false;
        }
        let blocked = self
            .error
            .as_ref()
            .is_some_and(|e| e.code == HookErrorCode::HookBlocked);
        blocked || !self.fallback_enabled
    }
}

/// Result of a single handler attempt
enum Attempt {
    Done(Option<Value>),
    Failed(HookError),
    Blocked(HookError),
}

#[derive(Debug, Default)]
struct Counters {
    events: AtomicU64,
    invalid: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

/// Pipeline counters plus cache and breaker views
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub events: u64,
    pub invalid: u64,
    pub cache_hits: u64,
    pub fallbacks: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub registered_hooks: usize,
    pub available_permits: usize,
    pub cache: CacheStats,
    pub circuit_breaker: CircuitSnapshot,
}

/// Latency-bounded pre/post processing pipeline
pub struct HookPipeline {
    config: PipelineConfig,
    registry: Arc<HookRegistry>,
    cache: Arc<ResultCache>,
    breaker: CircuitBreaker,
    semaphore: Arc<Semaphore>,
    notifier: Option<Notifier>,
    counters: Counters,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookPipeline")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl HookPipeline {
    /// Create a pipeline with an empty registry
    pub fn new(config: PipelineConfig) -> Self {
        let registry = HookRegistry::new(config.max_hook_timeout()).shared();
        Self::with_registry(config, registry)
    }

    /// Create a pipeline over an existing registry
    pub fn with_registry(config: PipelineConfig, registry: Arc<HookRegistry>) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache.capacity, config.cache.ttl()));
        let breaker = CircuitBreaker::new(config.circuit_breaker.clone());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_hooks.max(1)));

        Self {
            config,
            registry,
            cache,
            breaker,
            semaphore,
            notifier: None,
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Report timeouts, failures and breaker transitions to `notifier`
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Create a shared reference to this pipeline
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Process one event. Never fails: problems are reported in the result.
    pub async fn process(&self, event: HookEvent) -> HookResult {
        self.process_from(event, Instant::now()).await
    }

    /// Process one event given as raw JSON
    pub async fn process_json(&self, raw: &Value) -> HookResult {
        let started = Instant::now();
        match Self::parse_event(raw) {
            Ok(event) => self.process_from(event, started).await,
            Err(invalid) => invalid.with_elapsed(started.elapsed()),
        }
    }

    /// Process a batch; results are index-aligned with `events`
    pub async fn process_batch(&self, events: Vec<HookEvent>) -> Vec<HookResult> {
        let submitted = Instant::now();
        let total = events.len();
        let items = events.into_iter().enumerate().collect();
        self.run_batch(items, total, submitted).await
    }

    /// Process a batch of raw JSON events; malformed entries get
    /// `INVALID_EVENT` results in their slot
    pub async fn process_batch_json(&self, raw: &[Value]) -> Vec<HookResult> {
        let submitted = Instant::now();
        let mut rejected = HashMap::new();
        let mut items = Vec::with_capacity(raw.len());

        for (index, value) in raw.iter().enumerate() {
            match Self::parse_event(value) {
                Ok(event) => items.push((index, event)),
                Err(invalid) => {
                    rejected.insert(index, invalid);
                }
            }
        }

        let mut results = self.run_batch(items, raw.len(), submitted).await;
        for (index, invalid) in rejected {
            if let Some(slot) = results.get_mut(index) {
                *slot = invalid.with_elapsed(submitted.elapsed());
            }
        }
        results
    }

    fn parse_event(raw: &Value) -> Result<HookEvent, HookResult> {
        serde_json::from_value::<HookEvent>(raw.clone()).map_err(|e| {
            let event_id = raw.get("id").and_then(Value::as_str).unwrap_or_default();
            debug!(error = %e, "Rejected malformed hook event");
            HookResult::invalid(event_id, format!("malformed event: {e}"))
        })
    }

    // ========================================================================
    // Batch scheduling
    // ========================================================================

    async fn run_batch(
        &self,
        items: Vec<(usize, HookEvent)>,
        total: usize,
        submitted: Instant,
    ) -> Vec<HookResult> {
        let mut buckets: BTreeMap<HookPriority, Vec<(usize, HookEvent)>> = BTreeMap::new();
        for (index, event) in items {
            buckets.entry(event.priority).or_default().push((index, event));
        }

        let mut slots: Vec<Option<HookResult>> = vec![None; total];

        // BTreeMap iterates critical first
        for (priority, bucket) in buckets {
            debug!(%priority, events = bucket.len(), "Processing priority bucket");
            let results = join_all(bucket.into_iter().map(|(index, event)| async move {
                (index, self.process_from(event, submitted).await)
            }))
            .await;

            for (index, result) in results {
                slots[index] = Some(result);
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| HookResult::invalid("", "event missing from batch"))
            })
            .collect()
    }

    // ========================================================================
    // Single event
    // ========================================================================

    async fn process_from(&self, event: HookEvent, submitted: Instant) -> HookResult {
        if let Err(message) = event.validate() {
            self.counters.invalid.fetch_add(1, Ordering::Relaxed);
            debug!(event_id = %event.id, %message, "Rejected invalid hook event");
            return HookResult::invalid(&event.id, message).with_elapsed(submitted.elapsed());
        }
        self.counters.events.fetch_add(1, Ordering::Relaxed);

        let hooks = self.registry.resolve(&event);
        if hooks.is_empty() {
            return HookResult::empty(&event.id).with_elapsed(submitted.elapsed());
        }

        let admission = self.breaker.allow_request();
        self.report_transition(admission.transition);
        if !admission.allowed {
            self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            debug!(event_id = %event.id, operation = %event.operation, "Circuit open, returning fallback");
            self.notify(CoordinationEvent::HookFallback {
                event_id: event.id.clone(),
                operation: event.operation.clone(),
                timestamp: Utc::now(),
            });
            return HookResult::fallback(&event.id).with_elapsed(submitted.elapsed());
        }

        let cache_key = self.cache_key_for(&event, &hooks);
        if let Some(key) = &cache_key {
            if let Some(mut hit) = self.cache.get(key) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.id, "Hook result served from cache");
                hit.metadata.cache_hit = Some(true);
                hit.metadata.event_id = event.id.clone();
                hit.metadata.execution_id = uuid::Uuid::new_v4().to_string();
                return hit.with_elapsed(submitted.elapsed());
            }
        }

        let budget = self.config.budgets.budget_for(event.priority);
        let deadline = Instant::now() + budget;
        let event = Arc::new(event);

        let mut result = self.execute(&event, &hooks, deadline).await;

        if let Some(key) = cache_key {
            result.metadata.cache_hit = Some(false);
            if result.success {
                self.cache.put(key, result.clone(), None);
            }
        }

        let result = result.with_elapsed(submitted.elapsed());
        debug!(
            event_id = %event.id,
            success = result.success,
            hooks = result.metadata.hooks_executed,
            elapsed_ms = result.processing_time_ms,
            "Processed hook event"
        );
        result
    }

    fn cache_key_for(&self, event: &HookEvent, hooks: &[Arc<Hook>]) -> Option<String> {
        let eligible = self.config.cache.enabled
            && event.priority == HookPriority::Low
            && hooks.iter().all(|h| h.configuration.cache_enabled);
        eligible.then(|| event.cache_key())
    }

    /// Run hooks in dependency layers and aggregate their outcomes
    async fn execute(
        &self,
        event: &Arc<HookEvent>,
        hooks: &[Arc<Hook>],
        deadline: Instant,
    ) -> HookResult {
        let present: HashSet<&str> = hooks.iter().map(|h| h.id.as_str()).collect();
        let mut finished: HashMap<String, bool> = HashMap::new();
        let mut outcomes: Vec<HookOutcome> = Vec::with_capacity(hooks.len());
        let mut pending: Vec<Arc<Hook>> = hooks.to_vec();

        while !pending.is_empty() {
            let (mut ready, mut waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|h| {
                h.dependencies
                    .iter()
                    .filter(|d| present.contains(d.as_str()))
                    .all(|d| finished.contains_key(d))
            });

            // registration order rules out cycles; run the rest rather than spin
            if ready.is_empty() {
                ready = std::mem::take(&mut waiting);
            }

            let mut runnable = Vec::with_capacity(ready.len());
            for hook in ready {
                let failed_dep = hook
                    .dependencies
                    .iter()
                    .find(|d| finished.get(d.as_str()) == Some(&false));
                match failed_dep {
                    Some(dep) => {
                        let error = HookError::new(
                            HookErrorCode::DependencyFailed,
                            format!("dependency {dep} failed"),
                        );
                        finished.insert(hook.id.clone(), false);
                        outcomes.push(HookOutcome::skipped(&hook, error));
                    }
                    None => runnable.push(hook),
                }
            }

            let (parallel, sequential): (Vec<_>, Vec<_>) = runnable
                .into_iter()
                .partition(|h| h.configuration.parallel_execution);

            let concurrent = join_all(
                parallel
                    .iter()
                    .map(|hook| self.run_hook(event, hook, deadline)),
            )
            .await;
            for outcome in concurrent {
                finished.insert(outcome.hook_id.clone(), outcome.success);
                outcomes.push(outcome);
            }

            for hook in &sequential {
                let outcome = self.run_hook(event, hook, deadline).await;
                finished.insert(outcome.hook_id.clone(), outcome.success);
                outcomes.push(outcome);
            }

            pending = waiting;
        }

        Self::aggregate(&event.id, hooks, outcomes)
    }

    fn aggregate(event_id: &str, hooks: &[Arc<Hook>], outcomes: Vec<HookOutcome>) -> HookResult {
        let mut result = HookResult::empty(event_id);
        result.success = !outcomes.iter().any(HookOutcome::is_fatal);
        if let [only] = hooks {
            result.metadata.hook_id = Some(only.id.clone());
        }

        let mut data = serde_json::Map::new();
        for outcome in outcomes {
            result.metadata.retry_count += outcome.retries;
            if outcome.executed {
                result.metadata.hooks_executed += 1;
            }
            if let Some(value) = outcome.data {
                data.insert(outcome.hook_id, value);
            }
            if let Some(error) = outcome.error {
                result.errors.push(error);
            }
        }
        if !data.is_empty() {
            result.data = Some(Value::Object(data));
        }
        result
    }

    // ========================================================================
    // Hook execution
    // ========================================================================

    async fn run_hook(&self, event: &Arc<HookEvent>, hook: &Arc<Hook>, deadline: Instant) -> HookOutcome {
        let mut retries = 0;

        let attempt = loop {
            let attempt = self.attempt(event, hook, deadline).await;
            let retry = matches!(attempt, Attempt::Failed(_))
                && retries < hook.configuration.retries
                && Instant::now() < deadline;
            if !retry {
                break attempt;
            }
            retries += 1;
            debug!(hook_id = %hook.id, retries, "Retrying hook");
        };

        let mut outcome = HookOutcome {
            hook_id: hook.id.clone(),
            success: false,
            executed: true,
            retries,
            fallback_enabled: hook.configuration.fallback_enabled,
            data: None,
            error: None,
        };

        match attempt {
            Attempt::Done(data) => {
                outcome.success = true;
                outcome.data = data;
                let transition = self.breaker.record_success();
                self.report_transition(transition);
            }
            Attempt::Blocked(error) => {
                info!(hook_id = %hook.id, event_id = %event.id, reason = %error.message, "Hook blocked operation");
                self.notify_failure(hook, event, &error);
                outcome.error = Some(error);
            }
            Attempt::Failed(error) => {
                if error.code == HookErrorCode::HookTimeout {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    self.notify(CoordinationEvent::HookTimedOut {
                        hook_id: hook.id.clone(),
                        event_id: event.id.clone(),
                        timeout_ms: hook.configuration.timeout.as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                } else {
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    self.notify_failure(hook, event, &error);
                }
                let transition = self.breaker.record_failure();
                self.report_transition(transition);
                outcome.error = Some(error);
            }
        }
        outcome
    }

    /// One time-boxed handler invocation in its own task
    async fn attempt(&self, event: &Arc<HookEvent>, hook: &Arc<Hook>, deadline: Instant) -> Attempt {
        let started = Instant::now();
        let timeout = hook
            .configuration
            .timeout
            .min(deadline.saturating_duration_since(started));

        let timed_out = |waited: Duration| {
            warn!(
                hook_id = %hook.id,
                event_id = %event.id,
                waited_ms = waited.as_millis() as u64,
                "Hook timed out"
            );
            Attempt::Failed(
                HookError::new(
                    HookErrorCode::HookTimeout,
                    format!("hook {} exceeded {}ms", hook.id, timeout.as_millis()),
                )
                .with_context(serde_json::json!({ "hookId": hook.id })),
            )
        };

        if timeout.is_zero() {
            return timed_out(Duration::ZERO);
        }

        let permit = if event.priority == HookPriority::Critical {
            None
        } else {
            match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
                Ok(Ok(permit)) => Some(permit),
                Ok(Err(_)) => {
                    return Attempt::Failed(HookError::new(
                        HookErrorCode::HookFailed,
                        "hook concurrency limiter closed",
                    ))
                }
                Err(_) => return timed_out(started.elapsed()),
            }
        };

        let remaining = timeout.saturating_sub(started.elapsed());
        let cancel = self.shutdown.child_token();
        let handler = hook.handler.clone();
        let task_event = event.clone();
        let task_cancel = cancel.clone();

        let mut task = tokio::spawn(async move {
            let _permit = permit;
            handler.execute(&task_event, task_cancel).await
        });

        match tokio::time::timeout(remaining, &mut task).await {
            Err(_) => {
                cancel.cancel();
                task.abort();
                timed_out(started.elapsed())
            }
            Ok(Err(join_error)) if join_error.is_panic() => {
                warn!(hook_id = %hook.id, event_id = %event.id, "Hook panicked");
                Attempt::Failed(HookError::new(
                    HookErrorCode::HookPanicked,
                    format!("hook {} panicked", hook.id),
                ))
            }
            Ok(Err(join_error)) => Attempt::Failed(HookError::new(
                HookErrorCode::HookFailed,
                format!("hook {} was cancelled: {join_error}", hook.id),
            )),
            Ok(Ok(Ok(data))) => Attempt::Done(data),
            Ok(Ok(Err(HandlerError::Blocked(reason)))) => {
                Attempt::Blocked(HookError::new(HookErrorCode::HookBlocked, reason))
            }
            Ok(Ok(Err(HandlerError::Failed(reason)))) => {
                debug!(hook_id = %hook.id, %reason, "Hook failed");
                Attempt::Failed(HookError::new(HookErrorCode::HookFailed, reason))
            }
        }
    }

    // ========================================================================
    // Notifications, stats, lifecycle
    // ========================================================================

    fn notify(&self, event: CoordinationEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(event);
        }
    }

    fn notify_failure(&self, hook: &Hook, event: &HookEvent, error: &HookError) {
        self.notify(CoordinationEvent::HookFailed {
            hook_id: hook.id.clone(),
            event_id: event.id.clone(),
            code: error.code,
            message: error.message.clone(),
            timestamp: Utc::now(),
        });
    }

    fn report_transition(&self, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            info!(%from, %to, "Hook circuit breaker transition");
            self.notify(CoordinationEvent::CircuitTransition {
                from,
                to,
                timestamp: Utc::now(),
            });
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            events: c.events.load(Ordering::Relaxed),
            invalid: c.invalid.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            registered_hooks: self.registry.len(),
            available_permits: self.semaphore.available_permits(),
            cache: self.cache.stats(),
            circuit_breaker: self.breaker.snapshot(),
        }
    }

    /// Spawn the background expired-entry sweeper. Must be called inside a
    /// Tokio runtime; a second call is a no-op.
    pub fn start_sweeper(&self) {
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || !self.config.cache.enabled {
            return;
        }

        let cache = self.cache.clone();
        let token = self.shutdown.child_token();
        let period = self.config.cache.sweep_interval();

        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!(purged, "Swept expired cache entries");
                        }
                    }
                }
            }
            debug!("Cache sweeper stopped");
        }));
        info!(interval_ms = period.as_millis() as u64, "Cache sweeper started");
    }

    /// Stop the sweeper and cancel in-flight handlers
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cache sweeper ended abnormally");
            }
        }
        info!("Hook pipeline shut down");
    }
}

//! Hook events, hook definitions and results
//!
//! Wire types serialize in camelCase; enum values are snake_case except
//! error codes, which are SCREAMING_SNAKE_CASE.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Default per-hook timeout
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_millis(50);

/// Kind of work an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    Command,
    FileEdit,
    Task,
    Session,
    Agent,
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::FileEdit => write!(f, "file_edit"),
            Self::Task => write!(f, "task"),
            Self::Session => write!(f, "session"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// Before or after the wrapped operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    Pre,
    Post,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// Urgency class of an event. Ordered most urgent first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HookPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl HookPriority {
    /// Bucket processing order for batches
    pub fn all() -> &'static [HookPriority] {
        &[Self::Critical, Self::High, Self::Medium, Self::Low]
    }
}

impl std::fmt::Display for HookPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Where and on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookContext {
    pub operation_type: String,
    pub session_id: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_environment() -> String {
    "development".to_string()
}

fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One unit of work submitted to the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookEvent {
    /// Correlation id echoed into `HookResult.metadata.eventId`
    #[serde(default = "new_event_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub hook_type: HookType,
    pub phase: HookPhase,
    pub operation: String,
    pub context: HookContext,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Required on the wire; [`HookEvent::new`] defaults it to medium
    pub priority: HookPriority,
}

impl HookEvent {
    pub fn new(
        hook_type: HookType,
        phase: HookPhase,
        operation: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        let operation = operation.into();
        Self {
            id: new_event_id(),
            hook_type,
            phase,
            context: HookContext {
                operation_type: operation.clone(),
                session_id: session_id.into(),
                environment: default_environment(),
                file_path: None,
                command: None,
                metadata: BTreeMap::new(),
            },
            operation,
            timestamp: Utc::now(),
            priority: HookPriority::default(),
        }
    }

    pub fn with_priority(mut self, priority: HookPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.context.command = Some(command.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.context.file_path = Some(path.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.context.environment = environment.into();
        self
    }

    pub fn with_operation_type(mut self, operation_type: impl Into<String>) -> Self {
        self.context.operation_type = operation_type.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.metadata.insert(key.into(), value);
        self
    }

    /// Check required fields; the message names the first missing one.
    pub fn validate(&self) -> Result<(), String> {
        if self.operation.trim().is_empty() {
            return Err("operation must not be empty".to_string());
        }
        if self.context.operation_type.trim().is_empty() {
            return Err("context.operationType must not be empty".to_string());
        }
        if self.context.session_id.trim().is_empty() {
            return Err("context.sessionId must not be empty".to_string());
        }
        Ok(())
    }

    /// Cache key: everything that determines hook output, minus ids and time
    pub fn cache_key(&self) -> String {
        let metadata = serde_json::to_string(&self.context.metadata).unwrap_or_default();
        format!(
            "{}:{}:{}:{}:{}:{}:{}:{}",
            self.hook_type,
            self.phase,
            self.operation,
            self.context.operation_type,
            self.context.environment,
            self.context.file_path.as_deref().unwrap_or(""),
            self.context.command.as_deref().unwrap_or(""),
            metadata
        )
    }
}

/// Error codes reported in [`HookResult::errors`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookErrorCode {
    HookTimeout,
    HookFailed,
    HookBlocked,
    HookPanicked,
    DependencyFailed,
    InvalidEvent,
}

impl std::fmt::Display for HookErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HookTimeout => write!(f, "HOOK_TIMEOUT"),
            Self::HookFailed => write!(f, "HOOK_FAILED"),
            Self::HookBlocked => write!(f, "HOOK_BLOCKED"),
            Self::HookPanicked => write!(f, "HOOK_PANICKED"),
            Self::DependencyFailed => write!(f, "DEPENDENCY_FAILED"),
            Self::InvalidEvent => write!(f, "INVALID_EVENT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookError {
    pub code: HookErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl HookError {
    pub fn new(code: HookErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResultMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_id: Option<String>,
    pub execution_id: String,
    pub event_id: String,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    pub hooks_executed: usize,
}

/// Aggregate outcome of processing one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResult {
    pub success: bool,
    pub processing_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<HookError>,
    pub metadata: HookResultMetadata,
}

impl HookResult {
    fn base(event_id: &str, success: bool) -> Self {
        Self {
            success,
            processing_time_ms: 0.0,
            data: None,
            errors: Vec::new(),
            metadata: HookResultMetadata {
                hook_id: None,
                execution_id: uuid::Uuid::new_v4().to_string(),
                event_id: event_id.to_string(),
                retry_count: 0,
                cache_hit: None,
                hooks_executed: 0,
            },
        }
    }

    /// Successful result with no hook output
    pub fn empty(event_id: &str) -> Self {
        Self::base(event_id, true)
    }

    /// Synthetic success returned when execution is bypassed
    pub fn fallback(event_id: &str) -> Self {
        let mut result = Self::base(event_id, true);
        result.data = Some(serde_json::json!({ "fallback": true }));
        result
    }

    /// Rejected event
    pub fn invalid(event_id: &str, message: impl Into<String>) -> Self {
        let mut result = Self::base(event_id, false);
        result
            .errors
            .push(HookError::new(HookErrorCode::InvalidEvent, message));
        result
    }

    pub fn is_fallback(&self) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get("fallback"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn has_error(&self, code: HookErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub(crate) fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.processing_time_ms = elapsed.as_secs_f64() * 1000.0;
        self
    }
}

/// Error returned by a hook handler
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// The handler could not do its job
    #[error("{0}")]
    Failed(String),

    /// The handler refuses to let the operation proceed
    #[error("blocked: {0}")]
    Blocked(String),
}

/// Work performed for a matching event
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// Run the hook. `Some(value)` becomes part of the result data.
    async fn execute(
        &self,
        event: &HookEvent,
        cancel: CancellationToken,
    ) -> Result<Option<Value>, HandlerError>;
}

type HandlerFn = dyn Fn(&HookEvent) -> Result<Option<Value>, HandlerError> + Send + Sync;

/// Adapter turning a synchronous closure into a [`HookHandler`]
pub struct FnHandler(Box<HandlerFn>);

impl FnHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&HookEvent) -> Result<Option<Value>, HandlerError> + Send + Sync + 'static,
    {
        Self(Box::new(f))
    }
}

#[async_trait]
impl HookHandler for FnHandler {
    async fn execute(
        &self,
        event: &HookEvent,
        _cancel: CancellationToken,
    ) -> Result<Option<Value>, HandlerError> {
        (self.0)(event)
    }
}

/// Predicate that must hold for a hook to apply to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HookCondition {
    OperationType(String),
    Environment(String),
    /// Extension without the dot, e.g. `rs`
    FileExtension(String),
    CommandPrefix(String),
}

impl HookCondition {
    pub fn matches(&self, event: &HookEvent) -> bool {
        let ctx = &event.context;
        match self {
            Self::OperationType(op) => ctx.operation_type == *op,
            Self::Environment(env) => ctx.environment == *env,
            Self::FileExtension(ext) => ctx
                .file_path
                .as_deref()
                .and_then(|p| Path::new(p).extension())
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext.trim_start_matches('.'))),
            Self::CommandPrefix(prefix) => ctx
                .command
                .as_deref()
                .is_some_and(|c| c.trim_start().starts_with(prefix.as_str())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookConfiguration {
    pub timeout: Duration,
    pub retries: u32,
    pub fallback_enabled: bool,
    pub cache_enabled: bool,
    pub parallel_execution: bool,
    pub conditions: Vec<HookCondition>,
}

impl Default for HookConfiguration {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HOOK_TIMEOUT,
            retries: 0,
            fallback_enabled: false,
            cache_enabled: false,
            parallel_execution: true,
            conditions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HookMetadata {
    pub registered_at: DateTime<Utc>,
    pub source: String,
    /// Operation name this hook is bound to, if any
    pub bound_operation: Option<String>,
}

/// A registered unit of pre/post processing
#[derive(Clone)]
pub struct Hook {
    pub id: String,
    pub name: String,
    pub hook_type: HookType,
    pub phase: HookPhase,
    /// Higher runs first
    pub priority: i32,
    pub enabled: bool,
    pub handler: Arc<dyn HookHandler>,
    pub dependencies: Vec<String>,
    pub configuration: HookConfiguration,
    pub metadata: HookMetadata,
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("hook_type", &self.hook_type)
            .field("phase", &self.phase)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("dependencies", &self.dependencies)
            .field("configuration", &self.configuration)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl Hook {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        hook_type: HookType,
        phase: HookPhase,
        handler: Arc<dyn HookHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hook_type,
            phase,
            priority: 0,
            enabled: true,
            handler,
            dependencies: Vec::new(),
            configuration: HookConfiguration::default(),
            metadata: HookMetadata {
                registered_at: Utc::now(),
                source: "runtime".to_string(),
                bound_operation: None,
            },
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.configuration.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.configuration.retries = retries;
        self
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.configuration.fallback_enabled = enabled;
        self
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.configuration.cache_enabled = enabled;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.configuration.parallel_execution = parallel;
        self
    }

    pub fn with_condition(mut self, condition: HookCondition) -> Self {
        self.configuration.conditions.push(condition);
        self
    }

    pub fn with_dependency(mut self, hook_id: impl Into<String>) -> Self {
        self.dependencies.push(hook_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = source.into();
        self
    }

    /// Bind to an operation name instead of a (type, phase) pair
    pub fn bound_to(mut self, operation: impl Into<String>) -> Self {
        self.metadata.bound_operation = Some(operation.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether every condition holds for `event`
    pub fn applies_to(&self, event: &HookEvent) -> bool {
        self.configuration
            .conditions
            .iter()
            .all(|c| c.matches(event))
    }
}

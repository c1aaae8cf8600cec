//! Hook processing pipeline
//!
//! Wraps every unit of work (command, file edit, task, session, agent call)
//! in latency-bounded pre/post processing.
//!
//! # Components
//!
//! 1. **Types** (`types.rs`): events, hook definitions, results, the
//!    [`HookHandler`] capability.
//! 2. **Registry** (`registry.rs`): ordered, read-mostly hook store.
//! 3. **Cache** (`cache.rs`): TTL + LRU store for low-priority results.
//! 4. **Circuit breaker** (`circuit_breaker.rs`): failure-rate gate.
//! 5. **Pipeline** (`pipeline.rs`): scheduling, budgets, batch execution.
//! 6. **Built-ins** (`builtin.rs`): command guard, edit path guard, audit.
//!
//! # Usage
//!
//! ```ignore
//! use coordination::config::PipelineConfig;
//! use coordination::hooks::{BuiltinHook, HookEvent, HookPhase, HookPipeline, HookType};
//!
//! let pipeline = HookPipeline::new(PipelineConfig::default()).shared();
//! BuiltinHook::register_all(pipeline.registry())?;
//!
//! let event = HookEvent::new(HookType::Command, HookPhase::Pre, "shell", "session-1")
//!     .with_command("cargo test");
//! let result = pipeline.process(event).await;
//! assert!(result.success);
//! ```

pub mod builtin;
pub mod cache;
pub mod circuit_breaker;
pub mod pipeline;
pub mod registry;
pub mod types;

pub use builtin::{BuiltinHook, CommandGuard, EditPathGuard, OperationAudit};
pub use cache::{CacheEntry, CacheStats, ResultCache};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, Transition,
};
pub use pipeline::{HookPipeline, PipelineStats};
pub use registry::{HookRegistry, RegistryError, RegistryResult};
pub use types::{
    FnHandler, HandlerError, Hook, HookCondition, HookConfiguration, HookContext, HookError,
    HookErrorCode, HookEvent, HookHandler, HookMetadata, HookPhase, HookPriority, HookResult,
    HookResultMetadata, HookType,
};

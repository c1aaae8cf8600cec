//! Hook registry
//!
//! Read-mostly store of registered hooks. Lookups return hooks ordered by
//! descending priority weight, ties in registration order.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info};

use super::types::{Hook, HookEvent, HookPhase, HookType};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Hook id must not be empty")]
    EmptyId,

    #[error("Hook {0} has an empty name")]
    EmptyName(String),

    #[error("Hook {0} is already registered")]
    DuplicateId(String),

    #[error("Hook {id} timeout {timeout_ms}ms must be between 1 and {max_ms}ms")]
    InvalidTimeout {
        id: String,
        timeout_ms: u128,
        max_ms: u128,
    },

    #[error("Hook {0} cannot depend on itself")]
    SelfDependency(String),

    #[error("Hook {id} depends on unregistered hook {dependency}")]
    MissingDependency { id: String, dependency: String },

    #[error("Hook {0} not found")]
    NotFound(String),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Ordered collection of hooks
#[derive(Debug)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<Hook>>>,
    max_hook_timeout: Duration,
}

fn by_priority(mut hooks: Vec<Arc<Hook>>) -> Vec<Arc<Hook>> {
    // stable: equal priorities keep registration order
    hooks.sort_by(|a, b| b.priority.cmp(&a.priority));
    hooks
}

impl HookRegistry {
    /// Create a registry accepting hook timeouts up to `max_hook_timeout`
    pub fn new(max_hook_timeout: Duration) -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            max_hook_timeout,
        }
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Validate and add a hook
    pub fn register(&self, hook: Hook) -> RegistryResult<()> {
        if hook.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if hook.name.trim().is_empty() {
            return Err(RegistryError::EmptyName(hook.id));
        }

        let timeout = hook.configuration.timeout;
        if timeout.is_zero() || timeout > self.max_hook_timeout {
            return Err(RegistryError::InvalidTimeout {
                id: hook.id,
                timeout_ms: timeout.as_millis(),
                max_ms: self.max_hook_timeout.as_millis(),
            });
        }

        if hook.dependencies.iter().any(|d| *d == hook.id) {
            return Err(RegistryError::SelfDependency(hook.id));
        }

        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);

        if hooks.iter().any(|h| h.id == hook.id) {
            return Err(RegistryError::DuplicateId(hook.id));
        }

        if let Some(missing) = hook
            .dependencies
            .iter()
            .find(|d| !hooks.iter().any(|h| h.id == **d))
        {
            return Err(RegistryError::MissingDependency {
                id: hook.id.clone(),
                dependency: missing.clone(),
            });
        }

        info!(
            hook_id = %hook.id,
            hook_type = %hook.hook_type,
            phase = %hook.phase,
            priority = hook.priority,
            bound = hook.metadata.bound_operation.as_deref().unwrap_or("-"),
            "Registered hook"
        );
        hooks.push(Arc::new(hook));
        Ok(())
    }

    /// Remove a hook by id
    pub fn unregister(&self, id: &str) -> RegistryResult<Arc<Hook>> {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let index = hooks
            .iter()
            .position(|h| h.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let removed = hooks.remove(index);
        info!(hook_id = %id, "Unregistered hook");
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Hook>> {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        hooks.iter().find(|h| h.id == id).cloned()
    }

    /// Unbound hooks registered for `(hook_type, phase)`
    pub fn find(&self, hook_type: HookType, phase: HookPhase) -> Vec<Arc<Hook>> {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        by_priority(
            hooks
                .iter()
                .filter(|h| {
                    h.hook_type == hook_type
                        && h.phase == phase
                        && h.metadata.bound_operation.is_none()
                })
                .cloned()
                .collect(),
        )
    }

    /// Hooks bound to an operation name
    pub fn find_bound_to(&self, operation: &str) -> Vec<Arc<Hook>> {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        by_priority(
            hooks
                .iter()
                .filter(|h| h.metadata.bound_operation.as_deref() == Some(operation))
                .cloned()
                .collect(),
        )
    }

    /// Enabled hooks that apply to `event`, in execution order
    pub fn resolve(&self, event: &HookEvent) -> Vec<Arc<Hook>> {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        let resolved: Vec<Arc<Hook>> = hooks
            .iter()
            .filter(|h| h.enabled && h.phase == event.phase)
            .filter(|h| match h.metadata.bound_operation.as_deref() {
                Some(operation) => operation == event.operation,
                None => h.hook_type == event.hook_type,
            })
            .filter(|h| h.applies_to(event))
            .cloned()
            .collect();
        drop(hooks);

        debug!(
            event_id = %event.id,
            operation = %event.operation,
            hooks = resolved.len(),
            "Resolved hooks"
        );
        by_priority(resolved)
    }

    pub fn len(&self) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every registered hook, in registration order
    pub fn ids(&self) -> Vec<String> {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner);
        hooks.iter().map(|h| h.id.clone()).collect()
    }
}

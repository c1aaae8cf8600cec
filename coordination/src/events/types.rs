//! Notification event types
//!
//! Emitted by the dispatcher, consensus engine and hook pipeline for a
//! single downstream consumer (logging sink, dashboard, test harness).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ensemble::types::{AgentId, AgentType, ConsensusMethod};
use crate::hooks::circuit_breaker::CircuitState;
use crate::hooks::types::HookErrorCode;

/// Why an agent produced no response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentFailureReason {
    /// The agent returned an error
    Error,
    /// The agent missed its deadline and was cancelled
    Timeout,
    /// The agent task panicked
    Panicked,
}

impl std::fmt::Display for AgentFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
            Self::Panicked => write!(f, "panicked"),
        }
    }
}

/// All coordination notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    /// An agent was dropped from a dispatch
    AgentFailed {
        agent_id: AgentId,
        agent_type: AgentType,
        reason: AgentFailureReason,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Consensus was built for a request
    ConsensusReached {
        method: ConsensusMethod,
        confidence: f64,
        participants: usize,
        fallback: bool,
        timestamp: DateTime<Utc>,
    },

    /// A hook exceeded its time budget
    HookTimedOut {
        hook_id: String,
        event_id: String,
        timeout_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A hook failed, was blocked, or panicked
    HookFailed {
        hook_id: String,
        event_id: String,
        code: HookErrorCode,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// An event was answered with a fallback result instead of running hooks
    HookFallback {
        event_id: String,
        operation: String,
        timestamp: DateTime<Utc>,
    },

    /// The hook circuit breaker changed state
    CircuitTransition {
        from: CircuitState,
        to: CircuitState,
        timestamp: DateTime<Utc>,
    },
}

impl CoordinationEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AgentFailed { .. } => "agent_failed",
            Self::ConsensusReached { .. } => "consensus_reached",
            Self::HookTimedOut { .. } => "hook_timed_out",
            Self::HookFailed { .. } => "hook_failed",
            Self::HookFallback { .. } => "hook_fallback",
            Self::CircuitTransition { .. } => "circuit_transition",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::AgentFailed { timestamp, .. }
            | Self::ConsensusReached { timestamp, .. }
            | Self::HookTimedOut { timestamp, .. }
            | Self::HookFailed { timestamp, .. }
            | Self::HookFallback { timestamp, .. }
            | Self::CircuitTransition { timestamp, .. } => *timestamp,
        }
    }

    /// Hook event id, for hook-related notifications
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::HookTimedOut { event_id, .. }
            | Self::HookFailed { event_id, .. }
            | Self::HookFallback { event_id, .. } => Some(event_id),
            _ => None,
        }
    }
}

//! Core types for agent responses and consensus results
//!
//! These types cross the gateway boundary, so they serialize in camelCase to
//! match the JSON message shape used by callers.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a participating agent
pub type AgentId = String;

/// Responses faster than this earn the latency bonus in weighted voting
pub const FAST_RESPONSE_MS: u64 = 200;

/// Multiplier for coordinator / validator / coder agents
const SPECIALIST_MULTIPLIER: f64 = 1.2;

/// Multiplier for responses under [`FAST_RESPONSE_MS`]
const FAST_MULTIPLIER: f64 = 1.1;

/// Upper bound on the combined agent weight
const MAX_AGENT_WEIGHT: f64 = 2.0;

/// Clamp a score into `[0, 1]`, mapping NaN to zero.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Agent role identifier for participating responders
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Plans and reconciles the work of the other agents
    Coordinator,
    /// Checks outputs for correctness and quality
    Validator,
    /// Writes and edits code
    Coder,
    /// Reads code and data to explain behaviour
    Analyst,
    /// Gathers background and compares options
    Researcher,
    /// Focuses on performance and resource usage
    Optimizer,
    /// Designs structure and module boundaries
    Architect,
    /// Writes and reasons about tests
    Tester,
}

impl AgentType {
    /// Every agent type, in a stable order
    pub fn all() -> &'static [AgentType] {
        &[
            AgentType::Coordinator,
            AgentType::Validator,
            AgentType::Coder,
            AgentType::Analyst,
            AgentType::Researcher,
            AgentType::Optimizer,
            AgentType::Architect,
            AgentType::Tester,
        ]
    }

    /// Whether this role gets the specialist bonus in weighted voting
    pub fn is_specialized(self) -> bool {
        matches!(
            self,
            AgentType::Coordinator | AgentType::Validator | AgentType::Coder
        )
    }

    /// Voting weight for a response from this role.
    ///
    /// Starts at 1.0, rewards specialist roles and fast responses, and never
    /// exceeds 2.0.
    pub fn weight(self, response_time_ms: u64) -> f64 {
        let mut weight = 1.0;
        if self.is_specialized() {
            weight *= SPECIALIST_MULTIPLIER;
        }
        if response_time_ms < FAST_RESPONSE_MS {
            weight *= FAST_MULTIPLIER;
        }
        weight.min(MAX_AGENT_WEIGHT)
    }

    /// Wire name of this role
    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::Coordinator => "coordinator",
            AgentType::Validator => "validator",
            AgentType::Coder => "coder",
            AgentType::Analyst => "analyst",
            AgentType::Researcher => "researcher",
            AgentType::Optimizer => "optimizer",
            AgentType::Architect => "architect",
            AgentType::Tester => "tester",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown agent type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent type: {0}")]
pub struct UnknownAgentType(pub String);

impl FromStr for AgentType {
    type Err = UnknownAgentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        AgentType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or(UnknownAgentType(needle))
    }
}

/// Metadata attached to every agent response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Role of the agent that produced the response
    pub agent_type: AgentType,
    /// Wall-clock time the agent took to answer
    pub response_time_ms: u64,
    /// Free-form agent-specific fields
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One agent's answer to a dispatched request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub agent_id: AgentId,
    pub response: String,
    /// Self-reported confidence, always within `[0, 1]`
    pub confidence: f64,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: ResponseMetadata,
}

impl AgentResponse {
    /// Create a response; confidence is clamped into `[0, 1]`.
    pub fn new(
        agent_id: impl Into<AgentId>,
        agent_type: AgentType,
        response: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            response: response.into(),
            confidence: clamp_unit(confidence),
            reasoning: String::new(),
            timestamp: Utc::now(),
            metadata: ResponseMetadata {
                agent_type,
                response_time_ms: 0,
                extra: BTreeMap::new(),
            },
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_response_time(mut self, response_time_ms: u64) -> Self {
        self.metadata.response_time_ms = response_time_ms;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.extra.insert(key.into(), value);
        self
    }

    pub fn agent_type(&self) -> AgentType {
        self.metadata.agent_type
    }

    /// Role and latency weight used by the weighted and expert algorithms
    pub fn agent_weight(&self) -> f64 {
        self.metadata
            .agent_type
            .weight(self.metadata.response_time_ms)
    }
}

/// Algorithm that produced a consensus result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    /// Confidence × agent weight, synthesizing qualifying responses
    Weighted,
    /// Largest cluster of textually similar responses
    Majority,
    /// High-confidence specialist responses only
    Expert,
    /// Average of weighted and majority at a relaxed threshold
    Hybrid,
}

impl ConsensusMethod {
    /// Trial order used when building consensus
    pub fn trial_order() -> &'static [ConsensusMethod] {
        &[
            ConsensusMethod::Weighted,
            ConsensusMethod::Majority,
            ConsensusMethod::Expert,
            ConsensusMethod::Hybrid,
        ]
    }
}

impl std::fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusMethod::Weighted => write!(f, "weighted"),
            ConsensusMethod::Majority => write!(f, "majority"),
            ConsensusMethod::Expert => write!(f, "expert"),
            ConsensusMethod::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// The single decision reduced from a set of agent responses.
///
/// Never mutated after creation. `confidence` is within `[0, 1]` and
/// `participating_agents` lists every input agent in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResult {
    pub final_response: String,
    pub confidence: f64,
    pub processing_time_ms: f64,
    pub participating_agents: Vec<AgentId>,
    pub consensus_method: ConsensusMethod,
    pub reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specialist_weight_bonus() {
        assert!(AgentType::Coder.weight(1_000) > AgentType::Analyst.weight(1_000));
        assert!((AgentType::Analyst.weight(1_000) - 1.0).abs() < f64::EPSILON);
        assert!((AgentType::Coder.weight(1_000) - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_fast_response_bonus_stacks() {
        assert!((AgentType::Validator.weight(50) - 1.32).abs() < 1e-9);
        assert!((AgentType::Researcher.weight(199) - 1.1).abs() < 1e-9);
        assert!((AgentType::Researcher.weight(200) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weight_never_exceeds_cap() {
        for agent in AgentType::all() {
            assert!(agent.weight(0) <= MAX_AGENT_WEIGHT);
        }
    }

    #[test]
    fn test_agent_type_parse() {
        assert_eq!("Coder".parse::<AgentType>().unwrap(), AgentType::Coder);
        assert_eq!(" tester ".parse::<AgentType>().unwrap(), AgentType::Tester);
        assert!("wizard".parse::<AgentType>().is_err());
    }

    #[test]
    fn test_response_confidence_is_clamped() {
        let high = AgentResponse::new("a", AgentType::Coder, "x", 1.7);
        let low = AgentResponse::new("b", AgentType::Coder, "x", -0.2);
        let nan = AgentResponse::new("c", AgentType::Coder, "x", f64::NAN);
        assert_eq!(high.confidence, 1.0);
        assert_eq!(low.confidence, 0.0);
        assert_eq!(nan.confidence, 0.0);
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let resp = AgentResponse::new("coder-1", AgentType::Coder, "done", 0.9)
            .with_response_time(120)
            .with_extra("model", serde_json::json!("local"));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["agentId"], "coder-1");
        assert_eq!(json["metadata"]["agentType"], "coder");
        assert_eq!(json["metadata"]["responseTimeMs"], 120);
        assert_eq!(json["metadata"]["model"], "local");
    }
}

//! Deterministic local specialists, one per agent role.
//!
//! Each specialist answers from a fixed role profile: a shared scoping
//! clause built from the prompt (so agents on the same request overlap and
//! consensus has something to agree on), the role's own advice, and a note
//! on the supplied code analysis when there is one. Confidence starts at the
//! role's base and rises with every role keyword found in the prompt.

use std::time::Duration;

use async_trait::async_trait;
use coordination::ensemble::{Agent, AgentError, AgentId, AgentReply, AgentRequest, AgentType};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Confidence gained per matched role keyword
const KEYWORD_BONUS: f64 = 0.04;

/// Keyword bonuses stop counting after this many matches
const MAX_KEYWORD_HITS: usize = 2;

/// Ceiling for a specialist's self-reported confidence
const MAX_CONFIDENCE: f64 = 0.95;

/// Words of the prompt quoted in the shared scoping clause
const FOCUS_WORDS: usize = 8;

struct RoleProfile {
    base_confidence: f64,
    keywords: &'static [&'static str],
    advice: &'static str,
}

fn profile(agent_type: AgentType) -> &'static RoleProfile {
    match agent_type {
        AgentType::Coordinator => &RoleProfile {
            base_confidence: 0.78,
            keywords: &["plan", "coordinate", "steps", "migrate"],
            advice: "Sequence the work into small reviewable steps and agree on the order before starting",
        },
        AgentType::Validator => &RoleProfile {
            base_confidence: 0.82,
            keywords: &["review", "security", "audit", "quality", "validate"],
            advice: "Reject the change unless every input is validated at the boundary and failures are reported",
        },
        AgentType::Coder => &RoleProfile {
            base_confidence: 0.84,
            keywords: &["implement", "fix", "code", "refactor", "write"],
            advice: "Keep the change minimal and covered by a focused unit test",
        },
        AgentType::Analyst => &RoleProfile {
            base_confidence: 0.8,
            keywords: &["review", "analyze", "why", "bug", "performance"],
            advice: "Trace the data flow end to end and list the assumptions each step makes",
        },
        AgentType::Researcher => &RoleProfile {
            base_confidence: 0.72,
            keywords: &["compare", "research", "explain", "options", "what"],
            advice: "Compare the established approaches and cite the trade-offs of each",
        },
        AgentType::Optimizer => &RoleProfile {
            base_confidence: 0.8,
            keywords: &["optimize", "slow", "fast", "latency", "memory"],
            advice: "Measure before changing anything and remove allocations from the hot path",
        },
        AgentType::Architect => &RoleProfile {
            base_confidence: 0.79,
            keywords: &["design", "architecture", "module", "structure", "boundary"],
            advice: "Draw the module boundaries first and keep dependencies pointing inward",
        },
        AgentType::Tester => &RoleProfile {
            base_confidence: 0.81,
            keywords: &["test", "coverage", "regression", "assert", "flaky"],
            advice: "Pin the current behaviour with a failing test before touching the code",
        },
    }
}

/// First words of the prompt, lowercased, without trailing punctuation
fn focus(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .take(FOCUS_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', '?', ';', ':', ','])
        .to_lowercase()
}

/// Number of findings in an opaque analysis summary, if it reports any
fn analysis_findings(analysis: &Value) -> Option<usize> {
    ["issues", "findings", "patterns"]
        .iter()
        .find_map(|key| analysis.get(key).and_then(Value::as_array))
        .map(Vec::len)
}

/// Local, deterministic stand-in for one agent role
#[derive(Debug, Clone)]
pub struct SpecialistAgent {
    id: AgentId,
    agent_type: AgentType,
    latency: Duration,
}

impl SpecialistAgent {
    pub fn new(agent_type: AgentType) -> Self {
        Self {
            id: format!("{agent_type}-local"),
            agent_type,
            latency: Duration::ZERO,
        }
    }

    /// Simulated thinking time before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_id(mut self, id: impl Into<AgentId>) -> Self {
        self.id = id.into();
        self
    }

    /// Build the reply without waiting or checking cancellation.
    pub fn answer(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(AgentError::Failed("empty prompt".to_string()));
        }

        let role = profile(self.agent_type);
        let lower = prompt.to_lowercase();
        let matched: Vec<&str> = role
            .keywords
            .iter()
            .copied()
            .filter(|k| lower.contains(k))
            .collect();

        let confidence = (role.base_confidence
            + KEYWORD_BONUS * matched.len().min(MAX_KEYWORD_HITS) as f64)
            .min(MAX_CONFIDENCE);

        let mut response = format!(
            "Scope the work to {}. {}.",
            focus(prompt),
            role.advice
        );
        let findings = request.analysis.as_ref().and_then(analysis_findings);
        if let Some(count) = findings {
            response.push_str(&format!(
                " Resolve the {count} finding(s) reported by the code analysis first."
            ));
        }

        let reasoning = if matched.is_empty() {
            format!("{} perspective; no role keywords matched", self.agent_type)
        } else {
            format!(
                "{} perspective; matched keywords: {}",
                self.agent_type,
                matched.join(", ")
            )
        };

        let mut reply = AgentReply::new(response, confidence).with_reasoning(reasoning);
        reply
            .extra
            .insert("profile".to_string(), json!(self.agent_type.as_str()));
        if let Some(count) = findings {
            reply.extra.insert("analysisFindings".to_string(), json!(count));
        }
        Ok(reply)
    }
}

#[async_trait]
impl Agent for SpecialistAgent {
    fn id(&self) -> AgentId {
        self.id.clone()
    }

    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    async fn respond(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentReply, AgentError> {
        if !self.latency.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(agent_id = %self.id, "Specialist cancelled while thinking");
                    return Err(AgentError::Cancelled);
                }
                _ = tokio::time::sleep(self.latency) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        self.answer(request)
    }
}

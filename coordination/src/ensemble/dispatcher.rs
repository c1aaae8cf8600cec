//! Parallel agent dispatch
//!
//! Fans one request out to a small set of agents, each in its own task and
//! under its own deadline, and collects whatever answers arrive. Agents that
//! fail, panic or time out are dropped and reported; only a dispatch that
//! yields no answer at all is an error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{AgentId, AgentResponse, AgentType};
use crate::config::DispatchConfig;
use crate::events::{AgentFailureReason, CoordinationEvent, Notifier};
use crate::router::task_classifier::{classify_request, AgentSelector, RequestCategory};

/// Work handed to every selected agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: String,
    /// Opaque code-analysis summary, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_analysis(mut self, analysis: Value) -> Self {
        self.analysis = Some(analysis);
        self
    }
}

/// What an agent returns; the dispatcher adds identity and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub response: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl AgentReply {
    pub fn new(response: impl Into<String>, confidence: f64) -> Self {
        Self {
            response: response.into(),
            confidence,
            reasoning: String::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// Error returned by an agent
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("agent failed: {0}")]
    Failed(String),

    #[error("agent cancelled")]
    Cancelled,
}

/// A responder that can answer dispatched requests
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> AgentId;

    fn agent_type(&self) -> AgentType;

    /// Answer `request`. Implementations should stop early once `cancel`
    /// fires; the dispatcher abandons them at the deadline either way.
    async fn respond(
        &self,
        request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentReply, AgentError>;
}

/// Error type for dispatch operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No registered agent matches the selection")]
    NoAgentsAvailable,

    #[error("None of the {attempted} dispatched agents responded")]
    NoResponses { attempted: usize },
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// One agent's fate within a dispatch
enum Outcome {
    Answered(AgentResponse),
    Dropped {
        agent_id: AgentId,
        agent_type: AgentType,
        reason: AgentFailureReason,
        message: String,
    },
}

/// Fans requests out to registered agents
pub struct AgentDispatcher {
    agents: HashMap<AgentType, Arc<dyn Agent>>,
    selector: AgentSelector,
    agent_timeout: Duration,
    notifier: Option<Notifier>,
}

impl AgentDispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            agents: HashMap::new(),
            selector: AgentSelector::new(config.max_agents),
            agent_timeout: config.agent_timeout(),
            notifier: None,
        }
    }

    /// Report dropped agents to `notifier`
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register an agent, replacing any previous agent of the same type
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        let agent_type = agent.agent_type();
        info!(agent_id = %agent.id(), %agent_type, "Registered agent");
        self.agents.insert(agent_type, agent)
    }

    /// Registered agent types in stable order
    pub fn registered_types(&self) -> Vec<AgentType> {
        let mut types: Vec<AgentType> = self.agents.keys().copied().collect();
        types.sort();
        types
    }

    pub fn agent_timeout(&self) -> Duration {
        self.agent_timeout
    }

    /// Agent types that would answer `request`
    pub fn select(&self, request: &AgentRequest, required: Option<&[AgentType]>) -> Vec<AgentType> {
        let wanted = match required {
            Some(types) => self.selector.select_explicit(types),
            None => {
                let category: RequestCategory = classify_request(&request.prompt).category;
                self.selector.select_for_category(category)
            }
        };

        wanted
            .into_iter()
            .filter(|t| {
                let known = self.agents.contains_key(t);
                if !known {
                    warn!(agent_type = %t, "No agent registered for type, skipping");
                }
                known
            })
            .collect()
    }

    /// Run the selected agents concurrently and collect their answers in
    /// completion order.
    pub async fn dispatch(
        &self,
        request: &AgentRequest,
        required: Option<&[AgentType]>,
    ) -> DispatchResult<Vec<AgentResponse>> {
        let selected = self.select(request, required);
        if selected.is_empty() {
            return Err(DispatchError::NoAgentsAvailable);
        }

        let attempted = selected.len();
        let request = Arc::new(request.clone());
        let mut join_set: JoinSet<Outcome> = JoinSet::new();

        for agent_type in selected {
            let Some(agent) = self.agents.get(&agent_type).cloned() else {
                continue;
            };
            let request = request.clone();
            let timeout = self.agent_timeout;
            join_set.spawn(run_agent(agent, request, timeout));
        }

        let mut responses = Vec::with_capacity(attempted);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Outcome::Answered(response)) => {
                    debug!(
                        agent_id = %response.agent_id,
                        confidence = response.confidence,
                        elapsed_ms = response.metadata.response_time_ms,
                        "Agent responded"
                    );
                    responses.push(response);
                }
                Ok(Outcome::Dropped {
                    agent_id,
                    agent_type,
                    reason,
                    message,
                }) => {
                    warn!(%agent_id, %agent_type, %reason, %message, "Agent dropped from dispatch");
                    if let Some(notifier) = &self.notifier {
                        notifier.notify(CoordinationEvent::AgentFailed {
                            agent_id,
                            agent_type,
                            reason,
                            message,
                            timestamp: Utc::now(),
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Agent supervisor task failed");
                }
            }
        }

        info!(attempted, responded = responses.len(), "Dispatch complete");

        if responses.is_empty() {
            return Err(DispatchError::NoResponses { attempted });
        }
        Ok(responses)
    }
}

/// Run one agent in its own task so a panic or overrun stays contained
async fn run_agent(agent: Arc<dyn Agent>, request: Arc<AgentRequest>, timeout: Duration) -> Outcome {
    let agent_id = agent.id();
    let agent_type = agent.agent_type();
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let task_cancel = cancel.child_token();
    let mut task = tokio::spawn(async move { agent.respond(&request, task_cancel).await });

    let dropped = |reason, message: String| Outcome::Dropped {
        agent_id: agent_id.clone(),
        agent_type,
        reason,
        message,
    };

    match tokio::time::timeout(timeout, &mut task).await {
        Err(_) => {
            cancel.cancel();
            task.abort();
            dropped(
                AgentFailureReason::Timeout,
                format!("no response within {}ms", timeout.as_millis()),
            )
        }
        Ok(Err(join_error)) if join_error.is_panic() => {
            dropped(AgentFailureReason::Panicked, "agent task panicked".to_string())
        }
        Ok(Err(join_error)) => dropped(AgentFailureReason::Error, join_error.to_string()),
        Ok(Ok(Err(e))) => dropped(AgentFailureReason::Error, e.to_string()),
        Ok(Ok(Ok(reply))) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let mut response =
                AgentResponse::new(agent_id.clone(), agent_type, reply.response, reply.confidence)
                    .with_reasoning(reply.reasoning)
                    .with_response_time(elapsed_ms);
            response.metadata.extra = reply.extra;
            Outcome::Answered(response)
        }
    }
}

//! Mixture-of-agents service.
//!
//! Composes the two coordination subsystems for one request:
//!
//! ```text
//! pre-hook (agent/pre) ─▶ dispatch ─▶ consensus ─▶ post-hook (agent/post)
//!        │
//!        └─ HOOK_BLOCKED stops the request
//! ```
//!
//! The hook pipeline and the dispatcher share no state; the service is the
//! only place they meet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use coordination::config::ConsensusConfig;
use coordination::ensemble::{
    AgentDispatcher, AgentRequest, AgentResponse, AgentType, ConsensusEngine, ConsensusError,
    ConsensusResult, DispatchError,
};
use coordination::events::{CoordinationEvent, Notifier};
use coordination::hooks::{
    HookErrorCode, HookEvent, HookPhase, HookPipeline, HookPriority, HookResult, HookType,
};
use coordination::router::{classify_request, RequestCategory};
use coordination::CoordinationConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::agents;

/// Operation name carried by the service's hook events
pub const OPERATION: &str = "moa_process";

/// Turnaround budget for dispatch plus consensus
pub const CONSENSUS_BUDGET: Duration = Duration::from_millis(300);

/// Budget for a single agent's answer
pub const AGENT_BUDGET: Duration = Duration::from_millis(200);

/// Budget for one hook event
pub const HOOK_BUDGET: Duration = Duration::from_millis(50);

/// Budget for one critical hook event
pub const CRITICAL_HOOK_BUDGET: Duration = Duration::from_millis(20);

/// Error type for service requests
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("threshold {0} must be within [0, 1]")]
    InvalidThreshold(f64),

    #[error("request blocked by pre-processing hook: {0}")]
    Blocked(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A consensus request as callers submit it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoaRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Explicit agent roles; otherwise chosen from the request category
    #[serde(default)]
    pub agents: Option<Vec<AgentType>>,
    /// Explicit threshold; otherwise taken from config for the category
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Opaque code-analysis summary forwarded to agents
    #[serde(default)]
    pub analysis: Option<Value>,
}

impl MoaRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_agents(mut self, agents: Vec<AgentType>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Everything the service learned while answering one request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoaOutcome {
    pub consensus: ConsensusResult,
    pub category: RequestCategory,
    pub threshold: f64,
    pub responses: Vec<AgentResponse>,
    pub pre_hook: HookResult,
    pub post_hook: HookResult,
    pub total_time_ms: f64,
    pub completed_at: DateTime<Utc>,
}

impl MoaOutcome {
    /// Whether consensus only came from the relaxed fallback
    pub fn is_fallback(&self) -> bool {
        self.consensus.reasoning.starts_with("Fallback")
    }
}

/// Pre-hook → dispatch → consensus → post-hook
pub struct MoaService {
    dispatcher: AgentDispatcher,
    engine: ConsensusEngine,
    pipeline: Arc<HookPipeline>,
    consensus: ConsensusConfig,
    notifier: Option<Notifier>,
}

impl MoaService {
    pub fn new(
        dispatcher: AgentDispatcher,
        pipeline: Arc<HookPipeline>,
        consensus: ConsensusConfig,
    ) -> Self {
        Self {
            dispatcher,
            engine: ConsensusEngine::new(),
            pipeline,
            consensus,
            notifier: None,
        }
    }

    /// Service over the local specialist roster
    pub fn from_config(config: &CoordinationConfig, pipeline: Arc<HookPipeline>) -> Self {
        let mut dispatcher = AgentDispatcher::new(&config.dispatch);
        agents::register_roster(&mut dispatcher, agents::default_roster());
        Self::new(dispatcher, pipeline, config.consensus.clone())
    }

    /// Report consensus outcomes to `notifier`
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn pipeline(&self) -> &Arc<HookPipeline> {
        &self.pipeline
    }

    pub fn dispatcher(&self) -> &AgentDispatcher {
        &self.dispatcher
    }

    /// Answer one request
    pub async fn process(&self, request: MoaRequest) -> ServiceResult<MoaOutcome> {
        let started = Instant::now();

        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(ServiceError::EmptyPrompt);
        }
        if let Some(t) = request.threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(ServiceError::InvalidThreshold(t));
            }
        }

        let category = classify_request(prompt).category;
        let threshold = request
            .threshold
            .unwrap_or_else(|| self.consensus.threshold_for(category));
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| format!("moa-{}", Utc::now().timestamp_millis()));

        debug!(%category, threshold, %session_id, "Processing request");

        let pre_event = HookEvent::new(HookType::Agent, HookPhase::Pre, OPERATION, &session_id)
            .with_operation_type(category.to_string())
            .with_priority(HookPriority::High)
            .with_metadata("prompt", json!(prompt));
        let pre_hook = self.pipeline.process(pre_event).await;
        check_hook_budget("pre", HookPriority::High, &pre_hook);

        if !pre_hook.success {
            if let Some(blocked) = pre_hook
                .errors
                .iter()
                .find(|e| e.code == HookErrorCode::HookBlocked)
            {
                warn!(%session_id, reason = %blocked.message, "Request blocked by pre-hook");
                return Err(ServiceError::Blocked(blocked.message.clone()));
            }
            warn!(
                %session_id,
                errors = pre_hook.errors.len(),
                "Pre-hook failed, continuing without it"
            );
        }

        let mut agent_request = AgentRequest::new(prompt).with_session(&session_id);
        if let Some(analysis) = request.analysis.clone() {
            agent_request = agent_request.with_analysis(analysis);
        }

        let reduce_started = Instant::now();
        let responses = self
            .dispatcher
            .dispatch(&agent_request, request.agents.as_deref())
            .await?;
        for slow in responses
            .iter()
            .filter(|r| Duration::from_millis(r.metadata.response_time_ms) > AGENT_BUDGET)
        {
            warn!(
                agent_id = %slow.agent_id,
                elapsed_ms = slow.metadata.response_time_ms,
                budget_ms = AGENT_BUDGET.as_millis() as u64,
                "Agent exceeded its turnaround budget"
            );
        }

        let consensus = self.engine.build_consensus(&responses, threshold)?;
        let reduce_elapsed = reduce_started.elapsed();
        if reduce_elapsed > CONSENSUS_BUDGET {
            warn!(
                elapsed_ms = reduce_elapsed.as_millis() as u64,
                budget_ms = CONSENSUS_BUDGET.as_millis() as u64,
                "Consensus exceeded its turnaround budget"
            );
        }

        let fallback = consensus.reasoning.starts_with("Fallback");
        if let Some(notifier) = &self.notifier {
            notifier.notify(CoordinationEvent::ConsensusReached {
                method: consensus.consensus_method,
                confidence: consensus.confidence,
                participants: consensus.participating_agents.len(),
                fallback,
                timestamp: Utc::now(),
            });
        }

        let post_event = HookEvent::new(HookType::Agent, HookPhase::Post, OPERATION, &session_id)
            .with_operation_type(category.to_string())
            .with_priority(HookPriority::Low)
            .with_metadata("method", json!(consensus.consensus_method))
            .with_metadata("confidence", json!(consensus.confidence));
        let post_hook = self.pipeline.process(post_event).await;
        check_hook_budget("post", HookPriority::Low, &post_hook);
        if !post_hook.success {
            warn!(%session_id, errors = post_hook.errors.len(), "Post-hook failed");
        }

        info!(
            %category,
            method = %consensus.consensus_method,
            confidence = consensus.confidence,
            agents = responses.len(),
            fallback,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request answered"
        );

        Ok(MoaOutcome {
            consensus,
            category,
            threshold,
            responses,
            pre_hook,
            post_hook,
            total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            completed_at: Utc::now(),
        })
    }
}

fn check_hook_budget(stage: &str, priority: HookPriority, result: &HookResult) {
    let budget = if priority == HookPriority::Critical {
        CRITICAL_HOOK_BUDGET
    } else {
        HOOK_BUDGET
    };
    if result.processing_time_ms > budget.as_secs_f64() * 1000.0 {
        warn!(
            stage,
            elapsed_ms = result.processing_time_ms,
            budget_ms = budget.as_millis() as u64,
            "Hook processing exceeded its budget"
        );
    }
}

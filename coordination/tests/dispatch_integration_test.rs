//! Dispatch → consensus integration tests with mocked agents.
//!
//! Tests verify:
//! - A review request fans out to the requested specialists and reduces
//!   to one decision over every responder
//! - Category-driven selection picks the documented roles
//! - Slow agents are dropped at the deadline without failing the dispatch
//! - Configured per-category thresholds feed consensus

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mockall::mock;
use tokio_util::sync::CancellationToken;

use coordination::config::{CoordinationConfig, DispatchConfig};
use coordination::ensemble::{
    Agent, AgentDispatcher, AgentError, AgentId, AgentReply, AgentRequest, AgentType,
    ConsensusEngine,
};
use coordination::events::{notification_channel, AgentFailureReason, CoordinationEvent};
use coordination::router::{classify_request, RequestCategory};

mock! {
    pub Specialist {}

    #[async_trait]
    impl Agent for Specialist {
        fn id(&self) -> AgentId;
        fn agent_type(&self) -> AgentType;
        async fn respond(
            &self,
            request: &AgentRequest,
            cancel: CancellationToken,
        ) -> Result<AgentReply, AgentError>;
    }
}

/// Mock agent answering `text` with `confidence`
fn specialist(agent_type: AgentType, text: &'static str, confidence: f64) -> Arc<dyn Agent> {
    let mut agent = MockSpecialist::new();
    agent.expect_id().return_const(format!("{agent_type}-1"));
    agent.expect_agent_type().return_const(agent_type);
    agent
        .expect_respond()
        .returning(move |_, _| Ok(AgentReply::new(text, confidence)));
    Arc::new(agent)
}

/// Agent that only answers after `delay`
struct Slow {
    agent_type: AgentType,
    delay: Duration,
}

#[async_trait]
impl Agent for Slow {
    fn id(&self) -> AgentId {
        format!("slow-{}", self.agent_type)
    }

    fn agent_type(&self) -> AgentType {
        self.agent_type
    }

    async fn respond(
        &self,
        _request: &AgentRequest,
        cancel: CancellationToken,
    ) -> Result<AgentReply, AgentError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(AgentReply::new("late answer", 0.99)),
        }
    }
}

fn dispatcher(timeout_ms: u64) -> AgentDispatcher {
    AgentDispatcher::new(&DispatchConfig {
        agent_timeout_ms: timeout_ms,
        max_agents: 4,
    })
}

// ── Scenario: review request ───────────────────────────────────────

#[tokio::test]
async fn test_review_request_end_to_end() {
    let mut d = dispatcher(200);
    d.register(specialist(
        AgentType::Analyst,
        "Validate the token signature before trusting claims. Log failed logins.",
        0.82,
    ));
    d.register(specialist(
        AgentType::Researcher,
        "Validate the token signature before trusting claims. Follow OWASP session guidance.",
        0.74,
    ));
    d.register(specialist(
        AgentType::Coder,
        "Validate the token signature before trusting claims. Hash passwords with argon2.",
        0.88,
    ));

    let request = AgentRequest::new("Review this authentication code for security issues")
        .with_session("session-42");
    let responses = d
        .dispatch(
            &request,
            Some(&[AgentType::Analyst, AgentType::Researcher, AgentType::Coder]),
        )
        .await
        .unwrap();
    assert_eq!(responses.len(), 3);
    assert!(responses
        .iter()
        .all(|r| r.metadata.response_time_ms < 200));

    let result = ConsensusEngine::new().build_consensus(&responses, 0.7).unwrap();
    assert_eq!(result.participating_agents.len(), 3);
    assert!(result.confidence >= 0.7 || result.reasoning.contains("Fallback"));
    assert!((0.0..=1.0).contains(&result.confidence));
}

// ── Selection ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_category_selection_adds_validator_for_review() {
    let mut d = dispatcher(200);
    for agent_type in AgentType::all() {
        d.register(specialist(*agent_type, "Looks fine overall to me.", 0.8));
    }

    let request = AgentRequest::new("Please review the payment module");
    assert_eq!(classify_request(&request.prompt).category, RequestCategory::Review);

    let selected = d.select(&request, None);
    assert_eq!(
        selected,
        vec![AgentType::Analyst, AgentType::Coder, AgentType::Validator]
    );

    let responses = d.dispatch(&request, None).await.unwrap();
    assert_eq!(responses.len(), 3);
}

// ── Deadlines ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_slow_agent_dropped_at_deadline() {
    let (notifier, mut receiver) = notification_channel(8);
    let mut d = dispatcher(50).with_notifier(notifier);
    d.register(specialist(AgentType::Coder, "Inline the helper function.", 0.9));
    d.register(Arc::new(Slow {
        agent_type: AgentType::Architect,
        delay: Duration::from_secs(5),
    }));

    let started = Instant::now();
    let responses = d
        .dispatch(
            &AgentRequest::new("implement the helper"),
            Some(&[AgentType::Coder, AgentType::Architect]),
        )
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].agent_id, "coder-1");

    let events = receiver.drain();
    assert_eq!(events.len(), 1);
    match &events[0] {
        CoordinationEvent::AgentFailed { agent_type, reason, .. } => {
            assert_eq!(*agent_type, AgentType::Architect);
            assert_eq!(*reason, AgentFailureReason::Timeout);
        }
        other => panic!("unexpected notification: {other:?}"),
    }
}

// ── Configuration ──────────────────────────────────────────────────

#[tokio::test]
async fn test_category_threshold_from_config() {
    let config = CoordinationConfig::from_toml_str(
        r#"
        [consensus]
        default_threshold = 0.6

        [consensus.category_thresholds]
        review = 0.9
        "#,
    )
    .unwrap();

    assert!((config.consensus.threshold_for(RequestCategory::Review) - 0.9).abs() < 1e-9);
    assert!((config.consensus.threshold_for(RequestCategory::Debug) - 0.6).abs() < 1e-9);

    let mut d = AgentDispatcher::new(&config.dispatch);
    d.register(specialist(AgentType::Analyst, "alpha beta gamma delta", 0.5));
    d.register(specialist(AgentType::Coder, "epsilon zeta eta theta", 0.55));

    let request = AgentRequest::new("review the parser");
    let category = classify_request(&request.prompt).category;
    let responses = d
        .dispatch(&request, Some(&[AgentType::Analyst, AgentType::Coder]))
        .await
        .unwrap();
    let result = ConsensusEngine::new()
        .build_consensus(&responses, config.consensus.threshold_for(category))
        .unwrap();
    assert!(result.reasoning.starts_with("Fallback:"));
}

//! MoaService integration tests: hooks wrapped around dispatch and consensus.
//!
//! Tests verify:
//! - The review scenario reaches a decision over every requested agent
//! - A blocking pre-hook stops the request before any agent runs
//! - A failing, non-blocking pre-hook does not stop the request
//! - Consensus outcomes are reported on the notification channel
//! - Dispatch failures surface as service errors

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use tokio_util::sync::CancellationToken;

use coordination::config::{DispatchConfig, PipelineConfig};
use coordination::ensemble::{
    Agent, AgentDispatcher, AgentError, AgentId, AgentReply, AgentRequest, AgentType,
};
use coordination::events::{notification_channel, CoordinationEvent};
use coordination::hooks::{
    BuiltinHook, FnHandler, HandlerError, Hook, HookPhase, HookPipeline, HookType,
};
use coordination::CoordinationConfig;
use moa_agents::service::{MoaRequest, MoaService, ServiceError, OPERATION};

mock! {
    pub Responder {}

    #[async_trait]
    impl Agent for Responder {
        fn id(&self) -> AgentId;
        fn agent_type(&self) -> AgentType;
        async fn respond(
            &self,
            request: &AgentRequest,
            cancel: CancellationToken,
        ) -> Result<AgentReply, AgentError>;
    }
}

fn pipeline() -> Arc<HookPipeline> {
    let pipeline = HookPipeline::new(PipelineConfig::default()).shared();
    BuiltinHook::register_all(pipeline.registry()).unwrap();
    pipeline
}

fn pre_hook(id: &str, outcome: Result<(), HandlerError>) -> Hook {
    Hook::new(
        id,
        id,
        HookType::Agent,
        HookPhase::Pre,
        Arc::new(FnHandler::new(move |_| outcome.clone().map(|_| None))),
    )
}

// ── Scenario: review request ───────────────────────────────────────

#[tokio::test]
async fn test_review_scenario_with_local_specialists() {
    let (notifier, mut receiver) = notification_channel(16);
    let service =
        MoaService::from_config(&CoordinationConfig::default(), pipeline()).with_notifier(notifier);

    let outcome = service
        .process(
            MoaRequest::new("Review this authentication code for security issues")
                .with_agents(vec![AgentType::Analyst, AgentType::Researcher, AgentType::Coder])
                .with_threshold(0.7)
                .with_session("session-1"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.consensus.participating_agents.len(), 3);
    assert!(outcome.consensus.confidence >= 0.7 || outcome.is_fallback());
    assert!(outcome.pre_hook.success);
    assert!(outcome.post_hook.success);

    let events = receiver.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        CoordinationEvent::ConsensusReached { participants: 3, .. }
    )));
}

// ── Pre-hook gating ────────────────────────────────────────────────

#[tokio::test]
async fn test_blocking_pre_hook_stops_request() {
    let pipeline = pipeline();
    pipeline
        .registry()
        .register(pre_hook("deny-all", Err(HandlerError::Blocked("maintenance window".into()))))
        .unwrap();

    let mut agent = MockResponder::new();
    agent.expect_id().return_const("coder-1".to_string());
    agent.expect_agent_type().return_const(AgentType::Coder);
    agent.expect_respond().times(0);

    let mut dispatcher = AgentDispatcher::new(&DispatchConfig::default());
    dispatcher.register(Arc::new(agent));
    let service = MoaService::new(dispatcher, pipeline, Default::default());

    let err = service
        .process(MoaRequest::new("implement the cache").with_agents(vec![AgentType::Coder]))
        .await
        .unwrap_err();
    match err {
        ServiceError::Blocked(reason) => assert!(reason.contains("maintenance window")),
        other => panic!("expected Blocked, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failing_pre_hook_is_tolerated() {
    let pipeline = pipeline();
    pipeline
        .registry()
        .register(pre_hook("flaky", Err(HandlerError::Failed("metrics sink down".into()))))
        .unwrap();

    let service = MoaService::from_config(&CoordinationConfig::default(), pipeline);
    let outcome = service
        .process(MoaRequest::new("explain ownership"))
        .await
        .unwrap();
    assert!(!outcome.pre_hook.success);
    assert!(!outcome.consensus.final_response.is_empty());
}

#[tokio::test]
async fn test_bound_hook_sees_service_operation() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let pipeline = pipeline();
    pipeline
        .registry()
        .register(
            Hook::new(
                "bound",
                "bound",
                HookType::Task,
                HookPhase::Post,
                Arc::new(FnHandler::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })),
            )
            .bound_to(OPERATION),
        )
        .unwrap();

    let service = MoaService::from_config(&CoordinationConfig::default(), pipeline);
    service
        .process(MoaRequest::new("design the storage layer"))
        .await
        .unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_all_agents_failing_is_dispatch_error() {
    let mut agent = MockResponder::new();
    agent.expect_id().return_const("tester-1".to_string());
    agent.expect_agent_type().return_const(AgentType::Tester);
    agent
        .expect_respond()
        .returning(|_, _| Err(AgentError::Failed("model offline".into())));

    let mut dispatcher = AgentDispatcher::new(&DispatchConfig::default());
    dispatcher.register(Arc::new(agent));
    let service = MoaService::new(dispatcher, pipeline(), Default::default());

    let err = service
        .process(MoaRequest::new("add tests").with_agents(vec![AgentType::Tester]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Dispatch(_)));
}

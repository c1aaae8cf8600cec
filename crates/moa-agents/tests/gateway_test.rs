//! Gateway integration tests: JSON messages in, JSON messages out.
//!
//! Tests verify:
//! - Each method answers with a `response` carrying the request id
//! - Protocol errors map to the documented codes
//! - Notifications execute without a reply
//! - The line-oriented server handles a full session until EOF

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use coordination::config::PipelineConfig;
use coordination::hooks::{BuiltinHook, HookPipeline};
use coordination::CoordinationConfig;
use moa_agents::gateway::{
    Gateway, GatewayMessage, MessageType, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR, PROCESSING_ERROR,
};
use moa_agents::MoaService;

fn gateway() -> Gateway {
    let pipeline = HookPipeline::new(PipelineConfig::default()).shared();
    BuiltinHook::register_all(pipeline.registry()).unwrap();
    let service = MoaService::from_config(&CoordinationConfig::default(), pipeline);
    Gateway::new(Arc::new(service))
}

async fn call(gateway: &Gateway, id: i64, method: &str, params: Option<Value>) -> GatewayMessage {
    gateway
        .handle(GatewayMessage::request(id, method, params))
        .await
        .expect("requests are always answered")
}

fn error_code(reply: &GatewayMessage) -> Option<i64> {
    reply.error.as_ref().map(|e| e.code)
}

// ── Methods ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ping() {
    let reply = call(&gateway(), 1, "ping", None).await;
    assert_eq!(reply.kind, MessageType::Response);
    assert_eq!(reply.id, Some(json!(1)));
    assert_eq!(reply.result.unwrap()["pong"], true);
}

#[tokio::test]
async fn test_moa_process_with_params() {
    let reply = call(
        &gateway(),
        2,
        "moa_process",
        Some(json!({
            "prompt": "Review this authentication code for security issues",
            "agents": ["analyst", "researcher", "coder"],
            "threshold": 0.7,
            "analysis": { "issues": [{ "rule": "hardcoded-secret" }] }
        })),
    )
    .await;

    assert!(reply.error.is_none(), "{:?}", reply.error);
    let result = reply.result.unwrap();
    let consensus = &result["consensus"];
    assert_eq!(consensus["participatingAgents"].as_array().unwrap().len(), 3);
    let confidence = consensus["confidence"].as_f64().unwrap();
    let reasoning = consensus["reasoning"].as_str().unwrap();
    assert!(confidence >= 0.7 || reasoning.contains("Fallback"));
    assert_eq!(result["category"], "review");
}

#[tokio::test]
async fn test_moa_process_with_command_line() {
    let reply = call(
        &gateway(),
        3,
        "moa_process",
        Some(json!({ "command": "/moa \"optimize the hot loop\" --agents=optimizer,coder" })),
    )
    .await;

    let result = reply.result.unwrap();
    assert_eq!(result["category"], "optimize");
    assert_eq!(
        result["consensus"]["participatingAgents"].as_array().unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_hooks_process_blocks_dangerous_command() {
    let reply = call(
        &gateway(),
        4,
        "hooks_process",
        Some(json!({
            "id": "evt-1",
            "type": "command",
            "phase": "pre",
            "operation": "shell",
            "priority": "critical",
            "context": { "operationType": "shell", "sessionId": "s-1", "command": "rm -rf /" }
        })),
    )
    .await;

    let result = reply.result.unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["errors"][0]["code"], "HOOK_BLOCKED");
    assert_eq!(result["metadata"]["eventId"], "evt-1");
}

#[tokio::test]
async fn test_hooks_process_batch() {
    let event = |id: &str, priority: &str| {
        json!({
            "id": id,
            "type": "file_edit",
            "phase": "pre",
            "operation": "edit",
            "priority": priority,
            "context": { "operationType": "edit", "sessionId": "s-1", "filePath": "src/lib.rs" }
        })
    };
    let reply = call(
        &gateway(),
        5,
        "hooks_process_batch",
        Some(json!({
            "events": [event("a", "low"), { "id": "broken" }, event("c", "critical")]
        })),
    )
    .await;

    let results = reply.result.unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[1]["success"], false);
    assert_eq!(results[1]["errors"][0]["code"], "INVALID_EVENT");
    assert_eq!(results[2]["metadata"]["eventId"], "c");
}

#[tokio::test]
async fn test_hooks_status() {
    let reply = call(&gateway(), 6, "hooks_status", None).await;
    let result = reply.result.unwrap();
    assert_eq!(result["hooks"].as_array().unwrap().len(), 3);
    assert_eq!(result["stats"]["circuitBreaker"]["state"], "closed");
    assert_eq!(result["agents"].as_array().unwrap().len(), 8);
}

// ── Protocol errors ────────────────────────────────────────────────

#[tokio::test]
async fn test_protocol_error_codes() {
    let gw = gateway();

    let parse = gw.handle_line("{not json").await.unwrap();
    assert_eq!(error_code(&parse), Some(PARSE_ERROR));

    let invalid = gw
        .handle_line(r#"{"type":"request","id":9}"#)
        .await
        .unwrap();
    assert_eq!(error_code(&invalid), Some(INVALID_REQUEST));
    assert_eq!(invalid.id, Some(json!(9)));

    let bad_type = gw.handle_line(r#"{"type":"shout","id":10}"#).await.unwrap();
    assert_eq!(error_code(&bad_type), Some(INVALID_REQUEST));

    let unknown = call(&gw, 11, "teleport", None).await;
    assert_eq!(error_code(&unknown), Some(METHOD_NOT_FOUND));

    let no_prompt = call(&gw, 12, "moa_process", Some(json!({ "prompt": "  " }))).await;
    assert_eq!(error_code(&no_prompt), Some(INVALID_PARAMS));

    let no_params = call(&gw, 13, "hooks_process", None).await;
    assert_eq!(error_code(&no_params), Some(INVALID_PARAMS));
}

#[tokio::test]
async fn test_blocked_request_is_processing_error() {
    let pipeline = HookPipeline::new(PipelineConfig::default()).shared();
    pipeline
        .registry()
        .register(coordination::hooks::Hook::new(
            "deny",
            "deny",
            coordination::hooks::HookType::Agent,
            coordination::hooks::HookPhase::Pre,
            Arc::new(coordination::hooks::FnHandler::new(|_| {
                Err(coordination::hooks::HandlerError::Blocked("read-only mode".into()))
            })),
        ))
        .unwrap();
    let gw = Gateway::new(Arc::new(MoaService::from_config(
        &CoordinationConfig::default(),
        pipeline,
    )));

    let reply = call(&gw, 14, "moa_process", Some(json!({ "prompt": "write a parser" }))).await;
    assert_eq!(error_code(&reply), Some(PROCESSING_ERROR));
}

#[tokio::test]
async fn test_notification_is_not_answered() {
    let gw = gateway();
    let reply = gw
        .handle_line(r#"{"type":"notification","method":"ping"}"#)
        .await;
    assert!(reply.is_none());
}

// ── Server loop ────────────────────────────────────────────────────

#[tokio::test]
async fn test_serve_session_until_eof() {
    let input = concat!(
        r#"{"type":"request","id":1,"method":"ping"}"#,
        "\n\n",
        r#"{"type":"notification","method":"ping"}"#,
        "\n",
        r#"{"type":"request","id":2,"method":"nope"}"#,
        "\n",
    );
    let mut output: Vec<u8> = Vec::new();

    gateway()
        .serve(
            BufReader::new(input.as_bytes()),
            &mut output,
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let replies: Vec<GatewayMessage> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].id, Some(json!(1)));
    assert!(replies[0].result.is_some());
    assert_eq!(replies[1].id, Some(json!(2)));
    assert_eq!(error_code(&replies[1]), Some(METHOD_NOT_FOUND));
}

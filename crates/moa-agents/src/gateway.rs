//! JSON message gateway.
//!
//! One JSON object per line in, one per line out:
//!
//! ```text
//! {"type":"request","id":1,"method":"ping"}
//! {"type":"response","id":1,"result":{"pong":true,...}}
//! ```
//!
//! | Method                | Params                         | Result            |
//! |-----------------------|--------------------------------|-------------------|
//! | `moa_process`         | `MoaRequest` or `{command}`    | `MoaOutcome`      |
//! | `hooks_process`       | `HookEvent`                    | `HookResult`      |
//! | `hooks_process_batch` | `[HookEvent]` or `{events}`    | `[HookResult]`    |
//! | `hooks_status`        | none                           | pipeline stats    |
//! | `ping`                | none                           | `{pong, time}`    |
//!
//! Requests of type `notification` are executed but never answered.
//! Coordination notifications are forwarded to the client as
//! `notification` messages with method `coordination_event`.

use std::sync::Arc;

use chrono::Utc;
use coordination::events::{CoordinationEvent, NotificationReceiver};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::ParsedCommand;
use crate::service::{MoaRequest, MoaService, ServiceError};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const PROCESSING_ERROR: i64 = -32000;

/// Method name of forwarded coordination notifications
pub const NOTIFICATION_METHOD: &str = "coordination_event";

/// Kind of gateway message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
}

/// Error payload of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

/// Every message crossing the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl GatewayMessage {
    pub fn request(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            kind: MessageType::Request,
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            kind: MessageType::Response,
            id,
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: &GatewayError) -> Self {
        Self {
            kind: MessageType::Response,
            id,
            method: None,
            params: None,
            result: None,
            error: Some(ErrorBody {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }

    /// Outbound notification wrapping a coordination event
    pub fn notification(event: &CoordinationEvent) -> Self {
        Self {
            kind: MessageType::Notification,
            id: None,
            method: Some(NOTIFICATION_METHOD.to_string()),
            params: serde_json::to_value(event).ok(),
            result: None,
            error: None,
        }
    }
}

/// Error type for gateway requests
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Processing failed: {0}")]
    Processing(String),
}

impl GatewayError {
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => PARSE_ERROR,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::Processing(_) => PROCESSING_ERROR,
        }
    }
}

impl From<ServiceError> for GatewayError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::EmptyPrompt | ServiceError::InvalidThreshold(_) => {
                Self::InvalidParams(e.to_string())
            }
            ServiceError::Blocked(_) | ServiceError::Dispatch(_) | ServiceError::Consensus(_) => {
                Self::Processing(e.to_string())
            }
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Routes gateway messages to the service and the hook pipeline
pub struct Gateway {
    service: Arc<MoaService>,
}

impl Gateway {
    pub fn new(service: Arc<MoaService>) -> Self {
        Self { service }
    }

    /// Handle one raw line; `None` when nothing should be sent back
    pub async fn handle_line(&self, line: &str) -> Option<GatewayMessage> {
        let message = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Unparseable gateway line");
                return Some(GatewayMessage::failure(
                    None,
                    &GatewayError::Parse(e.to_string()),
                ));
            }
        };

        let id = message.get("id").cloned();
        match serde_json::from_value::<GatewayMessage>(message) {
            Ok(message) => self.handle(message).await,
            Err(e) => Some(GatewayMessage::failure(
                id,
                &GatewayError::InvalidRequest(e.to_string()),
            )),
        }
    }

    /// Handle one decoded message
    pub async fn handle(&self, message: GatewayMessage) -> Option<GatewayMessage> {
        let GatewayMessage {
            kind,
            id,
            method,
            params,
            ..
        } = message;

        let Some(method) = method else {
            return Some(GatewayMessage::failure(
                id,
                &GatewayError::InvalidRequest("missing method".to_string()),
            ));
        };

        match kind {
            MessageType::Request => {
                let reply = match self.call(&method, params).await {
                    Ok(result) => GatewayMessage::success(id, result),
                    Err(e) => {
                        warn!(%method, code = e.code(), error = %e, "Gateway request failed");
                        GatewayMessage::failure(id, &e)
                    }
                };
                Some(reply)
            }
            MessageType::Notification => {
                if let Err(e) = self.call(&method, params).await {
                    warn!(%method, error = %e, "Gateway notification failed");
                }
                None
            }
            MessageType::Response => Some(GatewayMessage::failure(
                id,
                &GatewayError::InvalidRequest("clients may not send responses".to_string()),
            )),
        }
    }

    /// Execute `method` with `params`
    pub async fn call(&self, method: &str, params: Option<Value>) -> GatewayResult<Value> {
        debug!(method, "Gateway call");
        match method {
            "moa_process" => self.moa_process(params).await,
            "hooks_process" => {
                let params = params.ok_or_else(|| {
                    GatewayError::InvalidParams("hooks_process requires an event".to_string())
                })?;
                let result = self.service.pipeline().process_json(&params).await;
                to_value(&result)
            }
            "hooks_process_batch" => {
                let events = batch_events(params)?;
                let results = self.service.pipeline().process_batch_json(&events).await;
                to_value(&results)
            }
            "hooks_status" => {
                let pipeline = self.service.pipeline();
                Ok(json!({
                    "stats": pipeline.stats(),
                    "hooks": pipeline.registry().ids(),
                    "agents": self.service.dispatcher().registered_types(),
                }))
            }
            "ping" => Ok(json!({ "pong": true, "time": Utc::now() })),
            other => Err(GatewayError::MethodNotFound(other.to_string())),
        }
    }

    async fn moa_process(&self, params: Option<Value>) -> GatewayResult<Value> {
        let params = params.ok_or_else(|| {
            GatewayError::InvalidParams("moa_process requires a prompt or command".to_string())
        })?;

        let request = match params.get("command").and_then(Value::as_str) {
            Some(line) => {
                let mut command = ParsedCommand::parse(line)
                    .map_err(|e| GatewayError::InvalidParams(e.to_string()))?;
                if let Some(analysis) = params.get("analysis") {
                    command = command.with_context("analysis", analysis.clone());
                }
                command
                    .to_request()
                    .map_err(|e| GatewayError::InvalidParams(e.to_string()))?
            }
            None => serde_json::from_value::<MoaRequest>(params)
                .map_err(|e| GatewayError::InvalidParams(e.to_string()))?,
        };

        let outcome = self.service.process(request).await?;
        to_value(&outcome)
    }

    /// Serve newline-delimited messages until EOF or `shutdown`.
    ///
    /// Notifications from `events` are interleaved with responses.
    pub async fn serve<R, W>(
        &self,
        reader: R,
        mut writer: W,
        mut events: Option<NotificationReceiver>,
        shutdown: CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        info!("Gateway serving");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Gateway shutting down");
                    break;
                }
                event = next_event(&mut events) => {
                    match event {
                        Some(event) => {
                            write_message(&mut writer, &GatewayMessage::notification(&event)).await?;
                        }
                        None => events = None,
                    }
                }
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("Gateway input closed");
                        break;
                    };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(reply) = self.handle_line(line).await {
                        write_message(&mut writer, &reply).await?;
                    }
                }
            }
        }

        writer.flush().await
    }
}

/// Next notification, or never when there is no receiver
async fn next_event(events: &mut Option<NotificationReceiver>) -> Option<CoordinationEvent> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &GatewayMessage,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

fn to_value<T: Serialize>(value: &T) -> GatewayResult<Value> {
    serde_json::to_value(value).map_err(|e| GatewayError::Processing(e.to_string()))
}

/// Batch params are either a bare array or `{ "events": [...] }`
fn batch_events(params: Option<Value>) -> GatewayResult<Vec<Value>> {
    match params {
        Some(Value::Array(events)) => Ok(events),
        Some(Value::Object(mut map)) => match map.remove("events") {
            Some(Value::Array(events)) => Ok(events),
            _ => Err(GatewayError::InvalidParams(
                "expected an `events` array".to_string(),
            )),
        },
        _ => Err(GatewayError::InvalidParams(
            "hooks_process_batch requires an array of events".to_string(),
        )),
    }
}

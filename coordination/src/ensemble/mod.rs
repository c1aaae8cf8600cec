//! Multi-agent consensus module
//!
//! Fans a request out to several specialist agents and reduces their
//! answers to one decision under a confidence threshold.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────────┐
//!                      │   AgentDispatcher    │
//!                      │  • selects 2-4 roles │
//!                      │  • parallel, timed   │
//!                      └──────────┬───────────┘
//!                                 │ Vec<AgentResponse>
//!                                 ▼
//!                      ┌──────────────────────┐
//!                      │   ConsensusEngine    │
//!                      │  weighted → majority │
//!                      │  → expert → hybrid   │
//!                      └──────────┬───────────┘
//!                                 │
//!                                 ▼
//!                          ConsensusResult
//! ```
//!
//! # Components
//!
//! - **AgentDispatcher**: concurrent fan-out with per-agent deadlines
//! - **ConsensusEngine**: four reduction strategies with a relaxed fallback
//! - **synthesis**: deterministic clause-frequency merge and text similarity
//!
//! # Usage
//!
//! ```ignore
//! use coordination::config::DispatchConfig;
//! use coordination::ensemble::{AgentDispatcher, AgentRequest, ConsensusEngine};
//!
//! let mut dispatcher = AgentDispatcher::new(&DispatchConfig::default());
//! dispatcher.register(my_agent);
//!
//! let responses = dispatcher.dispatch(&AgentRequest::new("review auth code"), None).await?;
//! let result = ConsensusEngine::new().build_consensus(&responses, 0.7)?;
//! println!("{} ({:.2})", result.final_response, result.confidence);
//! ```

pub mod dispatcher;
pub mod synthesis;
pub mod types;
pub mod voting;

// Re-export core types
pub use dispatcher::{
    Agent, AgentDispatcher, AgentError, AgentReply, AgentRequest, DispatchError, DispatchResult,
};
pub use synthesis::{similarity, synthesize};
pub use types::{
    AgentId, AgentResponse, AgentType, ConsensusMethod, ConsensusResult, ResponseMetadata,
    UnknownAgentType,
};
pub use voting::{ConsensusEngine, ConsensusError, VotingResult};

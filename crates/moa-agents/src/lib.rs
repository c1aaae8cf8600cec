//! Mixture-of-agents front end for the coordination core.
//!
//! - [`service`]: pre-hook → dispatch → consensus → post-hook
//! - [`gateway`]: newline-delimited JSON message façade
//! - [`command`]: command-line request parsing
//! - [`agents`]: local specialist roster
//! - [`report`]: CLI rendering
//! - [`config`], [`telemetry`]: binary plumbing

pub mod agents;
pub mod command;
pub mod config;
pub mod gateway;
pub mod report;
pub mod service;
pub mod telemetry;

pub use gateway::{Gateway, GatewayMessage};
pub use service::{MoaOutcome, MoaRequest, MoaService};

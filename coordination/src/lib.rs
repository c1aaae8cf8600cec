//! Multi-agent coordination library
//!
//! This library provides:
//! - Parallel dispatch of a request to specialist agents
//! - A consensus engine reducing agent answers to one decision
//! - A latency-bounded hook pipeline wrapping every unit of work in
//!   pre/post processing with caching and fault isolation
//!
//! # Modules
//!
//! - [`ensemble`]: `AgentDispatcher`, `ConsensusEngine`, response types
//! - [`hooks`]: `HookRegistry`, `HookPipeline`, cache, circuit breaker
//! - [`router`]: request classification and agent selection
//! - [`events`]: single-consumer notification channel
//! - [`config`]: TOML + environment configuration
//!
//! The two subsystems share no mutable state; callers compose them.

pub mod config;
pub mod ensemble;
pub mod events;
pub mod hooks;
pub mod router;

pub use config::CoordinationConfig;

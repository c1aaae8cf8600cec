//! Coordination notifications
//!
//! Agent failures, hook timeouts, breaker transitions and consensus outcomes
//! flow through one bounded channel to a single consumer.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Dispatcher  │────▶│              │     │              │
//! ├──────────────┤     │   Notifier   │────▶│   Receiver   │
//! │ HookPipeline │────▶│  (try_send)  │     │   (recv)     │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{notification_channel, NotificationReceiver, Notifier, CHANNEL_CAPACITY};
pub use types::{AgentFailureReason, CoordinationEvent};

//! Request Router Module
//!
//! Routes requests to agent roles based on the inferred category.
//!
//! # Selection Strategy
//!
//! ```text
//! Category   | Base agents                     | Extra
//! -----------|---------------------------------|------------------
//! review     | analyst, coder                  | + validator
//! optimize   | optimizer, coder, analyst       | + coordinator
//! debug      | coder, analyst, tester          | + coordinator
//! test       | tester, coder                   | + validator
//! design     | architect, analyst, researcher  | + coordinator
//! implement  | coder, architect                | -
//! research   | researcher, analyst             | -
//! general    | researcher, coder               | -
//! ```

pub mod task_classifier;

pub use task_classifier::{
    classify_request, AgentSelector, CategoryClassification, RequestCategory, MAX_SELECTED_AGENTS,
};

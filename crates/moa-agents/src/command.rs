//! Command-line style request parsing.
//!
//! Turns input such as
//!
//! ```text
//! /moa "review the auth module" --agents=analyst,coder --threshold=0.8
//! ```
//!
//! into a [`ParsedCommand`]. Quoting follows POSIX shell rules via `shlex`.
//! `--key=value` sets a flag, a bare `--key` sets it to `"true"`, and every
//! other token after the name is a positional argument.

use std::collections::BTreeMap;

use coordination::ensemble::AgentType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::service::MoaRequest;

/// Errors produced while parsing a command line
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unbalanced quotes in command")]
    UnbalancedQuotes,

    #[error("invalid --{flag} value {value:?}: {reason}")]
    InvalidFlag {
        flag: String,
        value: String,
        reason: String,
    },
}

pub type CommandResult<T> = Result<T, CommandError>;

/// A command split into name, positional arguments and flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
    pub flags: BTreeMap<String, String>,
    /// Caller-supplied context, passed through to agents
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl ParsedCommand {
    /// Parse a command line. A leading `/` on the name is dropped.
    pub fn parse(input: &str) -> CommandResult<Self> {
        let tokens = shlex::split(input).ok_or(CommandError::UnbalancedQuotes)?;
        let mut tokens = tokens.into_iter();

        let name = tokens
            .next()
            .map(|n| n.trim_start_matches('/').to_string())
            .filter(|n| !n.is_empty())
            .ok_or(CommandError::Empty)?;

        Ok(Self::from_tokens(name, tokens))
    }

    /// Build from tokens that were already split, e.g. by the OS shell
    pub fn from_tokens<I>(name: impl Into<String>, tokens: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut command = Self {
            name: name.into(),
            ..Self::default()
        };

        for token in tokens {
            match token.strip_prefix("--") {
                Some(flag) if !flag.is_empty() => {
                    let (key, value) = flag.split_once('=').unwrap_or((flag, "true"));
                    command.flags.insert(key.to_string(), value.to_string());
                }
                _ => command.args.push(token),
            }
        }

        command
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Positional arguments joined back into a prompt
    pub fn prompt(&self) -> String {
        self.args.join(" ")
    }

    pub fn flag(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }

    /// Agent types requested with `--agents=a,b`
    pub fn agents(&self) -> CommandResult<Option<Vec<AgentType>>> {
        let Some(raw) = self.flag("agents") else {
            return Ok(None);
        };
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<AgentType>().map_err(|e| CommandError::InvalidFlag {
                    flag: "agents".to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<CommandResult<Vec<_>>>()
            .map(|types| (!types.is_empty()).then_some(types))
    }

    /// Consensus threshold requested with `--threshold=0.8`
    pub fn threshold(&self) -> CommandResult<Option<f64>> {
        let Some(raw) = self.flag("threshold") else {
            return Ok(None);
        };
        let invalid = |reason: &str| CommandError::InvalidFlag {
            flag: "threshold".to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };
        let value: f64 = raw.parse().map_err(|_| invalid("not a number"))?;
        if !(0.0..=1.0).contains(&value) {
            return Err(invalid("must be within [0, 1]"));
        }
        Ok(Some(value))
    }

    /// Service request carrying the prompt, flags and any `analysis` context
    pub fn to_request(&self) -> CommandResult<MoaRequest> {
        Ok(MoaRequest {
            prompt: self.prompt(),
            session_id: self.flag("session").map(str::to_string),
            agents: self.agents()?,
            threshold: self.threshold()?,
            analysis: self.context.get("analysis").cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_args_and_flags() {
        let cmd = ParsedCommand::parse(
            r#"/moa "review the auth module" now --agents=analyst,coder --threshold=0.8 --verbose"#,
        )
        .unwrap();
        assert_eq!(cmd.name, "moa");
        assert_eq!(cmd.args, vec!["review the auth module", "now"]);
        assert_eq!(cmd.prompt(), "review the auth module now");
        assert_eq!(cmd.flag("verbose"), Some("true"));
        assert_eq!(
            cmd.agents().unwrap(),
            Some(vec![AgentType::Analyst, AgentType::Coder])
        );
        assert_eq!(cmd.threshold().unwrap(), Some(0.8));
    }

    #[test]
    fn test_missing_flags_are_none() {
        let cmd = ParsedCommand::parse("ask why").unwrap();
        assert_eq!(cmd.agents().unwrap(), None);
        assert_eq!(cmd.threshold().unwrap(), None);
    }

    #[test]
    fn test_from_tokens_to_request() {
        let tokens = ["review", "auth", "--agents=validator", "--session=s-9"]
            .map(String::from);
        let request = ParsedCommand::from_tokens("ask", tokens)
            .with_context("analysis", serde_json::json!({ "issues": [] }))
            .to_request()
            .unwrap();
        assert_eq!(request.prompt, "review auth");
        assert_eq!(request.session_id.as_deref(), Some("s-9"));
        assert_eq!(request.agents, Some(vec![AgentType::Validator]));
        assert_eq!(request.threshold, None);
        assert!(request.analysis.is_some());
    }

    #[test]
    fn test_errors() {
        assert_eq!(ParsedCommand::parse("   "), Err(CommandError::Empty));
        assert_eq!(ParsedCommand::parse("/"), Err(CommandError::Empty));
        assert_eq!(
            ParsedCommand::parse(r#"moa "unterminated"#),
            Err(CommandError::UnbalancedQuotes)
        );

        let cmd = ParsedCommand::parse("moa x --agents=coder,wizard --threshold=1.5").unwrap();
        assert!(matches!(cmd.agents(), Err(CommandError::InvalidFlag { .. })));
        assert!(matches!(cmd.threshold(), Err(CommandError::InvalidFlag { .. })));
    }
}

//! Plain-text rendering for the CLI.

use std::fmt::Write as _;

use coordination::hooks::{HookErrorCode, HookResult};

use crate::service::MoaOutcome;

/// What to try when a hook reports `code`
pub fn remediation(code: HookErrorCode) -> &'static str {
    match code {
        HookErrorCode::HookTimeout => {
            "raise the hook timeout or hooks.budgets for this priority, or make the hook cheaper"
        }
        HookErrorCode::HookFailed => "check the hook's logs; enable fallback if the hook is optional",
        HookErrorCode::HookBlocked => "the operation was refused; change the command or path",
        HookErrorCode::HookPanicked => "the hook handler has a bug; disable it until fixed",
        HookErrorCode::DependencyFailed => "fix the failing dependency hook first",
        HookErrorCode::InvalidEvent => {
            "supply operation, context.operationType and context.sessionId"
        }
    }
}

/// One `error:` line plus a `hint:` line per hook error
pub fn render_hook_errors(stage: &str, result: &HookResult) -> String {
    let mut out = String::new();
    for error in &result.errors {
        let _ = writeln!(out, "error: {stage} hook {}: {}", error.code, error.message);
        let _ = writeln!(out, "  hint: {}", remediation(error.code));
    }
    out
}

/// Human-readable summary of an answered request
pub fn render_outcome(outcome: &MoaOutcome) -> String {
    let c = &outcome.consensus;
    let mut out = String::new();

    let _ = writeln!(out, "{}", c.final_response);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "method: {}  confidence: {:.2}  threshold: {:.2}  category: {}",
        c.consensus_method, c.confidence, outcome.threshold, outcome.category
    );
    let _ = writeln!(out, "agents: {}", c.participating_agents.join(", "));
    let _ = writeln!(out, "reasoning: {}", c.reasoning);
    let _ = writeln!(out, "time: {:.1}ms", outcome.total_time_ms);

    if !outcome.pre_hook.success {
        out.push_str(&render_hook_errors("pre", &outcome.pre_hook));
    }
    if !outcome.post_hook.success {
        out.push_str(&render_hook_errors("post", &outcome.post_hook));
    }
    out
}

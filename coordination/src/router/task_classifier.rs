//! Request classification and agent selection
//!
//! Infers a [`RequestCategory`] from a free-form prompt and maps it to the
//! agent roles that should answer it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ensemble::types::AgentType;

/// Hard cap on agents selected for one dispatch
pub const MAX_SELECTED_AGENTS: usize = 4;

/// Category of an incoming request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCategory {
    /// Audit existing work for problems
    Review,
    /// Make something faster or leaner
    Optimize,
    /// Track down and fix a defect
    Debug,
    /// Write or extend tests
    Test,
    /// Shape modules and boundaries
    Design,
    /// Produce new functionality
    Implement,
    /// Explain or compare
    Research,
    /// Nothing more specific matched
    General,
}

impl RequestCategory {
    /// Every category in classification priority order
    pub fn all() -> &'static [RequestCategory] {
        &[
            Self::Review,
            Self::Optimize,
            Self::Debug,
            Self::Test,
            Self::Design,
            Self::Implement,
            Self::Research,
            Self::General,
        ]
    }

    /// Trigger words. A trailing `*` matches any word with that prefix.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Review => &["review*", "audit*", "inspect*", "check*", "quality", "security"],
            Self::Optimize => &[
                "optimi*", "performance", "speed*", "faster", "slow*", "latency", "efficien*",
            ],
            Self::Debug => &["debug*", "fix", "fixes", "bug*", "error*", "crash*", "panic*", "broken"],
            Self::Test => &["test*", "coverage", "assert*", "spec"],
            Self::Design => &["design*", "architect*", "structure*", "refactor*", "pattern*"],
            Self::Implement => &["implement*", "create", "build", "add", "write", "generate*"],
            Self::Research => &["explain*", "research*", "compare*", "what", "why", "how"],
            Self::General => &[],
        }
    }

    /// Agent roles that always answer this category
    pub fn base_agents(self) -> &'static [AgentType] {
        use AgentType::*;
        match self {
            Self::Review => &[Analyst, Coder],
            Self::Optimize => &[Optimizer, Coder, Analyst],
            Self::Debug => &[Coder, Analyst, Tester],
            Self::Test => &[Tester, Coder],
            Self::Design => &[Architect, Analyst, Researcher],
            Self::Implement => &[Coder, Architect],
            Self::Research => &[Researcher, Analyst],
            Self::General => &[Researcher, Coder],
        }
    }

    /// Whether answers in this category need a validator
    pub fn has_review_concern(self) -> bool {
        matches!(self, Self::Review | Self::Test)
    }

    /// Consensus threshold used when the caller does not give one
    pub fn default_threshold(self) -> f64 {
        match self {
            Self::Review => 0.80,
            Self::Debug | Self::Test => 0.75,
            Self::Optimize | Self::Design | Self::Implement => 0.70,
            Self::Research => 0.65,
            Self::General => 0.60,
        }
    }
}

impl std::fmt::Display for RequestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Review => write!(f, "review"),
            Self::Optimize => write!(f, "optimize"),
            Self::Debug => write!(f, "debug"),
            Self::Test => write!(f, "test"),
            Self::Design => write!(f, "design"),
            Self::Implement => write!(f, "implement"),
            Self::Research => write!(f, "research"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Request classification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryClassification {
    pub category: RequestCategory,
    /// Keywords that matched for the winning category
    pub keywords: Vec<String>,
    /// Hit count per category, zero counts omitted
    pub scores: BTreeMap<RequestCategory, usize>,
}

fn keyword_matches(keyword: &str, word: &str) -> bool {
    match keyword.strip_suffix('*') {
        Some(prefix) => word.starts_with(prefix),
        None => word == keyword,
    }
}

/// Classify a prompt by counting keyword hits per category.
///
/// The category with the most hits wins; ties go to the earlier entry in
/// [`RequestCategory::all`]. No hits at all yields `General`.
pub fn classify_request(prompt: &str) -> CategoryClassification {
    let lower = prompt.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut scores = BTreeMap::new();
    let mut best = (RequestCategory::General, 0usize, Vec::new());

    for &category in RequestCategory::all() {
        let hits: Vec<String> = words
            .iter()
            .filter(|w| category.keywords().iter().any(|k| keyword_matches(k, w)))
            .map(|w| w.to_string())
            .collect();

        if hits.is_empty() {
            continue;
        }
        scores.insert(category, hits.len());
        if hits.len() > best.1 {
            best = (category, hits.len(), hits);
        }
    }

    let (category, _, keywords) = best;
    debug!(%category, ?scores, "Classified request");

    CategoryClassification {
        category,
        keywords,
        scores,
    }
}

/// Picks the agent roles that answer a request
#[derive(Debug, Clone)]
pub struct AgentSelector {
    max_agents: usize,
}

impl Default for AgentSelector {
    fn default() -> Self {
        Self::new(MAX_SELECTED_AGENTS)
    }
}

impl AgentSelector {
    /// Create a selector; `max_agents` is clamped to `1..=4`
    pub fn new(max_agents: usize) -> Self {
        Self {
            max_agents: max_agents.clamp(1, MAX_SELECTED_AGENTS),
        }
    }

    pub fn max_agents(&self) -> usize {
        self.max_agents
    }

    /// Default policy: base agents for the category, plus a coordinator
    /// when more than two are selected, plus a validator for review-type
    /// work, capped.
    pub fn select_for_category(&self, category: RequestCategory) -> Vec<AgentType> {
        let mut agents: Vec<AgentType> = category.base_agents().to_vec();

        if agents.len() > 2 {
            agents.push(AgentType::Coordinator);
        }
        if category.has_review_concern() {
            agents.push(AgentType::Validator);
        }

        self.cap(agents)
    }

    /// Classify `prompt` and apply the default policy
    pub fn select_for_prompt(&self, prompt: &str) -> (RequestCategory, Vec<AgentType>) {
        let category = classify_request(prompt).category;
        (category, self.select_for_category(category))
    }

    /// Caller-supplied roles, de-duplicated (first wins) and capped
    pub fn select_explicit(&self, requested: &[AgentType]) -> Vec<AgentType> {
        self.cap(requested.to_vec())
    }

    fn cap(&self, agents: Vec<AgentType>) -> Vec<AgentType> {
        let mut seen = Vec::with_capacity(agents.len());
        for agent in agents {
            if !seen.contains(&agent) {
                seen.push(agent);
            }
        }
        seen.truncate(self.max_agents);
        seen
    }
}

//! Consensus engine for multi-agent responses
//!
//! Reduces a set of [`AgentResponse`]s to one [`ConsensusResult`]. Four
//! strategies are tried in a fixed order (weighted, majority, expert, hybrid)
//! and the most confident one that clears the threshold wins. When none
//! does, the weighted strategy is re-run at half the threshold so callers
//! always get an answer.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::synthesis::{similarity, synthesize};
use super::types::{clamp_unit, AgentResponse, ConsensusMethod, ConsensusResult};

/// Error type for consensus operations
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("No responses available for consensus")]
    NoResponses,

    #[error("{method} consensus below threshold: {confidence:.3} < {threshold:.3}")]
    BelowThreshold {
        method: ConsensusMethod,
        confidence: f64,
        threshold: f64,
    },

    #[error("No expert responses qualified")]
    NoExperts,
}

/// Result type for consensus operations
pub type VotingResult<T> = Result<T, ConsensusError>;

/// Token overlap above which two responses count as the same answer
pub const SIMILARITY_THRESHOLD: f64 = 0.7;

/// Minimum agent weight for the expert strategy
pub const EXPERT_MIN_WEIGHT: f64 = 0.8;

/// Minimum confidence for the expert strategy
pub const EXPERT_MIN_CONFIDENCE: f64 = 0.85;

/// Hybrid evaluates its two halves at this fraction of the threshold
const HYBRID_RELAXATION: f64 = 0.8;

/// Fallback weighted pass runs at this fraction of the threshold
const FALLBACK_RELAXATION: f64 = 0.5;

/// Output of a single strategy before timing and participants are attached
#[derive(Debug, Clone)]
struct Verdict {
    text: String,
    confidence: f64,
    method: ConsensusMethod,
    reasoning: String,
}

/// First response with the highest score; earlier entries win ties.
fn strongest<'a, I>(scored: I) -> Option<(&'a AgentResponse, f64)>
where
    I: IntoIterator<Item = (&'a AgentResponse, f64)>,
{
    scored.into_iter().fold(None, |best, (resp, score)| match best {
        Some((_, best_score)) if best_score >= score => best,
        _ => Some((resp, score)),
    })
}

fn mean_confidence(responses: &[&AgentResponse]) -> f64 {
    if responses.is_empty() {
        return 0.0;
    }
    responses.iter().map(|r| r.confidence).sum::<f64>() / responses.len() as f64
}

/// Stateless reducer from agent responses to a single decision
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    similarity_threshold: f64,
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsensusEngine {
    /// Create an engine with the standard similarity cut-off
    pub fn new() -> Self {
        Self {
            similarity_threshold: SIMILARITY_THRESHOLD,
        }
    }

    /// Override the majority grouping similarity cut-off
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = clamp_unit(threshold);
        self
    }

    /// Build consensus from `responses` under `threshold`.
    ///
    /// Fails only when `responses` is empty. Threshold is clamped to
    /// `[0, 1]`; a single response is returned verbatim.
    pub fn build_consensus(
        &self,
        responses: &[AgentResponse],
        threshold: f64,
    ) -> VotingResult<ConsensusResult> {
        let start = Instant::now();

        if responses.is_empty() {
            return Err(ConsensusError::NoResponses);
        }

        let threshold = clamp_unit(threshold);

        let verdict = if let [only] = responses {
            Verdict {
                text: only.response.clone(),
                confidence: only.confidence,
                method: ConsensusMethod::Weighted,
                reasoning: "no consensus needed".to_string(),
            }
        } else {
            self.best_of(responses, threshold)?
        };

        Ok(Self::finish(start, responses, verdict))
    }

    /// Run one strategy on its own, without the trial loop or fallback.
    pub fn evaluate(
        &self,
        method: ConsensusMethod,
        responses: &[AgentResponse],
        threshold: f64,
    ) -> VotingResult<ConsensusResult> {
        let start = Instant::now();

        if responses.is_empty() {
            return Err(ConsensusError::NoResponses);
        }

        let verdict = self.run(method, responses, clamp_unit(threshold))?;
        Ok(Self::finish(start, responses, verdict))
    }

    fn finish(start: Instant, responses: &[AgentResponse], verdict: Verdict) -> ConsensusResult {
        ConsensusResult {
            final_response: verdict.text,
            confidence: clamp_unit(verdict.confidence),
            processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            participating_agents: responses.iter().map(|r| r.agent_id.clone()).collect(),
            consensus_method: verdict.method,
            reasoning: verdict.reasoning,
        }
    }

    fn run(
        &self,
        method: ConsensusMethod,
        responses: &[AgentResponse],
        threshold: f64,
    ) -> VotingResult<Verdict> {
        match method {
            ConsensusMethod::Weighted => self.weighted(responses, threshold),
            ConsensusMethod::Majority => self.majority(responses, threshold),
            ConsensusMethod::Expert => self.expert(responses, threshold),
            ConsensusMethod::Hybrid => self.hybrid(responses, threshold),
        }
    }

    /// Trial loop: best qualifying strategy, else relaxed weighted fallback
    fn best_of(&self, responses: &[AgentResponse], threshold: f64) -> VotingResult<Verdict> {
        let mut best: Option<Verdict> = None;

        for &method in ConsensusMethod::trial_order() {
            match self.run(method, responses, threshold) {
                Ok(verdict) if verdict.confidence >= threshold => {
                    debug!(%method, confidence = verdict.confidence, "Strategy qualified");
                    let better = best
                        .as_ref()
                        .map_or(true, |b| verdict.confidence > b.confidence);
                    if better {
                        best = Some(verdict);
                    }
                }
                Ok(verdict) => {
                    debug!(
                        %method,
                        confidence = verdict.confidence,
                        threshold,
                        "Strategy below threshold"
                    );
                }
                Err(e) => {
                    debug!(%method, error = %e, "Strategy skipped");
                }
            }
        }

        if let Some(verdict) = best {
            info!(
                method = %verdict.method,
                confidence = verdict.confidence,
                responses = responses.len(),
                "Consensus reached"
            );
            return Ok(verdict);
        }

        let relaxed = threshold * FALLBACK_RELAXATION;
        warn!(
            threshold,
            relaxed,
            responses = responses.len(),
            "No strategy reached threshold, using relaxed weighted fallback"
        );

        let mut verdict = self.weighted(responses, relaxed)?;
        verdict.reasoning = format!(
            "Fallback: no consensus algorithm reached threshold {threshold:.2}; \
             relaxed weighted consensus at {relaxed:.2}. {}",
            verdict.reasoning
        );
        Ok(verdict)
    }

    /// Weighted strategy - confidence × agent weight, synthesizing qualifiers
    fn weighted(&self, responses: &[AgentResponse], threshold: f64) -> VotingResult<Verdict> {
        let scored: Vec<(&AgentResponse, f64)> = responses
            .iter()
            .map(|r| (r, r.confidence * r.agent_weight()))
            .collect();

        let qualifying: Vec<(&AgentResponse, f64)> = scored
            .iter()
            .copied()
            .filter(|(_, weight)| *weight >= threshold)
            .collect();

        let verdict = match qualifying.as_slice() {
            [] => {
                let (resp, weight) =
                    strongest(scored.iter().copied()).ok_or(ConsensusError::NoResponses)?;
                Verdict {
                    text: resp.response.clone(),
                    confidence: resp.confidence,
                    method: ConsensusMethod::Weighted,
                    reasoning: format!(
                        "Below threshold: no response reached weight {threshold:.2}; \
                         returning highest-weight response from {} (weight {weight:.2})",
                        resp.agent_id
                    ),
                }
            }
            [(resp, weight)] => Verdict {
                text: resp.response.clone(),
                confidence: resp.confidence,
                method: ConsensusMethod::Weighted,
                reasoning: format!(
                    "Single qualifying response from {} (weight {weight:.2})",
                    resp.agent_id
                ),
            },
            many => {
                let total_weight: f64 = many.iter().map(|(r, _)| r.agent_weight()).sum();
                let confidence = many
                    .iter()
                    .map(|(r, _)| r.confidence * r.agent_weight())
                    .sum::<f64>()
                    / total_weight;

                let text = synthesize(many.iter().map(|(r, _)| r.response.as_str()))
                    .or_else(|| strongest(many.iter().copied()).map(|(r, _)| r.response.clone()))
                    .unwrap_or_default();

                Verdict {
                    text,
                    confidence,
                    method: ConsensusMethod::Weighted,
                    reasoning: format!(
                        "Synthesized {} of {} responses with weight >= {threshold:.2}",
                        many.len(),
                        responses.len()
                    ),
                }
            }
        };
        Ok(verdict)
    }

    /// Majority strategy - largest cluster of similar responses
    fn majority(&self, responses: &[AgentResponse], threshold: f64) -> VotingResult<Verdict> {
        let mut groups: Vec<Vec<&AgentResponse>> = Vec::new();

        for resp in responses {
            let home = groups.iter_mut().find(|group| {
                similarity(&group[0].response, &resp.response) > self.similarity_threshold
            });
            match home {
                Some(group) => group.push(resp),
                None => groups.push(vec![resp]),
            }
        }

        let largest = groups
            .iter()
            .fold(None::<&Vec<&AgentResponse>>, |best, group| match best {
                Some(b) if b.len() >= group.len() => Some(b),
                _ => Some(group),
            })
            .ok_or(ConsensusError::NoResponses)?;

        let ratio = largest.len() as f64 / responses.len() as f64;
        let confidence = ratio * mean_confidence(largest);

        if confidence < threshold {
            return Err(ConsensusError::BelowThreshold {
                method: ConsensusMethod::Majority,
                confidence,
                threshold,
            });
        }

        let (winner, _) = strongest(largest.iter().map(|r| (*r, r.confidence)))
            .ok_or(ConsensusError::NoResponses)?;

        Ok(Verdict {
            text: winner.response.clone(),
            confidence,
            method: ConsensusMethod::Majority,
            reasoning: format!(
                "{} of {} responses agree ({} groups, similarity > {:.2})",
                largest.len(),
                responses.len(),
                groups.len(),
                self.similarity_threshold
            ),
        })
    }

    /// Expert strategy - trusted, highly confident responses only
    fn expert(&self, responses: &[AgentResponse], threshold: f64) -> VotingResult<Verdict> {
        let experts: Vec<&AgentResponse> = responses
            .iter()
            .filter(|r| r.agent_weight() > EXPERT_MIN_WEIGHT && r.confidence > EXPERT_MIN_CONFIDENCE)
            .collect();

        if experts.is_empty() {
            return Err(ConsensusError::NoExperts);
        }

        let confidence = mean_confidence(&experts);
        if confidence < threshold {
            return Err(ConsensusError::BelowThreshold {
                method: ConsensusMethod::Expert,
                confidence,
                threshold,
            });
        }

        let (lead, _) = strongest(experts.iter().map(|r| (*r, r.confidence)))
            .ok_or(ConsensusError::NoExperts)?;

        let agree = experts
            .iter()
            .all(|r| similarity(&lead.response, &r.response) > self.similarity_threshold);

        let text = if agree {
            lead.response.clone()
        } else {
            synthesize(experts.iter().map(|r| r.response.as_str()))
                .unwrap_or_else(|| lead.response.clone())
        };

        Ok(Verdict {
            text,
            confidence,
            method: ConsensusMethod::Expert,
            reasoning: format!(
                "{} expert response(s) above confidence {EXPERT_MIN_CONFIDENCE:.2}, led by {}",
                experts.len(),
                lead.agent_id
            ),
        })
    }

    /// Hybrid strategy - weighted and majority at a relaxed threshold, averaged
    fn hybrid(&self, responses: &[AgentResponse], threshold: f64) -> VotingResult<Verdict> {
        let relaxed = threshold * HYBRID_RELAXATION;
        let weighted = self.weighted(responses, relaxed)?;
        let majority = self.majority(responses, relaxed)?;

        let confidence = (weighted.confidence + majority.confidence) / 2.0;
        if confidence < threshold {
            return Err(ConsensusError::BelowThreshold {
                method: ConsensusMethod::Hybrid,
                confidence,
                threshold,
            });
        }

        let text = if weighted.text == majority.text {
            weighted.text
        } else {
            synthesize([weighted.text.as_str(), majority.text.as_str()])
                .unwrap_or_else(|| format!("{}\n\n{}", weighted.text, majority.text))
        };

        Ok(Verdict {
            text,
            confidence,
            method: ConsensusMethod::Hybrid,
            reasoning: format!(
                "Averaged weighted ({:.2}) and majority ({:.2}) at relaxed threshold {relaxed:.2}",
                weighted.confidence, majority.confidence
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::types::AgentType;

    fn resp(id: &str, agent: AgentType, text: &str, confidence: f64) -> AgentResponse {
        AgentResponse::new(id, agent, text, confidence).with_response_time(500)
    }

    #[test]
    fn test_empty_responses_error() {
        let engine = ConsensusEngine::new();
        let result = engine.build_consensus(&[], 0.7);
        assert!(matches!(result, Err(ConsensusError::NoResponses)));
    }

    #[test]
    fn test_weighted_strategy_rejects_empty_input() {
        let engine = ConsensusEngine::new();
        assert!(matches!(engine.weighted(&[], 0.5), Err(ConsensusError::NoResponses)));
        assert!(matches!(engine.hybrid(&[], 0.5), Err(ConsensusError::NoResponses)));
    }

    #[test]
    fn test_single_response_verbatim() {
        let engine = ConsensusEngine::new();
        let only = resp("a", AgentType::Analyst, "Exactly this answer.", 0.42);
        let result = engine.build_consensus(&[only], 0.9).unwrap();
        assert_eq!(result.final_response, "Exactly this answer.");
        assert_eq!(result.confidence, 0.42);
        assert_eq!(result.consensus_method, ConsensusMethod::Weighted);
        assert_eq!(result.reasoning, "no consensus needed");
        assert_eq!(result.participating_agents, vec!["a".to_string()]);
    }

    #[test]
    fn test_weighted_prefers_specialists() {
        let engine = ConsensusEngine::new();
        // coder: 0.7 * 1.2 = 0.84 qualifies; analyst: 0.75 * 1.0 does not
        let responses = vec![
            resp("analyst", AgentType::Analyst, "Split the module in two.", 0.75),
            resp("coder", AgentType::Coder, "Inline the helper function.", 0.7),
        ];
        let result = engine
            .evaluate(ConsensusMethod::Weighted, &responses, 0.8)
            .unwrap();
        assert_eq!(result.final_response, "Inline the helper function.");
        assert!(result.reasoning.contains("coder"));
    }

    #[test]
    fn test_weighted_below_threshold_note() {
        let engine = ConsensusEngine::new();
        let responses = vec![
            resp("a", AgentType::Analyst, "Answer one is here.", 0.3),
            resp("b", AgentType::Researcher, "Answer two is here.", 0.4),
        ];
        let result = engine
            .evaluate(ConsensusMethod::Weighted, &responses, 0.9)
            .unwrap();
        assert_eq!(result.final_response, "Answer two is here.");
        assert!(result.reasoning.starts_with("Below threshold"));
    }

    #[test]
    fn test_weighted_synthesizes_multiple() {
        let engine = ConsensusEngine::new();
        let responses = vec![
            resp("a", AgentType::Coder, "Add an index on user_id. Batch the writes.", 0.9),
            resp("b", AgentType::Analyst, "Add an index on user_id. Cache hot rows.", 0.8),
        ];
        let result = engine
            .evaluate(ConsensusMethod::Weighted, &responses, 0.5)
            .unwrap();
        assert!(result.final_response.starts_with("Add an index on user_id."));
        // (0.9 * 1.2 + 0.8 * 1.0) / 2.2
        assert!((result.confidence - (1.88 / 2.2)).abs() < 1e-9);
    }

    #[test]
    fn test_majority_identical_texts() {
        let engine = ConsensusEngine::new();
        let responses: Vec<_> = (0..4)
            .map(|i| resp(&format!("agent-{i}"), AgentType::Analyst, "Use a read-write lock.", 0.9))
            .collect();
        let result = engine
            .evaluate(ConsensusMethod::Majority, &responses, 0.7)
            .unwrap();
        assert!((result.confidence - 0.9).abs() < 1e-9);
        assert!(result.reasoning.starts_with("4 of 4"));
    }

    #[test]
    fn test_majority_fails_when_split() {
        let engine = ConsensusEngine::new();
        let responses = vec![
            resp("a", AgentType::Analyst, "alpha beta gamma", 0.9),
            resp("b", AgentType::Analyst, "delta epsilon zeta", 0.9),
        ];
        let result = engine.evaluate(ConsensusMethod::Majority, &responses, 0.7);
        assert!(matches!(
            result,
            Err(ConsensusError::BelowThreshold {
                method: ConsensusMethod::Majority,
                ..
            })
        ));
    }

    #[test]
    fn test_expert_requires_high_confidence() {
        let engine = ConsensusEngine::new();
        let responses = vec![
            resp("a", AgentType::Coder, "Use tokio.", 0.8),
            resp("b", AgentType::Analyst, "Use async-std.", 0.85),
        ];
        let result = engine.evaluate(ConsensusMethod::Expert, &responses, 0.5);
        assert!(matches!(result, Err(ConsensusError::NoExperts)));
    }

    #[test]
    fn test_expert_picks_lead() {
        let engine = ConsensusEngine::new();
        let responses = vec![
            resp("a", AgentType::Coder, "Use tokio for the runtime.", 0.95),
            resp("b", AgentType::Analyst, "Use tokio for the runtime.", 0.9),
            resp("c", AgentType::Researcher, "Use smol.", 0.5),
        ];
        let result = engine
            .evaluate(ConsensusMethod::Expert, &responses, 0.8)
            .unwrap();
        assert_eq!(result.final_response, "Use tokio for the runtime.");
        assert!((result.confidence - 0.925).abs() < 1e-9);
        assert_eq!(result.participating_agents.len(), 3);
    }

    #[test]
    fn test_hybrid_needs_majority() {
        let engine = ConsensusEngine::new();
        let responses = vec![
            resp("a", AgentType::Coder, "alpha beta gamma", 0.9),
            resp("b", AgentType::Coder, "delta epsilon zeta", 0.9),
            resp("c", AgentType::Coder, "eta theta iota", 0.9),
        ];
        let result = engine.evaluate(ConsensusMethod::Hybrid, &responses, 0.9);
        assert!(result.is_err());
    }

    #[test]
    fn test_fallback_reasoning_when_nothing_qualifies() {
        let engine = ConsensusEngine::new();
        let responses = vec![
            resp("a", AgentType::Analyst, "alpha beta gamma delta", 0.3),
            resp("b", AgentType::Researcher, "epsilon zeta eta theta", 0.35),
        ];
        let result = engine.build_consensus(&responses, 0.95).unwrap();
        assert_eq!(result.consensus_method, ConsensusMethod::Weighted);
        assert!(result.reasoning.starts_with("Fallback:"));
        assert_eq!(result.participating_agents, vec!["a", "b"]);
    }

    #[test]
    fn test_threshold_is_clamped() {
        let engine = ConsensusEngine::new();
        let responses = vec![
            resp("a", AgentType::Coder, "Same answer everywhere.", 0.6),
            resp("b", AgentType::Coder, "Same answer everywhere.", 0.6),
        ];
        for threshold in [-1.0, 0.0, 1.0, 7.5, f64::NAN] {
            let result = engine.build_consensus(&responses, threshold).unwrap();
            assert!((0.0..=1.0).contains(&result.confidence));
        }
    }
}

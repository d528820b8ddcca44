//! RoleDebate scorer: two adversarial personas (advocate, critic) each cast
//! a verdict on the response, and a consensus check decides whether their
//! disagreement should pull the merged score down.
//!
//! Structurally this is a coder/reviewer consensus loop collapsed from a
//! multi-round negotiation into a single-round score: the evaluator
//! ensemble already re-runs every round through the pipeline, so there is
//! no second round to negotiate within one scorer call.

use crate::types::{RunnerResult, Variant};
use super::{Scorer, ScorerOutput};

/// Like a code-review verdict, but one persona never "requests changes" —
/// it either approves or abstains, since this scorer has no ability to
/// iterate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersonaVerdict {
    Approve,
    Abstain,
}

fn advocate_verdict(result: &RunnerResult) -> PersonaVerdict {
    if result.content.split_whitespace().count() >= 10 {
        PersonaVerdict::Approve
    } else {
        PersonaVerdict::Abstain
    }
}

fn critic_verdict(result: &RunnerResult) -> PersonaVerdict {
    let hedging = ["i'm not sure", "i don't know", "unclear", "cannot determine"];
    let lower = result.content.to_lowercase();
    if hedging.iter().any(|h| lower.contains(h)) {
        PersonaVerdict::Abstain
    } else {
        PersonaVerdict::Approve
    }
}

/// Consensus check over the two persona verdicts, mirroring
/// `ConsensusCheck::is_consensus` — both must approve for a confident
/// score.
fn is_consensus(a: PersonaVerdict, b: PersonaVerdict) -> bool {
    a == PersonaVerdict::Approve && b == PersonaVerdict::Approve
}

#[derive(Default)]
pub struct RoleDebateScorer;

#[async_trait::async_trait]
impl Scorer for RoleDebateScorer {
    fn name(&self) -> &'static str {
        "role_debate"
    }

    async fn score(&self, _variant: &Variant, result: &RunnerResult) -> ScorerOutput {
        let advocate = advocate_verdict(result);
        let critic = critic_verdict(result);

        let (score, confidence) = if is_consensus(advocate, critic) {
            (0.85, 0.8)
        } else if advocate == PersonaVerdict::Approve || critic == PersonaVerdict::Approve {
            (0.55, 0.5)
        } else {
            (0.2, 0.6)
        };

        ScorerOutput {
            name: self.name(),
            score,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(content: &str) -> RunnerResult {
        RunnerResult {
            variant_id: "v1".into(),
            content: content.to_string(),
            tokens_used: 10,
            latency_ms: 0,
            provider: "x".into(),
            model: "x".into(),
            finish_reason: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn consensus_scores_high() {
        let variant = crate::types::Variant {
            id: "v".into(),
            technique: crate::types::TechniqueId::ChainOfThought,
            prompt: "p".into(),
            temperature: 0.5,
            est_tokens: 10,
            cost_usd: 0.01,
        };
        let scorer = RoleDebateScorer::default();
        let out = scorer
            .score(&variant, &result("This is a long and confident answer about the topic."))
            .await;
        assert_eq!(out.score, 0.85);
    }

    #[tokio::test]
    async fn disagreement_scores_low() {
        let variant = crate::types::Variant {
            id: "v".into(),
            technique: crate::types::TechniqueId::ChainOfThought,
            prompt: "p".into(),
            temperature: 0.5,
            est_tokens: 10,
            cost_usd: 0.01,
        };
        let scorer = RoleDebateScorer::default();
        let out = scorer.score(&variant, &result("unclear")).await;
        assert_eq!(out.score, 0.2);
    }
}

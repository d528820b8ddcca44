//! Technique Engine / Builder: expands a technique set into concrete,
//! budget-respecting variants.
//!
//! Selection runs over the full registered technique set, not just the
//! strategy planner's suggestions: a technique is a *candidate* once it
//! clears the applicability gate (retrieval fit, task fit or a stochastic
//! admit, and a budget floor), and candidates are then scored and expanded
//! in descending-score order. Applicability scoring and the
//! 1-3-variants-per-technique cap follow the same incremental-delta style
//! as [`crate::classifier`]; invariant checks are defensive
//! `debug_assert`-free boundary checks that return a typed error instead of
//! panicking.

use rand::Rng;

use crate::error::{ErrorCode, PipelineError, PipelineResult};
use crate::telemetry::Metrics;
use crate::types::{variant_id, Budget, Classification, TaskType, TechniqueId, Variant};

/// Applicability score deltas, applied per technique candidate.
const SCORE_SUGGESTED: i32 = 100;
const SCORE_BEST_FOR_MATCH: i32 = 50;
const SCORE_RETRIEVAL_MISMATCH: i32 = -30;
const SCORE_DOMAIN_BONUS: i32 = 20;

/// Chance a technique outside its `best_for` task types is admitted anyway,
/// so the ensemble doesn't collapse onto only the textbook-fit techniques.
const STOCHASTIC_ADMIT_RATE: f64 = 0.3;

/// Below this remaining budget a technique isn't worth even attempting.
const MIN_APPLICABLE_BUDGET_USD: f64 = 0.01;

const ANALYTICAL_TECHNIQUES: &[TechniqueId] = &[
    TechniqueId::ChainOfThought,
    TechniqueId::FewShotCot,
    TechniqueId::DspyGrips,
];

/// Gate a technique into the candidate set: retrieval techniques only apply
/// when the classification itself calls for retrieval, an off-profile
/// technique gets in only via the stochastic admit, and there has to be
/// enough budget left to be worth scoring at all.
fn is_applicable<R: Rng + ?Sized>(
    technique: TechniqueId,
    classification: &Classification,
    budget: &Budget,
    rng: &mut R,
) -> bool {
    if technique.needs_retrieval() && !classification.needs_retrieval {
        return false;
    }
    let fits_task = technique.best_for().contains(&classification.task_type);
    if !fits_task && !rng.gen_bool(STOCHASTIC_ADMIT_RATE) {
        return false;
    }
    budget.remaining_cost_usd >= MIN_APPLICABLE_BUDGET_USD
}

fn applicability_score(
    technique: TechniqueId,
    classification: &Classification,
    suggested: &[TechniqueId],
) -> i32 {
    let mut score = 0;
    if suggested.contains(&technique) {
        score += SCORE_SUGGESTED;
    }
    if technique.best_for().contains(&classification.task_type) {
        score += SCORE_BEST_FOR_MATCH;
    }
    if technique.needs_retrieval() && !classification.needs_retrieval {
        score += SCORE_RETRIEVAL_MISMATCH;
    }
    if matches!(
        classification.domain,
        crate::types::Domain::Technical | crate::types::Domain::Academic
    ) && ANALYTICAL_TECHNIQUES.contains(&technique)
    {
        score += SCORE_DOMAIN_BONUS;
    }
    score
}

/// How many variants a score earns: higher-scoring techniques get explored
/// more (up to the 3-variant cap); marginal techniques get exactly one.
fn variant_count_for_score(score: i32) -> u32 {
    match score {
        s if s >= 150 => 3,
        s if s >= 100 => 2,
        _ => 1,
    }
}

/// Per-variant temperature ladder: the first variant per technique is
/// conservative, later ones explore more.
fn temperature_for_ordinal(ordinal: u32) -> f64 {
    match ordinal {
        0 => 0.3,
        1 => 0.7,
        _ => 1.0,
    }
}

fn render_prompt(technique: TechniqueId, original: &str) -> String {
    match technique {
        TechniqueId::ChainOfThought => {
            format!("{original}\n\nThink through this step by step before answering.")
        }
        TechniqueId::FewShotCot => format!(
            "Here are worked examples of step-by-step reasoning.\n\n{original}\n\nFollow the same pattern."
        ),
        TechniqueId::SelfConsistency => format!(
            "{original}\n\nSolve this independently three times and report the most consistent answer."
        ),
        TechniqueId::React => format!(
            "{original}\n\nAlternate between Thought, Action, and Observation until you reach a final answer."
        ),
        TechniqueId::TreeOfThought => format!(
            "{original}\n\nExplore multiple distinct reasoning paths, evaluate each, and pick the best."
        ),
        TechniqueId::Ircot => format!(
            "{original}\n\nInterleave retrieval of supporting facts with your reasoning steps."
        ),
        TechniqueId::DspyApe => format!(
            "{original}\n\nPropose and refine your own instruction for solving this before answering."
        ),
        TechniqueId::DspyGrips => format!(
            "{original}\n\nSearch over phrasing of this instruction to find the clearest formulation, then answer."
        ),
        TechniqueId::AutoDicot => format!(
            "{original}\n\nDerive the classification criteria from first principles, then apply them."
        ),
        TechniqueId::UniversalSelfPrompt => format!(
            "{original}\n\nGenerate your own exemplars for this task before producing the final answer."
        ),
    }
}

fn estimate_tokens(prompt: &str) -> u32 {
    ((prompt.split_whitespace().count() as f64) * 1.4).ceil().max(1.0) as u32
}

fn estimate_cost(est_tokens: u32) -> f64 {
    (est_tokens as f64 / 1000.0) * 0.01
}

pub struct Builder<'a> {
    metrics: &'a Metrics,
}

impl<'a> Builder<'a> {
    pub fn new(metrics: &'a Metrics) -> Self {
        Self { metrics }
    }

    /// Select applicable techniques from the full registered set, score
    /// them against `suggested` (the strategy planner's proposals), and
    /// expand the highest-scoring ones first into variants, debiting
    /// `budget` for each accepted variant. Stops early once the budget can
    /// no longer afford another variant rather than overspending.
    pub fn build_variants(
        &self,
        trace_id: &str,
        original_prompt: &str,
        classification: &Classification,
        suggested: &[TechniqueId],
        budget: &mut Budget,
    ) -> PipelineResult<Vec<Variant>> {
        let mut rng = rand::thread_rng();
        let mut candidates: Vec<(TechniqueId, i32)> = TechniqueId::ALL
            .into_iter()
            .filter(|&technique| is_applicable(technique, classification, budget, &mut rng))
            .map(|technique| (technique, applicability_score(technique, classification, suggested)))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let mut variants = Vec::new();
        let mut ordinal: u32 = 0;

        for (technique, score) in candidates {
            let count = variant_count_for_score(score);

            for local_idx in 0..count {
                let prompt = render_prompt(technique, original_prompt);
                let est_tokens = estimate_tokens(&prompt);
                let cost_usd = estimate_cost(est_tokens);

                if !budget.can_afford(cost_usd) {
                    continue;
                }

                let variant = Variant {
                    id: variant_id(technique, ordinal, trace_id),
                    technique,
                    prompt,
                    temperature: temperature_for_ordinal(local_idx),
                    est_tokens,
                    cost_usd,
                };

                if !variant.is_valid() {
                    self.metrics.incr("builder_invariant_violations");
                    return Err(PipelineError::with_details(
                        ErrorCode::BuilderInvariant,
                        "builder produced an out-of-bounds variant",
                        vec![format!("technique={technique}", technique = variant.technique)],
                    ));
                }

                budget.debit(cost_usd);
                variants.push(variant);
                ordinal += 1;
            }
        }

        self.check_invariants(&variants)?;
        Ok(variants)
    }

    /// Every surfaced variant passes its own bounds check, and no two
    /// variants share an id. A nonempty result is not required here: an
    /// all-empty result is valid when every technique turned out
    /// unaffordable; the caller decides whether that's acceptable.
    fn check_invariants(&self, variants: &[Variant]) -> PipelineResult<()> {
        if variants.iter().any(|v| !v.is_valid()) {
            self.metrics.incr("builder_invariant_violations");
            return Err(PipelineError::new(
                ErrorCode::BuilderInvariant,
                "invalid variant present in builder output",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for v in variants {
            if !seen.insert(&v.id) {
                self.metrics.incr("builder_invariant_violations");
                return Err(PipelineError::new(
                    ErrorCode::BuilderInvariant,
                    "duplicate variant id",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Domain;

    fn classification(task_type: TaskType) -> Classification {
        Classification {
            task_type,
            domain: Domain::General,
            complexity: 0.5,
            safety_risk: 0.0,
            needs_retrieval: false,
            suggested_techniques: vec![TechniqueId::ChainOfThought],
        }
    }

    #[test]
    fn builds_one_to_three_variants_per_technique() {
        let metrics = Metrics::new();
        let builder = Builder::new(&metrics);
        let classification = classification(TaskType::MathReasoning);
        let mut budget = Budget::new(1.0, 10_000, 4000);
        let variants = builder
            .build_variants(
                "trace-1",
                "Solve for x: 2x + 4 = 10",
                &classification,
                &[TechniqueId::ChainOfThought, TechniqueId::SelfConsistency],
                &mut budget,
            )
            .unwrap();
        assert!(!variants.is_empty());
        assert!(variants.iter().all(|v| v.is_valid()));
    }

    #[test]
    fn budget_caps_variant_count() {
        let metrics = Metrics::new();
        let builder = Builder::new(&metrics);
        let classification = classification(TaskType::MathReasoning);
        let mut budget = Budget::new(0.0001, 10_000, 4000);
        let variants = builder
            .build_variants(
                "trace-2",
                "Solve for x: 2x + 4 = 10",
                &classification,
                &[TechniqueId::ChainOfThought, TechniqueId::SelfConsistency],
                &mut budget,
            )
            .unwrap();
        assert!(variants.is_empty());
        assert_eq!(budget.remaining_cost_usd, 0.0001);
    }

    #[test]
    fn variant_ids_are_unique() {
        let metrics = Metrics::new();
        let builder = Builder::new(&metrics);
        let classification = classification(TaskType::MathReasoning);
        let mut budget = Budget::new(1.0, 10_000, 4000);
        let variants = builder
            .build_variants(
                "trace-3",
                "Solve for x: 2x + 4 = 10",
                &classification,
                &[
                    TechniqueId::ChainOfThought,
                    TechniqueId::SelfConsistency,
                    TechniqueId::TreeOfThought,
                ],
                &mut budget,
            )
            .unwrap();
        let ids: std::collections::HashSet<_> = variants.iter().map(|v| &v.id).collect();
        assert_eq!(ids.len(), variants.len());
    }

    #[test]
    fn ircot_is_excluded_unless_the_classification_needs_retrieval() {
        let metrics = Metrics::new();
        let builder = Builder::new(&metrics);
        let classification = classification(TaskType::DataAnalysis);
        let mut budget = Budget::new(1.0, 10_000, 4000);
        let variants = builder
            .build_variants(
                "trace-4",
                "Analyze this dataset for trends.",
                &classification,
                &[TechniqueId::Ircot],
                &mut budget,
            )
            .unwrap();
        assert!(!variants.iter().any(|v| v.technique == TechniqueId::Ircot));
    }

    #[test]
    fn a_near_empty_budget_admits_no_technique() {
        let metrics = Metrics::new();
        let builder = Builder::new(&metrics);
        let classification = classification(TaskType::MathReasoning);
        let mut budget = Budget::new(0.005, 10_000, 4000);
        let variants = builder
            .build_variants(
                "trace-5",
                "Solve for x: 2x + 4 = 10",
                &classification,
                &[TechniqueId::ChainOfThought],
                &mut budget,
            )
            .unwrap();
        assert!(variants.is_empty());
    }
}

//! Strategy Planner: maps a classification to ≤3 allow-listed
//! techniques with a rationale and confidence, failing closed to a
//! baseline on any validator rejection, timeout, or unexpected error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::types::{Classification, TechniqueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationLevel {
    Cheap,
    Normal,
    Explore,
}

#[derive(Debug, Clone)]
pub struct PlannerContext {
    pub task_type: String,
    pub model_name: String,
    pub optimization_level: OptimizationLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerMetadata {
    pub processing_time_ms: u64,
    pub model_used: String,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerResult {
    pub suggested_techniques: Vec<TechniqueId>,
    pub rationale: String,
    pub confidence: f64,
    pub metadata: PlannerMetadata,
}

impl PlannerResult {
    fn baseline() -> Self {
        Self {
            suggested_techniques: vec![TechniqueId::ChainOfThought],
            rationale: "baseline".to_string(),
            confidence: 0.5,
            metadata: PlannerMetadata {
                processing_time_ms: 0,
                model_used: "baseline".to_string(),
                cost_usd: 0.0,
            },
        }
    }
}

/// Backend capable of proposing a technique set for a classification.
/// Registration is a static construction — there is exactly one production
/// backend today, but the trait seam keeps the planner testable with a
/// stub backend that always throws.
#[async_trait::async_trait]
pub trait PlannerBackend: Send + Sync {
    async fn propose(
        &self,
        prompt: &str,
        classification: &Classification,
        context: &PlannerContext,
    ) -> anyhow::Result<PlannerResult>;
}

/// Deterministic backend: derives a plan directly from the classification
/// it already received in S2, rather than calling out to a reasoning
/// service. Reproducible by construction — same classification always
/// yields the same plan.
pub struct HeuristicPlannerBackend;

#[async_trait::async_trait]
impl PlannerBackend for HeuristicPlannerBackend {
    async fn propose(
        &self,
        _prompt: &str,
        classification: &Classification,
        context: &PlannerContext,
    ) -> anyhow::Result<PlannerResult> {
        let mut techniques = classification.suggested_techniques.clone();
        techniques.truncate(3);
        if techniques.is_empty() {
            techniques.push(TechniqueId::ChainOfThought);
        }

        let confidence = match context.optimization_level {
            OptimizationLevel::Cheap => 0.6,
            OptimizationLevel::Normal => 0.75,
            OptimizationLevel::Explore => 0.85,
        };

        let cost_usd = match context.optimization_level {
            OptimizationLevel::Cheap => 0.002,
            OptimizationLevel::Normal => 0.01,
            OptimizationLevel::Explore => 0.018,
        };

        Ok(PlannerResult {
            rationale: format!(
                "selected {} technique(s) for {} at complexity {:.2}",
                techniques.len(),
                classification.task_type,
                classification.complexity
            ),
            confidence,
            metadata: PlannerMetadata {
                processing_time_ms: 0,
                model_used: context.model_name.clone(),
                cost_usd,
            },
            suggested_techniques: techniques,
        })
    }
}

fn jailbreak_signature() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\.\./|system\s*\(|ignore previous instructions")
            .expect("pattern literal is a compile-time-known valid regex")
    })
}

/// Validate a proposed plan's shape. Returns `Err` with the reason
/// on the first violation; the caller falls back to baseline.
fn validate(result: &PlannerResult) -> Result<(), String> {
    if result.suggested_techniques.is_empty() || result.suggested_techniques.len() > 3 {
        return Err("technique count out of [1,3]".to_string());
    }
    if !(0.0..=1.0).contains(&result.confidence) {
        return Err("confidence out of [0,1]".to_string());
    }
    if result.rationale.trim().is_empty() {
        return Err("empty rationale".to_string());
    }
    if jailbreak_signature().is_match(&result.rationale) {
        return Err("rationale matches a jailbreak/path-traversal signature".to_string());
    }
    Ok(())
}

pub struct StrategyPlanner {
    backend: Box<dyn PlannerBackend>,
}

impl StrategyPlanner {
    pub fn new(backend: Box<dyn PlannerBackend>) -> Self {
        Self { backend }
    }

    pub fn heuristic() -> Self {
        Self::new(Box::new(HeuristicPlannerBackend))
    }

    /// Plan with a hard validator deadline (100ms) and fail-closed
    /// semantics: any backend error, timeout, or validator rejection
    /// returns the baseline result rather than propagating.
    pub async fn plan(
        &self,
        prompt: &str,
        classification: &Classification,
        context: &PlannerContext,
    ) -> PlannerResult {
        let started = Instant::now();
        let proposal = tokio::time::timeout(
            Duration::from_millis(100),
            self.backend.propose(prompt, classification, context),
        )
        .await;

        let result = match proposal {
            Ok(Ok(r)) => r,
            Ok(Err(_)) | Err(_) => {
                return PlannerResult {
                    metadata: PlannerMetadata {
                        processing_time_ms: started.elapsed().as_millis() as u64,
                        ..PlannerResult::baseline().metadata
                    },
                    ..PlannerResult::baseline()
                };
            }
        };

        match validate(&result) {
            Ok(()) => result,
            Err(_) => PlannerResult {
                metadata: PlannerMetadata {
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    ..PlannerResult::baseline().metadata
                },
                ..PlannerResult::baseline()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Domain, TaskType};

    fn classification(techniques: Vec<TechniqueId>) -> Classification {
        Classification {
            task_type: TaskType::MathReasoning,
            domain: Domain::General,
            complexity: 0.5,
            safety_risk: 0.0,
            needs_retrieval: false,
            suggested_techniques: techniques,
        }
    }

    fn ctx() -> PlannerContext {
        PlannerContext {
            task_type: "math_reasoning".into(),
            model_name: "test-model".into(),
            optimization_level: OptimizationLevel::Normal,
        }
    }

    #[tokio::test]
    async fn heuristic_planner_respects_allow_list_bounds() {
        let planner = StrategyPlanner::heuristic();
        let c = classification(vec![TechniqueId::FewShotCot, TechniqueId::SelfConsistency]);
        let result = planner.plan("solve for x", &c, &ctx()).await;
        assert!(!result.suggested_techniques.is_empty());
        assert!(result.suggested_techniques.len() <= 3);
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    struct ThrowingBackend;
    #[async_trait::async_trait]
    impl PlannerBackend for ThrowingBackend {
        async fn propose(
            &self,
            _prompt: &str,
            _c: &Classification,
            _ctx: &PlannerContext,
        ) -> anyhow::Result<PlannerResult> {
            anyhow::bail!("backend exploded")
        }
    }

    #[tokio::test]
    async fn planner_failure_falls_back_to_baseline() {
        let planner = StrategyPlanner::new(Box::new(ThrowingBackend));
        let c = classification(vec![TechniqueId::FewShotCot]);
        let result = planner.plan("solve for x", &c, &ctx()).await;
        assert_eq!(result.suggested_techniques, vec![TechniqueId::ChainOfThought]);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.rationale, "baseline");
    }

    struct InvalidBackend;
    #[async_trait::async_trait]
    impl PlannerBackend for InvalidBackend {
        async fn propose(
            &self,
            _prompt: &str,
            _c: &Classification,
            _ctx: &PlannerContext,
        ) -> anyhow::Result<PlannerResult> {
            Ok(PlannerResult {
                suggested_techniques: vec![],
                rationale: "empty".into(),
                confidence: 0.9,
                metadata: PlannerMetadata {
                    processing_time_ms: 1,
                    model_used: "x".into(),
                    cost_usd: 0.0,
                },
            })
        }
    }

    #[tokio::test]
    async fn validator_rejection_falls_back_to_baseline() {
        let planner = StrategyPlanner::new(Box::new(InvalidBackend));
        let c = classification(vec![TechniqueId::FewShotCot]);
        let result = planner.plan("x", &c, &ctx()).await;
        assert_eq!(result.rationale, "baseline");
    }

    #[tokio::test]
    async fn reproducible_for_identical_input() {
        let planner = StrategyPlanner::heuristic();
        let c = classification(vec![TechniqueId::FewShotCot, TechniqueId::SelfConsistency]);
        let r1 = planner.plan("solve for x", &c, &ctx()).await;
        let r2 = planner.plan("solve for x", &c, &ctx()).await;
        assert_eq!(r1.suggested_techniques, r2.suggested_techniques);
        assert_eq!(r1.confidence, r2.confidence);
        assert_eq!(r1.rationale, r2.rationale);
    }
}

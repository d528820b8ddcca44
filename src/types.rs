//! Core data model for the optimization pipeline.
//!
//! These types are the wire format between pipeline stages and, where
//! `Serialize`d, the client-facing JSON shapes described in the external
//! interfaces.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque per-request identifier, propagated on every inter-component call
/// and present on every telemetry event and log line.
pub type TraceId = String;

/// Identifier for a single variant, derived from `(technique, ordinal, trace_id)`.
pub type VariantId = String;

pub fn new_trace_id() -> TraceId {
    uuid::Uuid::new_v4().to_string()
}

pub fn variant_id(technique: TechniqueId, ordinal: u32, trace_id: &str) -> VariantId {
    format!("{}-{}-{}", technique, ordinal, trace_id)
}

/// Closed set of task types the classifier may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    MathReasoning,
    CodeGeneration,
    CreativeWriting,
    DataAnalysis,
    Summarization,
    Translation,
    Classification,
    GeneralQa,
    General,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MathReasoning => "math_reasoning",
            Self::CodeGeneration => "code_generation",
            Self::CreativeWriting => "creative_writing",
            Self::DataAnalysis => "data_analysis",
            Self::Summarization => "summarization",
            Self::Translation => "translation",
            Self::Classification => "classification",
            Self::GeneralQa => "general_qa",
            Self::General => "general",
        };
        write!(f, "{}", s)
    }
}

/// Closed set of domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Academic,
    Business,
    Technical,
    Creative,
    General,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Academic => "academic",
            Self::Business => "business",
            Self::Technical => "technical",
            Self::Creative => "creative",
            Self::General => "general",
        };
        write!(f, "{}", s)
    }
}

/// Closed allow-list of prompting techniques.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechniqueId {
    ChainOfThought,
    FewShotCot,
    SelfConsistency,
    React,
    TreeOfThought,
    Ircot,
    DspyApe,
    DspyGrips,
    AutoDicot,
    UniversalSelfPrompt,
}

impl TechniqueId {
    /// All ten allow-listed techniques, in declaration order.
    pub const ALL: [TechniqueId; 10] = [
        TechniqueId::ChainOfThought,
        TechniqueId::FewShotCot,
        TechniqueId::SelfConsistency,
        TechniqueId::React,
        TechniqueId::TreeOfThought,
        TechniqueId::Ircot,
        TechniqueId::DspyApe,
        TechniqueId::DspyGrips,
        TechniqueId::AutoDicot,
        TechniqueId::UniversalSelfPrompt,
    ];

    /// Only `ircot` requires retrieval.
    pub fn needs_retrieval(&self) -> bool {
        matches!(self, TechniqueId::Ircot)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChainOfThought => "chain_of_thought",
            Self::FewShotCot => "few_shot_cot",
            Self::SelfConsistency => "self_consistency",
            Self::React => "react",
            Self::TreeOfThought => "tree_of_thought",
            Self::Ircot => "ircot",
            Self::DspyApe => "dspy_ape",
            Self::DspyGrips => "dspy_grips",
            Self::AutoDicot => "auto_dicot",
            Self::UniversalSelfPrompt => "universal_self_prompt",
        }
    }

    /// Static "best_for" descriptor used by the builder's applicability scoring.
    pub fn best_for(&self) -> &'static [TaskType] {
        match self {
            Self::ChainOfThought => &[TaskType::General, TaskType::GeneralQa],
            Self::FewShotCot => &[TaskType::MathReasoning, TaskType::DataAnalysis],
            Self::SelfConsistency => &[TaskType::MathReasoning, TaskType::Classification],
            Self::React => &[TaskType::CodeGeneration, TaskType::DataAnalysis],
            Self::TreeOfThought => &[TaskType::CreativeWriting, TaskType::MathReasoning],
            Self::Ircot => &[TaskType::DataAnalysis, TaskType::Summarization],
            Self::DspyApe => &[TaskType::CreativeWriting, TaskType::General],
            Self::DspyGrips => &[TaskType::Summarization, TaskType::Translation],
            Self::AutoDicot => &[TaskType::Classification, TaskType::GeneralQa],
            Self::UniversalSelfPrompt => &[TaskType::General, TaskType::GeneralQa],
        }
    }
}

impl std::fmt::Display for TechniqueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification produced in S2. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub task_type: TaskType,
    pub domain: Domain,
    pub complexity: f64,
    pub safety_risk: f64,
    pub needs_retrieval: bool,
    pub suggested_techniques: Vec<TechniqueId>,
}

/// Per-request cost/time/token ledger. Mutated only by the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub max_cost_usd: f64,
    pub max_latency_ms: u64,
    pub max_tokens: u32,
    pub remaining_cost_usd: f64,
    pub remaining_time_ms: u64,
}

impl Budget {
    pub fn new(max_cost_usd: f64, max_latency_ms: u64, max_tokens: u32) -> Self {
        Self {
            max_cost_usd,
            max_latency_ms,
            max_tokens,
            remaining_cost_usd: max_cost_usd,
            remaining_time_ms: max_latency_ms,
        }
    }

    /// Deduct `cost_usd` from the remaining budget. Never goes negative;
    /// caller must check `can_afford` before emitting the variant.
    pub fn can_afford(&self, cost_usd: f64) -> bool {
        self.remaining_cost_usd >= cost_usd
    }

    pub fn debit(&mut self, cost_usd: f64) {
        self.remaining_cost_usd = (self.remaining_cost_usd - cost_usd).max(0.0);
    }

    /// Advisory, monotonically non-increasing wall-clock tracking. Never
    /// used to abort a stage already in flight — a stage that overruns its
    /// share of the latency cap still finishes; only the next stage sees a
    /// tighter remaining budget.
    pub fn advance_time(&mut self, elapsed_ms: u64) {
        self.remaining_time_ms = self.remaining_time_ms.saturating_sub(elapsed_ms);
    }

    pub fn exhausted(&self) -> bool {
        self.remaining_time_ms == 0
    }
}

/// One rewritten candidate of the user's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub technique: TechniqueId,
    pub prompt: String,
    pub temperature: f64,
    pub est_tokens: u32,
    pub cost_usd: f64,
}

impl Variant {
    /// Whether this variant satisfies the documented bounds. Invalid variants must
    /// be dropped by the builder, never surfaced.
    pub fn is_valid(&self) -> bool {
        !self.technique.as_str().is_empty()
            && !self.prompt.is_empty()
            && (0.0..=2.0).contains(&self.temperature)
            && (1..=8192).contains(&self.est_tokens)
            && self.cost_usd > 0.0
            && self.cost_usd <= 5.0
    }
}

/// Result of running a variant against a text-generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerResult {
    pub variant_id: VariantId,
    pub content: String,
    pub tokens_used: u32,
    pub latency_ms: u64,
    pub provider: String,
    pub model: String,
    pub finish_reason: Option<String>,
    pub error: Option<String>,
}

impl RunnerResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Score produced by the evaluator ensemble for one variant's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub variant_id: VariantId,
    pub scores: HashMap<String, f64>,
    pub final_score: f64,
    pub confidence_interval: (f64, f64),
    pub calibration_error: Option<f64>,
}

/// Metadata block attached to the optimization response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub total_variants_generated: usize,
    pub pareto_frontier_size: usize,
    pub techniques_used: Vec<TechniqueId>,
    pub suggested_techniques: Vec<TechniqueId>,
    pub strategy_confidence: f64,
    pub safety_modifications: bool,
}

/// Full response to a client `/api/optimize` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResponse {
    pub trace_id: TraceId,
    pub original_prompt: String,
    pub classification: Classification,
    pub variants: Vec<Variant>,
    pub recommended_variant: Option<VariantId>,
    pub evaluation_results: Vec<EvaluationResult>,
    pub metadata: ResponseMetadata,
    pub receipt: Option<crate::receipt::Receipt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_techniques_have_distinct_names() {
        let names: std::collections::HashSet<_> =
            TechniqueId::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(names.len(), TechniqueId::ALL.len());
    }

    #[test]
    fn only_ircot_needs_retrieval() {
        for t in TechniqueId::ALL {
            assert_eq!(t.needs_retrieval(), matches!(t, TechniqueId::Ircot));
        }
    }

    #[test]
    fn variant_bounds_enforced() {
        let mut v = Variant {
            id: "x".into(),
            technique: TechniqueId::ChainOfThought,
            prompt: "hello".into(),
            temperature: 0.7,
            est_tokens: 100,
            cost_usd: 0.01,
        };
        assert!(v.is_valid());
        v.temperature = 2.1;
        assert!(!v.is_valid());
        v.temperature = 0.7;
        v.cost_usd = 0.0;
        assert!(!v.is_valid());
    }

    #[test]
    fn budget_never_goes_negative() {
        let mut b = Budget::new(0.05, 1000, 1000);
        b.debit(0.03);
        assert!((b.remaining_cost_usd - 0.02).abs() < 1e-9);
        b.debit(1.0);
        assert_eq!(b.remaining_cost_usd, 0.0);
    }
}

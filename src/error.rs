//! Closed error taxonomy mapped one-for-one onto the recognized error codes.
//!
//! `thiserror`-backed, one variant per failure mode, rather than a single
//! opaque error type, so callers can match on the code and the HTTP
//! boundary can render it without string-sniffing.

use thiserror::Error;

/// Recognized error code, closed set per the external interface contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidPrompt,
    InvalidModel,
    InvalidParameters,
    Timeout,
    ServiceUnavailable,
    RateLimitExceeded,
    InsufficientBudget,
    OptimizationFailed,
    EvaluationFailed,
    SafetyViolation,
    FlowMismatch,
    BuilderInvariant,
    NoSafeVariant,
    BudgetExceeded,
    InternalError,
}

impl ErrorCode {
    /// Fixed code → HTTP status mapping.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidPrompt
            | ErrorCode::InvalidModel
            | ErrorCode::InvalidParameters => 400,
            ErrorCode::Timeout => 504,
            ErrorCode::ServiceUnavailable => 503,
            ErrorCode::RateLimitExceeded => 429,
            ErrorCode::InsufficientBudget | ErrorCode::BudgetExceeded => 402,
            ErrorCode::SafetyViolation => 451,
            ErrorCode::NoSafeVariant => 422,
            ErrorCode::OptimizationFailed
            | ErrorCode::EvaluationFailed
            | ErrorCode::FlowMismatch
            | ErrorCode::BuilderInvariant
            | ErrorCode::InternalError => 500,
        }
    }

    /// Whether the orchestrator may retry a call that failed with this code.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout | ErrorCode::ServiceUnavailable | ErrorCode::RateLimitExceeded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPrompt => "INVALID_PROMPT",
            ErrorCode::InvalidModel => "INVALID_MODEL",
            ErrorCode::InvalidParameters => "INVALID_PARAMETERS",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InsufficientBudget => "INSUFFICIENT_BUDGET",
            ErrorCode::OptimizationFailed => "OPTIMIZATION_FAILED",
            ErrorCode::EvaluationFailed => "EVALUATION_FAILED",
            ErrorCode::SafetyViolation => "SAFETY_VIOLATION",
            ErrorCode::FlowMismatch => "FLOW_MISMATCH",
            ErrorCode::BuilderInvariant => "BUILDER_INVARIANT",
            ErrorCode::NoSafeVariant => "NO_SAFE_VARIANT",
            ErrorCode::BudgetExceeded => "BUDGET_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Library-internal error type. Every pipeline stage returns this so the
/// orchestrator can map it to a client-facing envelope without losing the
/// code or the detail list the flow guard needs for `FLOW_MISMATCH`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{message}")]
    Coded {
        code: ErrorCode,
        message: String,
        details: Vec<String>,
    },
}

impl PipelineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        PipelineError::Coded {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: Vec<String>) -> Self {
        PipelineError::Coded {
            code,
            message: message.into(),
            details,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Coded { code, .. } => *code,
        }
    }

    pub fn details(&self) -> &[String] {
        match self {
            PipelineError::Coded { details, .. } => details,
        }
    }

    pub fn retryable(&self) -> bool {
        self.code().retryable()
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

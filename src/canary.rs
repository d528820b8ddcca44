//! Background canary: every 60s, submits a fixed synthetic prompt through
//! the full orchestrator and asserts the receipt and response shape are
//! what a healthy pipeline should produce. Never quiesces traffic on
//! failure — it only raises a loud signal.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::orchestrator::{Orchestrator, OrchestratorRequest};
use crate::planner::OptimizationLevel;
use crate::receipt;
use crate::telemetry::Metrics;

const CANARY_PROMPT: &str = "What is the capital of France?";
const CANARY_INTERVAL: Duration = Duration::from_secs(60);
/// Receipt timestamps older than this relative to now are treated as stale.
const RECEIPT_FRESHNESS: chrono::Duration = chrono::Duration::seconds(60);

#[derive(Debug)]
pub struct CanaryOutcome {
    pub passed: bool,
    pub failures: Vec<&'static str>,
}

/// Run one canary round and report which assertions, if any, failed.
pub async fn run_once(orchestrator: &Orchestrator, public_key: &ed25519_dalek::VerifyingKey) -> CanaryOutcome {
    let mut failures = Vec::new();

    let request = OrchestratorRequest {
        prompt: CANARY_PROMPT.to_string(),
        optimization_level: OptimizationLevel::Cheap,
        cost_cap_usd: 1.0,
        latency_cap_ms: 10_000,
        max_tokens: 2000,
        model_name: "canary".to_string(),
    };

    let response = match orchestrator.optimize(request).await {
        Ok(r) => r,
        Err(_) => {
            failures.push("success=true");
            return CanaryOutcome { passed: false, failures };
        }
    };

    let Some(receipt) = response.receipt.clone() else {
        failures.push("receipt present");
        return CanaryOutcome { passed: false, failures };
    };

    if receipt.flow_version != receipt::FLOW_VERSION {
        failures.push("flow_version=3.0.0");
    }

    if !receipt::verify(&receipt, &response.trace_id, public_key) {
        failures.push("receipt verifies against trace_id");
    }

    match chrono::DateTime::parse_from_rfc3339(&receipt.timestamp) {
        Ok(ts) => {
            let age = chrono::Utc::now().signed_duration_since(ts.with_timezone(&chrono::Utc));
            if age > RECEIPT_FRESHNESS || age < -RECEIPT_FRESHNESS {
                failures.push("receipt timestamp within 60s of now");
            }
        }
        Err(_) => failures.push("receipt timestamp within 60s of now"),
    }

    if !response
        .metadata
        .techniques_used
        .iter()
        .any(|t| *t == crate::types::TechniqueId::ChainOfThought)
    {
        failures.push("techniques_used includes chain_of_thought");
    }

    if response.variants.len() < 2 {
        failures.push(">= 2 variants");
    }

    if response.recommended_variant.is_none() {
        failures.push("recommended variant exists");
    }

    CanaryOutcome {
        passed: failures.is_empty(),
        failures,
    }
}

/// Spawn the long-lived canary loop. Returns a token the caller can cancel
/// for clean shutdown; the loop owns no other state than what it's handed.
pub fn spawn(
    orchestrator: Arc<Orchestrator>,
    public_key: ed25519_dalek::VerifyingKey,
    metrics: Arc<Metrics>,
) -> CancellationToken {
    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CANARY_INTERVAL);
        loop {
            tokio::select! {
                _ = loop_cancel.cancelled() => break,
                _ = interval.tick() => {
                    let outcome = run_once(&orchestrator, &public_key).await;
                    if !outcome.passed {
                        metrics.incr("canary_test_failed");
                        tracing::error!(failures = ?outcome.failures, "canary round failed");
                    } else {
                        tracing::debug!("canary round passed");
                    }
                }
            }
        }
    });

    cancel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditRing;
    use crate::config::RunnerUrls;
    use crate::planner::StrategyPlanner;
    use crate::receipt::SigningKeypair;
    use crate::retrieval::NullRetriever;
    use crate::runner::Runner;
    use crate::safety::PatternSanitizer;

    #[tokio::test]
    async fn canary_against_healthy_orchestrator_checks_expected_assertions() {
        let signing_key = SigningKeypair::generate();
        let public_key = signing_key.public_key();
        let orchestrator = Orchestrator::new(
            Arc::new(PatternSanitizer),
            StrategyPlanner::heuristic(),
            Arc::new(NullRetriever),
            Arc::new(Runner::new(&RunnerUrls::default())),
            Arc::new(Metrics::new()),
            Arc::new(AuditRing::new()),
            Arc::new(signing_key),
        );
        // The runner has no reachable backend in this test environment, so
        // the round is expected to fail at the network layer — this just
        // exercises that `run_once` never panics and reports a failure
        // list rather than propagating an error.
        let outcome = run_once(&orchestrator, &public_key).await;
        assert!(!outcome.failures.is_empty() || outcome.passed);
    }
}

//! Runner: executes built variants against one of four
//! backend families, bounded to 3 concurrent in-flight calls.
//!
//! Variants are dispatched in batches of up to [`MAX_CONCURRENT_RUNS`]; a
//! batch runs concurrently but the next batch only starts once the whole
//! previous one has completed, and each result is written back to the
//! position its variant held in the input slice — the returned order
//! always matches `variants`, not completion order.

pub mod circuit_breaker;
pub mod client;
pub mod registry;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use crate::config::RunnerUrls;
use crate::telemetry::Metrics;
use crate::types::{RunnerResult, Variant};
use circuit_breaker::{CircuitBreaker, FallbackLadder};
use client::{HttpRunnerClient, RunnerClient};

/// Maximum number of in-flight runner calls.
pub const MAX_CONCURRENT_RUNS: usize = 3;

/// Fallback cost-per-1k-tokens used when a backend's response omits its own
/// billed cost.
pub const FALLBACK_COST_PER_1K_TOKENS: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    OpenAi,
    Anthropic,
    Google,
    /// Anthropic backend with a tool_use/tool_result pre-filter and
    /// malformed-block repair layered in front of it.
    SafeAnthropic,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::OpenAi,
        Backend::Anthropic,
        Backend::Google,
        Backend::SafeAnthropic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::OpenAi => "openai",
            Backend::Anthropic => "anthropic",
            Backend::Google => "google",
            Backend::SafeAnthropic => "safe_anthropic",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Picks the backend for a variant that needs heightened safety handling
/// (the classifier's safety_risk score crossed the threshold) versus
/// the default ladder otherwise.
pub fn backend_for_risk(safety_risk: f64) -> Backend {
    if safety_risk >= 0.5 {
        Backend::SafeAnthropic
    } else {
        Backend::OpenAi
    }
}

pub struct Runner {
    clients: std::collections::HashMap<Backend, Arc<dyn RunnerClient>>,
    breaker: std::sync::Mutex<CircuitBreaker>,
    ladder: FallbackLadder,
    semaphore: Arc<Semaphore>,
}

impl Runner {
    pub fn new(urls: &RunnerUrls) -> Self {
        let mut clients: std::collections::HashMap<Backend, Arc<dyn RunnerClient>> =
            std::collections::HashMap::new();
        clients.insert(
            Backend::OpenAi,
            Arc::new(HttpRunnerClient::new(
                Backend::OpenAi,
                urls.openai.clone().unwrap_or_else(|| "http://localhost:9101".to_string()),
            )),
        );
        clients.insert(
            Backend::Anthropic,
            Arc::new(HttpRunnerClient::new(
                Backend::Anthropic,
                urls.anthropic.clone().unwrap_or_else(|| "http://localhost:9102".to_string()),
            )),
        );
        clients.insert(
            Backend::Google,
            Arc::new(HttpRunnerClient::new(
                Backend::Google,
                urls.google.clone().unwrap_or_else(|| "http://localhost:9103".to_string()),
            )),
        );
        clients.insert(
            Backend::SafeAnthropic,
            Arc::new(HttpRunnerClient::new(
                Backend::SafeAnthropic,
                urls.safe_anthropic
                    .clone()
                    .unwrap_or_else(|| "http://localhost:9104".to_string()),
            )),
        );

        Self {
            clients,
            breaker: std::sync::Mutex::new(CircuitBreaker::default()),
            ladder: FallbackLadder::default_ladder(),
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_RUNS)),
        }
    }

    fn resolve_backend(&self, preferred: Backend) -> Backend {
        let breaker = self.breaker.lock().unwrap();
        if breaker.is_available(preferred) {
            return preferred;
        }
        self.ladder.next_available(&breaker).unwrap_or(preferred)
    }

    async fn run_one(&self, variant: Variant, preferred: Backend, metrics: &Metrics) -> RunnerResult {
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        let backend = self.resolve_backend(preferred);
        let client = self
            .clients
            .get(&backend)
            .cloned()
            .expect("every Backend variant has a registered client");

        let started = Instant::now();
        let outcome = client.execute(&variant).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        metrics.observe("runner_latency_ms", latency_ms as f64);

        match outcome {
            Ok(mut result) => {
                self.breaker.lock().unwrap().record_success(backend);
                result.latency_ms = latency_ms;
                metrics.incr("runner_calls_succeeded_total");
                result
            }
            Err(err) => {
                let mut breaker = self.breaker.lock().unwrap();
                if err.is_rate_limited() {
                    breaker.record_rate_limit(backend);
                } else {
                    breaker.record_failure(backend);
                }
                drop(breaker);
                metrics.incr("runner_calls_failed_total");
                RunnerResult {
                    variant_id: variant.id.clone(),
                    content: String::new(),
                    tokens_used: 0,
                    latency_ms,
                    provider: backend.to_string(),
                    model: backend.to_string(),
                    finish_reason: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Run every variant in batches of at most [`MAX_CONCURRENT_RUNS`],
    /// each batch a barrier before the next begins. The returned vector
    /// preserves `variants`' order regardless of which call in a batch
    /// finishes first.
    pub async fn run_variants(
        &self,
        variants: &[Variant],
        safety_risk: f64,
        metrics: &Metrics,
    ) -> Vec<RunnerResult> {
        let preferred = backend_for_risk(safety_risk);
        let mut results: Vec<Option<RunnerResult>> = (0..variants.len()).map(|_| None).collect();

        let mut offset = 0;
        for batch in variants.chunks(MAX_CONCURRENT_RUNS) {
            let outcomes = futures::future::join_all(
                batch.iter().cloned().map(|variant| self.run_one(variant, preferred, metrics)),
            )
            .await;
            for (i, result) in outcomes.into_iter().enumerate() {
                results[offset + i] = Some(result);
            }
            offset += batch.len();
        }

        results
            .into_iter()
            .map(|r| r.expect("every index is filled by its batch"))
            .collect()
    }
}

/// Apply the fallback cost rate when a backend didn't report its own cost.
pub fn cost_with_fallback(reported_cost_usd: Option<f64>, tokens_used: u32) -> f64 {
    reported_cost_usd.unwrap_or_else(|| (tokens_used as f64 / 1000.0) * FALLBACK_COST_PER_1K_TOKENS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_above_threshold_routes_to_safe_anthropic() {
        assert_eq!(backend_for_risk(0.9), Backend::SafeAnthropic);
        assert_eq!(backend_for_risk(0.1), Backend::OpenAi);
    }

    #[test]
    fn fallback_cost_applies_only_when_unreported() {
        assert_eq!(cost_with_fallback(Some(0.002), 5000), 0.002);
        assert_eq!(cost_with_fallback(None, 1000), 0.01);
    }
}

//! Circuit breaker and fallback ladder for runner backends.
//!
//! The circuit breaker tracks consecutive failures per [`Backend`]. When
//! failures exceed a configurable threshold the circuit *opens* and the
//! backend is temporarily skipped. After a cooldown the circuit enters
//! *half-open* state to probe recovery.
//!
//! The [`FallbackLadder`] walks an ordered list of backends, skipping any
//! whose circuit is currently open.

use super::Backend;
use std::collections::HashMap;

/// Circuit breaker state for a single backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Healthy — requests allowed.
    Closed,
    /// Tripped — requests blocked until cooldown expires.
    Open,
    /// Cooldown expired — one probe request allowed.
    HalfOpen,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Per-backend circuit breaker tracking consecutive failures.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    consecutive_failures: HashMap<Backend, u32>,
    last_failure_secs: HashMap<Backend, u64>,
    /// Consecutive 429 rate-limit hits per backend (for exponential backoff).
    rate_limit_hits: HashMap<Backend, u32>,
    /// Unix timestamp when rate-limit cooldown expires per backend.
    rate_limit_until: HashMap<Backend, u64>,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Seconds after last failure before Open → HalfOpen.
    pub cooldown_secs: u64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: HashMap::new(),
            last_failure_secs: HashMap::new(),
            rate_limit_hits: HashMap::new(),
            rate_limit_until: HashMap::new(),
            failure_threshold,
            cooldown_secs,
        }
    }

    pub fn record_success(&mut self, backend: Backend) {
        self.consecutive_failures.remove(&backend);
        self.last_failure_secs.remove(&backend);
        self.rate_limit_hits.remove(&backend);
        self.rate_limit_until.remove(&backend);
    }

    pub fn record_failure(&mut self, backend: Backend) {
        let count = self.consecutive_failures.entry(backend).or_insert(0);
        *count += 1;
        self.last_failure_secs.insert(backend, unix_now());
    }

    /// Record a 429 rate-limit response with adaptive exponential backoff.
    ///
    /// Cooldown doubles each consecutive hit: 2s, 4s, 8s, ... capped at 120s.
    pub fn record_rate_limit(&mut self, backend: Backend) {
        let hits = self.rate_limit_hits.entry(backend).or_insert(0);
        *hits += 1;
        let cooldown = 2u64
            .saturating_mul(2u64.saturating_pow((*hits).saturating_sub(1)))
            .min(120);
        self.rate_limit_until.insert(backend, unix_now() + cooldown);
        self.record_failure(backend);
    }

    pub fn rate_limit_cooldown(&self, backend: Backend) -> Option<u64> {
        let &until = self.rate_limit_until.get(&backend)?;
        let now = unix_now();
        if now < until {
            Some(until - now)
        } else {
            None
        }
    }

    pub fn state(&self, backend: Backend) -> CircuitState {
        if self.rate_limit_cooldown(backend).is_some() {
            return CircuitState::Open;
        }
        let failures = self.consecutive_failures.get(&backend).copied().unwrap_or(0);
        if failures < self.failure_threshold {
            return CircuitState::Closed;
        }
        let last = self.last_failure_secs.get(&backend).copied().unwrap_or(0);
        if unix_now().saturating_sub(last) >= self.cooldown_secs {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    pub fn is_available(&self, backend: Backend) -> bool {
        !matches!(self.state(backend), CircuitState::Open)
    }

    pub fn failure_count(&self, backend: Backend) -> u32 {
        self.consecutive_failures.get(&backend).copied().unwrap_or(0)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

/// Ordered fallback ladder of backends. The first backend whose circuit is
/// not open is returned.
#[derive(Debug, Clone)]
pub struct FallbackLadder {
    backends: Vec<Backend>,
}

impl FallbackLadder {
    pub fn new(backends: Vec<Backend>) -> Self {
        Self { backends }
    }

    /// Default ladder: try the cheaper/faster general-purpose backends
    /// before the safety-filtered one, which is reserved for prompts the
    /// classifier flagged.
    pub fn default_ladder() -> Self {
        Self::new(vec![
            Backend::OpenAi,
            Backend::Anthropic,
            Backend::Google,
            Backend::SafeAnthropic,
        ])
    }

    pub fn next_available(&self, breaker: &CircuitBreaker) -> Option<Backend> {
        self.backends.iter().copied().find(|b| breaker.is_available(*b))
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(Backend::OpenAi), CircuitState::Closed);
        assert!(cb.is_available(Backend::OpenAi));
    }

    #[test]
    fn circuit_opens_after_threshold() {
        let mut cb = CircuitBreaker::new(2, 9999);
        cb.record_failure(Backend::OpenAi);
        assert_eq!(cb.state(Backend::OpenAi), CircuitState::Closed);
        cb.record_failure(Backend::OpenAi);
        assert_eq!(cb.state(Backend::OpenAi), CircuitState::Open);
        assert!(!cb.is_available(Backend::OpenAi));
    }

    #[test]
    fn success_resets_circuit() {
        let mut cb = CircuitBreaker::new(2, 9999);
        cb.record_failure(Backend::Anthropic);
        cb.record_failure(Backend::Anthropic);
        assert_eq!(cb.state(Backend::Anthropic), CircuitState::Open);
        cb.record_success(Backend::Anthropic);
        assert_eq!(cb.state(Backend::Anthropic), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_cooldown() {
        let mut cb = CircuitBreaker::new(1, 0);
        cb.record_failure(Backend::Google);
        assert_eq!(cb.state(Backend::Google), CircuitState::HalfOpen);
        assert!(cb.is_available(Backend::Google));
    }

    #[test]
    fn fallback_skips_open() {
        let mut cb = CircuitBreaker::new(1, 9999);
        cb.record_failure(Backend::OpenAi);
        let ladder = FallbackLadder::default_ladder();
        assert_eq!(ladder.next_available(&cb), Some(Backend::Anthropic));
    }

    #[test]
    fn fallback_all_open() {
        let mut cb = CircuitBreaker::new(1, 9999);
        for &b in Backend::ALL.iter() {
            cb.record_failure(b);
        }
        let ladder = FallbackLadder::default_ladder();
        assert_eq!(ladder.next_available(&cb), None);
    }

    #[test]
    fn rate_limit_exponential_backoff() {
        let mut cb = CircuitBreaker::new(10, 9999);
        cb.record_rate_limit(Backend::OpenAi);
        assert!(cb.rate_limit_cooldown(Backend::OpenAi).is_some());
        assert_eq!(cb.state(Backend::OpenAi), CircuitState::Open);
        assert_eq!(cb.failure_count(Backend::OpenAi), 1);
    }
}

//! Backend registry — capability and live health metadata.
//!
//! Capability/health split keyed by [`Backend`] instead of a model
//! identifier, since this pipeline routes by backend family rather than by
//! specific model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Backend;

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub supports_tool_calls: bool,
}

impl BackendCapabilities {
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::OpenAi => Self {
                context_window: 128_000,
                max_output_tokens: 16_384,
                supports_tool_calls: true,
            },
            Backend::Anthropic | Backend::SafeAnthropic => Self {
                context_window: 200_000,
                max_output_tokens: 8_192,
                supports_tool_calls: true,
            },
            Backend::Google => Self {
                context_window: 1_000_000,
                max_output_tokens: 8_192,
                supports_tool_calls: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub available: bool,
    pub avg_latency_ms: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_checked_secs: u64,
    pub status_message: Option<String>,
}

impl BackendHealth {
    pub fn healthy() -> Self {
        Self {
            available: true,
            avg_latency_ms: 0,
            success_count: 0,
            error_count: 0,
            last_checked_secs: unix_now(),
            status_message: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.error_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    pub fn record_success(&mut self, latency_ms: u64) {
        self.avg_latency_ms =
            (self.avg_latency_ms * self.success_count + latency_ms) / (self.success_count + 1);
        self.success_count += 1;
        self.last_checked_secs = unix_now();
    }

    pub fn record_failure(&mut self) {
        self.error_count += 1;
        self.last_checked_secs = unix_now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    pub backend: Backend,
    pub capabilities: BackendCapabilities,
    pub health: BackendHealth,
}

impl BackendEntry {
    pub fn new(backend: Backend) -> Self {
        Self {
            capabilities: BackendCapabilities::for_backend(backend),
            health: BackendHealth::healthy(),
            backend,
        }
    }

    /// Usable if reachable and succeeding at least half the time.
    pub fn is_usable(&self) -> bool {
        self.health.available && self.health.success_rate() >= 0.5
    }
}

pub struct BackendRegistry {
    entries: HashMap<Backend, BackendEntry>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        for &backend in Backend::ALL.iter() {
            entries.insert(backend, BackendEntry::new(backend));
        }
        Self { entries }
    }

    pub fn get(&self, backend: Backend) -> Option<&BackendEntry> {
        self.entries.get(&backend)
    }

    pub fn get_mut(&mut self, backend: Backend) -> Option<&mut BackendEntry> {
        self.entries.get_mut(&backend)
    }

    pub fn ranked_by_health(&self) -> Vec<&BackendEntry> {
        let mut entries: Vec<&BackendEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            b.health
                .success_rate()
                .partial_cmp(&a.health.success_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.health.avg_latency_ms.cmp(&b.health.avg_latency_ms))
        });
        entries
    }

    pub fn mark_unavailable(&mut self, backend: Backend, reason: impl Into<String>) {
        if let Some(entry) = self.entries.get_mut(&backend) {
            entry.health.available = false;
            entry.health.status_message = Some(reason.into());
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Startup configuration: CLI flags layered over environment variables.
//!
//! A `clap` struct for local overrides, with
//! `env::var(..).unwrap_or_else(default)` for the values an operator sets
//! once per deployment.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Prompt optimization orchestration gateway", long_about = None)]
pub struct Args {
    /// Port the HTTP gateway listens on (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level filter passed to EnvFilter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Immutable process configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub classifier_url: Option<String>,
    pub planner_url: Option<String>,
    pub retrieval_url: Option<String>,
    pub runner_urls: RunnerUrls,
    pub default_cost_cap_usd: f64,
    pub default_latency_cap_ms: u64,
    pub default_max_variants: usize,
}

/// Per-backend runner overrides, one env var pair per backend kind.
#[derive(Debug, Clone, Default)]
pub struct RunnerUrls {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub google: Option<String>,
    pub safe_anthropic: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

impl Config {
    /// Load configuration from environment variables, with CLI flags taking
    /// precedence for the values `Args` exposes. Fatal at startup on
    /// malformed input — this is not a per-request concern.
    pub fn from_env(args: &Args) -> Result<Self, ConfigError> {
        let port = if let Some(p) = args.port {
            p
        } else {
            match std::env::var("PORT") {
                Ok(v) => v.parse().map_err(|_| ConfigError::Invalid {
                    field: "PORT",
                    value: v,
                })?,
                Err(_) => 8080,
            }
        };

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let rate_limit_per_minute = match std::env::var("RATE_LIMIT") {
            Ok(v) => v.parse().map_err(|_| ConfigError::Invalid {
                field: "RATE_LIMIT",
                value: v,
            })?,
            Err(_) => 60,
        };

        Ok(Self {
            port,
            allowed_origins,
            rate_limit_per_minute,
            classifier_url: std::env::var("CLASSIFIER_URL").ok(),
            planner_url: std::env::var("PLANNER_URL").ok(),
            retrieval_url: std::env::var("RETRIEVAL_URL").ok(),
            runner_urls: RunnerUrls {
                openai: std::env::var("OPENAI_RUNNER_URL").ok(),
                anthropic: std::env::var("ANTHROPIC_RUNNER_URL").ok(),
                google: std::env::var("GOOGLE_RUNNER_URL").ok(),
                safe_anthropic: std::env::var("SAFE_ANTHROPIC_RUNNER_URL").ok(),
            },
            default_cost_cap_usd: 1.0,
            default_latency_cap_ms: 10_000,
            default_max_variants: 5,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_port_overrides_default() {
        let args = Args {
            port: Some(9999),
            log_level: "info".into(),
        };
        let cfg = Config::from_env(&args).unwrap();
        assert_eq!(cfg.port, 9999);
    }

    #[test]
    fn defaults_without_env_or_cli() {
        let args = Args {
            port: None,
            log_level: "info".into(),
        };
        // Not asserting the exact port since the test process may inherit
        // PORT from the environment; just check it parses to *something*.
        let cfg = Config::from_env(&args).unwrap();
        assert!(cfg.port > 0);
        assert_eq!(cfg.default_max_variants, 5);
    }
}

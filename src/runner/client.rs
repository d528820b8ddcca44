//! Backend client polymorphism: one HTTP shape, four logical backends.
//!
//! Every backend is reached over the same `{prompt, temperature,
//! max_tokens} -> {content, tokens_used, finish_reason}` envelope — each
//! backend family's quirks live behind its own service, not in this
//! process. [`Backend::SafeAnthropic`] additionally runs prompts through a
//! `tool_use`/`tool_result` pre-filter before sending and repairs
//! malformed tool blocks from the response before handing it back.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use super::Backend;
use crate::types::{RunnerResult, Variant};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("backend returned an error response: {0}")]
    Http(String),
    #[error("backend response was malformed: {0}")]
    Malformed(String),
}

impl RunnerError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RunnerError::RateLimited)
    }
}

#[async_trait::async_trait]
pub trait RunnerClient: Send + Sync {
    async fn execute(&self, variant: &Variant) -> Result<RunnerResult, RunnerError>;
}

#[derive(Serialize)]
struct BackendRequest<'a> {
    prompt: &'a str,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct BackendResponse {
    content: String,
    tokens_used: u32,
    finish_reason: Option<String>,
    #[serde(default)]
    cost_usd: Option<f64>,
}

pub struct HttpRunnerClient {
    backend: Backend,
    base_url: String,
    http: reqwest::Client,
}

impl HttpRunnerClient {
    pub fn new(backend: Backend, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client with static, valid configuration always builds");
        Self {
            backend,
            base_url,
            http,
        }
    }
}

#[async_trait::async_trait]
impl RunnerClient for HttpRunnerClient {
    async fn execute(&self, variant: &Variant) -> Result<RunnerResult, RunnerError> {
        let prompt = if self.backend == Backend::SafeAnthropic {
            sanitize_tool_blocks(&variant.prompt)
        } else {
            variant.prompt.clone()
        };

        let request = BackendRequest {
            prompt: &prompt,
            temperature: variant.temperature,
            max_tokens: variant.est_tokens,
        };

        let response = self
            .http
            .post(format!("{}/v1/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RunnerError::Timeout
                } else {
                    RunnerError::Http(e.to_string())
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RunnerError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(RunnerError::Http(format!("status {}", response.status())));
        }

        let parsed: BackendResponse = response
            .json()
            .await
            .map_err(|e| RunnerError::Malformed(e.to_string()))?;

        let content = if self.backend == Backend::SafeAnthropic {
            repair_tool_blocks(&parsed.content)
        } else {
            parsed.content
        };

        let tokens_used = parsed.tokens_used;
        Ok(RunnerResult {
            variant_id: variant.id.clone(),
            content,
            tokens_used,
            latency_ms: 0,
            provider: self.backend.to_string(),
            model: self.backend.to_string(),
            finish_reason: parsed.finish_reason,
            error: None,
        })
    }
}

fn tool_use_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<tool_use>.*?</tool_use>")
            .expect("pattern literal is a compile-time-known valid regex")
    })
}

fn tool_result_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<tool_result>.*?</tool_result>")
            .expect("pattern literal is a compile-time-known valid regex")
    })
}

/// Strip any embedded tool_use/tool_result blocks from an outbound prompt.
/// This pipeline never invokes tools; a prompt containing such blocks is
/// either an injection attempt or stray context that would otherwise
/// confuse the backend's own tool-call parser.
pub fn sanitize_tool_blocks(prompt: &str) -> String {
    let stripped = tool_use_pattern().replace_all(prompt, "");
    tool_result_pattern().replace_all(&stripped, "").into_owned()
}

/// Repair a response that contains an orphaned `tool_use` block with no
/// matching `tool_result` (or vice versa) by dropping the orphan rather
/// than surfacing malformed XML-ish content to the evaluator.
pub fn repair_tool_blocks(content: &str) -> String {
    let use_count = tool_use_pattern().find_iter(content).count();
    let result_count = tool_result_pattern().find_iter(content).count();
    if use_count == result_count {
        return content.to_string();
    }
    let without_use = tool_use_pattern().replace_all(content, "");
    tool_result_pattern().replace_all(&without_use, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_tool_blocks() {
        let prompt = "solve this <tool_use>{\"name\":\"x\"}</tool_use> problem";
        let sanitized = sanitize_tool_blocks(prompt);
        assert!(!sanitized.contains("tool_use"));
        assert!(sanitized.contains("solve this"));
    }

    #[test]
    fn repair_drops_orphaned_tool_use() {
        let content = "answer: <tool_use>{\"name\":\"x\"}</tool_use> done";
        let repaired = repair_tool_blocks(content);
        assert!(!repaired.contains("tool_use"));
    }

    #[test]
    fn repair_leaves_balanced_blocks_alone() {
        let content = "<tool_use>a</tool_use><tool_result>b</tool_result>";
        assert_eq!(repair_tool_blocks(content), content);
    }
}

//! Safety sanitizer interface: S1's input gate and S8's output recheck.
//!
//! The actual pattern list that decides what counts as unsafe is out of
//! scope here — both call sites go through this interface so a future
//! pattern source (a managed service, a different ruleset) can replace
//! the stub without touching the orchestrator. The stub below reuses the
//! same risk-signature check the classifier already runs in S1, since it
//! is the only concrete pattern set this pipeline owns.

use regex::Regex;
use std::sync::OnceLock;

const OUTPUT_RISK_PATTERNS: &[&str] = &[
    r"(?i)\bhow to (make|build|synthesize) (a bomb|explosives|malware)\b",
    r"(?i)ignore (previous|all) instructions",
    r"(?i)\bjailbreak\b",
];

fn output_risk_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        OUTPUT_RISK_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("pattern literal is a compile-time-known valid regex"))
            .collect()
    })
}

#[derive(Debug, Clone)]
pub struct SafetyCheck {
    pub safe: bool,
    pub sanitized_prompt: Option<String>,
    pub blocked_reason: Option<String>,
}

/// Interface every safety backend implements. S1 calls this on the raw
/// prompt; S8 calls it again on each candidate response before selection.
pub trait SafetySanitizer: Send + Sync {
    fn check(&self, text: &str) -> SafetyCheck;
}

/// Only backend wired up today: rejects text matching the fixed output
/// risk patterns. A managed moderation service would implement the same
/// trait without the orchestrator noticing the swap.
pub struct PatternSanitizer;

impl SafetySanitizer for PatternSanitizer {
    fn check(&self, text: &str) -> SafetyCheck {
        let hit = output_risk_patterns().iter().find(|re| re.is_match(text));
        match hit {
            Some(pattern) => SafetyCheck {
                safe: false,
                sanitized_prompt: None,
                blocked_reason: Some(format!("matched pattern: {}", pattern.as_str())),
            },
            None => SafetyCheck {
                safe: true,
                sanitized_prompt: Some(text.to_string()),
                blocked_reason: None,
            },
        }
    }
}

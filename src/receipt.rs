//! Tamper-evident receipts: deterministic hashing, canonical signing input,
//! and Ed25519 sign/verify over a process-scoped keypair.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::TechniqueId;

pub const FLOW_VERSION: &str = "3.0.0";

/// Signed, tamper-evident summary of the pipeline's decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub flow_version: String,
    pub planner_hash: String,
    pub builder_hash: String,
    pub runner_model: String,
    pub timestamp: String,
    pub signature: String,
}

/// The fields covered by the signature, excluding `trace_id` which is
/// carried alongside but not part of the `Receipt` struct itself.
#[derive(Serialize)]
struct SigningInput<'a> {
    flow_version: &'a str,
    planner_hash: &'a str,
    builder_hash: &'a str,
    runner_model: &'a str,
    timestamp: &'a str,
    trace_id: &'a str,
}

/// 8-lower-hex prefix of SHA-256 over the deterministic serialization of a
/// technique list. `hash(x) = hash(x)`: same input always yields the same
/// bytes, since the list is serialized in its given order without
/// reordering — callers that need order-independence must sort first.
pub fn hash_techniques(techniques: &[TechniqueId]) -> String {
    let joined = techniques
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let digest = Sha256::digest(joined.as_bytes());
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    let full: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    full[..n].to_string()
}

/// Canonical JSON: sorted keys, no whitespace, UTF-8. Built by hand rather
/// than relying on a serializer's key order, since `serde_json::Value`'s
/// `Map` is insertion-ordered by default.
fn canonical_message(input: &SigningInput<'_>) -> String {
    format!(
        "{{\"builder_hash\":\"{}\",\"flow_version\":\"{}\",\"planner_hash\":\"{}\",\"runner_model\":\"{}\",\"timestamp\":\"{}\",\"trace_id\":\"{}\"}}",
        escape(input.builder_hash),
        escape(input.flow_version),
        escape(input.planner_hash),
        escape(input.runner_model),
        escape(input.timestamp),
        escape(input.trace_id),
    )
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Process-scoped signing keypair, generated once at startup.
pub struct SigningKeypair {
    signing_key: SigningKey,
}

impl SigningKeypair {
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Read-only accessor for external verifiers.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_base64(&self) -> String {
        base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            self.public_key().to_bytes(),
        )
    }

    /// Build and sign a receipt for a completed optimization.
    pub fn sign(
        &self,
        trace_id: &str,
        planner_hash: String,
        builder_hash: String,
        runner_model: String,
        timestamp: String,
    ) -> Receipt {
        let input = SigningInput {
            flow_version: FLOW_VERSION,
            planner_hash: &planner_hash,
            builder_hash: &builder_hash,
            runner_model: &runner_model,
            timestamp: &timestamp,
            trace_id,
        };
        let message = canonical_message(&input);
        let signature: Signature = self.signing_key.sign(message.as_bytes());
        let signature_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            signature.to_bytes(),
        );
        Receipt {
            flow_version: FLOW_VERSION.to_string(),
            planner_hash,
            builder_hash,
            runner_model,
            timestamp,
            signature: signature_b64,
        }
    }
}

/// Verify a receipt against a trace_id using a verifying (public) key.
/// Any field mismatch, including a substituted `trace_id`, fails
/// verification since `trace_id` is part of the signed message.
pub fn verify(receipt: &Receipt, trace_id: &str, public_key: &VerifyingKey) -> bool {
    let input = SigningInput {
        flow_version: &receipt.flow_version,
        planner_hash: &receipt.planner_hash,
        builder_hash: &receipt.builder_hash,
        runner_model: &receipt.runner_model,
        timestamp: &receipt.timestamp,
        trace_id,
    };
    let message = canonical_message(&input);
    let Ok(sig_bytes) = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        &receipt.signature,
    ) else {
        return false;
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    public_key.verify(message.as_bytes(), &signature).is_ok()
}

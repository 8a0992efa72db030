//! Callback signature check: sha1 over the sorted token, timestamp and nonce.

use serde::Deserialize;
use sha1::{Digest, Sha1};

/// Query parameters WeChat appends to every callback URL.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub nonce: String,
    /// Present only on the URL verification handshake.
    #[serde(default)]
    pub echostr: Option<String>,
    #[serde(default)]
    pub openid: Option<String>,
    /// `aes` when the account runs in encrypted mode.
    #[serde(default)]
    pub encrypt_type: Option<String>,
    #[serde(default)]
    pub msg_signature: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature parameters")]
    Missing,
    #[error("signature mismatch")]
    Mismatch,
}

/// Callback `signature`: hex sha1 of the sorted token, timestamp and nonce.
pub fn sign(token: &str, timestamp: &str, nonce: &str) -> String {
    sorted_sha1(&mut [token, timestamp, nonce])
}

/// `msg_signature` for encrypted payloads: as [`sign`], with the ciphertext as a fourth part.
pub fn msg_signature(token: &str, timestamp: &str, nonce: &str, encrypt: &str) -> String {
    sorted_sha1(&mut [token, timestamp, nonce, encrypt])
}

fn sorted_sha1(parts: &mut [&str]) -> String {
    parts.sort_unstable();
    let mut hasher = Sha1::new();
    for p in parts.iter() {
        hasher.update(p.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Constant-time string comparison.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl CallbackQuery {
    pub fn verify(&self, token: &str) -> Result<(), SignatureError> {
        if self.signature.is_empty() || self.timestamp.is_empty() || self.nonce.is_empty() {
            return Err(SignatureError::Missing);
        }
        let expected = sign(token, &self.timestamp, &self.nonce);
        if constant_time_eq(&expected, &self.signature.trim().to_ascii_lowercase()) {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypt_type
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case("aes"))
            .unwrap_or(false)
    }
}

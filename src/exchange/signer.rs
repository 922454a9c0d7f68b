//! Credential handling and request signing.
//!
//! The secret is held by the Gate worker and never crosses an actor
//! boundary after construction.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;

use crate::core::{Error, Result};

/// API key plus decoded signing secret.
pub struct Credentials {
    api_key: String,
    secret: Vec<u8>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_b64: &str) -> Result<Self> {
        let secret = BASE64
            .decode(secret_b64.trim())
            .map_err(|e| Error::Auth(format!("secret is not valid base64: {}", e)))?;
        Ok(Self { api_key: api_key.into(), secret })
    }

    /// Load from two files whose first line is, respectively, the key and
    /// the secret.
    pub fn load(key_file: &Path, secret_file: &Path) -> Result<Self> {
        Self::new(first_line(key_file)?, &first_line(secret_file)?)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// HMAC-SHA256 over path, nonce and the encoded request body,
    /// base64-encoded for the API-Sign header.
    pub fn sign(&self, path: &str, nonce: u64, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
            .expect("hmac accepts keys of any length");
        mac.update(path.as_bytes());
        mac.update(nonce.to_string().as_bytes());
        mac.update(body.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }
}

fn first_line(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Auth(format!("cannot read {}: {}", path.display(), e)))?;
    let line = content
        .lines()
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::Auth(format!("{} is empty", path.display())))?;
    Ok(line.to_string())
}

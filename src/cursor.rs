use anyhow::{anyhow, Result};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::OnceLock;

/// Global HMAC key for cursor signing
static HMAC_KEY: OnceLock<Vec<u8>> = OnceLock::new();

fn random_key() -> Vec<u8> {
    rand::random::<[u8; 32]>().to_vec()
}

/// Initialize the HMAC key for cursor signing
/// If secret is None, generates a random key (WARNING: cursors won't survive restarts)
pub fn init_cursor_hmac_key(secret: Option<&str>) {
    let key = match secret {
        Some(s) => s.as_bytes().to_vec(),
        None => random_key(),
    };

    HMAC_KEY.get_or_init(|| key);
}

fn get_hmac_key() -> &'static [u8] {
    HMAC_KEY.get_or_init(random_key)
}

/// Position of the last click on a page, newest-first ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorData {
    /// Click timestamp (Unix seconds)
    pub timestamp: i64,
    pub id: i64,
}

fn sign(payload: &str) -> Result<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(get_hmac_key())
        .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Create a signed cursor (`payload.signature`)
pub fn create_cursor(data: &CursorData) -> Result<String> {
    let json = serde_json::to_string(data)?;
    let payload = BASE64_URL_SAFE_NO_PAD.encode(json.as_bytes());

    let signature = sign(&payload)?.finalize().into_bytes();
    let signature_b64 = BASE64_URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{}.{}", payload, signature_b64))
}

/// Verify and decode a cursor
pub fn verify_cursor(cursor: &str) -> Result<CursorData> {
    let Some((payload, signature_b64)) = cursor.split_once('.') else {
        return Err(anyhow!("Invalid cursor format"));
    };
    if signature_b64.contains('.') {
        return Err(anyhow!("Invalid cursor format"));
    }

    let expected_bytes = sign(payload)?.finalize().into_bytes();
    let provided_bytes = BASE64_URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| anyhow!("Invalid cursor signature encoding"))?;

    // Constant-time comparison
    use subtle::ConstantTimeEq;
    if !bool::from(expected_bytes.ct_eq(&provided_bytes[..])) {
        return Err(anyhow!("Cursor signature verification failed"));
    }

    let json_bytes = BASE64_URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| anyhow!("Invalid cursor payload encoding"))?;
    serde_json::from_slice(&json_bytes).map_err(|_| anyhow!("Invalid cursor data"))
}

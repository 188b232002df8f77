use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::models::{Envelope, MAX_TIMESTAMP_SKEW_SEC};

type HmacSha256 = Hmac<Sha256>;

/// Generate a fresh Ed25519 keypair from OS randomness.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let mut secret_bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut secret_bytes);
    let signing_key = SigningKey::from_bytes(&secret_bytes);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Derive a keypair deterministically from a caller-provided 32-byte seed.
/// The seed is never persisted.
pub fn keypair_from_seed(seed: &[u8; 32]) -> (SigningKey, VerifyingKey) {
    let signing_key = SigningKey::from_bytes(seed);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

pub fn encode_public_key(key: &VerifyingKey) -> String {
    B64.encode(key.as_bytes())
}

pub fn encode_secret_key(key: &SigningKey) -> String {
    B64.encode(key.to_bytes())
}

pub fn decode_public_key(b64: &str) -> Option<VerifyingKey> {
    let bytes = B64.decode(b64).ok()?;
    let arr: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&arr).ok()
}

pub fn decode_seed(b64: &str) -> Option<[u8; 32]> {
    let bytes = B64.decode(b64).ok()?;
    bytes.try_into().ok()
}

/// Rebuild a signing key from the base64 secret returned at registration.
/// Client-side half of the protocol; the hub itself never stores secrets.
pub fn signing_key_from_secret(b64: &str) -> Option<SigningKey> {
    decode_seed(b64).map(|bytes| SigningKey::from_bytes(&bytes))
}

/// `did:seed:<base58(public key)>` for seed-derived identities.
pub fn did_from_public_key(key: &VerifyingKey) -> String {
    format!("did:seed:{}", bs58::encode(key.as_bytes()).into_string())
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Base64 SHA-256 of the JSON serialization of the body; an absent body
/// hashes as `{}`. Signer and verifier each hash the value they hold;
/// `serde_json` gives both the same bytes for the same value.
pub fn body_hash_b64(body: &serde_json::Value) -> String {
    let bytes = if body.is_null() {
        b"{}".to_vec()
    } else {
        serde_json::to_vec(body).unwrap_or_default()
    };
    B64.encode(Sha256::digest(&bytes))
}

/// Canonical envelope signing base, newline-joined:
/// `timestamp`, SHA-256(body) base64, `from`, `to`, correlation id or empty.
pub fn signing_base(
    timestamp: &str,
    body: &serde_json::Value,
    from: &str,
    to: &str,
    correlation_id: Option<&str>,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}",
        timestamp,
        body_hash_b64(body),
        from,
        to,
        correlation_id.unwrap_or("")
    )
}

/// Sign the canonical base; returns the base64 signature. Used by tests and
/// the client side of the protocol.
pub fn sign_base(key: &SigningKey, base: &str) -> String {
    B64.encode(key.sign(base.as_bytes()).to_bytes())
}

pub fn verify_base(key: &VerifyingKey, base: &str, sig_b64: &str) -> bool {
    let Ok(sig_bytes) = B64.decode(sig_b64) else {
        return false;
    };
    let Ok(arr) = <[u8; 64]>::try_from(sig_bytes) else {
        return false;
    };
    let signature = Signature::from_bytes(&arr);
    key.verify(base.as_bytes(), &signature).is_ok()
}

/// Verify an envelope signature against a set of candidate public keys
/// (active keys plus any still inside their rotation grace window).
pub fn verify_envelope(envelope: &Envelope, keys: &[VerifyingKey]) -> bool {
    let Some(sig) = &envelope.signature else {
        return false;
    };
    if sig.alg != "ed25519" {
        return false;
    }
    let base = signing_base(
        &envelope.timestamp,
        &envelope.body,
        &envelope.from,
        &envelope.to,
        envelope.correlation_id.as_deref(),
    );
    keys.iter().any(|k| verify_base(k, &base, &sig.sig))
}

/// Parse an ISO 8601 timestamp and enforce the ±300 s ingress skew window.
pub fn check_timestamp_skew(timestamp: &str, now_ms: i64) -> Result<(), String> {
    let parsed = chrono::DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| format!("Invalid ISO 8601 timestamp: {e}"))?;
    let ts_ms = parsed.timestamp_millis();
    let skew_ms = (now_ms - ts_ms).abs();
    if skew_ms > MAX_TIMESTAMP_SKEW_SEC * 1000 {
        return Err(format!(
            "Timestamp outside ±{MAX_TIMESTAMP_SKEW_SEC}s skew window"
        ));
    }
    Ok(())
}

/// `Digest` header value for HTTP-signed requests: `SHA-256=<base64 hash>`.
pub fn body_digest_header(body: &[u8]) -> String {
    format!("SHA-256={}", B64.encode(Sha256::digest(body)))
}

/// HTTP Signature canonical string: `(request-target)`, `date` and the body
/// digest, newline-joined in that order.
pub fn http_signing_string(method: &str, path: &str, date: &str, digest: &str) -> String {
    format!(
        "(request-target): {} {}\ndate: {}\ndigest: {}",
        method.to_lowercase(),
        path,
        date,
        digest
    )
}

/// Parse an HTTP `Date` header; accepts RFC 2822 (the HTTP form) or RFC 3339.
pub fn check_date_skew(date: &str, now_ms: i64) -> Result<(), String> {
    let ts_ms = chrono::DateTime::parse_from_rfc2822(date)
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(date))
        .map_err(|e| format!("Invalid Date header: {e}"))?
        .timestamp_millis();
    if (now_ms - ts_ms).abs() > MAX_TIMESTAMP_SKEW_SEC * 1000 {
        return Err(format!(
            "Date header outside ±{MAX_TIMESTAMP_SKEW_SEC}s skew window"
        ));
    }
    Ok(())
}

/// HMAC-SHA256 of the payload, hex-encoded. Used for webhook signing.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time HMAC verification via `Mac::verify_slice`.
pub fn hmac_verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

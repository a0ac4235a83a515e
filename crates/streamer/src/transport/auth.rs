// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handshake verification for stream clients.
//!
//! Clients present a base64 token (a JSON object `{app_id, user_id}`) and an
//! RSASSA-PKCS1-v1_5/SHA-256 signature computed over the decoded token bytes.
//! The signature parameter is consumed as raw bytes; signers must not
//! base64-encode it.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::HandshakeError;

/// Identity asserted by a verified handshake token.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeClaim {
    pub app_id: String,
    pub user_id: String,
}

/// Verify client handshake material extracted from the upgrade query.
///
/// `skip_signature` (testing deployments) bypasses the key load and signature
/// check; the token must still decode and its `app_id` must still match the
/// declared one.
pub fn verify_handshake(
    token: &str,
    signature: &[u8],
    declared_app_id: &str,
    key_path: &Path,
    skip_signature: bool,
) -> Result<HandshakeClaim, HandshakeError> {
    let raw = BASE64.decode(token).map_err(|_| HandshakeError::MalformedToken)?;
    let claim: HandshakeClaim =
        serde_json::from_slice(&raw).map_err(|_| HandshakeError::MalformedToken)?;

    if !skip_signature {
        verify_signature(&raw, signature, key_path)?;
    }

    if claim.app_id != declared_app_id {
        return Err(HandshakeError::AppIdMismatch);
    }
    Ok(claim)
}

/// Check the signature over the decoded token bytes.
///
/// The public key (PEM, PKIX) is re-read on every attempt; an unreadable or
/// unparseable key fails that attempt only.
fn verify_signature(
    token_bytes: &[u8],
    signature: &[u8],
    key_path: &Path,
) -> Result<(), HandshakeError> {
    let pem = std::fs::read_to_string(key_path).map_err(|e| {
        tracing::warn!(path = %key_path.display(), err = %e, "handshake key unavailable");
        HandshakeError::KeyUnavailable
    })?;
    let key = RsaPublicKey::from_public_key_pem(&pem).map_err(|e| {
        tracing::warn!(path = %key_path.display(), err = %e, "handshake key unparseable");
        HandshakeError::KeyUnavailable
    })?;

    let digest = Sha256::digest(token_bytes);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| HandshakeError::BadSignature)
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;

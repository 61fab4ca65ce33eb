//! JWK thumbprints (RFC 7638) and access token hashes (RFC 9449 §4.2)

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{errors::DpopError, types::DpopJwk, Result};

// Field order is the lexicographic member order required by RFC 7638 §3.2;
// serde emits struct fields in declaration order.
#[derive(Serialize)]
struct RsaThumbprintInput<'a> {
    e: &'a str,
    kty: &'static str,
    n: &'a str,
}

#[derive(Serialize)]
struct EcThumbprintInput<'a> {
    crv: &'static str,
    kty: &'static str,
    x: &'a str,
    y: &'a str,
}

/// Canonical JSON of the required JWK members, no whitespace
pub fn canonical_jwk_json(jwk: &DpopJwk) -> Result<String> {
    let canonical = match jwk {
        DpopJwk::Rsa { n, e } => serde_json::to_string(&RsaThumbprintInput { e, kty: "RSA", n }),
        DpopJwk::Ec { crv, x, y } => serde_json::to_string(&EcThumbprintInput {
            crv: crv.as_str(),
            kty: "EC",
            x,
            y,
        }),
    };

    canonical.map_err(|e| DpopError::MissingOrInvalidJwk {
        reason: format!("Failed to serialize JWK for thumbprint: {e}"),
    })
}

/// Compute the JWK thumbprint: `base64url(SHA-256(canonical JSON))`
pub fn compute_jwk_thumbprint(jwk: &DpopJwk) -> Result<String> {
    let canonical = canonical_jwk_json(jwk)?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
}

/// Compute the `ath` claim for an access token
pub fn compute_access_token_hash(access_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()))
}

//! DPoP proof signing and validation
//!
//! [`DpopProofSigner`] builds a fresh proof per outgoing request.
//! [`DpopProofValidator`] checks an incoming proof in a fixed order; the first
//! failing step decides the error:
//!
//! 1. header `typ` and `alg`
//! 2. header `jwk`
//! 3. signature over the received `header.payload` bytes
//! 4. required claims
//! 5. `iat`/`exp` window
//! 6. `htm`
//! 7. `htu`
//! 8. `ath`
//! 9. `nonce`
//! 10. `jti` replay check (the only step with a side effect)
//! 11. JWK thumbprint
//!
//! [`DpopProofValidator::validate_for_resource`] also checks the token's
//! `cnf.jkt` binding ahead of step 10, so a proof rejected for its binding does
//! not use up its `jti`.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use rsa::traits::PublicKeyParts;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Sha256, Sha384, Sha512};
use signature::{SignatureEncoding, Signer, Verifier};

use crate::{
    binding::{constant_time_eq, TokenBinder},
    config::DpopConfig,
    errors::DpopError,
    http::normalize_htu,
    jwk::{from_jwk, to_jwk},
    replay::{random_identifier, ReplayCache, ReplayGuard},
    thumbprint::{compute_access_token_hash, compute_jwk_thumbprint},
    types::{
        DpopAlgorithm, DpopClaims, DpopHeader, DpopJwk, DpopKeyPair, DpopPrivateKey,
        DpopProof, DpopPublicKey, EcPublicKey, ValidatedProof,
    },
    Result, DPOP_JWT_TYPE, MAX_PROOF_LIFETIME_SECONDS,
};

/// Creates DPoP proofs with one key pair
#[derive(Debug, Clone)]
pub struct DpopProofSigner {
    key_pair: DpopKeyPair,
}

impl DpopProofSigner {
    /// Sign with `key_pair` using its algorithm
    pub fn new(key_pair: DpopKeyPair) -> Self {
        Self { key_pair }
    }

    /// The signing key pair
    pub fn key_pair(&self) -> &DpopKeyPair {
        &self.key_pair
    }

    /// Thumbprint of the signing key, the `jkt` a server will bind tokens to
    pub fn thumbprint(&self) -> &str {
        &self.key_pair.thumbprint
    }

    /// Create a proof for `method` and `uri`
    ///
    /// Query and fragment are stripped from `uri`. When `access_token` is given
    /// its hash is bound through `ath`; `nonce` is echoed verbatim.
    pub fn sign(
        &self,
        method: &str,
        uri: &str,
        access_token: Option<&str>,
        nonce: Option<&str>,
    ) -> Result<DpopProof> {
        self.sign_at(method, uri, access_token, nonce, Utc::now().timestamp())
    }

    /// [`sign`](Self::sign) with an explicit issue time (Unix seconds)
    pub fn sign_at(
        &self,
        method: &str,
        uri: &str,
        access_token: Option<&str>,
        nonce: Option<&str>,
        issued_at: i64,
    ) -> Result<DpopProof> {
        let htm = method.trim().to_ascii_uppercase();
        if htm.is_empty() || !htm.bytes().all(is_token_char) {
            return Err(DpopError::ProofCreationFailed {
                reason: format!("Invalid HTTP method: '{method}'"),
            });
        }

        let htu = normalize_htu(uri).ok_or_else(|| DpopError::ProofCreationFailed {
            reason: format!("Invalid HTTP URI: '{uri}'"),
        })?;

        let algorithm = self.key_pair.algorithm;
        let header = DpopHeader {
            typ: DPOP_JWT_TYPE.to_string(),
            algorithm,
            jwk: to_jwk(&self.key_pair.public_key, algorithm)?,
        };

        let claims = DpopClaims {
            jti: random_identifier(),
            htm,
            htu,
            iat: issued_at,
            exp: issued_at.saturating_add(MAX_PROOF_LIFETIME_SECONDS),
            ath: access_token.map(compute_access_token_hash),
            nonce: nonce.map(str::to_string),
        };

        let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
        let signature = sign_message(self.key_pair.private_key(), algorithm, signing_input.as_bytes())?;
        let jwt = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature));

        tracing::debug!(
            key_id = %self.key_pair.id,
            algorithm = %algorithm,
            jti = %claims.jti,
            htm = %claims.htm,
            htu = %claims.htu,
            "Generated DPoP proof"
        );

        Ok(DpopProof::new(header, claims, jwt))
    }
}

/// Verifies incoming DPoP proofs against the request they arrived with
#[derive(Debug, Clone)]
pub struct DpopProofValidator {
    config: DpopConfig,
    replay_cache: Arc<dyn ReplayCache>,
}

impl DpopProofValidator {
    /// Validator with default settings and its own in-memory replay cache
    pub fn new() -> Self {
        Self::with_config(DpopConfig::default())
    }

    /// Validator with `config` and an in-memory replay cache sized from it
    ///
    /// `config` is used as given; call [`DpopConfig::validate`] first to reject
    /// out-of-range settings read from external sources.
    pub fn with_config(config: DpopConfig) -> Self {
        let replay_cache = Arc::new(ReplayGuard::from_config(&config));
        Self::with_replay_cache(config, replay_cache)
    }

    /// Validator sharing an existing replay cache
    ///
    /// Every validator protecting the same resource must share one cache, or a
    /// proof rejected by one instance could be accepted by another.
    pub fn with_replay_cache(config: DpopConfig, replay_cache: Arc<dyn ReplayCache>) -> Self {
        Self {
            config,
            replay_cache,
        }
    }

    /// Active settings
    pub fn config(&self) -> &DpopConfig {
        &self.config
    }

    /// The replay cache consulted in step 10
    pub fn replay_cache(&self) -> &Arc<dyn ReplayCache> {
        &self.replay_cache
    }

    /// Issue a server nonce through the replay cache
    pub fn generate_nonce(&self) -> String {
        self.replay_cache.generate_nonce()
    }

    /// Validate `proof` for a request with `method` and `uri`
    ///
    /// `access_token` is the token presented with the request, if any.
    /// `expected_nonce` is the nonce the server last issued to this client.
    pub fn validate(
        &self,
        proof: &str,
        method: &str,
        uri: &str,
        access_token: Option<&str>,
        expected_nonce: Option<&str>,
    ) -> Result<ValidatedProof> {
        self.validate_at(
            proof,
            method,
            uri,
            access_token,
            expected_nonce,
            Utc::now().timestamp(),
        )
    }

    /// [`validate`](Self::validate) with an explicit clock (Unix seconds)
    pub fn validate_at(
        &self,
        proof: &str,
        method: &str,
        uri: &str,
        access_token: Option<&str>,
        expected_nonce: Option<&str>,
        now: i64,
    ) -> Result<ValidatedProof> {
        let request = RequestContext {
            method,
            uri,
            access_token,
            expected_nonce,
            token_claims: None,
        };
        self.checked(proof, &request, now)
    }

    /// Protected-resource check: validate the proof together with its token binding
    ///
    /// The proof must carry `ath` for `access_token` whatever the configuration,
    /// and its key must match `token_claims.cnf.jkt`. Both are checked before the
    /// `jti` is recorded.
    pub fn validate_for_resource(
        &self,
        proof: &str,
        method: &str,
        uri: &str,
        access_token: &str,
        token_claims: &Map<String, Value>,
        expected_nonce: Option<&str>,
    ) -> Result<ValidatedProof> {
        self.validate_for_resource_at(
            proof,
            method,
            uri,
            access_token,
            token_claims,
            expected_nonce,
            Utc::now().timestamp(),
        )
    }

    /// [`validate_for_resource`](Self::validate_for_resource) with an explicit clock
    #[allow(clippy::too_many_arguments)]
    pub fn validate_for_resource_at(
        &self,
        proof: &str,
        method: &str,
        uri: &str,
        access_token: &str,
        token_claims: &Map<String, Value>,
        expected_nonce: Option<&str>,
        now: i64,
    ) -> Result<ValidatedProof> {
        let request = RequestContext {
            method,
            uri,
            access_token: Some(access_token),
            expected_nonce,
            token_claims: Some(token_claims),
        };
        self.checked(proof, &request, now)
    }

    fn checked(&self, proof: &str, request: &RequestContext<'_>, now: i64) -> Result<ValidatedProof> {
        let result = self.run_checks(proof, request, now);

        match &result {
            Ok(validated) => tracing::debug!(
                jti = %validated.claims.jti,
                jkt = %validated.thumbprint,
                algorithm = %validated.algorithm,
                "DPoP proof validated"
            ),
            Err(e) if e.is_security_violation() => {
                tracing::warn!(error = %e, severity = %e.severity(), "DPoP proof rejected")
            }
            Err(e) => tracing::debug!(error = %e, "DPoP proof rejected"),
        }

        result
    }

    fn run_checks(&self, proof: &str, request: &RequestContext<'_>, now: i64) -> Result<ValidatedProof> {
        let segments = CompactJws::split(proof)?;

        // Steps 1 and 2
        let (algorithm, jwk) = decode_header(segments.header)?;
        if !self.config.allows(algorithm) {
            return Err(DpopError::UnsupportedAlgorithm {
                algorithm: algorithm.to_string(),
            });
        }
        let public_key = self.public_key_for(&jwk, algorithm)?;

        // Step 3
        let signature = URL_SAFE_NO_PAD.decode(segments.signature).map_err(|e| {
            DpopError::SignatureVerificationFailed {
                reason: format!("Invalid signature encoding: {e}"),
            }
        })?;
        verify_signature(&public_key, algorithm, segments.signing_input.as_bytes(), &signature)?;

        // Step 4
        let claims = decode_claims(segments.payload)?;

        // Steps 5 to 9
        self.check_time_window(&claims, now)?;
        check_method(&claims, request.method)?;
        check_uri(&claims, request.uri)?;
        self.check_access_token_hash(&claims, request.access_token)?;
        check_nonce(&claims, request.expected_nonce)?;

        // Step 11, ahead of step 10 so the binding check can use it
        let thumbprint = compute_jwk_thumbprint(&jwk)?;

        if let Some(token_claims) = request.token_claims {
            if claims.ath.is_none() {
                return Err(DpopError::AccessTokenHashMismatch {
                    reason: "Proof for a protected resource must carry ath".to_string(),
                });
            }
            TokenBinder::ensure_bound_to(token_claims, &thumbprint)?;
        }

        // Step 10, held until the proof's own expiry
        if !self.replay_cache.check_and_record(&claims.jti, claims.exp, now)? {
            return Err(DpopError::ReplayDetected {
                jti: claims.jti.clone(),
            });
        }

        Ok(ValidatedProof {
            thumbprint,
            algorithm,
            jwk,
            claims,
        })
    }

    fn public_key_for(&self, jwk: &DpopJwk, algorithm: DpopAlgorithm) -> Result<DpopPublicKey> {
        if !jwk.supports(algorithm) {
            return Err(DpopError::MissingOrInvalidJwk {
                reason: format!("{} key cannot verify {algorithm} signatures", jwk.key_type()),
            });
        }

        let public_key = from_jwk(jwk)?;

        if let DpopPublicKey::Rsa(key) = &public_key {
            let bits = key.n().bits();
            if bits < self.config.min_rsa_modulus_bits {
                return Err(DpopError::MissingOrInvalidJwk {
                    reason: format!(
                        "RSA modulus of {bits} bits is below the {}-bit minimum",
                        self.config.min_rsa_modulus_bits
                    ),
                });
            }
        }

        Ok(public_key)
    }

    fn check_time_window(&self, claims: &DpopClaims, now: i64) -> Result<()> {
        if claims.exp < now {
            return Err(DpopError::ProofExpired {
                expires_at: claims.exp,
                now,
            });
        }

        let skew = self.config.clock_skew_seconds;
        if claims.iat > now.saturating_add(skew) {
            return Err(DpopError::ProofIssuedInFuture {
                issued_at: claims.iat,
                now,
                max_skew_seconds: skew,
            });
        }

        let lifetime = claims.exp.saturating_sub(claims.iat);
        if lifetime > MAX_PROOF_LIFETIME_SECONDS {
            return Err(DpopError::ProofLifetimeTooLong {
                lifetime_seconds: lifetime,
                max_lifetime_seconds: MAX_PROOF_LIFETIME_SECONDS,
            });
        }

        Ok(())
    }

    fn check_access_token_hash(&self, claims: &DpopClaims, access_token: Option<&str>) -> Result<()> {
        let Some(token) = access_token else {
            return Ok(());
        };

        match &claims.ath {
            Some(ath) => {
                if !constant_time_eq(ath, &compute_access_token_hash(token)) {
                    return Err(DpopError::AccessTokenHashMismatch {
                        reason: "ath does not match the presented access token".to_string(),
                    });
                }
            }
            None if self.config.require_access_token_hash => {
                return Err(DpopError::AccessTokenHashMismatch {
                    reason: "Proof carries no ath but an access token was presented".to_string(),
                });
            }
            None => {}
        }

        Ok(())
    }
}

impl Default for DpopProofValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl DpopProof {
    /// Parse a compact proof without verifying it
    ///
    /// The result keeps the exact input string, so a later signature check covers
    /// the bytes the client actually sent.
    pub fn from_jwt_string(jwt: &str) -> Result<Self> {
        let segments = CompactJws::split(jwt)?;
        let (algorithm, jwk) = decode_header(segments.header)?;
        let claims = decode_claims(segments.payload)?;

        let header = DpopHeader {
            typ: DPOP_JWT_TYPE.to_string(),
            algorithm,
            jwk,
        };

        Ok(Self::new(header, claims, jwt.to_string()))
    }
}

/// The request a proof is checked against
struct RequestContext<'a> {
    method: &'a str,
    uri: &'a str,
    access_token: Option<&'a str>,
    expected_nonce: Option<&'a str>,
    token_claims: Option<&'a Map<String, Value>>,
}

/// Borrowed segments of a compact JWS
struct CompactJws<'a> {
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
    signing_input: &'a str,
}

impl<'a> CompactJws<'a> {
    fn split(jwt: &'a str) -> Result<Self> {
        let malformed = || DpopError::InvalidProofType {
            reason: "Proof is not a compact JWS with three segments".to_string(),
        };

        let (signing_input, signature) = jwt.rsplit_once('.').ok_or_else(malformed)?;
        let (header, payload) = signing_input.split_once('.').ok_or_else(malformed)?;

        if header.is_empty() || payload.is_empty() || signature.is_empty() || payload.contains('.') {
            return Err(malformed());
        }

        Ok(Self {
            header,
            payload,
            signature,
            signing_input,
        })
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value).map_err(|e| DpopError::ProofCreationFailed {
        reason: format!("Failed to serialize proof segment: {e}"),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_json_object(segment: &str) -> Option<Map<String, Value>> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(object) => Some(object),
        _ => None,
    }
}

fn decode_header(segment: &str) -> Result<(DpopAlgorithm, DpopJwk)> {
    let header = decode_json_object(segment).ok_or_else(|| DpopError::InvalidProofType {
        reason: "Header is not a base64url JSON object".to_string(),
    })?;

    match header.get("typ").and_then(Value::as_str) {
        Some(DPOP_JWT_TYPE) => {}
        Some(other) => {
            return Err(DpopError::InvalidProofType {
                reason: format!("Expected typ '{DPOP_JWT_TYPE}', got '{other}'"),
            })
        }
        None => {
            return Err(DpopError::InvalidProofType {
                reason: "Header is missing typ".to_string(),
            })
        }
    }

    let algorithm: DpopAlgorithm = header
        .get("alg")
        .and_then(Value::as_str)
        .ok_or_else(|| DpopError::UnsupportedAlgorithm {
            algorithm: "<missing>".to_string(),
        })?
        .parse()?;

    let jwk = header.get("jwk").ok_or_else(|| DpopError::MissingOrInvalidJwk {
        reason: "Header is missing jwk".to_string(),
    })?;
    let jwk = DpopJwk::from_json(jwk)?;

    Ok((algorithm, jwk))
}

fn decode_claims(segment: &str) -> Result<DpopClaims> {
    let payload = decode_json_object(segment).ok_or_else(|| DpopError::MissingRequiredClaim {
        claim: "payload".to_string(),
    })?;

    Ok(DpopClaims {
        jti: required_string(&payload, "jti")?,
        htm: required_string(&payload, "htm")?,
        htu: required_string(&payload, "htu")?,
        iat: required_timestamp(&payload, "iat")?,
        exp: required_timestamp(&payload, "exp")?,
        ath: optional_string(&payload, "ath")?,
        nonce: optional_string(&payload, "nonce")?,
    })
}

fn missing(claim: &str) -> DpopError {
    DpopError::MissingRequiredClaim {
        claim: claim.to_string(),
    }
}

fn required_string(payload: &Map<String, Value>, claim: &str) -> Result<String> {
    match payload.get(claim).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(missing(claim)),
    }
}

fn optional_string(payload: &Map<String, Value>, claim: &str) -> Result<Option<String>> {
    match payload.get(claim) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(missing(claim)),
    }
}

// NumericDate may carry a fraction; whole seconds are enough here
fn required_timestamp(payload: &Map<String, Value>, claim: &str) -> Result<i64> {
    let value = payload.get(claim).ok_or_else(|| missing(claim))?;
    value
        .as_i64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        })
        .ok_or_else(|| missing(claim))
}

// RFC 9110 tchar
fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn check_method(claims: &DpopClaims, method: &str) -> Result<()> {
    let method = method.trim();
    if !claims.htm.eq_ignore_ascii_case(method) {
        return Err(DpopError::HttpMethodMismatch {
            expected: method.to_ascii_uppercase(),
            actual: claims.htm.clone(),
        });
    }
    Ok(())
}

fn check_uri(claims: &DpopClaims, uri: &str) -> Result<()> {
    let expected = normalize_htu(uri).unwrap_or_else(|| uri.to_string());
    if claims.htu != expected {
        return Err(DpopError::HttpUriMismatch {
            expected,
            actual: claims.htu.clone(),
        });
    }
    Ok(())
}

fn check_nonce(claims: &DpopClaims, expected_nonce: Option<&str>) -> Result<()> {
    let Some(expected) = expected_nonce else {
        return Ok(());
    };

    match &claims.nonce {
        Some(nonce) if constant_time_eq(nonce, expected) => Ok(()),
        Some(_) => Err(DpopError::NonceMismatch {
            reason: "Proof nonce does not match the issued nonce".to_string(),
        }),
        None => Err(DpopError::NonceMismatch {
            reason: "Proof carries no nonce but one was issued".to_string(),
        }),
    }
}

fn sign_message(key: &DpopPrivateKey, algorithm: DpopAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
    let failed = |e: signature::Error| DpopError::ProofCreationFailed {
        reason: format!("{algorithm} signing failed: {e}"),
    };

    let signature = match (key, algorithm) {
        (DpopPrivateKey::Rsa(key), DpopAlgorithm::RS256) => {
            let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new((**key).clone());
            signer.try_sign(message).map_err(failed)?.to_vec()
        }
        (DpopPrivateKey::Rsa(key), DpopAlgorithm::RS384) => {
            let signer = rsa::pkcs1v15::SigningKey::<Sha384>::new((**key).clone());
            signer.try_sign(message).map_err(failed)?.to_vec()
        }
        (DpopPrivateKey::Rsa(key), DpopAlgorithm::RS512) => {
            let signer = rsa::pkcs1v15::SigningKey::<Sha512>::new((**key).clone());
            signer.try_sign(message).map_err(failed)?.to_vec()
        }
        (DpopPrivateKey::P256(key), DpopAlgorithm::ES256) => {
            let signer = p256::ecdsa::SigningKey::from_bytes(&key.to_bytes()).map_err(failed)?;
            let signature: p256::ecdsa::Signature = signer.try_sign(message).map_err(failed)?;
            signature.to_bytes().to_vec()
        }
        (DpopPrivateKey::P384(key), DpopAlgorithm::ES384) => {
            let signer = p384::ecdsa::SigningKey::from_bytes(&key.to_bytes()).map_err(failed)?;
            let signature: p384::ecdsa::Signature = signer.try_sign(message).map_err(failed)?;
            signature.to_bytes().to_vec()
        }
        (DpopPrivateKey::P521(key), DpopAlgorithm::ES512) => {
            let signer = p521::ecdsa::SigningKey::from_bytes(&key.to_bytes()).map_err(failed)?;
            let signature: p521::ecdsa::Signature = signer.try_sign(message).map_err(failed)?;
            signature.to_bytes().to_vec()
        }
        (_, algorithm) => {
            return Err(DpopError::UnsupportedAlgorithm {
                algorithm: format!("{algorithm} with {} key", key.public_key().key_type()),
            })
        }
    };

    Ok(signature)
}

fn verify_signature(
    key: &DpopPublicKey,
    algorithm: DpopAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let invalid = |e: signature::Error| DpopError::SignatureVerificationFailed {
        reason: format!("{algorithm} signature rejected: {e}"),
    };

    match (key, algorithm) {
        (DpopPublicKey::Rsa(key), DpopAlgorithm::RS256 | DpopAlgorithm::RS384 | DpopAlgorithm::RS512) => {
            let signature = rsa::pkcs1v15::Signature::try_from(signature).map_err(invalid)?;
            match algorithm {
                DpopAlgorithm::RS256 => rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone())
                    .verify(message, &signature),
                DpopAlgorithm::RS384 => rsa::pkcs1v15::VerifyingKey::<Sha384>::new(key.clone())
                    .verify(message, &signature),
                _ => rsa::pkcs1v15::VerifyingKey::<Sha512>::new(key.clone())
                    .verify(message, &signature),
            }
            .map_err(invalid)
        }
        (DpopPublicKey::Ec(EcPublicKey::P256(key)), DpopAlgorithm::ES256) => {
            let signature = p256::ecdsa::Signature::from_slice(signature).map_err(invalid)?;
            p256::ecdsa::VerifyingKey::from(key)
                .verify(message, &signature)
                .map_err(invalid)
        }
        (DpopPublicKey::Ec(EcPublicKey::P384(key)), DpopAlgorithm::ES384) => {
            let signature = p384::ecdsa::Signature::from_slice(signature).map_err(invalid)?;
            p384::ecdsa::VerifyingKey::from(key)
                .verify(message, &signature)
                .map_err(invalid)
        }
        (DpopPublicKey::Ec(EcPublicKey::P521(key)), DpopAlgorithm::ES512) => {
            use p256::elliptic_curve::sec1::ToEncodedPoint;

            let signature = p521::ecdsa::Signature::from_slice(signature).map_err(invalid)?;
            p521::ecdsa::VerifyingKey::from_sec1_bytes(key.to_encoded_point(false).as_bytes())
                .map_err(invalid)?
                .verify(message, &signature)
                .map_err(invalid)
        }
        _ => Err(DpopError::SignatureVerificationFailed {
            reason: format!("{} key cannot verify {algorithm}", key.key_type()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const URI: &str = "https://api.example.com/resource";
    const NOW: i64 = 1_700_000_000;

    fn es256_signer() -> DpopProofSigner {
        DpopProofSigner::new(DpopKeyPair::generate(DpopAlgorithm::ES256).unwrap())
    }

    /// Re-sign arbitrary header/payload JSON with the signer's key
    fn forge(signer: &DpopProofSigner, header: &Value, payload: &Value) -> String {
        let input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        );
        let signature = sign_message(
            signer.key_pair().private_key(),
            signer.key_pair().algorithm,
            input.as_bytes(),
        )
        .unwrap();
        format!("{input}.{}", URL_SAFE_NO_PAD.encode(signature))
    }

    fn header_json(signer: &DpopProofSigner) -> Value {
        let jwk = to_jwk(&signer.key_pair().public_key, signer.key_pair().algorithm).unwrap();
        serde_json::json!({"typ": "dpop+jwt", "alg": "ES256", "jwk": jwk})
    }

    #[test]
    fn test_proof_generation_and_validation() {
        let signer = es256_signer();
        let proof = signer.sign_at("post", URI, None, None, NOW).unwrap();

        assert_eq!(proof.header.typ, "dpop+jwt");
        assert_eq!(proof.claims.htm, "POST");
        assert_eq!(proof.claims.exp - proof.claims.iat, 60);
        assert_eq!(proof.claims.jti.len(), 22);

        let validated = DpopProofValidator::new()
            .validate_at(proof.as_str(), "POST", URI, None, None, NOW + 5)
            .unwrap();

        assert_eq!(validated.thumbprint, signer.thumbprint());
        assert_eq!(validated.algorithm, DpopAlgorithm::ES256);
        assert_eq!(validated.claims, proof.claims);
    }

    #[test]
    fn test_uri_cleaned_on_both_sides() {
        let signer = es256_signer();
        let proof = signer
            .sign_at("GET", "https://api.example.com/resource?q=1#top", None, None, NOW)
            .unwrap();
        assert_eq!(proof.claims.htu, URI);

        let validator = DpopProofValidator::new();
        assert!(validator
            .validate_at(proof.as_str(), "GET", "https://api.example.com/resource?other=2", None, None, NOW)
            .is_ok());
    }

    #[test]
    fn test_signer_rejects_bad_inputs() {
        let signer = es256_signer();
        for (method, uri) in [("", URI), ("GE T", URI), ("GET", "not-a-uri"), ("GET", "ftp://x/y")] {
            assert!(matches!(
                signer.sign_at(method, uri, None, None, NOW),
                Err(DpopError::ProofCreationFailed { .. })
            ));
        }
    }

    #[test]
    fn test_wrong_typ_rejected() {
        let signer = es256_signer();
        let mut header = header_json(&signer);
        header["typ"] = "JWT".into();
        let payload = serde_json::json!({"jti": "a", "htm": "GET", "htu": URI, "iat": NOW, "exp": NOW + 60});

        let err = DpopProofValidator::new()
            .validate_at(&forge(&signer, &header, &payload), "GET", URI, None, None, NOW)
            .unwrap_err();
        assert!(matches!(err, DpopError::InvalidProofType { .. }));
    }

    #[test]
    fn test_unsupported_algorithms_rejected() {
        let signer = es256_signer();
        let payload = serde_json::json!({"jti": "a", "htm": "GET", "htu": URI, "iat": NOW, "exp": NOW + 60});

        for alg in ["none", "HS256", "PS256"] {
            let mut header = header_json(&signer);
            header["alg"] = alg.into();
            let err = DpopProofValidator::new()
                .validate_at(&forge(&signer, &header, &payload), "GET", URI, None, None, NOW)
                .unwrap_err();
            assert_eq!(
                err,
                DpopError::UnsupportedAlgorithm {
                    algorithm: alg.to_string()
                }
            );
        }

        // Supported in general but not allowed by this validator
        let config = crate::DpopConfigBuilder::new()
            .allowed_algorithms(vec![DpopAlgorithm::ES384])
            .unwrap()
            .build();
        let proof = signer.sign_at("GET", URI, None, None, NOW).unwrap();
        assert!(matches!(
            DpopProofValidator::with_config(config).validate_at(proof.as_str(), "GET", URI, None, None, NOW),
            Err(DpopError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn test_jwk_problems() {
        let signer = es256_signer();
        let payload = serde_json::json!({"jti": "a", "htm": "GET", "htu": URI, "iat": NOW, "exp": NOW + 60});
        let validator = DpopProofValidator::new();

        let mut header = header_json(&signer);
        header.as_object_mut().unwrap().remove("jwk");
        assert!(matches!(
            validator.validate_at(&forge(&signer, &header, &payload), "GET", URI, None, None, NOW),
            Err(DpopError::MissingOrInvalidJwk { .. })
        ));

        let mut header = header_json(&signer);
        header["jwk"]["kty"] = "OKP".into();
        assert!(matches!(
            validator.validate_at(&forge(&signer, &header, &payload), "GET", URI, None, None, NOW),
            Err(DpopError::UnsupportedKeyType { .. })
        ));

        let mut header = header_json(&signer);
        header["jwk"]["crv"] = "secp256k1".into();
        assert!(matches!(
            validator.validate_at(&forge(&signer, &header, &payload), "GET", URI, None, None, NOW),
            Err(DpopError::UnsupportedCurve { .. })
        ));

        let mut header = header_json(&signer);
        header["jwk"]["d"] = "c2VjcmV0".into();
        assert!(matches!(
            validator.validate_at(&forge(&signer, &header, &payload), "GET", URI, None, None, NOW),
            Err(DpopError::MissingOrInvalidJwk { .. })
        ));

        // An EC P-256 key with alg ES384
        let mut header = header_json(&signer);
        header["alg"] = "ES384".into();
        assert!(matches!(
            validator.validate_at(&forge(&signer, &header, &payload), "GET", URI, None, None, NOW),
            Err(DpopError::MissingOrInvalidJwk { .. })
        ));
    }

    #[test]
    fn test_signature_from_other_key_rejected() {
        let signer = es256_signer();
        let other = es256_signer();
        let proof = signer.sign_at("GET", URI, None, None, NOW).unwrap();

        // Swap in a header carrying the other key
        let header = URL_SAFE_NO_PAD.encode(header_json(&other).to_string());
        let mut parts = proof.as_str().splitn(2, '.');
        let _ = parts.next();
        let tampered = format!("{header}.{}", parts.next().unwrap());

        let err = DpopProofValidator::new()
            .validate_at(&tampered, "GET", URI, None, None, NOW)
            .unwrap_err();
        assert!(matches!(err, DpopError::SignatureVerificationFailed { .. }));
    }

    #[test]
    fn test_signature_covers_received_bytes() {
        let signer = es256_signer();
        let proof = signer.sign_at("GET", URI, None, None, NOW).unwrap();

        // Same claims, different JSON whitespace: the signature must not verify
        let (header, rest) = proof.as_str().split_once('.').unwrap();
        let (_, signature) = rest.split_once('.').unwrap();
        let reencoded = serde_json::to_string_pretty(&proof.claims).unwrap();
        let tampered = format!("{header}.{}.{signature}", URL_SAFE_NO_PAD.encode(reencoded));

        assert!(matches!(
            DpopProofValidator::new().validate_at(&tampered, "GET", URI, None, None, NOW),
            Err(DpopError::SignatureVerificationFailed { .. })
        ));
    }

    #[test]
    fn test_missing_claims() {
        let signer = es256_signer();
        let header = header_json(&signer);
        let complete = serde_json::json!({"jti": "a", "htm": "GET", "htu": URI, "iat": NOW, "exp": NOW + 60});

        for claim in ["jti", "htm", "htu", "iat", "exp"] {
            let mut payload = complete.clone();
            payload.as_object_mut().unwrap().remove(claim);
            let err = DpopProofValidator::new()
                .validate_at(&forge(&signer, &header, &payload), "GET", URI, None, None, NOW)
                .unwrap_err();
            assert_eq!(
                err,
                DpopError::MissingRequiredClaim {
                    claim: claim.to_string()
                }
            );
        }

        let mut payload = complete;
        payload["iat"] = "yesterday".into();
        assert!(matches!(
            DpopProofValidator::new().validate_at(&forge(&signer, &header, &payload), "GET", URI, None, None, NOW),
            Err(DpopError::MissingRequiredClaim { .. })
        ));
    }

    #[test]
    fn test_time_window() {
        let signer = es256_signer();
        let validator = DpopProofValidator::new();

        let proof = signer.sign_at("GET", URI, None, None, NOW - 120).unwrap();
        assert_eq!(
            validator
                .validate_at(proof.as_str(), "GET", URI, None, None, NOW)
                .unwrap_err(),
            DpopError::ProofExpired {
                expires_at: NOW - 60,
                now: NOW
            }
        );

        // exp == now is still valid
        let proof = signer.sign_at("GET", URI, None, None, NOW - 60).unwrap();
        assert!(validator.validate_at(proof.as_str(), "GET", URI, None, None, NOW).is_ok());

        let proof = signer.sign_at("GET", URI, None, None, NOW + 301).unwrap();
        assert!(matches!(
            validator.validate_at(proof.as_str(), "GET", URI, None, None, NOW),
            Err(DpopError::ProofIssuedInFuture { max_skew_seconds: 300, .. })
        ));

        // Within the skew tolerance
        let proof = signer.sign_at("GET", URI, None, None, NOW + 300).unwrap();
        assert!(validator.validate_at(proof.as_str(), "GET", URI, None, None, NOW).is_ok());
    }

    #[test]
    fn test_overlong_lifetime_rejected() {
        let signer = es256_signer();
        let payload = serde_json::json!({"jti": "a", "htm": "GET", "htu": URI, "iat": NOW, "exp": NOW + 3600});

        assert_eq!(
            DpopProofValidator::new()
                .validate_at(&forge(&signer, &header_json(&signer), &payload), "GET", URI, None, None, NOW)
                .unwrap_err(),
            DpopError::ProofLifetimeTooLong {
                lifetime_seconds: 3600,
                max_lifetime_seconds: 60
            }
        );
    }

    #[test]
    fn test_access_token_hash() {
        let signer = es256_signer();
        let validator = DpopProofValidator::new();

        let bound = signer.sign_at("GET", URI, Some("token-a"), None, NOW).unwrap();
        assert!(validator
            .validate_at(bound.as_str(), "GET", URI, Some("token-a"), None, NOW)
            .is_ok());

        let bound = signer.sign_at("GET", URI, Some("token-a"), None, NOW).unwrap();
        assert!(matches!(
            validator.validate_at(bound.as_str(), "GET", URI, Some("token-b"), None, NOW),
            Err(DpopError::AccessTokenHashMismatch { .. })
        ));

        let unbound = signer.sign_at("GET", URI, None, None, NOW).unwrap();
        assert!(matches!(
            validator.validate_at(unbound.as_str(), "GET", URI, Some("token-a"), None, NOW),
            Err(DpopError::AccessTokenHashMismatch { .. })
        ));

        // ath is ignored when no token accompanies the proof
        let bound = signer.sign_at("GET", URI, Some("token-a"), None, NOW).unwrap();
        assert!(validator.validate_at(bound.as_str(), "GET", URI, None, None, NOW).is_ok());

        let lenient = DpopProofValidator::with_config(
            crate::DpopConfigBuilder::new()
                .require_access_token_hash(false)
                .build(),
        );
        let unbound = signer.sign_at("GET", URI, None, None, NOW).unwrap();
        assert!(lenient
            .validate_at(unbound.as_str(), "GET", URI, Some("token-a"), None, NOW)
            .is_ok());
    }

    #[test]
    fn test_nonce() {
        let signer = es256_signer();
        let validator = DpopProofValidator::new();
        let nonce = validator.generate_nonce();

        let proof = signer.sign_at("GET", URI, None, Some(&nonce), NOW).unwrap();
        assert!(validator
            .validate_at(proof.as_str(), "GET", URI, None, Some(&nonce), NOW)
            .is_ok());

        let proof = signer.sign_at("GET", URI, None, Some("stale"), NOW).unwrap();
        assert!(matches!(
            validator.validate_at(proof.as_str(), "GET", URI, None, Some(&nonce), NOW),
            Err(DpopError::NonceMismatch { .. })
        ));

        let proof = signer.sign_at("GET", URI, None, None, NOW).unwrap();
        assert!(matches!(
            validator.validate_at(proof.as_str(), "GET", URI, None, Some(&nonce), NOW),
            Err(DpopError::NonceMismatch { .. })
        ));
    }

    #[test]
    fn test_failed_validation_does_not_consume_jti() {
        let signer = es256_signer();
        let validator = DpopProofValidator::new();
        let proof = signer.sign_at("GET", URI, None, None, NOW).unwrap();

        assert!(matches!(
            validator.validate_at(proof.as_str(), "POST", URI, None, None, NOW),
            Err(DpopError::HttpMethodMismatch { .. })
        ));
        assert!(validator.validate_at(proof.as_str(), "GET", URI, None, None, NOW).is_ok());
        assert!(matches!(
            validator.validate_at(proof.as_str(), "GET", URI, None, None, NOW),
            Err(DpopError::ReplayDetected { .. })
        ));
    }

    #[test]
    fn test_from_jwt_string() {
        let signer = es256_signer();
        let proof = signer.sign_at("DELETE", URI, Some("t"), Some("n"), NOW).unwrap();

        let parsed = DpopProof::from_jwt_string(proof.as_str()).unwrap();
        assert_eq!(parsed, proof);
        assert_eq!(parsed.to_jwt_string(), proof.to_string());

        for malformed in ["", "a.b", "a.b.c.d", "..", "!!!.e30.sig"] {
            assert!(matches!(
                DpopProof::from_jwt_string(malformed),
                Err(DpopError::InvalidProofType { .. })
            ));
        }
    }

    #[test]
    fn test_fractional_timestamps_accepted() {
        let signer = es256_signer();
        let payload = serde_json::json!({"jti": "a", "htm": "GET", "htu": URI, "iat": NOW as f64 + 0.5, "exp": NOW as f64 + 30.5});

        let validated = DpopProofValidator::new()
            .validate_at(&forge(&signer, &header_json(&signer), &payload), "GET", URI, None, None, NOW)
            .unwrap();
        assert_eq!(validated.claims.iat, NOW);
        assert_eq!(validated.claims.exp, NOW + 30);
    }

    #[test]
    fn test_extension_methods() {
        let signer = es256_signer();
        let validator = DpopProofValidator::new();

        let proof = signer.sign_at("m-search", URI, None, None, NOW).unwrap();
        assert_eq!(proof.claims.htm, "M-SEARCH");
        assert!(matches!(
            validator.validate_at(proof.as_str(), " post ", URI, None, None, NOW),
            Err(DpopError::HttpMethodMismatch { expected, actual })
                if expected == "POST" && actual == "M-SEARCH"
        ));
        assert!(validator.validate_at(proof.as_str(), " M-SEARCH ", URI, None, None, NOW).is_ok());

        for method in ["GET()", "GET/1", "\"GET\"", "P@TCH"] {
            assert!(matches!(
                signer.sign_at(method, URI, None, None, NOW),
                Err(DpopError::ProofCreationFailed { .. })
            ));
        }
    }

    #[test]
    fn test_shared_cache_holds_jti_until_exp_under_large_skew() {
        let config = crate::DpopConfigBuilder::new()
            .clock_skew_seconds(3600)
            .unwrap()
            .build();
        let cache: Arc<dyn ReplayCache> = Arc::new(ReplayGuard::new(1000));
        let validator = DpopProofValidator::with_replay_cache(config, Arc::clone(&cache));
        let strict = DpopProofValidator::with_replay_cache(DpopConfig::default(), cache);

        // Client clock runs 50 minutes ahead, within the tolerated skew
        let proof = es256_signer().sign_at("GET", URI, None, None, NOW + 3000).unwrap();
        assert!(validator.validate_at(proof.as_str(), "GET", URI, None, None, NOW).is_ok());

        for at in [NOW + 400, NOW + 3000, NOW + 3060] {
            assert!(matches!(
                validator.validate_at(proof.as_str(), "GET", URI, None, None, at),
                Err(DpopError::ReplayDetected { .. })
            ));
        }
        assert!(matches!(
            strict.validate_at(proof.as_str(), "GET", URI, None, None, NOW + 3000),
            Err(DpopError::ReplayDetected { .. })
        ));
        assert!(matches!(
            validator.validate_at(proof.as_str(), "GET", URI, None, None, NOW + 3061),
            Err(DpopError::ProofExpired { .. })
        ));
    }

    #[test]
    fn test_out_of_range_config_does_not_panic() {
        let config: DpopConfig =
            serde_json::from_value(serde_json::json!({"clock_skew_seconds": i64::MAX})).unwrap();
        assert!(matches!(
            config.validate(),
            Err(DpopError::ConfigurationError { .. })
        ));

        let validator = DpopProofValidator::with_config(config);
        let proof = es256_signer().sign_at("GET", URI, None, None, NOW + 10_000).unwrap();
        assert!(validator.validate_at(proof.as_str(), "GET", URI, None, None, NOW).is_ok());
        assert!(matches!(
            validator.validate_at(proof.as_str(), "GET", URI, None, None, NOW + 5_000),
            Err(DpopError::ReplayDetected { .. })
        ));

        let config: DpopConfig =
            serde_json::from_value(serde_json::json!({"clock_skew_seconds": i64::MIN})).unwrap();
        let proof = es256_signer().sign_at("GET", URI, None, None, NOW).unwrap();
        assert!(matches!(
            DpopProofValidator::with_config(config).validate_at(proof.as_str(), "GET", URI, None, None, NOW),
            Err(DpopError::ProofIssuedInFuture { .. })
        ));
    }

    #[test]
    fn test_rejected_binding_does_not_consume_jti() {
        let signer = es256_signer();
        let validator = DpopProofValidator::new();
        let proof = signer.sign_at("GET", URI, Some("token"), None, NOW).unwrap();

        let foreign = TokenBinder::bind(Map::new(), "some-other-key-thumbprint").unwrap();
        assert!(matches!(
            validator.validate_for_resource_at(proof.as_str(), "GET", URI, "token", &foreign, None, NOW),
            Err(DpopError::TokenNotBoundToKey { .. })
        ));

        let bound = TokenBinder::bind(Map::new(), signer.thumbprint()).unwrap();
        assert!(validator
            .validate_for_resource_at(proof.as_str(), "GET", URI, "token", &bound, None, NOW)
            .is_ok());
        assert!(matches!(
            validator.validate_for_resource_at(proof.as_str(), "GET", URI, "token", &bound, None, NOW),
            Err(DpopError::ReplayDetected { .. })
        ));
    }

    #[test]
    fn test_missing_ath_for_resource_does_not_consume_jti() {
        let signer = es256_signer();
        let config = crate::DpopConfigBuilder::new()
            .require_access_token_hash(false)
            .build();
        let validator = DpopProofValidator::with_config(config);
        let proof = signer.sign_at("GET", URI, None, None, NOW).unwrap();
        let bound = TokenBinder::bind(Map::new(), signer.thumbprint()).unwrap();

        assert!(matches!(
            validator.validate_for_resource_at(proof.as_str(), "GET", URI, "token", &bound, None, NOW),
            Err(DpopError::AccessTokenHashMismatch { .. })
        ));
        assert!(validator
            .validate_at(proof.as_str(), "GET", URI, Some("token"), None, NOW)
            .is_ok());
    }
}

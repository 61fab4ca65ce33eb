//! DPoP error types and classification
//!
//! Every failure in this crate is reported as a [`DpopError`]. Parse failures from
//! base64, JSON, or the underlying crypto libraries are folded into the nearest
//! structural variant so callers only ever match on this enum.

use std::fmt;

use thiserror::Error;

/// DPoP-specific errors with enough context for debugging and security analysis
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DpopError {
    /// The proof is not a `dpop+jwt` typed compact JWS
    #[error("Invalid DPoP proof type: {reason}")]
    InvalidProofType {
        /// Detailed reason for the rejection
        reason: String,
    },

    /// The `alg` header (or requested signing algorithm) is not supported
    #[error("Unsupported DPoP algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        /// Algorithm name as received
        algorithm: String,
    },

    /// The header `jwk` is absent, malformed, or carries private key material
    #[error("Missing or invalid JWK: {reason}")]
    MissingOrInvalidJwk {
        /// Detailed reason for the rejection
        reason: String,
    },

    /// The JWK `kty` is neither `RSA` nor `EC`
    #[error("Unsupported JWK key type: {kty}")]
    UnsupportedKeyType {
        /// Key type as received
        kty: String,
    },

    /// The JWK `crv` is not P-256, P-384 or P-521
    #[error("Unsupported elliptic curve: {crv}")]
    UnsupportedCurve {
        /// Curve name as received
        crv: String,
    },

    /// A mandatory payload claim is missing or has the wrong JSON type
    #[error("Missing required DPoP claim: {claim}")]
    MissingRequiredClaim {
        /// Claim name
        claim: String,
    },

    /// The proof signature does not verify under the embedded public key
    #[error("DPoP signature verification failed: {reason}")]
    SignatureVerificationFailed {
        /// Detailed reason for the failure
        reason: String,
    },

    /// The proof `exp` lies in the past
    #[error("DPoP proof expired at {expires_at} (now {now})")]
    ProofExpired {
        /// Proof expiry (Unix timestamp)
        expires_at: i64,
        /// Validation time (Unix timestamp)
        now: i64,
    },

    /// The proof `iat` lies further in the future than the clock skew allows
    #[error("DPoP proof issued in the future: iat {issued_at}, now {now}, skew {max_skew_seconds}s")]
    ProofIssuedInFuture {
        /// Proof issue time (Unix timestamp)
        issued_at: i64,
        /// Validation time (Unix timestamp)
        now: i64,
        /// Maximum tolerated skew in seconds
        max_skew_seconds: i64,
    },

    /// The proof declares a validity window longer than the fixed maximum
    #[error("DPoP proof lifetime {lifetime_seconds}s exceeds maximum {max_lifetime_seconds}s")]
    ProofLifetimeTooLong {
        /// `exp - iat` in seconds
        lifetime_seconds: i64,
        /// Maximum allowed lifetime in seconds
        max_lifetime_seconds: i64,
    },

    /// `htm` does not match the request method
    #[error("HTTP method mismatch: proof has '{actual}', request uses '{expected}'")]
    HttpMethodMismatch {
        /// Method of the request being authorized
        expected: String,
        /// Method bound in the proof
        actual: String,
    },

    /// `htu` does not match the request URI
    #[error("HTTP URI mismatch: proof has '{actual}', request uses '{expected}'")]
    HttpUriMismatch {
        /// URI of the request being authorized
        expected: String,
        /// URI bound in the proof
        actual: String,
    },

    /// `ath` is missing or does not hash the presented access token
    #[error("Access token hash mismatch: {reason}")]
    AccessTokenHashMismatch {
        /// Detailed reason for the mismatch
        reason: String,
    },

    /// The proof does not carry the server-issued nonce
    #[error("DPoP nonce mismatch: {reason}")]
    NonceMismatch {
        /// Detailed reason for the mismatch
        reason: String,
    },

    /// The access token `cnf.jkt` does not match the proof key
    #[error("Access token not bound to proof key: token jkt '{expected}', proof jkt '{actual}'")]
    TokenNotBoundToKey {
        /// Thumbprint from the token (`<none>` when the token is unbound)
        expected: String,
        /// Thumbprint of the proof key
        actual: String,
    },

    /// The claim set already carries a different `cnf.jkt`
    #[error("Token claims already bound to key '{existing}'")]
    TokenAlreadyBound {
        /// Thumbprint already present in the claims
        existing: String,
    },

    /// The proof `jti` was already consumed
    #[error("Replay detected: jti '{jti}' already used")]
    ReplayDetected {
        /// The reused proof identifier
        jti: String,
    },

    /// Proof construction failed on the signer side
    #[error("DPoP proof creation failed: {reason}")]
    ProofCreationFailed {
        /// Detailed reason for the failure
        reason: String,
    },

    /// Key generation, loading or encoding failed
    #[error("Key management error: {reason}")]
    KeyManagementError {
        /// Detailed reason for the key operation failure
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    ConfigurationError {
        /// Detailed reason for the configuration error
        reason: String,
    },
}

impl DpopError {
    /// Check if this error indicates a security violation
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Self::ReplayDetected { .. }
                | Self::SignatureVerificationFailed { .. }
                | Self::AccessTokenHashMismatch { .. }
                | Self::TokenNotBoundToKey { .. }
                | Self::TokenAlreadyBound { .. }
        )
    }

    /// Check if this error is due to client clock skew
    pub fn is_clock_skew_error(&self) -> bool {
        matches!(
            self,
            Self::ProofExpired { .. } | Self::ProofIssuedInFuture { .. }
        )
    }

    /// Check if this error is a cryptographic failure
    pub fn is_cryptographic_error(&self) -> bool {
        matches!(
            self,
            Self::SignatureVerificationFailed { .. }
                | Self::ProofCreationFailed { .. }
                | Self::KeyManagementError { .. }
        )
    }

    /// Get error severity for logging and monitoring
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // Critical security violations
            Self::ReplayDetected { .. } => ErrorSeverity::Critical,
            Self::TokenNotBoundToKey { .. } => ErrorSeverity::Critical,

            // High severity errors
            Self::SignatureVerificationFailed { .. } => ErrorSeverity::High,
            Self::AccessTokenHashMismatch { .. } => ErrorSeverity::High,
            Self::TokenAlreadyBound { .. } => ErrorSeverity::High,
            Self::ProofCreationFailed { .. } => ErrorSeverity::High,
            Self::KeyManagementError { .. } => ErrorSeverity::High,

            // Medium severity errors (often client-side issues)
            Self::ProofExpired { .. } => ErrorSeverity::Medium,
            Self::ProofIssuedInFuture { .. } => ErrorSeverity::Medium,
            Self::ProofLifetimeTooLong { .. } => ErrorSeverity::Medium,
            Self::HttpMethodMismatch { .. } => ErrorSeverity::Medium,
            Self::HttpUriMismatch { .. } => ErrorSeverity::Medium,
            Self::NonceMismatch { .. } => ErrorSeverity::Medium,
            Self::InvalidProofType { .. } => ErrorSeverity::Medium,
            Self::MissingOrInvalidJwk { .. } => ErrorSeverity::Medium,
            Self::MissingRequiredClaim { .. } => ErrorSeverity::Medium,

            // Low severity errors (unsupported inputs, configuration)
            Self::UnsupportedAlgorithm { .. } => ErrorSeverity::Low,
            Self::UnsupportedKeyType { .. } => ErrorSeverity::Low,
            Self::UnsupportedCurve { .. } => ErrorSeverity::Low,
            Self::ConfigurationError { .. } => ErrorSeverity::Low,
        }
    }

    /// HTTP status an upstream handler should answer with
    ///
    /// Proof problems are `400 Bad Request`; a token that is not bound to the
    /// demonstrated key is `401 Unauthorized`. Signer-side failures are `500`.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::TokenNotBoundToKey { .. } => 401,
            Self::ProofCreationFailed { .. }
            | Self::KeyManagementError { .. }
            | Self::ConfigurationError { .. }
            | Self::TokenAlreadyBound { .. } => 500,
            _ => 400,
        }
    }

    /// OAuth error code for the `error` parameter of the response (RFC 9449 §7.1, §9)
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::NonceMismatch { .. } => "use_dpop_nonce",
            Self::TokenNotBoundToKey { .. } => "invalid_token",
            Self::ProofCreationFailed { .. }
            | Self::KeyManagementError { .. }
            | Self::ConfigurationError { .. }
            | Self::TokenAlreadyBound { .. } => "server_error",
            _ => "invalid_dpop_proof",
        }
    }

    /// Get suggested remediation for this error
    pub fn remediation_hint(&self) -> &'static str {
        match self {
            Self::ProofExpired { .. } | Self::ProofIssuedInFuture { .. } => {
                "Synchronize system clock and generate a fresh DPoP proof"
            }
            Self::ReplayDetected { .. } => "Generate a new DPoP proof with a fresh jti",
            Self::NonceMismatch { .. } => "Retry with the nonce from the DPoP-Nonce header",
            Self::TokenNotBoundToKey { .. } => {
                "Sign the proof with the key the access token was issued to"
            }
            Self::HttpMethodMismatch { .. } | Self::HttpUriMismatch { .. } => {
                "Create the proof for the exact method and URI of the request"
            }
            Self::InvalidProofType { .. } | Self::MissingRequiredClaim { .. } => {
                "Check DPoP proof format against RFC 9449"
            }
            Self::UnsupportedAlgorithm { .. }
            | Self::UnsupportedKeyType { .. }
            | Self::UnsupportedCurve { .. } => {
                "Use one of RS256, RS384, RS512, ES256, ES384 or ES512"
            }
            Self::ConfigurationError { .. } => "Review DPoP configuration parameters",
            _ => "Check logs for detailed error information",
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Low severity - unsupported input or configuration issues
    Low,
    /// Medium severity - client errors or misconfigurations
    Medium,
    /// High severity - cryptographic failures
    High,
    /// Critical severity - security violations requiring immediate attention
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

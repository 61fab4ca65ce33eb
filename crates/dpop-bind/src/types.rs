//! Core DPoP types and data structures
//!
//! This module implements the fundamental types for RFC 9449 DPoP (Demonstration
//! of Proof-of-Possession): algorithms, curves, key material, JWKs, proof headers,
//! proof claims and validation results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::errors::DpopError;

/// DPoP signature algorithms (RFC 7518 §3.1)
///
/// Only asymmetric algorithms are representable, so `none` and the HMAC family
/// can never reach signature verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DpopAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256
    #[serde(rename = "RS256")]
    RS256,
    /// RSASSA-PKCS1-v1_5 with SHA-384
    #[serde(rename = "RS384")]
    RS384,
    /// RSASSA-PKCS1-v1_5 with SHA-512
    #[serde(rename = "RS512")]
    RS512,
    /// ECDSA using P-256 and SHA-256
    #[serde(rename = "ES256")]
    ES256,
    /// ECDSA using P-384 and SHA-384
    #[serde(rename = "ES384")]
    ES384,
    /// ECDSA using P-521 and SHA-512
    #[serde(rename = "ES512")]
    ES512,
}

impl DpopAlgorithm {
    /// Every supported algorithm, in the order advertised to clients
    pub const ALL: [DpopAlgorithm; 6] = [
        Self::ES256,
        Self::ES384,
        Self::ES512,
        Self::RS256,
        Self::RS384,
        Self::RS512,
    ];

    /// Get the algorithm name as specified in RFC 7518
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
        }
    }

    /// Whether this algorithm signs with an RSA key
    pub fn is_rsa(self) -> bool {
        matches!(self, Self::RS256 | Self::RS384 | Self::RS512)
    }

    /// The curve an ECDSA algorithm is defined over
    pub fn curve(self) -> Option<EcCurve> {
        match self {
            Self::ES256 => Some(EcCurve::P256),
            Self::ES384 => Some(EcCurve::P384),
            Self::ES512 => Some(EcCurve::P521),
            Self::RS256 | Self::RS384 | Self::RS512 => None,
        }
    }
}

impl fmt::Display for DpopAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DpopAlgorithm {
    type Err = DpopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.as_str() == s)
            .ok_or_else(|| DpopError::UnsupportedAlgorithm {
                algorithm: s.to_string(),
            })
    }
}

/// NIST curves accepted in EC JWKs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcCurve {
    /// NIST P-256 (secp256r1)
    #[serde(rename = "P-256")]
    P256,
    /// NIST P-384 (secp384r1)
    #[serde(rename = "P-384")]
    P384,
    /// NIST P-521 (secp521r1)
    #[serde(rename = "P-521")]
    P521,
}

impl EcCurve {
    /// JWK `crv` name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }

    /// Byte length of one affine coordinate (RFC 7518 §6.2.1.2)
    pub fn coordinate_len(self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }

    /// The ECDSA algorithm that signs over this curve
    pub fn algorithm(self) -> DpopAlgorithm {
        match self {
            Self::P256 => DpopAlgorithm::ES256,
            Self::P384 => DpopAlgorithm::ES384,
            Self::P521 => DpopAlgorithm::ES512,
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EcCurve {
    type Err = DpopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P-256" => Ok(Self::P256),
            "P-384" => Ok(Self::P384),
            "P-521" => Ok(Self::P521),
            other => Err(DpopError::UnsupportedCurve {
                crv: other.to_string(),
            }),
        }
    }
}

/// Elliptic-curve public key on one of the supported curves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcPublicKey {
    /// P-256 point
    P256(p256::PublicKey),
    /// P-384 point
    P384(p384::PublicKey),
    /// P-521 point
    P521(p521::PublicKey),
}

impl EcPublicKey {
    /// Curve this point lives on
    pub fn curve(&self) -> EcCurve {
        match self {
            Self::P256(_) => EcCurve::P256,
            Self::P384(_) => EcCurve::P384,
            Self::P521(_) => EcCurve::P521,
        }
    }
}

/// Public key material for DPoP operations
///
/// A closed set: every key that reaches signature verification is one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DpopPublicKey {
    /// RSA public key
    Rsa(RsaPublicKey),
    /// Elliptic-curve public key
    Ec(EcPublicKey),
}

impl DpopPublicKey {
    /// JWK `kty` for this key
    pub fn key_type(&self) -> &'static str {
        match self {
            Self::Rsa(_) => "RSA",
            Self::Ec(_) => "EC",
        }
    }

    /// Whether proofs signed with `algorithm` can be verified with this key
    pub fn supports(&self, algorithm: DpopAlgorithm) -> bool {
        match self {
            Self::Rsa(_) => algorithm.is_rsa(),
            Self::Ec(ec) => algorithm.curve() == Some(ec.curve()),
        }
    }
}

/// Private key material for DPoP operations
///
/// The wrapped RustCrypto types zeroize themselves on drop. `Debug` never prints
/// key material.
#[derive(Clone)]
pub enum DpopPrivateKey {
    /// RSA private key
    Rsa(Box<RsaPrivateKey>),
    /// P-256 secret scalar
    P256(p256::SecretKey),
    /// P-384 secret scalar
    P384(p384::SecretKey),
    /// P-521 secret scalar
    P521(p521::SecretKey),
}

impl DpopPrivateKey {
    /// Derive the public half
    pub fn public_key(&self) -> DpopPublicKey {
        match self {
            Self::Rsa(key) => DpopPublicKey::Rsa(key.to_public_key()),
            Self::P256(key) => DpopPublicKey::Ec(EcPublicKey::P256(key.public_key())),
            Self::P384(key) => DpopPublicKey::Ec(EcPublicKey::P384(key.public_key())),
            Self::P521(key) => DpopPublicKey::Ec(EcPublicKey::P521(key.public_key())),
        }
    }
}

impl fmt::Debug for DpopPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Rsa(_) => "Rsa",
            Self::P256(_) => "P256",
            Self::P384(_) => "P384",
            Self::P521(_) => "P521",
        };
        f.debug_tuple(kind).field(&"<redacted>").finish()
    }
}

/// DPoP key pair with metadata
///
/// Immutable once generated or loaded; see [`crate::keys`] for constructors.
#[derive(Debug, Clone)]
pub struct DpopKeyPair {
    /// Unique identifier for this key pair
    pub id: String,

    /// Signing algorithm this key pair is used with
    pub algorithm: DpopAlgorithm,

    /// Private key material
    pub(crate) private_key: DpopPrivateKey,

    /// Public key material
    pub public_key: DpopPublicKey,

    /// JWK thumbprint for binding (RFC 7638)
    pub thumbprint: String,

    /// Key creation timestamp
    pub created_at: DateTime<Utc>,
}

impl DpopKeyPair {
    /// Private half, for signing
    pub fn private_key(&self) -> &DpopPrivateKey {
        &self.private_key
    }
}

/// JSON Web Key representation of a DPoP public key
///
/// Only the members required by RFC 7638 are modelled; optional members such as
/// `alg`, `use` or `kid` are ignored on input and never emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kty")]
pub enum DpopJwk {
    /// RSA public key in JWK format
    #[serde(rename = "RSA")]
    Rsa {
        /// RSA modulus (base64url-encoded, minimal big-endian)
        n: String,

        /// RSA public exponent (base64url-encoded, minimal big-endian)
        e: String,
    },

    /// Elliptic Curve public key in JWK format
    #[serde(rename = "EC")]
    Ec {
        /// Curve name
        crv: EcCurve,

        /// X coordinate (base64url-encoded, full coordinate length)
        x: String,

        /// Y coordinate (base64url-encoded, full coordinate length)
        y: String,
    },
}

/// DPoP JWT header as defined in RFC 9449 §4.2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpopHeader {
    /// JWT type - always "dpop+jwt" for DPoP
    pub typ: String,

    /// Signature algorithm
    #[serde(rename = "alg")]
    pub algorithm: DpopAlgorithm,

    /// Public key the proof is signed with
    pub jwk: DpopJwk,
}

/// DPoP JWT claims as defined in RFC 9449 §4.2
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpopClaims {
    /// Unique proof identifier, used for replay detection
    pub jti: String,

    /// HTTP method (uppercase)
    pub htm: String,

    /// HTTP URI without query and fragment
    pub htu: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiry (Unix timestamp)
    pub exp: i64,

    /// Base64url SHA-256 hash of the bound access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ath: Option<String>,

    /// Server-issued nonce
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// A DPoP proof JWT in compact serialization
///
/// Keeps the exact string it was created from or parsed out of; the signature
/// always covers those bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DpopProof {
    /// Decoded header
    pub header: DpopHeader,

    /// Decoded claims
    pub claims: DpopClaims,

    jwt: String,
}

impl DpopProof {
    pub(crate) fn new(header: DpopHeader, claims: DpopClaims, jwt: String) -> Self {
        Self {
            header,
            claims,
            jwt,
        }
    }

    /// Compact serialization, the value of the `DPoP` request header
    pub fn to_jwt_string(&self) -> String {
        self.jwt.clone()
    }

    /// Borrow the compact serialization
    pub fn as_str(&self) -> &str {
        &self.jwt
    }
}

impl fmt::Display for DpopProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.jwt)
    }
}

/// Outcome of a successful proof validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProof {
    /// RFC 7638 thumbprint of the proof key (the `jkt` to bind or compare)
    pub thumbprint: String,

    /// Algorithm the proof was signed with
    pub algorithm: DpopAlgorithm,

    /// Public key from the proof header
    pub jwk: DpopJwk,

    /// Verified claims
    pub claims: DpopClaims,
}

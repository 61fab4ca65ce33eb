//! JSON Web Key encoding of DPoP public keys
//!
//! Lossless mapping between [`DpopPublicKey`] and [`DpopJwk`]. RSA integers are
//! encoded as minimal unsigned big-endian bytes; EC coordinates keep the full
//! coordinate length required by RFC 7518 §6.2.1.2 so thumbprints interoperate
//! with other implementations. Peers that send shortened EC coordinates are
//! still accepted; the coordinates are left-padded before decoding.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::{traits::PublicKeyParts, BigUint, RsaPublicKey};
use serde_json::Value;

use crate::{
    errors::DpopError,
    types::{DpopAlgorithm, DpopJwk, DpopPublicKey, EcCurve, EcPublicKey},
    Result,
};

/// JWK members that only appear in private keys
const PRIVATE_KEY_MEMBERS: &[&str] = &["d", "p", "q", "dp", "dq", "qi", "oth", "k"];

/// Encode a public key as a JWK for use with `algorithm`
///
/// Fails with [`DpopError::UnsupportedAlgorithm`] when the key cannot produce
/// signatures for the algorithm (an RSA key with `ES256`, a P-384 key with `ES256`).
pub fn to_jwk(public_key: &DpopPublicKey, algorithm: DpopAlgorithm) -> Result<DpopJwk> {
    if !public_key.supports(algorithm) {
        return Err(DpopError::UnsupportedAlgorithm {
            algorithm: format!("{algorithm} with {} key", public_key.key_type()),
        });
    }

    public_key_to_jwk(public_key)
}

/// Encode a public key as a JWK
pub fn public_key_to_jwk(public_key: &DpopPublicKey) -> Result<DpopJwk> {
    match public_key {
        DpopPublicKey::Rsa(key) => Ok(DpopJwk::Rsa {
            n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        }),
        DpopPublicKey::Ec(ec) => {
            let curve = ec.curve();
            let point = match ec {
                EcPublicKey::P256(key) => key.to_encoded_point(false).as_bytes().to_vec(),
                EcPublicKey::P384(key) => key.to_encoded_point(false).as_bytes().to_vec(),
                EcPublicKey::P521(key) => key.to_encoded_point(false).as_bytes().to_vec(),
            };
            let (x, y) = split_uncompressed_point(&point, curve)?;

            Ok(DpopJwk::Ec {
                crv: curve,
                x: URL_SAFE_NO_PAD.encode(x),
                y: URL_SAFE_NO_PAD.encode(y),
            })
        }
    }
}

/// Decode a JWK into a public key usable for signature verification
pub fn from_jwk(jwk: &DpopJwk) -> Result<DpopPublicKey> {
    match jwk {
        DpopJwk::Rsa { n, e } => {
            let n = decode_member("n", n)?;
            let e = decode_member("e", e)?;

            let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
                .map_err(|e| DpopError::MissingOrInvalidJwk {
                    reason: format!("Invalid RSA public key: {e}"),
                })?;

            Ok(DpopPublicKey::Rsa(key))
        }
        DpopJwk::Ec { crv, x, y } => {
            let x = decode_member("x", x)?;
            let y = decode_member("y", y)?;

            let len = crv.coordinate_len();
            if x.len() > len || y.len() > len {
                return Err(DpopError::MissingOrInvalidJwk {
                    reason: format!("{crv} coordinates must be at most {len} bytes"),
                });
            }

            // SEC1 uncompressed encoding: 0x04 || x || y, each coordinate left-padded
            let mut sec1 = Vec::with_capacity(1 + 2 * len);
            sec1.push(0x04);
            for coordinate in [&x, &y] {
                sec1.resize(sec1.len() + len - coordinate.len(), 0);
                sec1.extend_from_slice(coordinate);
            }

            let not_on_curve = |_| DpopError::MissingOrInvalidJwk {
                reason: format!("Point is not on curve {crv}"),
            };
            let key = match crv {
                EcCurve::P256 => {
                    EcPublicKey::P256(p256::PublicKey::from_sec1_bytes(&sec1).map_err(not_on_curve)?)
                }
                EcCurve::P384 => {
                    EcPublicKey::P384(p384::PublicKey::from_sec1_bytes(&sec1).map_err(not_on_curve)?)
                }
                EcCurve::P521 => {
                    EcPublicKey::P521(p521::PublicKey::from_sec1_bytes(&sec1).map_err(not_on_curve)?)
                }
            };

            Ok(DpopPublicKey::Ec(key))
        }
    }
}

impl DpopJwk {
    /// Parse a JWK from untrusted JSON (the `jwk` member of a proof header)
    ///
    /// Unknown key types and curves are reported as such rather than as a generic
    /// parse failure. Private key members are rejected outright.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| DpopError::MissingOrInvalidJwk {
            reason: "JWK must be a JSON object".to_string(),
        })?;

        let kty = object
            .get("kty")
            .and_then(Value::as_str)
            .ok_or_else(|| DpopError::MissingOrInvalidJwk {
                reason: "JWK is missing 'kty'".to_string(),
            })?;

        match kty {
            "RSA" => {}
            "EC" => {
                let crv = object
                    .get("crv")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DpopError::MissingOrInvalidJwk {
                        reason: "EC JWK is missing 'crv'".to_string(),
                    })?;
                crv.parse::<EcCurve>()?;
            }
            other => {
                return Err(DpopError::UnsupportedKeyType {
                    kty: other.to_string(),
                })
            }
        }

        if let Some(member) = PRIVATE_KEY_MEMBERS
            .iter()
            .find(|member| object.contains_key(**member))
        {
            return Err(DpopError::MissingOrInvalidJwk {
                reason: format!("JWK contains private key member '{member}'"),
            });
        }

        serde_json::from_value(value.clone()).map_err(|e| DpopError::MissingOrInvalidJwk {
            reason: format!("Malformed JWK: {e}"),
        })
    }

    /// JWK `kty`
    pub fn key_type(&self) -> &'static str {
        match self {
            Self::Rsa { .. } => "RSA",
            Self::Ec { .. } => "EC",
        }
    }

    /// Whether a proof signed with `algorithm` may carry this key
    pub fn supports(&self, algorithm: DpopAlgorithm) -> bool {
        match self {
            Self::Rsa { .. } => algorithm.is_rsa(),
            Self::Ec { crv, .. } => algorithm.curve() == Some(*crv),
        }
    }
}

fn decode_member(name: &str, value: &str) -> Result<Vec<u8>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| DpopError::MissingOrInvalidJwk {
            reason: format!("Invalid base64url in JWK member '{name}': {e}"),
        })?;

    if bytes.is_empty() {
        return Err(DpopError::MissingOrInvalidJwk {
            reason: format!("JWK member '{name}' is empty"),
        });
    }

    Ok(bytes)
}

fn split_uncompressed_point(point: &[u8], curve: EcCurve) -> Result<(&[u8], &[u8])> {
    let len = curve.coordinate_len();
    match point.split_first() {
        Some((0x04, coordinates)) if coordinates.len() == 2 * len => {
            Ok(coordinates.split_at(len))
        }
        _ => Err(DpopError::KeyManagementError {
            reason: format!("Unexpected SEC1 encoding for {curve} public key"),
        }),
    }
}

//! Access token binding through the `cnf.jkt` confirmation claim (RFC 9449 §6)
//!
//! The binder works on the JSON claim set of an access token before it is signed
//! by the token issuer, and on the verified claims of a presented token at the
//! protected resource.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;

use crate::{errors::DpopError, http::DPOP_TOKEN_TYPE, Result};

/// Confirmation claim name (RFC 7800)
pub const CNF_CLAIM: &str = "cnf";

/// JWK thumbprint member of the confirmation claim
pub const JKT_MEMBER: &str = "jkt";

/// Token type claim set alongside the binding
pub const TOKEN_TYPE_CLAIM: &str = "token_type";

/// The `cnf` claim of a DPoP-bound token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Thumbprint of the key the token is bound to
    pub jkt: String,
}

/// Embeds and checks `cnf.jkt` bindings
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenBinder;

impl TokenBinder {
    /// Bind a claim set to `thumbprint`
    ///
    /// Sets `cnf.jkt` (keeping any other `cnf` members) and `token_type = "DPoP"`.
    /// Binding again to the same thumbprint is a no-op; a claim set already bound
    /// to a different key is refused, since `jkt` is fixed at issuance.
    pub fn bind(mut claims: Map<String, Value>, thumbprint: &str) -> Result<Map<String, Value>> {
        let cnf = match claims
            .entry(CNF_CLAIM)
            .or_insert_with(|| Value::Object(Map::new()))
        {
            Value::Object(cnf) => cnf,
            other => {
                return Err(DpopError::TokenAlreadyBound {
                    existing: other.to_string(),
                })
            }
        };

        match cnf.get(JKT_MEMBER) {
            None => {
                cnf.insert(JKT_MEMBER.to_string(), Value::String(thumbprint.to_string()));
            }
            Some(Value::String(existing)) if constant_time_eq(existing, thumbprint) => {}
            Some(Value::String(existing)) => {
                return Err(DpopError::TokenAlreadyBound {
                    existing: existing.clone(),
                });
            }
            Some(other) => {
                return Err(DpopError::TokenAlreadyBound {
                    existing: other.to_string(),
                });
            }
        }

        claims.insert(
            TOKEN_TYPE_CLAIM.to_string(),
            Value::String(DPOP_TOKEN_TYPE.to_string()),
        );

        tracing::debug!(jkt = %thumbprint, "Bound access token claims to DPoP key");
        Ok(claims)
    }

    /// The `cnf.jkt` a claim set is bound to, if any
    pub fn bound_thumbprint(claims: &Map<String, Value>) -> Option<&str> {
        claims
            .get(CNF_CLAIM)?
            .as_object()?
            .get(JKT_MEMBER)?
            .as_str()
    }

    /// The `cnf` claim, if present and well formed
    pub fn confirmation(claims: &Map<String, Value>) -> Option<Confirmation> {
        Self::bound_thumbprint(claims).map(|jkt| Confirmation {
            jkt: jkt.to_string(),
        })
    }

    /// Whether `claims.cnf.jkt` equals `thumbprint`
    pub fn is_bound_to(claims: &Map<String, Value>, thumbprint: &str) -> bool {
        Self::bound_thumbprint(claims).is_some_and(|jkt| constant_time_eq(jkt, thumbprint))
    }

    /// Like [`is_bound_to`](Self::is_bound_to) but reports the mismatch
    pub fn ensure_bound_to(claims: &Map<String, Value>, thumbprint: &str) -> Result<()> {
        match Self::bound_thumbprint(claims) {
            Some(jkt) if constant_time_eq(jkt, thumbprint) => Ok(()),
            bound => {
                tracing::warn!(
                    token_jkt = bound.unwrap_or("<none>"),
                    proof_jkt = %thumbprint,
                    "Access token is not bound to the DPoP proof key"
                );
                Err(DpopError::TokenNotBoundToKey {
                    expected: bound.unwrap_or("<none>").to_string(),
                    actual: thumbprint.to_string(),
                })
            }
        }
    }
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

//! HTTP binding of DPoP (RFC 9449 §4.1, §7.1, §8)
//!
//! Header names, the `DPoP` authorization scheme and the `WWW-Authenticate`
//! challenge, independent of any HTTP framework.

use crate::{errors::DpopError, types::DpopAlgorithm, Result};

/// Request header carrying the proof JWT
pub const DPOP_HEADER: &str = "DPoP";

/// Response header carrying a server-issued nonce
pub const DPOP_NONCE_HEADER: &str = "DPoP-Nonce";

/// Authorization scheme for DPoP-bound access tokens
pub const DPOP_AUTH_SCHEME: &str = "DPoP";

/// Token type value for DPoP-bound tokens (`token_type` claim and token responses)
pub const DPOP_TOKEN_TYPE: &str = "DPoP";

/// Extract the proof from a `DPoP` header value
///
/// The value must be a single compact JWS: three non-empty base64url segments.
pub fn parse_dpop_header(value: &str) -> Result<&str> {
    let proof = value.trim();

    let segments: Vec<&str> = proof.split('.').collect();
    let well_formed = segments.len() == 3
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        });

    if !well_formed {
        return Err(DpopError::InvalidProofType {
            reason: "DPoP header must contain exactly one compact JWS".to_string(),
        });
    }

    Ok(proof)
}

/// Extract the access token from an `Authorization: DPoP <token>` value
///
/// Returns `None` for other schemes (including `Bearer`) or an empty token.
pub fn parse_dpop_authorization(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(DPOP_AUTH_SCHEME) {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Build a `WWW-Authenticate` challenge for a rejected request
///
/// ```
/// use dpop_bind::{http::www_authenticate_challenge, DpopAlgorithm};
///
/// let challenge = www_authenticate_challenge(
///     Some("invalid_dpop_proof"),
///     &[DpopAlgorithm::ES256, DpopAlgorithm::RS256],
/// );
/// assert_eq!(challenge, r#"DPoP error="invalid_dpop_proof", algs="ES256 RS256""#);
/// ```
pub fn www_authenticate_challenge(error: Option<&str>, algorithms: &[DpopAlgorithm]) -> String {
    let mut params = Vec::with_capacity(2);
    if let Some(error) = error {
        params.push(format!("error=\"{error}\""));
    }
    if !algorithms.is_empty() {
        let algs: Vec<&str> = algorithms.iter().map(|alg| alg.as_str()).collect();
        params.push(format!("algs=\"{}\"", algs.join(" ")));
    }

    if params.is_empty() {
        DPOP_AUTH_SCHEME.to_string()
    } else {
        format!("{DPOP_AUTH_SCHEME} {}", params.join(", "))
    }
}

/// Reduce a request URI to the `htu` form: scheme, authority and path
///
/// Query and fragment are dropped, the host is lowercased and default ports are
/// omitted. Returns `None` for anything but an absolute `http`/`https` URI.
pub fn normalize_htu(uri: &str) -> Option<String> {
    let url = url::Url::parse(uri).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let host = url.host_str()?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    Some(format!("{}://{}{}", url.scheme(), authority, url.path()))
}

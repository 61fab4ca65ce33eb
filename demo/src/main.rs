//! DPoP walkthrough
//!
//! Plays client, authorization server and protected resource in one process:
//! key generation, proof creation, validation, replay rejection, the nonce
//! challenge and `cnf.jkt` enforcement against a stolen token.
//!
//! Run with `RUST_LOG=dpop_bind=debug` to see the library's own events.

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use dpop_bind::{
    http, DpopAlgorithm, DpopError, DpopKeyPair, DpopProofSigner, DpopProofValidator, TokenBinder,
};

const TOKEN_ENDPOINT: &str = "https://as.example.com/token";
const ORDERS: &str = "https://res.example/orders";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!(version = dpop_bind::VERSION, "Starting DPoP walkthrough");

    // Step 1: the client's key pair
    println!("Step 1: Generate client key pair");
    let client = DpopProofSigner::new(DpopKeyPair::generate(DpopAlgorithm::ES256)?);
    println!("   Algorithm:  {}", client.key_pair().algorithm);
    println!("   Key ID:     {}", client.key_pair().id);
    println!("   Thumbprint: {}\n", client.thumbprint());

    // Step 2: token request, answered with a nonce challenge first
    println!("Step 2: Token request with nonce challenge");
    let authorization_server = DpopProofValidator::new();
    let nonce = authorization_server.generate_nonce();

    let first = client.sign("POST", TOKEN_ENDPOINT, None, None)?;
    match authorization_server.validate(first.as_str(), "POST", TOKEN_ENDPOINT, None, Some(&nonce)) {
        Err(e @ DpopError::NonceMismatch { .. }) => {
            println!("   HTTP/1.1 {} Bad Request", e.http_status());
            println!("   {}: {}", http::DPOP_NONCE_HEADER, nonce);
            println!(
                "   WWW-Authenticate: {}",
                http::www_authenticate_challenge(
                    Some(e.oauth_error_code()),
                    &authorization_server.config().allowed_algorithms
                )
            );
        }
        other => bail!("expected a nonce challenge, got {other:?}"),
    }

    let retry = client.sign("POST", TOKEN_ENDPOINT, None, Some(&nonce))?;
    let validated = authorization_server
        .validate(retry.as_str(), "POST", TOKEN_ENDPOINT, None, Some(&nonce))
        .context("token request proof rejected")?;
    println!("   Retry accepted, jkt {}\n", validated.thumbprint);

    // Step 3: issue an access token bound to the proof key
    println!("Step 3: Issue DPoP-bound access token");
    let claims = json!({"sub": "alice", "scope": "orders:read"});
    let token_claims = TokenBinder::bind(
        claims.as_object().cloned().unwrap_or_default(),
        &validated.thumbprint,
    )?;
    let access_token = "demo-access-token";
    println!("   Claims: {}\n", serde_json::Value::Object(token_claims.clone()));

    // Step 4: call the protected resource
    println!("Step 4: Access protected resource");
    let resource = DpopProofValidator::new();
    let proof = client.sign("GET", ORDERS, Some(access_token), None)?;
    println!("   GET {ORDERS}");
    println!("   Authorization: {} {access_token}", http::DPOP_AUTH_SCHEME);
    println!("   {}: {}", http::DPOP_HEADER, proof);

    let presented = http::parse_dpop_header(proof.as_str())?;
    let accepted =
        resource.validate_for_resource(presented, "GET", ORDERS, access_token, &token_claims, None)?;
    println!("   Accepted, proof key {}\n", accepted.thumbprint);

    // Step 5: replay the same proof
    println!("Step 5: Replay the captured proof");
    match resource.validate_for_resource(presented, "GET", ORDERS, access_token, &token_claims, None) {
        Err(e @ DpopError::ReplayDetected { .. }) => {
            println!("   Rejected ({}): {e}\n", e.severity());
        }
        other => bail!("replay was not detected: {other:?}"),
    }

    // Step 6: a stolen token used with another key
    println!("Step 6: Stolen token with an attacker key");
    let attacker = DpopProofSigner::new(DpopKeyPair::generate(DpopAlgorithm::ES256)?);
    let forged = attacker.sign("GET", ORDERS, Some(access_token), None)?;
    match resource.validate_for_resource(forged.as_str(), "GET", ORDERS, access_token, &token_claims, None) {
        Err(e @ DpopError::TokenNotBoundToKey { .. }) => {
            println!("   HTTP/1.1 {} Unauthorized: {e}", e.http_status());
            println!("   Hint: {}\n", e.remediation_hint());
        }
        other => bail!("stolen token was accepted: {other:?}"),
    }

    println!("Walkthrough complete");
    Ok(())
}

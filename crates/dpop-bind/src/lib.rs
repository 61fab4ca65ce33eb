//! # dpop-bind
//!
//! **RFC 9449 Demonstration of Proof-of-Possession (DPoP) proofs and access token binding**
//!
//! A client signs a short-lived proof JWT per HTTP request with its own key pair.
//! The server verifies the proof, rejects replays, and checks that the presented
//! access token was bound to the same key at issuance (`cnf.jkt`). A stolen token
//! is useless without the private key.
//!
//! ## Core Features
//!
//! - **Proof signing and validation** - RS256/RS384/RS512 and ES256/ES384/ES512
//! - **JWK thumbprints** - RFC 7638, interoperable with other implementations
//! - **Replay protection** - bounded, thread-safe `jti` cache and server nonces
//! - **Token binding** - `cnf.jkt` embedding and enforcement
//!
//! ## Quick Start
//!
//! ```rust
//! use dpop_bind::{DpopAlgorithm, DpopKeyPair, DpopProofSigner, DpopProofValidator, TokenBinder};
//!
//! # fn example() -> dpop_bind::Result<()> {
//! // Client: one key pair, one proof per request
//! let signer = DpopProofSigner::new(DpopKeyPair::generate(DpopAlgorithm::ES256)?);
//! let proof = signer.sign("POST", "https://as.example.com/token", None, None)?;
//!
//! // Authorization server: validate, then bind the issued token to the proof key
//! let validator = DpopProofValidator::new();
//! let validated = validator.validate(proof.as_str(), "POST", "https://as.example.com/token", None, None)?;
//! let claims = TokenBinder::bind(serde_json::Map::new(), &validated.thumbprint)?;
//!
//! assert!(TokenBinder::is_bound_to(&claims, signer.thumbprint()));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐   DPoP: <proof>    ┌──────────────────────────────────┐
//! │  Client             │ ─────────────────▶ │  DpopProofValidator              │
//! │  DpopProofSigner    │   Authorization:   │   ├─ jwk     (JWK <-> key)       │
//! │   └─ DpopKeyPair    │   DPoP <token>     │   ├─ thumbprint (RFC 7638 jkt)   │
//! └─────────────────────┘                    │   └─ ReplayGuard (seen jti)      │
//!                                            └───────────────┬──────────────────┘
//!                                                            │ ValidatedProof.thumbprint
//!                                                            ▼
//!                                            ┌──────────────────────────────────┐
//!                                            │  TokenBinder: cnf.jkt == jkt ?   │
//!                                            └──────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - Signatures are verified over the exact bytes received, with the key embedded
//!   in the proof; only asymmetric algorithms are representable
//! - Proofs live at most 60 seconds; the replay cache holds each `jti` until the
//!   proof's `exp`
//! - `ath`, `nonce` and `jkt` comparisons are constant time

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

// Re-export core types for convenience
pub use binding::*;
pub use config::*;
pub use errors::*;
pub use jwk::*;
pub use keys::*;
pub use proof::*;
pub use replay::*;
pub use thumbprint::*;
pub use types::*;

// Core modules
pub mod binding;
pub mod config;
pub mod errors;
pub mod http;
pub mod jwk;
pub mod keys;
pub mod proof;
pub mod replay;
pub mod thumbprint;
pub mod types;

/// DPoP result type
pub type Result<T> = std::result::Result<T, DpopError>;

/// Current crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// DPoP JWT header type as defined in RFC 9449
pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

/// Default clock skew tolerance (5 minutes)
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 300;

/// Fixed proof lifetime (`exp - iat`), not configurable
pub const MAX_PROOF_LIFETIME_SECONDS: i64 = 60;

/// Default replay cache capacity
pub const DEFAULT_REPLAY_CACHE_CAPACITY: usize = 10_000;

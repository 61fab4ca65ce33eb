//! Validator configuration
//!
//! The proof lifetime is not configurable: it is fixed at
//! [`MAX_PROOF_LIFETIME_SECONDS`](crate::MAX_PROOF_LIFETIME_SECONDS), which
//! bounds how long the replay cache holds each entry.
//!
//! # Examples
//!
//! ```
//! use dpop_bind::{DpopAlgorithm, DpopConfigBuilder};
//!
//! let config = DpopConfigBuilder::new()
//!     .clock_skew_seconds(60).unwrap()
//!     .replay_cache_capacity(50_000).unwrap()
//!     .allowed_algorithms(vec![DpopAlgorithm::ES256]).unwrap()
//!     .build();
//!
//! assert_eq!(config.clock_skew_seconds, 60);
//! assert!(config.allows(DpopAlgorithm::ES256));
//! assert!(!config.allows(DpopAlgorithm::RS256));
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    errors::DpopError, types::DpopAlgorithm, Result, DEFAULT_REPLAY_CACHE_CAPACITY,
    MAX_CLOCK_SKEW_SECONDS,
};

/// Upper bound accepted for `clock_skew_seconds`
pub const CLOCK_SKEW_LIMIT_SECONDS: i64 = 3600;

/// Smallest RSA modulus a proof key may use
pub const MIN_RSA_MODULUS_BITS: usize = 2048;

/// Proof validation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpopConfig {
    /// Tolerated clock difference between client and server, in seconds
    pub clock_skew_seconds: i64,
    /// Maximum number of proof identifiers held by the replay cache
    pub replay_cache_capacity: usize,
    /// Algorithms accepted in proof headers
    pub allowed_algorithms: Vec<DpopAlgorithm>,
    /// Smallest accepted RSA modulus for proof keys
    pub min_rsa_modulus_bits: usize,
    /// When an access token is presented, require the proof to carry `ath`
    pub require_access_token_hash: bool,
}

impl Default for DpopConfig {
    fn default() -> Self {
        Self {
            clock_skew_seconds: MAX_CLOCK_SKEW_SECONDS,
            replay_cache_capacity: DEFAULT_REPLAY_CACHE_CAPACITY,
            allowed_algorithms: DpopAlgorithm::ALL.to_vec(),
            min_rsa_modulus_bits: MIN_RSA_MODULUS_BITS,
            require_access_token_hash: true,
        }
    }
}

impl DpopConfig {
    /// Whether proofs signed with `algorithm` are accepted
    pub fn allows(&self, algorithm: DpopAlgorithm) -> bool {
        self.allowed_algorithms.contains(&algorithm)
    }

    /// Check a configuration that did not come through [`DpopConfigBuilder`]
    pub fn validate(&self) -> Result<()> {
        check_clock_skew(self.clock_skew_seconds)?;
        check_capacity(self.replay_cache_capacity)?;
        check_algorithms(&self.allowed_algorithms)?;
        check_rsa_bits(self.min_rsa_modulus_bits)
    }
}

/// Builder for [`DpopConfig`] with per-setter validation
#[derive(Debug)]
pub struct DpopConfigBuilder {
    config: DpopConfig,
}

impl DpopConfigBuilder {
    /// Start from the defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: DpopConfig::default(),
        }
    }

    /// Set the tolerated clock skew (0 to 3600 seconds)
    pub fn clock_skew_seconds(mut self, seconds: i64) -> Result<Self> {
        check_clock_skew(seconds)?;
        self.config.clock_skew_seconds = seconds;
        Ok(self)
    }

    /// Set the replay cache capacity
    pub fn replay_cache_capacity(mut self, capacity: usize) -> Result<Self> {
        check_capacity(capacity)?;
        self.config.replay_cache_capacity = capacity;
        Ok(self)
    }

    /// Restrict the accepted algorithms
    pub fn allowed_algorithms(mut self, mut algorithms: Vec<DpopAlgorithm>) -> Result<Self> {
        check_algorithms(&algorithms)?;
        let mut seen = Vec::with_capacity(algorithms.len());
        algorithms.retain(|alg| {
            let first = !seen.contains(alg);
            seen.push(*alg);
            first
        });
        self.config.allowed_algorithms = algorithms;
        Ok(self)
    }

    /// Raise the minimum RSA modulus size
    pub fn min_rsa_modulus_bits(mut self, bits: usize) -> Result<Self> {
        check_rsa_bits(bits)?;
        self.config.min_rsa_modulus_bits = bits;
        Ok(self)
    }

    /// Whether a presented access token requires `ath` in the proof
    #[must_use]
    pub const fn require_access_token_hash(mut self, required: bool) -> Self {
        self.config.require_access_token_hash = required;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> DpopConfig {
        self.config
    }
}

impl Default for DpopConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_clock_skew(seconds: i64) -> Result<()> {
    if !(0..=CLOCK_SKEW_LIMIT_SECONDS).contains(&seconds) {
        return Err(DpopError::ConfigurationError {
            reason: format!(
                "Clock skew must be between 0 and {CLOCK_SKEW_LIMIT_SECONDS} seconds, got {seconds}"
            ),
        });
    }
    Ok(())
}

fn check_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(DpopError::ConfigurationError {
            reason: "Replay cache capacity cannot be zero".to_string(),
        });
    }
    Ok(())
}

fn check_algorithms(algorithms: &[DpopAlgorithm]) -> Result<()> {
    if algorithms.is_empty() {
        return Err(DpopError::ConfigurationError {
            reason: "At least one DPoP algorithm must be allowed".to_string(),
        });
    }
    Ok(())
}

fn check_rsa_bits(bits: usize) -> Result<()> {
    if bits < MIN_RSA_MODULUS_BITS {
        return Err(DpopError::ConfigurationError {
            reason: format!("RSA modulus minimum cannot be below {MIN_RSA_MODULUS_BITS} bits"),
        });
    }
    Ok(())
}

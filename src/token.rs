// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signed, time-bounded authentication token minting.
//!
//! Mints a compact JWT per RFC 7519 with claims `{aud, iat, exp}`, signed
//! with RSASSA-PKCS1-v1_5/SHA-256 (RS256) or ECDSA P-256/SHA-256 (ES256)
//! depending on the configured key's algorithm. The minter is stateless
//! other than its clock; it never caches a minted token.

use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// A private key to sign tokens with, in PEM format.
#[derive(Clone)]
pub enum SigningKey {
    /// An RSA private key (PKCS#1 or PKCS#8 PEM); produces RS256 tokens.
    Rsa(Vec<u8>),
    /// An EC (P-256) private key PEM; produces ES256 tokens.
    Ec(Vec<u8>),
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningKey::Rsa(_) => f.write_str("SigningKey::Rsa(..)"),
            SigningKey::Ec(_) => f.write_str("SigningKey::Ec(..)"),
        }
    }
}

/// Claims embedded in the minted JWT.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Audience: the GCP project id.
    pub aud: String,
    /// Issued-at, whole seconds since the Unix epoch.
    pub iat: i64,
    /// Expiration, whole seconds since the Unix epoch.
    pub exp: i64,
}

/// A clock abstraction so tests can control "now" deterministically.
pub trait Clock: Send + Sync {
    /// Returns the current time as whole seconds since the Unix epoch.
    fn now_unix_secs(&self) -> i64;
}

/// A [`Clock`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Produces signed, time-bounded authentication tokens.
pub struct TokenMinter {
    key: SigningKey,
    encoding_key: EncodingKey,
    algorithm: Algorithm,
    audience: String,
    lifetime: Duration,
    clock: Box<dyn Clock>,
}

impl TokenMinter {
    /// Creates a new minter for the given key pair, audience, and lifetime,
    /// using the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedAlgorithm`] if the PEM cannot be
    /// parsed as the claimed algorithm's private key.
    pub fn new(key: SigningKey, audience: impl Into<String>, lifetime: Duration) -> ConfigResult<Self> {
        Self::with_clock(key, audience, lifetime, Box::new(SystemClock))
    }

    /// Creates a new minter with an injected [`Clock`], for deterministic tests.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedAlgorithm`] if the PEM cannot be
    /// parsed as the claimed algorithm's private key.
    pub fn with_clock(
        key: SigningKey,
        audience: impl Into<String>,
        lifetime: Duration,
        clock: Box<dyn Clock>,
    ) -> ConfigResult<Self> {
        let (encoding_key, algorithm) = match &key {
            SigningKey::Rsa(pem) => (
                EncodingKey::from_rsa_pem(pem)
                    .map_err(|e| ConfigError::UnsupportedAlgorithm(format!("invalid RSA key: {e}")))?,
                Algorithm::RS256,
            ),
            SigningKey::Ec(pem) => (
                EncodingKey::from_ec_pem(pem)
                    .map_err(|e| ConfigError::UnsupportedAlgorithm(format!("invalid EC key: {e}")))?,
                Algorithm::ES256,
            ),
        };

        Ok(Self {
            key,
            encoding_key,
            algorithm,
            audience: audience.into(),
            lifetime,
            clock,
        })
    }

    /// The signing algorithm in use (`RS256` or `ES256`).
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The underlying key, for inspection in tests.
    #[must_use]
    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    /// Mints a freshly signed, compact JWT.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedAlgorithm`] wrapping the
    /// underlying signing failure if token encoding fails.
    pub fn mint(&self) -> ConfigResult<String> {
        let iat = self.clock.now_unix_secs();
        #[allow(clippy::cast_possible_wrap)]
        let exp = iat + self.lifetime.as_secs() as i64;

        let claims = Claims {
            aud: self.audience.clone(),
            iat,
            exp,
        };

        let header = Header::new(self.algorithm);
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| ConfigError::UnsupportedAlgorithm(format!("signing failed: {e}")))
    }
}

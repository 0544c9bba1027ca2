// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the Cloud IoT Core device client.
//!
//! This module provides the error hierarchy for the crate: synchronous
//! configuration validation, the classified transport failure surface, and
//! the top-level error returned by the few facade operations that can fail
//! synchronously.

use thiserror::Error;

/// Errors raised synchronously at construction time.
///
/// These never reach the connection supervisor; they are returned directly
/// from builders (`DeviceIdentityBuilder::build`, `Backoff::new`,
/// `TokenMinter::new`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field was empty.
    #[error("{field} must not be empty")]
    Empty {
        /// The field that was empty.
        field: &'static str,
    },

    /// A numeric value fell outside its allowed range.
    #[error("{field} out of range: {reason}")]
    OutOfRange {
        /// The field that was out of range.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The private key's algorithm is neither RSA nor EC.
    #[error("unsupported signing key algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// The classified transport failure surface (see spec §4.7).
///
/// Every variant here is one the supervisor knows how to classify as
/// retryable or fatal and, for disconnects, map to a [`crate::supervisor::DisconnectReason`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker rejected the CONNECT (bad credentials, non-authorized device).
    #[error("not authorized")]
    NotAuthorized,

    /// The server actively refused the connection attempt.
    #[error("server connect error: {0}")]
    ServerConnectError(String),

    /// A write to the socket timed out.
    #[error("write timeout")]
    WriteTimeout,

    /// An operation was attempted while the client was not connected.
    #[error("client not connected")]
    ClientNotConnected,

    /// The client-side operation timed out.
    #[error("client timeout")]
    ClientTimeout,

    /// DNS resolution of the broker host failed.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// The connection was lost; `eof` is true when the peer closed the socket
    /// cleanly (as opposed to a TLS-layer failure).
    #[error("connection lost (eof={eof})")]
    ConnectionLost {
        /// Whether the cause was a clean EOF from the peer.
        eof: bool,
    },

    /// The TLS handshake or session failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// A socket-level timeout occurred while waiting on the connection.
    #[error("socket timeout")]
    SocketTimeout,

    /// The broker rejected a publish because the payload or topic was malformed.
    #[error("bad payload: {0}")]
    BadPayload(String),

    /// Anything the supervisor does not specifically recognize.
    #[error("unknown transport error: {0}")]
    Unknown(String),
}

/// Top-level error returned by the few [`crate::client::DeviceClient`] operations
/// that can fail synchronously.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Construction-time configuration was invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result alias for configuration-time operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result alias for facade operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::Empty { field: "project_id" };
        assert_eq!(err.to_string(), "project_id must not be empty");
    }

    #[test]
    fn config_error_out_of_range_display() {
        let err = ConfigError::OutOfRange {
            field: "port",
            reason: "must be in 1..65535".to_string(),
        };
        assert_eq!(err.to_string(), "port out of range: must be in 1..65535");
    }

    #[test]
    fn client_error_from_config_error() {
        let config_err = ConfigError::Empty { field: "device_id" };
        let err: ClientError = config_err.into();
        assert!(matches!(err, ClientError::Config(ConfigError::Empty { .. })));
    }
}

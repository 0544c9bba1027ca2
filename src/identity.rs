// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity and the connection/queue configuration surface.
//!
//! A [`DeviceIdentity`] is immutable once built: every derived string named
//! in the spec (broker URL, client id, topic paths) is computed once at
//! construction and cached, never recomputed per-publish.

use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::queue::DropPolicy;

const DEFAULT_HOST: &str = "mqtt.googleapis.com";
const DEFAULT_PORT: u16 = 8883;
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Immutable device identity, derived topic paths, and broker addressing.
///
/// # Examples
///
/// ```
/// use gcp_iot_core::identity::DeviceIdentity;
///
/// let identity = DeviceIdentity::builder("my-project", "my-registry", "my-device", "us-central1")
///     .build()
///     .unwrap();
///
/// assert_eq!(identity.broker_url(), "ssl://mqtt.googleapis.com:8883");
/// assert_eq!(
///     identity.client_id(),
///     "projects/my-project/locations/us-central1/registries/my-registry/devices/my-device"
/// );
/// assert_eq!(identity.telemetry_topic(), "/devices/my-device/events");
/// assert_eq!(identity.state_topic(), "/devices/my-device/state");
/// assert_eq!(identity.config_topic(), "/devices/my-device/config");
/// assert_eq!(identity.commands_topic_prefix(), "/devices/my-device/commands");
/// ```
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    project_id: String,
    registry_id: String,
    device_id: String,
    region: String,
    host: String,
    port: u16,
    token_lifetime: Duration,

    broker_url: String,
    client_id: String,
    telemetry_topic: String,
    state_topic: String,
    config_topic: String,
    commands_topic_prefix: String,
}

impl DeviceIdentity {
    /// Starts a [`DeviceIdentityBuilder`] with the required fields.
    #[must_use]
    pub fn builder(
        project_id: impl Into<String>,
        registry_id: impl Into<String>,
        device_id: impl Into<String>,
        region: impl Into<String>,
    ) -> DeviceIdentityBuilder {
        DeviceIdentityBuilder {
            project_id: project_id.into(),
            registry_id: registry_id.into(),
            device_id: device_id.into(),
            region: region.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
        }
    }

    /// The GCP project id; this is the JWT audience (§4.3/§6).
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// The configured token lifetime.
    #[must_use]
    pub fn token_lifetime(&self) -> Duration {
        self.token_lifetime
    }

    /// The registry id this device belongs to.
    #[must_use]
    pub fn registry_id(&self) -> &str {
        &self.registry_id
    }

    /// The device id.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The cloud region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// The broker hostname (without scheme or port).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `ssl://<host>:<port>`.
    #[must_use]
    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }

    /// `projects/<p>/locations/<r>/registries/<reg>/devices/<d>`.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `/devices/<d>/events`.
    #[must_use]
    pub fn telemetry_topic(&self) -> &str {
        &self.telemetry_topic
    }

    /// `/devices/<d>/state`.
    #[must_use]
    pub fn state_topic(&self) -> &str {
        &self.state_topic
    }

    /// `/devices/<d>/config`.
    #[must_use]
    pub fn config_topic(&self) -> &str {
        &self.config_topic
    }

    /// `/devices/<d>/commands`.
    #[must_use]
    pub fn commands_topic_prefix(&self) -> &str {
        &self.commands_topic_prefix
    }
}

/// Builder for [`DeviceIdentity`].
#[derive(Debug, Clone)]
pub struct DeviceIdentityBuilder {
    project_id: String,
    registry_id: String,
    device_id: String,
    region: String,
    host: String,
    port: u16,
    token_lifetime: Duration,
}

impl DeviceIdentityBuilder {
    /// Overrides the broker hostname (default `mqtt.googleapis.com`).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Overrides the broker port (default `8883`).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the token lifetime (default 1 hour, max 24 hours).
    #[must_use]
    pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Validates and builds the [`DeviceIdentity`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any identity field is empty, if `port` is
    /// `0`, or if `token_lifetime` is zero or exceeds 24 hours.
    pub fn build(self) -> ConfigResult<DeviceIdentity> {
        for (field, value) in [
            ("project_id", &self.project_id),
            ("registry_id", &self.registry_id),
            ("device_id", &self.device_id),
            ("region", &self.region),
            ("host", &self.host),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Empty { field });
            }
        }

        if self.port == 0 {
            return Err(ConfigError::OutOfRange {
                field: "port",
                reason: "must be in 1..65535".to_string(),
            });
        }

        if self.token_lifetime.is_zero() {
            return Err(ConfigError::OutOfRange {
                field: "token_lifetime",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.token_lifetime > MAX_TOKEN_LIFETIME {
            return Err(ConfigError::OutOfRange {
                field: "token_lifetime",
                reason: "must not exceed 24 hours".to_string(),
            });
        }

        let broker_url = format!("ssl://{}:{}", self.host, self.port);
        let client_id = format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.region, self.registry_id, self.device_id
        );
        let telemetry_topic = format!("/devices/{}/events", self.device_id);
        let state_topic = format!("/devices/{}/state", self.device_id);
        let config_topic = format!("/devices/{}/config", self.device_id);
        let commands_topic_prefix = format!("/devices/{}/commands", self.device_id);

        Ok(DeviceIdentity {
            project_id: self.project_id,
            registry_id: self.registry_id,
            device_id: self.device_id,
            region: self.region,
            host: self.host,
            port: self.port,
            token_lifetime: self.token_lifetime,
            broker_url,
            client_id,
            telemetry_topic,
            state_topic,
            config_topic,
            commands_topic_prefix,
        })
    }
}

/// Configuration for one of the two bounded outbound queues (telemetry,
/// topic events). Defaults to capacity 1000 with [`DropPolicy::HeadDrop`],
/// matching the Configuration surface table in the spec.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum number of queued events.
    pub capacity: usize,
    /// Behavior when the queue is full.
    pub policy: DropPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            policy: DropPolicy::HeadDrop,
        }
    }
}

impl QueueConfig {
    /// Creates a queue configuration with the given capacity and policy.
    #[must_use]
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self { capacity, policy }
    }
}

/// Configuration for [`crate::backoff::Backoff`], with the same builder
/// ergonomics as the rest of this crate's configuration types.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Initial retry delay in milliseconds.
    pub initial_ms: u64,
    /// Maximum retry delay in milliseconds.
    pub max_ms: u64,
    /// Upper bound (exclusive) of random jitter added to each delay, in milliseconds.
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
            jitter_ms: 500,
        }
    }
}

impl BackoffConfig {
    /// Overrides the initial delay.
    #[must_use]
    pub fn with_initial_ms(mut self, initial_ms: u64) -> Self {
        self.initial_ms = initial_ms;
        self
    }

    /// Overrides the maximum delay.
    #[must_use]
    pub fn with_max_ms(mut self, max_ms: u64) -> Self {
        self.max_ms = max_ms;
        self
    }

    /// Overrides the jitter bound.
    #[must_use]
    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_derived_strings() {
        let identity = DeviceIdentity::builder("proj", "reg", "dev", "us-central1")
            .build()
            .unwrap();

        assert_eq!(identity.broker_url(), "ssl://mqtt.googleapis.com:8883");
        assert_eq!(
            identity.client_id(),
            "projects/proj/locations/us-central1/registries/reg/devices/dev"
        );
        assert_eq!(identity.telemetry_topic(), "/devices/dev/events");
        assert_eq!(identity.state_topic(), "/devices/dev/state");
        assert_eq!(identity.config_topic(), "/devices/dev/config");
        assert_eq!(identity.commands_topic_prefix(), "/devices/dev/commands");
    }

    #[test]
    fn rejects_empty_fields() {
        assert!(DeviceIdentity::builder("", "reg", "dev", "region").build().is_err());
        assert!(DeviceIdentity::builder("proj", "", "dev", "region").build().is_err());
        assert!(DeviceIdentity::builder("proj", "reg", "", "region").build().is_err());
        assert!(DeviceIdentity::builder("proj", "reg", "dev", "").build().is_err());
    }

    #[test]
    fn rejects_invalid_port() {
        let result = DeviceIdentity::builder("proj", "reg", "dev", "region")
            .port(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_token_lifetime() {
        assert!(
            DeviceIdentity::builder("proj", "reg", "dev", "region")
                .token_lifetime(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(
            DeviceIdentity::builder("proj", "reg", "dev", "region")
                .token_lifetime(Duration::from_secs(25 * 3600))
                .build()
                .is_err()
        );
    }

    #[test]
    fn overrides_host_and_port() {
        let identity = DeviceIdentity::builder("proj", "reg", "dev", "region")
            .host("mqtt.example.com")
            .port(8884)
            .build()
            .unwrap();
        assert_eq!(identity.broker_url(), "ssl://mqtt.example.com:8884");
    }

    #[test]
    fn queue_config_default() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.policy, DropPolicy::HeadDrop);
    }

    #[test]
    fn backoff_config_builder() {
        let config = BackoffConfig::default()
            .with_initial_ms(100)
            .with_max_ms(5_000)
            .with_jitter_ms(50);
        assert_eq!(config.initial_ms, 100);
        assert_eq!(config.max_ms, 5_000);
        assert_eq!(config.jitter_ms, 50);
    }
}

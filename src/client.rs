// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The public, non-blocking facade over the connection supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::backoff::Backoff;
use crate::error::ClientResult;
use crate::identity::{BackoffConfig, DeviceIdentity, QueueConfig};
use crate::pipeline::{OutboundPipeline, TopicEvent};
use crate::router::{CommandListener, ConfigListener, Executor, InboundRouter, PooledExecutor};
use crate::supervisor::{self, ConnectionListener, SupervisorHandle};
use crate::token::{SigningKey, TokenMinter};
use crate::transport::{MqttTransport, RumqttcTransport};

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// A non-blocking client for a single Cloud IoT Core device.
///
/// All publish and connection methods return immediately; the actual
/// network I/O happens on one dedicated background task (the connection
/// supervisor). See [`DeviceClientBuilder`] for construction.
pub struct DeviceClient {
    handle: SupervisorHandle,
    pipeline: Arc<OutboundPipeline>,
    transport: Arc<dyn MqttTransport>,
    supervisor_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    identity: Arc<DeviceIdentity>,
    token_minter: Arc<TokenMinter>,
    router: Arc<InboundRouter>,
    connection_listener: Option<(Arc<dyn ConnectionListener>, Arc<dyn Executor>)>,
    backoff_config: BackoffConfig,
}

impl DeviceClient {
    /// Starts a [`DeviceClientBuilder`].
    #[must_use]
    pub fn builder(identity: DeviceIdentity, signing_key: SigningKey) -> DeviceClientBuilder {
        DeviceClientBuilder::new(identity, signing_key)
    }

    /// Sets `run` to true; if no supervisor task is alive, spawns one.
    /// Non-blocking.
    pub fn connect(&self) {
        self.handle.start();

        let mut task = self.supervisor_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let backoff = Backoff::new(
            self.backoff_config.initial_ms,
            self.backoff_config.max_ms,
            self.backoff_config.jitter_ms,
        )
        .expect("backoff config was already validated at builder time");

        let handle = self.handle.clone();
        let identity = Arc::clone(&self.identity);
        let token_minter = Arc::clone(&self.token_minter);
        let transport = Arc::clone(&self.transport);
        let pipeline = Arc::clone(&self.pipeline);
        let router = Arc::clone(&self.router);
        let connection_listener = self.connection_listener.clone();

        *task = Some(tokio::spawn(async move {
            supervisor::run(
                handle,
                identity,
                token_minter,
                transport,
                pipeline,
                router,
                backoff,
                DEFAULT_KEEP_ALIVE,
                connection_listener,
            )
            .await;
        }));
    }

    /// No-op if no supervisor is alive; otherwise clears `run` and releases
    /// the wake token. Non-blocking.
    pub fn disconnect(&self) {
        self.handle.stop();
    }

    /// Clears `run`, wakes the supervisor, and awaits its task to
    /// completion — a blocking teardown for callers that want a
    /// synchronous shutdown (e.g. at process exit). `disconnect()` itself
    /// stays non-blocking; this is additive.
    pub async fn shutdown(&self) {
        self.handle.stop();
        let task = self.supervisor_task.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// The transport's current connected state (distinct from the
    /// observed-connected flag the supervisor dedups on).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Returns `true` iff the bounded telemetry queue accepted the event;
    /// on acceptance, releases the wake token.
    pub fn publish_telemetry(&self, event: TopicEvent) -> bool {
        let accepted = self.pipeline.enqueue_telemetry(event);
        if accepted {
            self.handle.wake();
        }
        accepted
    }

    /// Returns `true` iff the bounded topic-event queue accepted the event;
    /// on acceptance, releases the wake token.
    pub fn publish_topic_event(&self, event: TopicEvent) -> bool {
        let accepted = self.pipeline.enqueue_topic_event(event);
        if accepted {
            self.handle.wake();
        }
        accepted
    }

    /// Atomically replaces the state slot; releases the wake token only if
    /// the previous value was null (the worker is already scheduled
    /// otherwise).
    pub fn publish_device_state(&self, bytes: Vec<u8>) {
        let was_empty = self.pipeline.set_pending_state(bytes);
        if was_empty {
            self.handle.wake();
        }
    }
}

/// Ties device identity, signing key, queue configuration, backoff
/// configuration, and listener registration into one construction entry
/// point.
pub struct DeviceClientBuilder {
    identity: DeviceIdentity,
    signing_key: SigningKey,
    telemetry_queue: QueueConfig,
    topic_event_queue: QueueConfig,
    backoff: BackoffConfig,
    config_listener: Option<(Arc<dyn ConfigListener>, Arc<dyn Executor>)>,
    command_listener: Option<(Arc<dyn CommandListener>, Arc<dyn Executor>)>,
    connection_listener: Option<(Arc<dyn ConnectionListener>, Arc<dyn Executor>)>,
    transport: Option<Arc<dyn MqttTransport>>,
}

impl DeviceClientBuilder {
    fn new(identity: DeviceIdentity, signing_key: SigningKey) -> Self {
        Self {
            identity,
            signing_key,
            telemetry_queue: QueueConfig::default(),
            topic_event_queue: QueueConfig::default(),
            backoff: BackoffConfig::default(),
            config_listener: None,
            command_listener: None,
            connection_listener: None,
            transport: None,
        }
    }

    /// Overrides the telemetry queue configuration (default capacity 1000,
    /// head-drop).
    #[must_use]
    pub fn telemetry_queue(mut self, config: QueueConfig) -> Self {
        self.telemetry_queue = config;
        self
    }

    /// Overrides the topic-event queue configuration (default capacity
    /// 1000, head-drop).
    #[must_use]
    pub fn topic_event_queue(mut self, config: QueueConfig) -> Self {
        self.topic_event_queue = config;
        self
    }

    /// Overrides the reconnection backoff configuration.
    #[must_use]
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = config;
        self
    }

    /// Registers a configuration listener, dispatched on the default
    /// pooled executor.
    #[must_use]
    pub fn on_config<L>(mut self, listener: L) -> Self
    where
        L: ConfigListener + 'static,
    {
        self.config_listener = Some((Arc::new(listener), Arc::new(PooledExecutor) as Arc<dyn Executor>));
        self
    }

    /// Registers a configuration listener with an explicit executor.
    #[must_use]
    pub fn on_config_with_executor<L, E>(mut self, listener: L, executor: E) -> Self
    where
        L: ConfigListener + 'static,
        E: Executor + 'static,
    {
        self.config_listener = Some((Arc::new(listener), Arc::new(executor)));
        self
    }

    /// Registers a command listener, dispatched on the default pooled executor.
    #[must_use]
    pub fn on_command<L>(mut self, listener: L) -> Self
    where
        L: CommandListener + 'static,
    {
        self.command_listener = Some((Arc::new(listener), Arc::new(PooledExecutor) as Arc<dyn Executor>));
        self
    }

    /// Registers a command listener with an explicit executor.
    #[must_use]
    pub fn on_command_with_executor<L, E>(mut self, listener: L, executor: E) -> Self
    where
        L: CommandListener + 'static,
        E: Executor + 'static,
    {
        self.command_listener = Some((Arc::new(listener), Arc::new(executor)));
        self
    }

    /// Registers a connection lifecycle listener, dispatched on the default
    /// pooled executor.
    #[must_use]
    pub fn on_connection_event<L>(mut self, listener: L) -> Self
    where
        L: ConnectionListener + 'static,
    {
        self.connection_listener = Some((Arc::new(listener), Arc::new(PooledExecutor) as Arc<dyn Executor>));
        self
    }

    /// Registers a connection lifecycle listener with an explicit executor.
    #[must_use]
    pub fn on_connection_event_with_executor<L, E>(mut self, listener: L, executor: E) -> Self
    where
        L: ConnectionListener + 'static,
        E: Executor + 'static,
    {
        self.connection_listener = Some((Arc::new(listener), Arc::new(executor)));
        self
    }

    /// Substitutes a transport other than the default `rumqttc`-backed one.
    /// Intended for tests; see [`crate::transport::MockTransport`].
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn MqttTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the [`DeviceClient`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the signing key's PEM cannot be parsed, or
    /// if the backoff configuration is invalid.
    pub fn build(self) -> ClientResult<DeviceClient> {
        let token_minter = TokenMinter::new(
            self.signing_key,
            self.identity.project_id().to_string(),
            self.identity.token_lifetime(),
        )
        .map_err(crate::error::ClientError::Config)?;

        // Validated here so `connect()` can `expect()` on it later without
        // risking a panic from unvalidated user input.
        Backoff::new(self.backoff.initial_ms, self.backoff.max_ms, self.backoff.jitter_ms)
            .map_err(crate::error::ClientError::Config)?;

        let pipeline = Arc::new(OutboundPipeline::new(self.telemetry_queue, self.topic_event_queue));

        let mut router = InboundRouter::new(self.identity.config_topic(), self.identity.commands_topic_prefix());
        if let Some((listener, executor)) = self.config_listener {
            router.set_config_listener(listener, executor);
        }
        if let Some((listener, executor)) = self.command_listener {
            router.set_command_listener(listener, executor);
        }

        let transport = self.transport.unwrap_or_else(|| RumqttcTransport::new() as Arc<dyn MqttTransport>);

        Ok(DeviceClient {
            handle: SupervisorHandle::new(),
            pipeline,
            transport,
            supervisor_task: std::sync::Mutex::new(None),
            identity: Arc::new(self.identity),
            token_minter: Arc::new(token_minter),
            router: Arc::new(router),
            connection_listener: self.connection_listener,
            backoff_config: self.backoff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn test_identity() -> DeviceIdentity {
        DeviceIdentity::builder("proj", "reg", "dev", "us-central1").build().unwrap()
    }

    fn test_key() -> SigningKey {
        SigningKey::Ec(include_bytes!("../tests/fixtures/ec_private_key.pem").to_vec())
    }

    #[test]
    fn rejects_invalid_backoff_config() {
        let result = DeviceClient::builder(test_identity(), test_key())
            .backoff(BackoffConfig::default().with_initial_ms(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn publish_telemetry_wakes_and_reports_acceptance() {
        let mock = MockTransport::new();
        let client = DeviceClient::builder(test_identity(), test_key())
            .transport(mock as Arc<dyn MqttTransport>)
            .build()
            .unwrap();

        let accepted = client.publish_telemetry(TopicEvent::telemetry(
            "/a".to_string(),
            b"x".to_vec(),
            crate::pipeline::Qos::AtLeastOnce,
        ));
        assert!(accepted);
    }

    #[tokio::test]
    async fn connect_then_shutdown_stops_supervisor_task() {
        let mock = MockTransport::new();
        let client = DeviceClient::builder(test_identity(), test_key())
            .transport(mock as Arc<dyn MqttTransport>)
            .build()
            .unwrap();

        client.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.shutdown().await;
    }

    #[test]
    fn not_connected_before_connect_is_called() {
        let mock = MockTransport::new();
        let client = DeviceClient::builder(test_identity(), test_key())
            .transport(mock as Arc<dyn MqttTransport>)
            .build()
            .unwrap();
        assert!(!client.is_connected());
    }
}

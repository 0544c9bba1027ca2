// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The connection supervisor: the single background task that owns the
//! transport session, drains the outbound pipeline, and routes inbound
//! messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::backoff::Backoff;
use crate::error::TransportError;
use crate::identity::DeviceIdentity;
use crate::pipeline::{OutboundPipeline, Work};
use crate::router::{Executor, InboundRouter};
use crate::token::TokenMinter;
use crate::transport::{ConnectOptions, MqttTransport, TransportEvent};

/// Reason a connection was torn down, reported to the connection listener.
///
/// Mirrors §6's "Reason codes surfaced to applications" exactly; this is a
/// plain enum, not an error type, per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport reported an uncategorized failure.
    Unknown,
    /// The broker rejected the credentials (fatal; always reported).
    NotAuthorized,
    /// The connection dropped while the supervisor intended to stay connected.
    ConnectionLost,
    /// The connection attempt or an operation timed out.
    ConnectionTimeout,
    /// `disconnect()` was called; the supervisor closed the session deliberately.
    ClientClosed,
}

/// Classifies a [`TransportError`] as retryable or fatal per §4.7's table.
fn is_retryable(error: &TransportError, run: bool) -> bool {
    matches!(
        error,
        TransportError::ServerConnectError(_)
            | TransportError::WriteTimeout
            | TransportError::ClientNotConnected
            | TransportError::ClientTimeout
            | TransportError::UnknownHost(_)
    ) || matches!(error, TransportError::ConnectionLost { eof: true } if run)
}

/// Maps a classified [`TransportError`] to the reason reported to the
/// connection listener, per §4.7's disconnect-reason mapping table.
fn disconnect_reason(error: &TransportError, run: bool) -> DisconnectReason {
    match error {
        TransportError::NotAuthorized => DisconnectReason::NotAuthorized,
        TransportError::ConnectionLost { eof: true } if run => DisconnectReason::ConnectionLost,
        TransportError::ConnectionLost { eof: true } => DisconnectReason::ClientClosed,
        TransportError::ConnectionLost { eof: false } | TransportError::Tls(_) => DisconnectReason::ConnectionLost,
        TransportError::SocketTimeout => DisconnectReason::ConnectionTimeout,
        TransportError::UnknownHost(_) => DisconnectReason::ConnectionLost,
        TransportError::ClientTimeout | TransportError::WriteTimeout => DisconnectReason::ConnectionTimeout,
        _ => DisconnectReason::Unknown,
    }
}

/// Receives connection lifecycle notifications, dispatched through an
/// [`crate::router::Executor`] exactly like config/command listeners.
pub trait ConnectionListener: Send + Sync {
    /// Called when the observed-connected flag transitions false→true.
    fn on_connected(&self);
    /// Called when the observed-connected flag transitions true→false, or
    /// unconditionally for [`DisconnectReason::NotAuthorized`].
    fn on_disconnected(&self, reason: DisconnectReason);
}

/// Shared state the facade and the supervisor task both touch. Cheaply
/// cloneable; every field is already an `Arc`-guarded or atomic primitive,
/// matching §5's "explicitly constructed and passed by reference" design.
#[derive(Clone)]
pub struct SupervisorHandle {
    run: Arc<AtomicBool>,
    wake: Arc<Semaphore>,
}

impl SupervisorHandle {
    /// Creates a fresh handle with `run = false` and no pending wake tokens.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Semaphore::new(0)),
        }
    }

    /// Sets `run` to `true` (idempotent).
    pub fn start(&self) {
        self.run.store(true, Ordering::SeqCst);
    }

    /// Clears `run` and releases a wake token so the supervisor observes the
    /// change promptly.
    pub fn stop(&self) {
        self.run.store(false, Ordering::SeqCst);
        self.wake.add_permits(1);
    }

    /// Whether the supervisor should keep running.
    #[must_use]
    pub fn should_run(&self) -> bool {
        self.run.load(Ordering::SeqCst)
    }

    /// Releases exactly one wake token.
    pub fn wake(&self) {
        self.wake.add_permits(1);
    }
}

impl Default for SupervisorHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the supervisor loop described in §4.7 until `handle.should_run()`
/// goes false and the connected loop is exited, or a fatal error occurs.
///
/// Takes ownership of its inputs because it runs for the lifetime of one
/// connection session on a dedicated task (see [`crate::client::DeviceClient`]).
#[allow(clippy::too_many_arguments)]
pub async fn run(
    handle: SupervisorHandle,
    identity: Arc<DeviceIdentity>,
    token_minter: Arc<TokenMinter>,
    transport: Arc<dyn MqttTransport>,
    pipeline: Arc<OutboundPipeline>,
    router: Arc<InboundRouter>,
    mut backoff: Backoff,
    keep_alive: Duration,
    connection_listener: Option<(Arc<dyn ConnectionListener>, Arc<dyn Executor>)>,
) {
    let observed_connected = AtomicBool::new(false);
    let Some(mut inbound) = transport.take_inbound() else {
        tracing::error!("supervisor started with a transport whose inbound channel was already taken");
        return;
    };

    'outer: while handle.should_run() {
        if !transport.is_connected() {
            let token = match token_minter.mint() {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!(error = %e, "token signing failed; supervisor stopping");
                    handle.run.store(false, Ordering::SeqCst);
                    notify_disconnected(&connection_listener, &observed_connected, DisconnectReason::Unknown);
                    return;
                }
            };

            let options = ConnectOptions {
                host: identity.host().to_string(),
                port: identity.port(),
                client_id: identity.client_id().to_string(),
                username: "unused".to_string(),
                password: token,
                keep_alive,
            };

            if let Err(e) = transport.connect(options).await {
                if is_retryable(&e, handle.should_run()) {
                    tracing::warn!(error = %e, "connect failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff.next_delay())).await;
                    continue 'outer;
                }

                tracing::error!(error = %e, "connect failed fatally; supervisor stopping");
                let reason = disconnect_reason(&e, handle.should_run());
                handle.run.store(false, Ordering::SeqCst);
                notify_disconnected(&connection_listener, &observed_connected, reason);
                return;
            }

            if router.has_config_listener() {
                let _ = transport.subscribe(identity.config_topic()).await;
            }
            if router.has_command_listener() {
                let _ = transport.subscribe(&format!("{}/#", identity.commands_topic_prefix())).await;
            }

            backoff.reset();
            if !observed_connected.swap(true, Ordering::SeqCst) {
                if let Some((listener, executor)) = &connection_listener {
                    let listener = Arc::clone(listener);
                    executor.execute(Box::new(move || listener.on_connected()));
                }
            }
        }

        match connected_loop(&handle, &transport, &pipeline, &router, &identity, &mut inbound).await {
            ConnectedLoopExit::Stopped => {
                transport.force_disconnect().await;
                notify_disconnected(&connection_listener, &observed_connected, DisconnectReason::ClientClosed);
                return;
            }
            ConnectedLoopExit::Retry(e) => {
                let reason = disconnect_reason(&e, handle.should_run());
                if !is_retryable(&e, handle.should_run()) {
                    transport.force_disconnect().await;
                    handle.run.store(false, Ordering::SeqCst);
                    notify_disconnected(&connection_listener, &observed_connected, reason);
                    return;
                }
                notify_disconnected(&connection_listener, &observed_connected, reason);
            }
        }
    }

    transport.force_disconnect().await;
}

/// Fires `on_disconnected`, honoring the de-duplication rule in §4.7: it
/// fires on the false transition of `observed_connected`, except
/// `NotAuthorized` always fires. Dispatched through the listener's
/// executor, never inline on this task.
fn notify_disconnected(
    listener: &Option<(Arc<dyn ConnectionListener>, Arc<dyn Executor>)>,
    observed_connected: &AtomicBool,
    reason: DisconnectReason,
) {
    let was_connected = observed_connected.swap(false, Ordering::SeqCst);
    if !was_connected && reason != DisconnectReason::NotAuthorized {
        return;
    }
    if let Some((listener, executor)) = listener {
        let listener = Arc::clone(listener);
        executor.execute(Box::new(move || listener.on_disconnected(reason)));
    }
}

enum ConnectedLoopExit {
    /// `run` went false; caller should force-close and report `ClientClosed`.
    Stopped,
    /// A transport failure ended the connected loop; caller classifies it.
    Retry(TransportError),
}

/// The connected loop from §4.7 step 2: wait on the wake token, then drain
/// exactly one unit of outbound work per priority (state, telemetry, topic
/// events), or route one inbound message.
async fn connected_loop(
    handle: &SupervisorHandle,
    transport: &Arc<dyn MqttTransport>,
    pipeline: &Arc<OutboundPipeline>,
    router: &Arc<InboundRouter>,
    identity: &Arc<DeviceIdentity>,
    inbound: &mut tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
) -> ConnectedLoopExit {
    loop {
        tokio::select! {
            biased;

            event = inbound.recv() => {
                match event {
                    Some(TransportEvent::Message(msg)) => {
                        router.route(&msg.topic, msg.payload);
                        continue;
                    }
                    Some(TransportEvent::ConnectionLost(e)) => {
                        return ConnectedLoopExit::Retry(e);
                    }
                    None => continue,
                }
            }

            permit = handle.wake.acquire() => {
                let Ok(permit) = permit else { continue };
                permit.forget();
            }
        }

        if !handle.should_run() {
            return ConnectedLoopExit::Stopped;
        }

        match pipeline.take_next_work() {
            Work::State(bytes) => {
                match transport.publish(identity.state_topic(), bytes.clone(), crate::pipeline::Qos::AtLeastOnce).await {
                    Ok(()) => pipeline.clear_state_if_equal(&bytes),
                    Err(e) => {
                        if is_retryable(&e, handle.should_run()) {
                            handle.wake();
                            return ConnectedLoopExit::Retry(e);
                        }
                        tracing::warn!(error = %e, "non-retryable device-state publish failure; dropping");
                        pipeline.clear_state_if_equal(&bytes);
                    }
                }
            }
            Work::Telemetry(event) => {
                let topic = format!("{}{}", identity.telemetry_topic(), event.sub_path());
                match transport.publish(&topic, event.payload().to_vec(), event.qos()).await {
                    Ok(()) => pipeline.clear_unsent_telemetry(),
                    Err(e) => {
                        if is_retryable(&e, handle.should_run()) {
                            handle.wake();
                            return ConnectedLoopExit::Retry(e);
                        }
                        tracing::warn!(error = %e, "non-retryable telemetry publish failure; dropping");
                        pipeline.clear_unsent_telemetry();
                    }
                }
            }
            Work::TopicEvent(event) => {
                let base = event.topic_name().unwrap_or_else(|| identity.telemetry_topic());
                let topic = format!("{base}{}", event.sub_path());
                match transport.publish(&topic, event.payload().to_vec(), event.qos()).await {
                    Ok(()) => pipeline.clear_unsent_topic_event(),
                    Err(e) => {
                        if is_retryable(&e, handle.should_run()) {
                            handle.wake();
                            return ConnectedLoopExit::Retry(e);
                        }
                        tracing::warn!(error = %e, "non-retryable topic-event publish failure; dropping");
                        pipeline.clear_unsent_topic_event();
                    }
                }
            }
            Work::Nothing => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification_matches_table() {
        assert!(is_retryable(&TransportError::ServerConnectError("x".into()), true));
        assert!(is_retryable(&TransportError::WriteTimeout, true));
        assert!(is_retryable(&TransportError::ClientNotConnected, true));
        assert!(is_retryable(&TransportError::ClientTimeout, true));
        assert!(is_retryable(&TransportError::UnknownHost("x".into()), true));
        assert!(is_retryable(&TransportError::ConnectionLost { eof: true }, true));
        assert!(!is_retryable(&TransportError::ConnectionLost { eof: true }, false));
        assert!(!is_retryable(&TransportError::NotAuthorized, true));
        assert!(!is_retryable(&TransportError::BadPayload("x".into()), true));
    }

    #[test]
    fn disconnect_reason_mapping_matches_table() {
        assert_eq!(disconnect_reason(&TransportError::NotAuthorized, true), DisconnectReason::NotAuthorized);
        assert_eq!(
            disconnect_reason(&TransportError::ConnectionLost { eof: true }, true),
            DisconnectReason::ConnectionLost
        );
        assert_eq!(
            disconnect_reason(&TransportError::ConnectionLost { eof: true }, false),
            DisconnectReason::ClientClosed
        );
        assert_eq!(
            disconnect_reason(&TransportError::ConnectionLost { eof: false }, true),
            DisconnectReason::ConnectionLost
        );
        assert_eq!(disconnect_reason(&TransportError::Tls("x".into()), true), DisconnectReason::ConnectionLost);
        assert_eq!(disconnect_reason(&TransportError::SocketTimeout, true), DisconnectReason::ConnectionTimeout);
        assert_eq!(
            disconnect_reason(&TransportError::UnknownHost("x".into()), true),
            DisconnectReason::ConnectionLost
        );
        assert_eq!(disconnect_reason(&TransportError::WriteTimeout, true), DisconnectReason::ConnectionTimeout);
        assert_eq!(disconnect_reason(&TransportError::Unknown("x".into()), true), DisconnectReason::Unknown);
    }

    #[test]
    fn supervisor_handle_start_stop() {
        let handle = SupervisorHandle::new();
        assert!(!handle.should_run());
        handle.start();
        assert!(handle.should_run());
        handle.stop();
        assert!(!handle.should_run());
        assert_eq!(handle.wake.available_permits(), 1);
    }
}

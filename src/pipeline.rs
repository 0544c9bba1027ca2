// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The prioritized, bounded, disconnect-tolerant outbound pipeline.
//!
//! Three message classes share one pipeline: a coalescing "latest value
//! wins" slot for device state, and two FIFO queues (telemetry, topic
//! events) each with a single "unsent" slot holding the event currently
//! being handed to the transport.

use parking_lot::Mutex;

use crate::identity::QueueConfig;
use crate::queue::BoundedQueue;

/// MQTT quality of service, restricted to the two levels this crate supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    /// At-most-once delivery.
    AtMostOnce = 0,
    /// At-least-once delivery.
    AtLeastOnce = 1,
}

/// An outbound event destined for the telemetry topic or an arbitrary topic.
///
/// Immutable once constructed. For telemetry, `topic_name` is `None`; for an
/// arbitrary topic publication it names the topic base (see
/// [`crate::supervisor`] for how the two cases are dispatched).
///
/// # Examples
///
/// ```
/// use gcp_iot_core::pipeline::{Qos, TopicEvent};
///
/// let event = TopicEvent::telemetry("abc", b"payload".to_vec(), Qos::AtLeastOnce);
/// assert_eq!(event.sub_path(), "/abc");
/// assert_eq!(event.topic_name(), None);
/// ```
#[derive(Debug, Clone)]
pub struct TopicEvent {
    topic_name: Option<String>,
    sub_path: String,
    payload: Vec<u8>,
    qos: Qos,
}

impl TopicEvent {
    /// Builds a telemetry event (no topic base; published under the
    /// device's telemetry topic).
    #[must_use]
    pub fn telemetry(sub_path: impl Into<String>, payload: Vec<u8>, qos: Qos) -> Self {
        Self {
            topic_name: None,
            sub_path: normalize_sub_path(sub_path.into()),
            payload,
            qos,
        }
    }

    /// Builds an arbitrary topic-event publication.
    #[must_use]
    pub fn topic(
        topic_name: impl Into<String>,
        sub_path: impl Into<String>,
        payload: Vec<u8>,
        qos: Qos,
    ) -> Self {
        Self {
            topic_name: Some(topic_name.into()),
            sub_path: normalize_sub_path(sub_path.into()),
            payload,
            qos,
        }
    }

    /// The topic base name, if this is an arbitrary topic-event publication.
    #[must_use]
    pub fn topic_name(&self) -> Option<&str> {
        self.topic_name.as_deref()
    }

    /// The normalized sub-path: empty, or starting with `/`.
    #[must_use]
    pub fn sub_path(&self) -> &str {
        &self.sub_path
    }

    /// The event payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The requested QoS.
    #[must_use]
    pub fn qos(&self) -> Qos {
        self.qos
    }
}

/// Normalizes a sub-path: `""` stays `""`; any non-empty string not already
/// starting with `/` is prefixed with one. Idempotent.
#[must_use]
pub fn normalize_sub_path(sub_path: String) -> String {
    if sub_path.is_empty() || sub_path.starts_with('/') {
        sub_path
    } else {
        format!("/{sub_path}")
    }
}

/// The next piece of work the supervisor should publish.
#[derive(Debug)]
pub enum Work {
    /// Publish this payload to the device state topic at QoS 1.
    State(Vec<u8>),
    /// Publish this event to the telemetry topic plus its sub-path.
    Telemetry(TopicEvent),
    /// Publish this event to its own topic name plus its sub-path.
    TopicEvent(TopicEvent),
    /// Nothing is pending.
    Nothing,
}

/// State-slot for device state plus FIFO queues for telemetry and topic events.
pub struct OutboundPipeline {
    state_slot: Mutex<Option<Vec<u8>>>,
    telemetry_unsent: Mutex<Option<TopicEvent>>,
    telemetry_queue: Mutex<BoundedQueue<TopicEvent>>,
    topic_event_unsent: Mutex<Option<TopicEvent>>,
    topic_event_queue: Mutex<BoundedQueue<TopicEvent>>,
}

impl OutboundPipeline {
    /// Creates an empty pipeline with the given queue configurations.
    #[must_use]
    pub fn new(telemetry_config: QueueConfig, topic_event_config: QueueConfig) -> Self {
        Self {
            state_slot: Mutex::new(None),
            telemetry_unsent: Mutex::new(None),
            telemetry_queue: Mutex::new(BoundedQueue::new(telemetry_config.capacity, telemetry_config.policy)),
            topic_event_unsent: Mutex::new(None),
            topic_event_queue: Mutex::new(BoundedQueue::new(
                topic_event_config.capacity,
                topic_event_config.policy,
            )),
        }
    }

    /// Atomically stores `bytes` in the state slot.
    ///
    /// Returns `true` iff the slot was previously empty — callers use this
    /// to decide whether the worker needs to be signaled (the wake-token
    /// discipline in §5: "first transition of the state slot from empty to
    /// non-empty" releases exactly one token).
    pub fn set_pending_state(&self, bytes: Vec<u8>) -> bool {
        let mut slot = self.state_slot.lock();
        let was_empty = slot.is_none();
        *slot = Some(bytes);
        was_empty
    }

    /// Enqueues a telemetry event.
    ///
    /// Returns `true` iff the queue's size strictly increased (so a
    /// `HeadDrop` acceptance still reports success, while a `TailReject`
    /// rejection reports failure).
    pub fn enqueue_telemetry(&self, event: TopicEvent) -> bool {
        let mut queue = self.telemetry_queue.lock();
        let before = queue.len();
        queue.offer(event);
        queue.len() > before
    }

    /// Enqueues a topic event. See [`Self::enqueue_telemetry`].
    pub fn enqueue_topic_event(&self, event: TopicEvent) -> bool {
        let mut queue = self.topic_event_queue.lock();
        let before = queue.len();
        queue.offer(event);
        queue.len() > before
    }

    /// Produces the next piece of work in strict priority order: device
    /// state, then telemetry, then topic events.
    pub fn take_next_work(&self) -> Work {
        {
            let slot = self.state_slot.lock();
            if let Some(bytes) = slot.as_ref() {
                return Work::State(bytes.clone());
            }
        }

        {
            let mut unsent = self.telemetry_unsent.lock();
            if unsent.is_none() {
                *unsent = self.telemetry_queue.lock().poll();
            }
            if let Some(event) = unsent.as_ref() {
                return Work::Telemetry(event.clone());
            }
        }

        {
            let mut unsent = self.topic_event_unsent.lock();
            if unsent.is_none() {
                *unsent = self.topic_event_queue.lock().poll();
            }
            if let Some(event) = unsent.as_ref() {
                return Work::TopicEvent(event.clone());
            }
        }

        Work::Nothing
    }

    /// Clears the state slot only if it still holds exactly `sent`,
    /// preserving a newer write that arrived while the send was in flight.
    pub fn clear_state_if_equal(&self, sent: &[u8]) {
        let mut slot = self.state_slot.lock();
        if slot.as_deref() == Some(sent) {
            *slot = None;
        }
    }

    /// Clears the telemetry unsent slot after a successful (or
    /// non-retryable-failed) publish.
    pub fn clear_unsent_telemetry(&self) {
        *self.telemetry_unsent.lock() = None;
    }

    /// Clears the topic-event unsent slot after a successful (or
    /// non-retryable-failed) publish.
    pub fn clear_unsent_topic_event(&self) {
        *self.topic_event_unsent.lock() = None;
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound message routing to configuration and command listeners.
//!
//! The router never calls a listener inline; it always hands the call off
//! through an [`Executor`], so the connection supervisor task is never
//! blocked by user code.

use std::sync::Arc;

/// Receives configuration-topic payloads.
pub trait ConfigListener: Send + Sync {
    /// Called with the raw payload of a configuration message.
    fn on_config(&self, payload: Vec<u8>);
}

/// Receives command-topic payloads, along with the sub-folder they arrived on.
pub trait CommandListener: Send + Sync {
    /// Called with the command sub-folder (`""` if the commands topic itself
    /// was published to) and the raw payload.
    fn on_command(&self, sub_folder: String, payload: Vec<u8>);
}

impl<F> ConfigListener for F
where
    F: Fn(Vec<u8>) + Send + Sync,
{
    fn on_config(&self, payload: Vec<u8>) {
        self(payload);
    }
}

impl<F> CommandListener for F
where
    F: Fn(String, Vec<u8>) + Send + Sync,
{
    fn on_command(&self, sub_folder: String, payload: Vec<u8>) {
        self(sub_folder, payload);
    }
}

/// Runs a caller-supplied unit of work on a caller-chosen execution context.
///
/// This is the injected capability the supervisor uses to invoke listener
/// callbacks without ever running them on its own task.
pub trait Executor: Send + Sync {
    /// Executes `job`. Implementations decide where and when; they must not
    /// run `job` synchronously on the caller's task if that task is the
    /// connection supervisor.
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// The default [`Executor`]: runs each job on the `tokio` blocking thread
/// pool via [`tokio::task::spawn_blocking`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PooledExecutor;

impl Executor for PooledExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        tokio::task::spawn_blocking(job);
    }
}

/// Routes inbound messages by topic to a configuration listener and/or a
/// command listener, each dispatched through its own [`Executor`].
pub struct InboundRouter {
    config: Option<(Arc<dyn ConfigListener>, Arc<dyn Executor>)>,
    command: Option<(Arc<dyn CommandListener>, Arc<dyn Executor>)>,
    config_topic: String,
    commands_topic_prefix: String,
}

impl InboundRouter {
    /// Creates a router with no listeners registered.
    #[must_use]
    pub fn new(config_topic: impl Into<String>, commands_topic_prefix: impl Into<String>) -> Self {
        Self {
            config: None,
            command: None,
            config_topic: config_topic.into(),
            commands_topic_prefix: commands_topic_prefix.into(),
        }
    }

    /// Registers (or replaces) the configuration listener and its executor.
    pub fn set_config_listener(&mut self, listener: Arc<dyn ConfigListener>, executor: Arc<dyn Executor>) {
        self.config = Some((listener, executor));
    }

    /// Registers (or replaces) the command listener and its executor.
    pub fn set_command_listener(&mut self, listener: Arc<dyn CommandListener>, executor: Arc<dyn Executor>) {
        self.command = Some((listener, executor));
    }

    /// Returns `true` if a configuration listener is registered.
    #[must_use]
    pub fn has_config_listener(&self) -> bool {
        self.config.is_some()
    }

    /// Returns `true` if a command listener is registered.
    #[must_use]
    pub fn has_command_listener(&self) -> bool {
        self.command.is_some()
    }

    /// Routes one inbound message per §4.6: exact match on the configuration
    /// topic goes to the configuration listener; the commands topic or
    /// anything under `<prefix>/` goes to the command listener with the
    /// sub-folder stripped; anything else is dropped silently.
    pub fn route(&self, topic: &str, payload: Vec<u8>) {
        if topic == self.config_topic {
            if let Some((listener, executor)) = &self.config {
                let listener = Arc::clone(listener);
                executor.execute(Box::new(move || listener.on_config(payload)));
            }
            return;
        }

        if let Some(sub_folder) = command_sub_folder(topic, &self.commands_topic_prefix) {
            if let Some((listener, executor)) = &self.command {
                let listener = Arc::clone(listener);
                let sub_folder = sub_folder.to_string();
                executor.execute(Box::new(move || listener.on_command(sub_folder, payload)));
            }
        }
    }
}

/// Returns the command sub-folder for `topic` given the commands topic
/// prefix, or `None` if `topic` is not the prefix itself nor nested under it.
fn command_sub_folder<'a>(topic: &'a str, prefix: &str) -> Option<&'a str> {
    if topic == prefix {
        return Some("");
    }
    topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Runs jobs synchronously for deterministic assertions.
    struct InlineExecutor;

    impl Executor for InlineExecutor {
        fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
            job();
        }
    }

    #[test]
    fn routes_config_topic_exactly() {
        let received = Arc::new(Mutex::new(None));
        let received_clone = Arc::clone(&received);
        let listener: Arc<dyn ConfigListener> = Arc::new(move |payload: Vec<u8>| {
            *received_clone.lock() = Some(payload);
        });

        let mut router = InboundRouter::new("/devices/d/config", "/devices/d/commands");
        router.set_config_listener(listener, Arc::new(InlineExecutor));

        router.route("/devices/d/config", b"cfg".to_vec());
        assert_eq!(*received.lock(), Some(b"cfg".to_vec()));
    }

    #[test]
    fn routes_command_with_sub_folder() {
        let received = Arc::new(Mutex::new(None));
        let received_clone = Arc::clone(&received);
        let listener: Arc<dyn CommandListener> = Arc::new(move |sub_folder: String, payload: Vec<u8>| {
            *received_clone.lock() = Some((sub_folder, payload));
        });

        let mut router = InboundRouter::new("/devices/d/config", "/devices/d/commands");
        router.set_command_listener(listener, Arc::new(InlineExecutor));

        router.route("/devices/d/commands/lights", b"on".to_vec());
        assert_eq!(*received.lock(), Some(("lights".to_string(), b"on".to_vec())));
    }

    #[test]
    fn routes_command_topic_itself_as_empty_sub_folder() {
        let received = Arc::new(Mutex::new(None));
        let received_clone = Arc::clone(&received);
        let listener: Arc<dyn CommandListener> = Arc::new(move |sub_folder: String, payload: Vec<u8>| {
            *received_clone.lock() = Some((sub_folder, payload));
        });

        let mut router = InboundRouter::new("/devices/d/config", "/devices/d/commands");
        router.set_command_listener(listener, Arc::new(InlineExecutor));

        router.route("/devices/d/commands", b"noop".to_vec());
        assert_eq!(*received.lock(), Some((String::new(), b"noop".to_vec())));
    }

    #[test]
    fn drops_unmatched_topic_silently() {
        let router = InboundRouter::new("/devices/d/config", "/devices/d/commands");
        // Neither listener is registered; routing must not panic.
        router.route("/devices/d/commands/lights", b"x".to_vec());
        router.route("/some/unrelated/topic", b"x".to_vec());
    }

    #[test]
    fn does_not_match_sibling_topic_with_shared_prefix() {
        // "/devices/d/commandsX" shares a string prefix with the commands
        // topic but is not nested under it and must not route.
        assert_eq!(command_sub_folder("/devices/d/commandsX", "/devices/d/commands"), None);
    }

    #[test]
    fn dispatches_through_executor_not_inline() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct RecordingExecutor(Arc<AtomicBool>);
        impl Executor for RecordingExecutor {
            fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
                self.0.store(true, Ordering::SeqCst);
                job();
            }
        }

        let used = Arc::new(AtomicBool::new(false));
        let mut router = InboundRouter::new("/devices/d/config", "/devices/d/commands");
        router.set_config_listener(Arc::new(|_: Vec<u8>| {}), Arc::new(RecordingExecutor(Arc::clone(&used))));

        router.route("/devices/d/config", b"x".to_vec());
        assert!(used.load(Ordering::SeqCst));
    }
}

//! Observer fanout for sandbox telemetry.
//!
//! Each sandbox keeps an ordered list of observers. Dispatch is synchronous
//! on the calling thread, in subscription order, and a panicking observer is
//! isolated so it can never break another observer or the command that
//! triggered the event.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use strum::Display;

/// Command output embedded in events is clipped to this many bytes so a
/// single `cat` of a large file does not balloon every observer.
pub const EVENT_OUTPUT_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum FileChangeKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LifecycleKind {
    Created,
    Disposed,
    SnapshotCreated,
    SnapshotRestored,
}

/// Events fanned out to sandbox observers.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SandboxEvent {
    CommandExecuted {
        sandbox_id: String,
        command_name: String,
        command: String,
        exit_code: i32,
        duration: Duration,
        working_directory: String,
        /// Truncated to [`EVENT_OUTPUT_LIMIT`].
        stdout: String,
        /// Truncated to [`EVENT_OUTPUT_LIMIT`].
        stderr: String,
    },
    FileChanged {
        sandbox_id: String,
        path: String,
        kind: FileChangeKind,
    },
    SkillInvoked {
        sandbox_id: String,
        skill: String,
        args: Vec<String>,
    },
    Lifecycle {
        sandbox_id: String,
        kind: LifecycleKind,
    },
    Error {
        sandbox_id: String,
        message: String,
    },
}

/// A sink for sandbox events.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &SandboxEvent);
}

/// Ordered, panic-isolating event dispatcher.
pub struct ObserverFanout {
    observers: Mutex<Vec<(u64, Arc<dyn Observer>)>>,
    next_handle: AtomicU64,
}

impl ObserverFanout {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            observers: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(0),
        })
    }

    /// Appends an observer and returns a guard whose drop removes it again.
    pub fn subscribe(self: &Arc<Self>, observer: Arc<dyn Observer>) -> Subscription {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().unwrap().push((handle, observer));
        Subscription {
            fanout: Arc::downgrade(self),
            handle,
        }
    }

    /// Delivers an event to every observer, in subscription order. A
    /// panicking observer is logged and skipped.
    pub fn dispatch(&self, event: &SandboxEvent) {
        let observers: Vec<(u64, Arc<dyn Observer>)> =
            self.observers.lock().unwrap().clone();

        for (handle, observer) in observers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            if outcome.is_err() {
                log::error!("observer {} panicked while handling an event", handle);
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    fn unsubscribe(&self, handle: u64) {
        self.observers
            .lock()
            .unwrap()
            .retain(|(existing, _)| *existing != handle);
    }
}

/// Scoped observer registration; dropping it removes the observer from the
/// fanout.
pub struct Subscription {
    fanout: Weak<ObserverFanout>,
    handle: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(fanout) = self.fanout.upgrade() {
            fanout.unsubscribe(self.handle);
        }
    }
}

/// Clips a string to [`EVENT_OUTPUT_LIMIT`] bytes on a char boundary.
pub fn clip_output(text: &str) -> String {
    if text.len() <= EVENT_OUTPUT_LIMIT {
        return text.to_owned();
    }

    let mut end = EVENT_OUTPUT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_owned()
}

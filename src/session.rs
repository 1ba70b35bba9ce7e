//! The session manager: a concurrent registry of live sandboxes with
//! identity, lifecycle, and inactivity reaping.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::options::SandboxOptions;
use crate::sandbox::{Sandbox, SandboxError, SandboxStats};

pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Length of synthesized sandbox ids, in hex characters.
const ID_LENGTH: usize = 12;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("sandbox id '{0}' already exists")]
    Conflict(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Synthesizes a short random sandbox id.
fn generate_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..ID_LENGTH].to_owned()
}

/// Concurrent `id → Sandbox` registry.
///
/// The map itself is the only state shared across sandboxes; everything
/// else lives inside the individual [`Sandbox`] instances. A sandbox
/// disposed directly (rather than through [`SessionManager::destroy`])
/// removes itself from the registry through its dispose hook.
pub struct SessionManager {
    sandboxes: DashMap<String, Arc<Sandbox>>,
    default_options: SandboxOptions,
    inactivity_timeout: Duration,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Self::with_config(SandboxOptions::default(), DEFAULT_INACTIVITY_TIMEOUT)
    }

    pub fn with_config(
        default_options: SandboxOptions,
        inactivity_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            sandboxes: DashMap::new(),
            default_options,
            inactivity_timeout,
        })
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    /// The options applied when a create request does not supply its own.
    pub fn default_options(&self) -> SandboxOptions {
        self.default_options.clone()
    }

    /// Creates and registers a new sandbox. With no explicit id, a random
    /// 12-hex-character one is synthesized; an explicit id that is already
    /// taken is a conflict, and the freshly built sandbox is disposed.
    pub fn create(
        self: &Arc<Self>,
        id: Option<String>,
        options: Option<SandboxOptions>,
    ) -> Result<Arc<Sandbox>, SessionError> {
        let id = id.unwrap_or_else(generate_id);
        let options = options.unwrap_or_else(|| self.default_options.clone());

        let sandbox = Arc::new(Sandbox::new(id.clone(), options)?);

        let mut rejected = None;
        let result = match self.sandboxes.entry(id.clone()) {
            Entry::Occupied(_) => {
                rejected = Some(Arc::clone(&sandbox));
                Err(SessionError::Conflict(id))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&sandbox));
                Ok(sandbox)
            }
        };

        match result {
            Ok(sandbox) => {
                self.arm_dispose_hook(&sandbox);
                log::info!("Created sandbox {}", sandbox.id());
                Ok(sandbox)
            }
            Err(err) => {
                // Disposed outside the map entry lock; the loser never got a
                // dispose hook, so the registered sandbox is untouched.
                if let Some(loser) = rejected {
                    loser.dispose();
                }
                Err(err)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Sandbox>> {
        self.sandboxes.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Atomic insert-if-absent: returns the existing sandbox, or constructs
    /// one under the entry lock.
    pub fn get_or_create(
        self: &Arc<Self>,
        id: &str,
        options: Option<SandboxOptions>,
    ) -> Result<Arc<Sandbox>, SessionError> {
        let created = match self.sandboxes.entry(id.to_owned()) {
            Entry::Occupied(entry) => return Ok(Arc::clone(entry.get())),
            Entry::Vacant(slot) => {
                let options = options.unwrap_or_else(|| self.default_options.clone());
                let sandbox = Arc::new(Sandbox::new(id.to_owned(), options)?);
                slot.insert(Arc::clone(&sandbox));
                sandbox
            }
        };

        self.arm_dispose_hook(&created);
        log::info!("Created sandbox {}", created.id());
        Ok(created)
    }

    /// Removes and disposes a sandbox, reporting whether it existed.
    pub fn destroy(&self, id: &str) -> bool {
        match self.sandboxes.remove(id) {
            Some((_, sandbox)) => {
                sandbox.dispose();
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.sandboxes
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn all_stats(&self) -> Vec<SandboxStats> {
        self.sandboxes
            .iter()
            .map(|entry| entry.value().stats())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sandboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sandboxes.is_empty()
    }

    /// Removes every sandbox idle longer than the inactivity timeout,
    /// returning how many were reaped.
    pub fn cleanup_inactive(&self) -> usize {
        let cutoff = SystemTime::now() - self.inactivity_timeout;

        let expired: Vec<String> = self
            .sandboxes
            .iter()
            .filter(|entry| entry.value().last_activity_at() < cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.destroy(&id) {
                log::debug!("Reaped inactive sandbox {}", id);
                removed += 1;
            }
        }

        removed
    }

    fn arm_dispose_hook(self: &Arc<Self>, sandbox: &Arc<Sandbox>) {
        let manager = Arc::downgrade(self);
        sandbox.set_dispose_hook(Box::new(move |id| {
            if let Some(manager) = manager.upgrade() {
                manager.sandboxes.remove(id);
            }
        }));
    }
}

/// Background thread that periodically sweeps inactive sandboxes out of a
/// [`SessionManager`]. Dropping the reaper signals the thread and joins it.
pub struct Reaper {
    /// Signaled (by disconnection) when the reaper is dropped; the job
    /// thread exits on the next select.
    #[allow(unused)]
    shutdown_sender: crossbeam_channel::Sender<()>,

    /// Joined on drop.
    #[allow(unused)]
    job_thread: jod_thread::JoinHandle<()>,
}

impl Reaper {
    pub fn start(manager: Arc<SessionManager>, interval: Duration) -> Self {
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded::<()>(1);

        let job_thread = jod_thread::Builder::new()
            .name("session reaper".to_owned())
            .spawn(move || {
                log::trace!("Session reaper thread started");

                loop {
                    crossbeam_channel::select! {
                        recv(shutdown_receiver) -> _ => break,
                        default(interval) => {
                            let removed = manager.cleanup_inactive();
                            if removed > 0 {
                                log::info!("Reaped {} inactive sandbox(es)", removed);
                            }
                        }
                    }
                }

                log::trace!("Session reaper thread stopped");
            })
            .expect("failed to spawn session reaper thread");

        Self {
            shutdown_sender,
            job_thread,
        }
    }
}

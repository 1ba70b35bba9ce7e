//! One isolated execution environment: a VFS, a shell, history, and an
//! observer fanout, bound together under a single identity.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use memvfs::{path_ops, Vfs, VfsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{clip_output, LifecycleKind, Observer, ObserverFanout, SandboxEvent, Subscription};
use crate::fs_guard::{FsError, GuardedFs};
use crate::options::SandboxOptions;
use crate::shell::{Shell, ShellResult};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SandboxError {
    #[error("sandbox {0} is disposed")]
    Disposed(String),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Vfs(#[from] VfsError),
}

/// Self-contained, restorable capture of a sandbox's filesystem, working
/// directory, and environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(with = "serde_bytes")]
    pub file_system: Vec<u8>,
    pub current_directory: String,
    pub environment: BTreeMap<String, String>,
    pub created_at: SystemTime,
}

impl Snapshot {
    /// Encodes the whole bundle into one opaque blob, for hosts that park
    /// snapshots outside the process.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SandboxError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|err| VfsError::Codec(err.to_string()).into())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SandboxError> {
        let (snapshot, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|err| SandboxError::from(VfsError::Codec(err.to_string())))?;
        Ok(snapshot)
    }
}

#[derive(Debug, Clone)]
pub struct SandboxStats {
    pub id: String,
    /// Total node count of the tree, files and directories alike.
    pub file_count: usize,
    pub total_size: u64,
    pub command_count: usize,
    pub current_directory: String,
    pub created_at: SystemTime,
    pub last_activity_at: SystemTime,
}

struct SandboxState {
    last_activity_at: SystemTime,
    history: Vec<ShellResult>,
    disposed: bool,
}

type DisposeHook = Box<dyn FnOnce(&str) + Send>;

/// An isolated execution environment for one agent.
///
/// `execute` may be called from many threads; commands within one sandbox
/// are serialized on the shell lock, so their filesystem and environment
/// effects are observed in order.
pub struct Sandbox {
    id: String,
    options: SandboxOptions,
    created_at: SystemTime,
    fs: Arc<GuardedFs>,
    observers: Arc<ObserverFanout>,
    shell: Mutex<Shell>,
    state: Mutex<SandboxState>,
    on_dispose: Mutex<Option<DisposeHook>>,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    pub fn new(id: impl Into<String>, options: SandboxOptions) -> Result<Self, SandboxError> {
        let id = id.into();
        let created_at = SystemTime::now();

        log::debug!("Constructing sandbox {}", id);

        let observers = ObserverFanout::new();
        let vfs = Arc::new(Vfs::new_in_memory());
        let fs = Arc::new(GuardedFs::new(
            Arc::clone(&vfs),
            &options,
            Arc::clone(&observers),
            id.clone(),
        ));

        let mut shell = Shell::new(Arc::clone(&fs), BTreeMap::new(), options.command_timeout);

        for (key, value) in &options.environment {
            shell.execute(&format!("export {}={}", key, value));
        }

        if options.working_directory != "/" {
            let working_directory = path_ops::normalize(&options.working_directory);
            fs.create_directory(&working_directory)?;
            shell.execute(&format!("cd {}", working_directory));
        }

        for extension in &options.shell_extensions {
            shell.register_extension(Arc::clone(extension));
        }

        let sandbox = Self {
            id,
            options,
            created_at,
            fs,
            observers,
            shell: Mutex::new(shell),
            state: Mutex::new(SandboxState {
                last_activity_at: created_at,
                history: Vec::new(),
                disposed: false,
            }),
            on_dispose: Mutex::new(None),
        };

        sandbox.emit_lifecycle(LifecycleKind::Created);
        Ok(sandbox)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_activity_at(&self) -> SystemTime {
        self.state.lock().unwrap().last_activity_at
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().unwrap().disposed
    }

    /// The quota-guarded filesystem handle, for embedders that want direct
    /// file access with the same enforcement as the shell.
    pub fn fs(&self) -> &Arc<GuardedFs> {
        &self.fs
    }

    /// Registers an observer; dropping the returned subscription removes it.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
        self.observers.subscribe(observer)
    }

    /// Runs one command line through the shell.
    ///
    /// The only structured failure is [`SandboxError::Disposed`]; every
    /// other problem is reported inside the returned [`ShellResult`].
    pub fn execute(&self, line: &str) -> Result<ShellResult, SandboxError> {
        self.ensure_live()?;
        self.touch_activity();

        let (result, command_name, was_extension, working_directory) = {
            let mut shell = self.shell.lock().unwrap();
            let result = shell.execute(line);
            let command_name = line
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_owned();
            let was_extension = shell.is_extension_command(&command_name);
            let working_directory = shell.current_directory().to_owned();
            (result, command_name, was_extension, working_directory)
        };

        self.state.lock().unwrap().history.push(result.clone());
        self.fs.flush_events();

        if was_extension {
            self.observers.dispatch(&SandboxEvent::SkillInvoked {
                sandbox_id: self.id.clone(),
                skill: command_name.clone(),
                args: line.split_whitespace().skip(1).map(str::to_owned).collect(),
            });
        }

        self.observers.dispatch(&SandboxEvent::CommandExecuted {
            sandbox_id: self.id.clone(),
            command_name,
            command: result.command.clone(),
            exit_code: result.exit_code,
            duration: result.duration,
            working_directory,
            stdout: clip_output(&result.stdout),
            stderr: clip_output(&result.stderr),
        });

        Ok(result)
    }

    // Direct file API, quota-enforced like shell writes.

    pub fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError> {
        self.ensure_live()?;
        self.touch_activity();
        self.fs
            .write_file(path, content)
            .map_err(|err| self.surface_error(err))
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        self.ensure_live()?;
        Ok(self.fs.read_file(path)?)
    }

    pub fn read_to_string(&self, path: &str) -> Result<String, SandboxError> {
        self.ensure_live()?;
        Ok(self.fs.read_to_string(path)?)
    }

    pub fn list_directory(&self, path: &str) -> Result<Vec<String>, SandboxError> {
        self.ensure_live()?;
        Ok(self.fs.list_directory(path)?)
    }

    pub fn delete(&self, path: &str, recursive: bool) -> Result<(), SandboxError> {
        self.ensure_live()?;
        self.touch_activity();
        self.fs
            .delete(path, recursive)
            .map_err(|err| self.surface_error(err))
    }

    /// Captures the filesystem, working directory, and environment.
    pub fn create_snapshot(&self) -> Result<Snapshot, SandboxError> {
        self.ensure_live()?;
        self.touch_activity();

        let file_system = self.fs.vfs().create_snapshot()?;
        let (current_directory, environment) = {
            let shell = self.shell.lock().unwrap();
            (
                shell.current_directory().to_owned(),
                shell.environment().clone(),
            )
        };

        self.emit_lifecycle(LifecycleKind::SnapshotCreated);

        Ok(Snapshot {
            id: self.id.clone(),
            file_system,
            current_directory,
            environment,
            created_at: SystemTime::now(),
        })
    }

    /// Rolls the sandbox back to a snapshot. Quota limits are deliberately
    /// not re-applied: the snapshot was legal when taken, and restore goes
    /// through the bare VFS.
    pub fn restore_snapshot(&self, snapshot: &Snapshot) -> Result<(), SandboxError> {
        self.ensure_live()?;
        self.touch_activity();

        {
            // Hold the shell lock across the whole restore so concurrent
            // commands see either the old or the new world.
            let mut shell = self.shell.lock().unwrap();
            self.fs.vfs().restore_snapshot(&snapshot.file_system)?;

            let context = shell.context_mut();
            context.environment = snapshot.environment.clone();
            context.set_current_directory(snapshot.current_directory.clone());
        }

        self.emit_lifecycle(LifecycleKind::SnapshotRestored);
        Ok(())
    }

    pub fn history(&self) -> Vec<ShellResult> {
        self.state.lock().unwrap().history.clone()
    }

    pub fn stats(&self) -> SandboxStats {
        let (last_activity_at, command_count) = {
            let state = self.state.lock().unwrap();
            (state.last_activity_at, state.history.len())
        };
        let current_directory = self.shell.lock().unwrap().current_directory().to_owned();

        SandboxStats {
            id: self.id.clone(),
            file_count: self.fs.vfs().node_count(),
            total_size: self.fs.vfs().total_size(),
            command_count,
            current_directory,
            created_at: self.created_at,
            last_activity_at,
        }
    }

    /// Tears the sandbox down: clears history, notifies observers, and
    /// deregisters from the owning session manager. Safe to call twice.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.history.clear();
        }

        log::debug!("Disposing sandbox {}", self.id);
        self.emit_lifecycle(LifecycleKind::Disposed);

        if let Some(hook) = self.on_dispose.lock().unwrap().take() {
            hook(&self.id);
        }
    }

    pub(crate) fn set_dispose_hook(&self, hook: DisposeHook) {
        *self.on_dispose.lock().unwrap() = Some(hook);
    }

    pub(crate) fn rewind_last_activity(&self, by: Duration) {
        let mut state = self.state.lock().unwrap();
        if let Some(earlier) = state.last_activity_at.checked_sub(by) {
            state.last_activity_at = earlier;
        }
    }

    fn ensure_live(&self) -> Result<(), SandboxError> {
        if self.state.lock().unwrap().disposed {
            return Err(SandboxError::Disposed(self.id.clone()));
        }
        Ok(())
    }

    /// Reports a direct-API failure to observers as a non-fatal error
    /// event, then passes it along as the structured result.
    fn surface_error(&self, err: FsError) -> SandboxError {
        self.observers.dispatch(&SandboxEvent::Error {
            sandbox_id: self.id.clone(),
            message: err.to_string(),
        });
        err.into()
    }

    fn touch_activity(&self) {
        self.state.lock().unwrap().last_activity_at = SystemTime::now();
    }

    fn emit_lifecycle(&self, kind: LifecycleKind) {
        self.observers.dispatch(&SandboxEvent::Lifecycle {
            sandbox_id: self.id.clone(),
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FileChangeKind;
    use pretty_assertions::assert_eq;

    fn sandbox() -> Sandbox {
        Sandbox::new("test", SandboxOptions::default()).unwrap()
    }

    #[test]
    fn quota_failure_via_shell_leaves_no_file() {
        let sandbox = Sandbox::new(
            "quota",
            SandboxOptions {
                max_file_size: 10,
                ..Default::default()
            },
        )
        .unwrap();

        let result = sandbox
            .execute("echo 'xxxxxxxxxxxxxxxxxxxx' > /large.txt")
            .unwrap();
        assert!(!result.success());
        assert!(result.stderr.contains("exceed"));
        assert!(!sandbox.fs().exists("/large.txt"));
    }

    #[test]
    fn snapshot_rollback_restores_content() {
        let sandbox = sandbox();
        sandbox.write_file("/file.txt", b"original").unwrap();

        let snapshot = sandbox.create_snapshot().unwrap();

        sandbox.write_file("/file.txt", b"modified").unwrap();
        assert_eq!(sandbox.read_to_string("/file.txt").unwrap(), "modified");

        sandbox.restore_snapshot(&snapshot).unwrap();
        assert_eq!(sandbox.read_to_string("/file.txt").unwrap(), "original");
    }

    #[test]
    fn snapshot_restores_cwd_and_environment() {
        let sandbox = sandbox();
        sandbox.execute("mkdir -p /work").unwrap();
        sandbox.execute("cd /work").unwrap();
        sandbox.execute("export MODE=strict").unwrap();

        let snapshot = sandbox.create_snapshot().unwrap();

        sandbox.execute("cd /").unwrap();
        sandbox.execute("export MODE=loose").unwrap();

        sandbox.restore_snapshot(&snapshot).unwrap();
        assert_eq!(sandbox.execute("pwd").unwrap().stdout, "/work");
        assert_eq!(sandbox.execute("echo $MODE").unwrap().stdout, "strict");
    }

    #[test]
    fn snapshot_bundle_round_trips_through_bytes() {
        let sandbox = sandbox();
        sandbox.write_file("/f", b"payload").unwrap();

        let snapshot = sandbox.create_snapshot().unwrap();
        let encoded = snapshot.to_bytes().unwrap();
        let decoded = Snapshot::from_bytes(&encoded).unwrap();

        sandbox.write_file("/f", b"changed").unwrap();
        sandbox.restore_snapshot(&decoded).unwrap();
        assert_eq!(sandbox.read_to_string("/f").unwrap(), "payload");
        assert!(Snapshot::from_bytes(b"garbage").is_err());
    }

    #[test]
    fn recursive_mkdir_through_shell() {
        let sandbox = sandbox();
        let result = sandbox.execute("mkdir -p /a/b/c").unwrap();
        assert!(result.success());
        assert!(sandbox.fs().is_directory("/a"));
        assert!(sandbox.fs().is_directory("/a/b"));
        assert!(sandbox.fs().is_directory("/a/b/c"));
    }

    #[test]
    fn env_expansion_end_to_end() {
        let sandbox = sandbox();
        sandbox.execute("export NAME=World").unwrap();
        let result = sandbox.execute("echo Hello $NAME").unwrap();
        assert_eq!(result.stdout, "Hello World");
    }

    #[test]
    fn redirect_append_concatenates_without_newline() {
        let sandbox = sandbox();
        sandbox.execute("echo a > /x").unwrap();
        sandbox.execute("echo b >> /x").unwrap();
        assert_eq!(sandbox.read_to_string("/x").unwrap(), "ab");
    }

    #[test]
    fn constructor_applies_environment_and_working_directory() {
        let mut environment = BTreeMap::new();
        environment.insert("ROLE".to_owned(), "agent".to_owned());

        let sandbox = Sandbox::new(
            "configured",
            SandboxOptions {
                environment,
                working_directory: "/workspace".to_owned(),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(sandbox.fs().is_directory("/workspace"));
        assert_eq!(sandbox.execute("pwd").unwrap().stdout, "/workspace");
        assert_eq!(sandbox.execute("echo $ROLE").unwrap().stdout, "agent");
        assert_eq!(sandbox.execute("echo $PWD").unwrap().stdout, "/workspace");
    }

    #[test]
    fn history_records_results_in_order() {
        let sandbox = sandbox();
        sandbox.execute("echo one").unwrap();
        sandbox.execute("bogus").unwrap();

        let history = sandbox.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].command, "echo one");
        assert_eq!(history[0].stdout, "one");
        assert_eq!(history[1].exit_code, 127);
    }

    #[test]
    fn disposed_sandbox_refuses_everything() {
        let sandbox = sandbox();
        sandbox.execute("echo hi").unwrap();

        sandbox.dispose();
        sandbox.dispose(); // idempotent

        assert!(sandbox.is_disposed());
        assert!(sandbox.history().is_empty());
        assert_eq!(
            sandbox.execute("echo hi"),
            Err(SandboxError::Disposed("test".to_owned()))
        );
        assert!(matches!(
            sandbox.write_file("/f", b""),
            Err(SandboxError::Disposed(_))
        ));
    }

    #[test]
    fn dispose_hook_fires_once() {
        let fired = Arc::new(Mutex::new(0));
        let sandbox = sandbox();

        let hook_fired = Arc::clone(&fired);
        sandbox.set_dispose_hook(Box::new(move |id| {
            assert_eq!(id, "test");
            *hook_fired.lock().unwrap() += 1;
        }));

        sandbox.dispose();
        sandbox.dispose();
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[test]
    fn stats_reflect_activity() {
        let sandbox = sandbox();
        sandbox.execute("echo data > /f.txt").unwrap();

        let stats = sandbox.stats();
        assert_eq!(stats.id, "test");
        assert_eq!(stats.file_count, 2); // root + /f.txt
        assert_eq!(stats.total_size, 4);
        assert_eq!(stats.command_count, 1);
        assert_eq!(stats.current_directory, "/");
        assert!(stats.last_activity_at >= stats.created_at);
    }

    #[test]
    fn events_flow_to_observers() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Log(Mutex<Vec<String>>);
        impl Observer for Log {
            fn on_event(&self, event: &SandboxEvent) {
                let line = match event {
                    SandboxEvent::CommandExecuted { command, .. } => {
                        format!("exec:{}", command)
                    }
                    SandboxEvent::FileChanged { path, kind, .. } => {
                        format!("file:{}:{}", kind, path)
                    }
                    SandboxEvent::Lifecycle { kind, .. } => format!("life:{}", kind),
                    SandboxEvent::SkillInvoked { skill, .. } => format!("skill:{}", skill),
                    SandboxEvent::Error { message, .. } => format!("error:{}", message),
                };
                self.0.lock().unwrap().push(line);
            }
        }

        let sandbox = sandbox();
        let log = Arc::new(Log::default());
        let _subscription = sandbox.subscribe(log.clone());

        sandbox.execute("echo hi > /f").unwrap();
        sandbox.dispose();

        let lines = log.0.lock().unwrap().clone();
        assert!(lines.contains(&format!("file:{}:/f", FileChangeKind::Created)));
        assert!(lines.contains(&"exec:echo hi > /f".to_owned()));
        assert!(lines.contains(&"life:disposed".to_owned()));
    }

    #[test]
    fn command_executed_event_truncates_output() {
        use std::sync::Mutex;

        struct Capture(Mutex<usize>);
        impl Observer for Capture {
            fn on_event(&self, event: &SandboxEvent) {
                if let SandboxEvent::CommandExecuted { stdout, .. } = event {
                    *self.0.lock().unwrap() = stdout.len();
                }
            }
        }

        let sandbox = sandbox();
        sandbox
            .write_file("/big", "x".repeat(100_000).as_bytes())
            .unwrap();

        let capture = Arc::new(Capture(Mutex::new(0)));
        let _subscription = sandbox.subscribe(capture.clone());

        sandbox.execute("cat /big").unwrap();
        assert_eq!(*capture.0.lock().unwrap(), crate::events::EVENT_OUTPUT_LIMIT);
    }
}

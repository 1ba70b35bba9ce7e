//! The narrow interface handed to every command handler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use memvfs::path_ops;

use crate::fs_guard::GuardedFs;

/// Everything a command handler may touch: the sandbox's quota-guarded
/// filesystem, the working directory, and the environment. Handlers have no
/// way to reach the host filesystem or anything outside their sandbox.
pub struct ShellContext {
    /// The sandbox filesystem. All writes made through this handle are
    /// quota-enforced.
    pub fs: Arc<GuardedFs>,

    /// Current working directory, always a normalized absolute path. It is
    /// not guaranteed to exist: deleting the tree under your feet leaves it
    /// dangling until the next `cd`.
    pub current_directory: String,

    /// Shell variables. `HOME` and `PWD` are preseeded.
    pub environment: BTreeMap<String, String>,

    /// Deadline hint for extensions that perform external I/O.
    pub command_timeout: Duration,
}

impl ShellContext {
    pub fn new(
        fs: Arc<GuardedFs>,
        environment: BTreeMap<String, String>,
        command_timeout: Duration,
    ) -> Self {
        let mut environment = environment;
        environment
            .entry("HOME".to_owned())
            .or_insert_with(|| "/".to_owned());
        environment.insert("PWD".to_owned(), "/".to_owned());

        Self {
            fs,
            current_directory: "/".to_owned(),
            environment,
            command_timeout,
        }
    }

    /// Resolves a possibly-relative path against the working directory into
    /// a normalized absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        path_ops::resolve(&self.current_directory, path)
    }

    /// Changes the working directory, keeping `PWD` in sync.
    pub fn set_current_directory(&mut self, directory: String) {
        self.environment.insert("PWD".to_owned(), directory.clone());
        self.current_directory = directory;
    }
}

//! Per-sandbox configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::shell::ExtensionCommand;

pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_NODE_COUNT: usize = 10_000;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Limits and initial state for one sandbox. Deserializable from the JSON5
/// config file and from REST create requests; `shell_extensions` can only be
/// supplied programmatically.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxOptions {
    /// Upper bound on the sum of all file content lengths, in bytes.
    pub max_total_size: u64,

    /// Upper bound on a single file's content length, in bytes.
    pub max_file_size: u64,

    /// Upper bound on the number of nodes (files plus directories) in the
    /// tree.
    pub max_node_count: usize,

    /// Deadline extensions that perform external I/O should honor. The
    /// built-in commands are bounded by input size and ignore it.
    #[serde(rename = "commandTimeoutMs", with = "duration_millis")]
    pub command_timeout: Duration,

    /// Environment variables exported into the shell at construction.
    pub environment: BTreeMap<String, String>,

    /// Initial working directory, created on demand.
    pub working_directory: String,

    /// Extension commands to register with the shell.
    #[serde(skip)]
    pub shell_extensions: Vec<Arc<dyn ExtensionCommand>>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_node_count: DEFAULT_MAX_NODE_COUNT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            environment: BTreeMap::new(),
            working_directory: "/".to_owned(),
            shell_extensions: Vec::new(),
        }
    }
}

impl fmt::Debug for SandboxOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxOptions")
            .field("max_total_size", &self.max_total_size)
            .field("max_file_size", &self.max_file_size)
            .field("max_node_count", &self.max_node_count)
            .field("command_timeout", &self.command_timeout)
            .field("environment", &self.environment)
            .field("working_directory", &self.working_directory)
            .field(
                "shell_extensions",
                &self
                    .shell_extensions
                    .iter()
                    .map(|extension| extension.name().to_owned())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

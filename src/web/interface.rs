//! Wire types for the sandbox REST API. Everything serializes camelCase.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::options::SandboxOptions;
use crate::sandbox::SandboxStats;
use crate::shell::ShellResult;

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// The error envelope every non-2xx response carries.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub status_code: u16,
}

impl ErrorResponse {
    pub fn new(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status_code,
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(404, error)
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(400, error)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSandboxRequest {
    pub id: Option<String>,
    pub max_total_size: Option<u64>,
    pub max_file_size: Option<u64>,
    pub max_node_count: Option<usize>,
    pub command_timeout_ms: Option<u64>,
    pub working_directory: Option<String>,
    pub environment: Option<BTreeMap<String, String>>,
}

impl CreateSandboxRequest {
    /// Applies the request on top of the server's default options.
    pub fn into_options(self, defaults: &SandboxOptions) -> (Option<String>, SandboxOptions) {
        let mut options = defaults.clone();

        if let Some(value) = self.max_total_size {
            options.max_total_size = value;
        }
        if let Some(value) = self.max_file_size {
            options.max_file_size = value;
        }
        if let Some(value) = self.max_node_count {
            options.max_node_count = value;
        }
        if let Some(value) = self.command_timeout_ms {
            options.command_timeout = Duration::from_millis(value);
        }
        if let Some(value) = self.working_directory {
            options.working_directory = value;
        }
        if let Some(value) = self.environment {
            options.environment = value;
        }

        (self.id, options)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

impl From<&ShellResult> for CommandResponse {
    fn from(result: &ShellResult) -> Self {
        Self {
            command: result.command.clone(),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            exit_code: result.exit_code,
            success: result.success(),
            duration_ms: result.duration.as_millis() as u64,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub id: String,
    pub file_count: usize,
    pub total_size: u64,
    pub command_count: usize,
    pub current_directory: String,
    pub created_at: u64,
    pub last_activity_at: u64,
}

impl From<SandboxStats> for StatsResponse {
    fn from(stats: SandboxStats) -> Self {
        Self {
            id: stats.id,
            file_count: stats.file_count,
            total_size: stats.total_size,
            command_count: stats.command_count,
            current_directory: stats.current_directory,
            created_at: unix_millis(stats.created_at),
            last_activity_at: unix_millis(stats.last_activity_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub commands: Vec<CommandResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileResponse {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDirectoryResponse {
    pub path: String,
    pub entries: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub snapshot_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn command_response_uses_wire_field_names() {
        let result = ShellResult {
            command: "echo hi".to_owned(),
            stdout: "hi".to_owned(),
            stderr: String::new(),
            exit_code: 0,
            duration: Duration::from_millis(12),
        };

        let value = serde_json::to_value(CommandResponse::from(&result)).unwrap();
        assert_eq!(value["command"], "echo hi");
        assert_eq!(value["exitCode"], 0);
        assert_eq!(value["success"], true);
        assert_eq!(value["durationMs"], 12);
    }

    #[test]
    fn error_envelope_shape() {
        let value = serde_json::to_value(ErrorResponse::not_found("no such sandbox")).unwrap();
        assert_eq!(value["error"], "no such sandbox");
        assert_eq!(value["statusCode"], 404);
    }

    #[test]
    fn create_request_overlays_defaults() {
        let request: CreateSandboxRequest = serde_json::from_str(
            r#"{"id": "abc", "maxFileSize": 64, "commandTimeoutMs": 1000, "environment": {"A": "1"}}"#,
        )
        .unwrap();

        let (id, options) = request.into_options(&SandboxOptions::default());
        assert_eq!(id.as_deref(), Some("abc"));
        assert_eq!(options.max_file_size, 64);
        assert_eq!(options.command_timeout, Duration::from_secs(1));
        assert_eq!(options.max_node_count, 10_000);
        assert_eq!(options.environment.get("A").unwrap(), "1");
    }

    #[test]
    fn create_request_tolerates_empty_body_fields() {
        let request: CreateSandboxRequest = serde_json::from_str("{}").unwrap();
        let (id, options) = request.into_options(&SandboxOptions::default());
        assert!(id.is_none());
        assert_eq!(options.working_directory, "/");
    }
}

//! Defines the sandbox HTTP API, all under `/api/sandbox`. These endpoints
//! return JSON and map core error kinds onto HTTP status codes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, Method, Request, Response, StatusCode, Uri};
use serde::de::DeserializeOwned;

use crate::fs_guard::FsError;
use crate::sandbox::{Sandbox, SandboxError, Snapshot};
use crate::session::{SessionError, SessionManager};
use crate::web::interface::{
    CommandRequest, CommandResponse, CreateSandboxRequest, ErrorResponse, HistoryResponse,
    ListDirectoryResponse, ReadFileResponse, SnapshotResponse, StatsResponse, WriteFileRequest,
};
use crate::web::util::{empty, json, json_ok};
use memvfs::VfsError;

/// Shared server state. The snapshot store is deliberately web-layer state,
/// not core state: sandboxes hand out self-contained snapshot bundles and
/// the HTTP surface chooses to park them in memory keyed by id.
pub struct ApiState {
    pub manager: Arc<SessionManager>,
    snapshots: Mutex<HashMap<String, Snapshot>>,
}

impl ApiState {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self {
            manager,
            snapshots: Mutex::new(HashMap::new()),
        }
    }
}

pub async fn call(state: Arc<ApiState>, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = uri.path().to_owned();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let service = ApiService { state };

    match (&method, segments.as_slice()) {
        (&Method::POST, ["api", "sandbox"]) => service.handle_create(request).await,
        (&Method::GET, ["api", "sandbox"]) => service.handle_list(),
        (&Method::GET, ["api", "sandbox", id]) => service.handle_stats(id),
        (&Method::DELETE, ["api", "sandbox", id]) => service.handle_destroy(id),
        (&Method::POST, ["api", "sandbox", id, "exec"]) => {
            let id = id.to_string();
            service.handle_exec(&id, request).await
        }
        (&Method::GET, ["api", "sandbox", id, "history"]) => service.handle_history(id),
        (&Method::GET, ["api", "sandbox", id, "fs"]) => service.handle_read_file(id, &uri),
        (&Method::PUT, ["api", "sandbox", id, "fs"]) => {
            let id = id.to_string();
            service.handle_write_file(&id, request).await
        }
        (&Method::GET, ["api", "sandbox", id, "ls"]) => service.handle_list_directory(id, &uri),
        (&Method::POST, ["api", "sandbox", id, "snapshot"]) => service.handle_snapshot(id),
        (&Method::POST, ["api", "sandbox", id, "restore"]) => service.handle_restore(id, &uri),
        (&Method::GET, ["api", "sandbox", id, "stats"]) => service.handle_stats(id),

        (_method, _path) => json(
            ErrorResponse::not_found(format!("Route not found: {}", path)),
            StatusCode::NOT_FOUND,
        ),
    }
}

/// Extracts a query parameter value from a request URI. No percent-decoding
/// beyond `+`-as-space; sandbox paths are plain ASCII.
pub(super) fn query_param(uri: &Uri, key: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name == key {
            Some(value.replace('+', " "))
        } else {
            None
        }
    })
}

/// Maps a core error onto the documented status codes: NotFound → 404,
/// quota and type mismatches → 400, Disposed → 410, the rest → 500.
pub(super) fn error_status(err: &SandboxError) -> StatusCode {
    match err {
        SandboxError::Disposed(_) => StatusCode::GONE,
        SandboxError::Fs(FsError::Quota(_)) => StatusCode::BAD_REQUEST,
        SandboxError::Fs(FsError::Vfs(err)) | SandboxError::Vfs(err) => match err {
            VfsError::NotFound(_) => StatusCode::NOT_FOUND,
            VfsError::Codec(_) | VfsError::InvalidData(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        },
    }
}

fn sandbox_error(err: &SandboxError) -> Response<Full<Bytes>> {
    let status = error_status(err);
    json(
        ErrorResponse::new(status.as_u16(), err.to_string()),
        status,
    )
}

async fn read_json<T: DeserializeOwned>(
    request: Request<Incoming>,
) -> Result<T, Response<Full<Bytes>>> {
    let bytes = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            return Err(json(
                ErrorResponse::bad_request(format!("could not read request body: {}", err)),
                StatusCode::BAD_REQUEST,
            ))
        }
    };

    serde_json::from_slice(&bytes).map_err(|err| {
        json(
            ErrorResponse::bad_request(format!("invalid request body: {}", err)),
            StatusCode::BAD_REQUEST,
        )
    })
}

struct ApiService {
    state: Arc<ApiState>,
}

impl ApiService {
    fn sandbox(&self, id: &str) -> Result<Arc<Sandbox>, Response<Full<Bytes>>> {
        self.state.manager.get(id).ok_or_else(|| {
            json(
                ErrorResponse::not_found(format!("no sandbox with id '{}'", id)),
                StatusCode::NOT_FOUND,
            )
        })
    }

    async fn handle_create(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let body: CreateSandboxRequest = match read_json(request).await {
            Ok(body) => body,
            Err(response) => return response,
        };

        let defaults = self.state.manager.default_options();
        let (id, options) = body.into_options(&defaults);

        match self.state.manager.create(id, Some(options)) {
            Ok(sandbox) => json(
                StatsResponse::from(sandbox.stats()),
                StatusCode::CREATED,
            ),
            Err(err @ SessionError::Conflict(_)) => json(
                ErrorResponse::new(409, err.to_string()),
                StatusCode::CONFLICT,
            ),
            Err(SessionError::Sandbox(err)) => sandbox_error(&err),
        }
    }

    fn handle_list(&self) -> Response<Full<Bytes>> {
        let stats: Vec<StatsResponse> = self
            .state
            .manager
            .all_stats()
            .into_iter()
            .map(StatsResponse::from)
            .collect();
        json_ok(stats)
    }

    fn handle_stats(&self, id: &str) -> Response<Full<Bytes>> {
        match self.sandbox(id) {
            Ok(sandbox) => json_ok(StatsResponse::from(sandbox.stats())),
            Err(response) => response,
        }
    }

    fn handle_destroy(&self, id: &str) -> Response<Full<Bytes>> {
        if self.state.manager.destroy(id) {
            empty(StatusCode::NO_CONTENT)
        } else {
            json(
                ErrorResponse::not_found(format!("no sandbox with id '{}'", id)),
                StatusCode::NOT_FOUND,
            )
        }
    }

    async fn handle_exec(&self, id: &str, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let body: CommandRequest = match read_json(request).await {
            Ok(body) => body,
            Err(response) => return response,
        };

        let sandbox = match self.sandbox(id) {
            Ok(sandbox) => sandbox,
            Err(response) => return response,
        };

        match sandbox.execute(&body.command) {
            Ok(result) => json_ok(CommandResponse::from(&result)),
            Err(err) => sandbox_error(&err),
        }
    }

    fn handle_history(&self, id: &str) -> Response<Full<Bytes>> {
        match self.sandbox(id) {
            Ok(sandbox) => json_ok(HistoryResponse {
                commands: sandbox
                    .history()
                    .iter()
                    .map(CommandResponse::from)
                    .collect(),
            }),
            Err(response) => response,
        }
    }

    fn handle_read_file(&self, id: &str, uri: &Uri) -> Response<Full<Bytes>> {
        let path = match query_param(uri, "path") {
            Some(path) => path,
            None => {
                return json(
                    ErrorResponse::bad_request("missing required query parameter 'path'"),
                    StatusCode::BAD_REQUEST,
                )
            }
        };

        let sandbox = match self.sandbox(id) {
            Ok(sandbox) => sandbox,
            Err(response) => return response,
        };

        match sandbox.read_file(&path) {
            Ok(bytes) => json_ok(ReadFileResponse {
                path,
                content: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(err) => sandbox_error(&err),
        }
    }

    async fn handle_write_file(
        &self,
        id: &str,
        request: Request<Incoming>,
    ) -> Response<Full<Bytes>> {
        let body: WriteFileRequest = match read_json(request).await {
            Ok(body) => body,
            Err(response) => return response,
        };

        let sandbox = match self.sandbox(id) {
            Ok(sandbox) => sandbox,
            Err(response) => return response,
        };

        match sandbox.write_file(&body.path, body.content.as_bytes()) {
            Ok(()) => json_ok(ReadFileResponse {
                path: body.path,
                content: body.content,
            }),
            Err(err) => sandbox_error(&err),
        }
    }

    fn handle_list_directory(&self, id: &str, uri: &Uri) -> Response<Full<Bytes>> {
        let path = query_param(uri, "path").unwrap_or_else(|| "/".to_owned());

        let sandbox = match self.sandbox(id) {
            Ok(sandbox) => sandbox,
            Err(response) => return response,
        };

        match sandbox.list_directory(&path) {
            Ok(entries) => json_ok(ListDirectoryResponse { path, entries }),
            Err(err) => sandbox_error(&err),
        }
    }

    fn handle_snapshot(&self, id: &str) -> Response<Full<Bytes>> {
        let sandbox = match self.sandbox(id) {
            Ok(sandbox) => sandbox,
            Err(response) => return response,
        };

        match sandbox.create_snapshot() {
            Ok(snapshot) => {
                let snapshot_id = uuid::Uuid::new_v4().simple().to_string();
                self.state
                    .snapshots
                    .lock()
                    .unwrap()
                    .insert(snapshot_id.clone(), snapshot);
                json_ok(SnapshotResponse { snapshot_id })
            }
            Err(err) => sandbox_error(&err),
        }
    }

    fn handle_restore(&self, id: &str, uri: &Uri) -> Response<Full<Bytes>> {
        let snapshot_id = match query_param(uri, "snapshotId") {
            Some(snapshot_id) => snapshot_id,
            None => {
                return json(
                    ErrorResponse::bad_request("missing required query parameter 'snapshotId'"),
                    StatusCode::BAD_REQUEST,
                )
            }
        };

        let snapshot = match self
            .state
            .snapshots
            .lock()
            .unwrap()
            .get(&snapshot_id)
            .cloned()
        {
            Some(snapshot) => snapshot,
            None => {
                return json(
                    ErrorResponse::not_found(format!("no snapshot with id '{}'", snapshot_id)),
                    StatusCode::NOT_FOUND,
                )
            }
        };

        let sandbox = match self.sandbox(id) {
            Ok(sandbox) => sandbox,
            Err(response) => return response,
        };

        match sandbox.restore_snapshot(&snapshot) {
            Ok(()) => json_ok(SnapshotResponse { snapshot_id }),
            Err(err) => sandbox_error(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_guard::QuotaError;

    #[test]
    fn query_param_extraction() {
        let uri: Uri = "/api/sandbox/x/fs?path=/a/b.txt&other=1".parse().unwrap();
        assert_eq!(query_param(&uri, "path").as_deref(), Some("/a/b.txt"));
        assert_eq!(query_param(&uri, "other").as_deref(), Some("1"));
        assert_eq!(query_param(&uri, "missing"), None);

        let bare: Uri = "/api/sandbox".parse().unwrap();
        assert_eq!(query_param(&bare, "path"), None);
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            error_status(&SandboxError::Disposed("x".into())),
            StatusCode::GONE
        );
        assert_eq!(
            error_status(&SandboxError::Fs(FsError::Quota(
                QuotaError::NodeLimitReached { limit: 5 }
            ))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&SandboxError::Vfs(VfsError::NotFound("/x".into()))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&SandboxError::Fs(FsError::Vfs(VfsError::IsADirectory(
                "/d".into()
            )))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&SandboxError::Vfs(VfsError::Codec("bad".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

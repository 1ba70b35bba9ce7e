//! Defines the sandbox web interface: a JSON REST surface over the session
//! manager, served with hyper. The core types never depend on this module;
//! everything HTTP-specific (status mapping, the parked snapshot store)
//! lives here.

mod api;
pub mod interface;
mod util;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

pub use self::api::ApiState;

use self::interface::ErrorResponse;
use crate::session::SessionManager;

pub struct ApiServer {
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        ApiServer {
            state: Arc::new(ApiState::new(manager)),
        }
    }

    pub fn start(self, address: SocketAddr) {
        let state = Arc::clone(&self.state);

        let rt = Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = TcpListener::bind(address).await.unwrap();

            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let state = Arc::clone(&state);

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let state = Arc::clone(&state);

                        async move {
                            if req.uri().path().starts_with("/api") {
                                Ok::<_, Infallible>(api::call(state, req).await)
                            } else {
                                Ok::<_, Infallible>(util::json(
                                    ErrorResponse::not_found(format!(
                                        "Route not found: {}",
                                        req.uri().path()
                                    )),
                                    StatusCode::NOT_FOUND,
                                ))
                            }
                        }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        log::error!("Error serving connection: {err}");
                    }
                });
            }
        });
    }
}

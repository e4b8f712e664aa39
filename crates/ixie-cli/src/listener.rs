//! Network listener behind the dev server.
//!
//! The core only knows `DevServer::handle`; a [`Listener`] binds a socket
//! and feeds requests to it.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::future::BoxFuture;
use futures::FutureExt;
use ixie_core::{DevRequest, DevResponse, DevServer, Headers};
use std::io;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

/// A bound server.
pub struct ListeningServer {
    /// Address actually bound (port 0 is replaced by the assigned port).
    pub local_addr: SocketAddr,
    /// Completes once the shutdown signal fired and in-flight requests drained.
    pub task: JoinHandle<io::Result<()>>,
}

/// Capability to serve a [`DevServer`] on a socket.
pub trait Listener: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bind `addr` and serve until `shutdown` resolves. Shutdown stops new
    /// accepts; requests already in flight finish.
    fn listen(
        &self,
        server: DevServer,
        addr: SocketAddr,
        shutdown: BoxFuture<'static, ()>,
    ) -> BoxFuture<'static, io::Result<ListeningServer>>;
}

/// Listener backed by axum on the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxumListener;

impl Listener for AxumListener {
    fn name(&self) -> &'static str {
        "axum"
    }

    fn listen(
        &self,
        server: DevServer,
        addr: SocketAddr,
        shutdown: BoxFuture<'static, ()>,
    ) -> BoxFuture<'static, io::Result<ListeningServer>> {
        async move {
            let app = Router::new()
                .fallback(handle)
                .with_state(server)
                .layer(CorsLayer::permissive());

            let listener = tokio::net::TcpListener::bind(addr).await?;
            let local_addr = listener.local_addr()?;
            let task = tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
            });

            Ok(ListeningServer { local_addr, task })
        }
        .boxed()
    }
}

/// The listener for this process.
pub fn select_listener() -> Box<dyn Listener> {
    Box::new(AxumListener)
}

async fn handle(State(server): State<DevServer>, request: Request) -> Response {
    let Some(dev_request) = to_dev_request(&request) else {
        return (StatusCode::BAD_REQUEST, "bad request").into_response();
    };
    to_response(server.handle(dev_request).await)
}

fn to_dev_request(request: &Request) -> Option<DevRequest> {
    let headers: Headers = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str(), value.to_string()))
        })
        .collect();

    let uri = request.uri();
    DevRequest::new(request.method().as_str(), uri.path(), uri.query(), headers).ok()
}

fn to_response(response: DevResponse) -> Response {
    let DevResponse {
        status,
        headers,
        body,
    } = response;

    let mut out = Response::new(Body::from(body));
    *out.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let out_headers = out.headers_mut();
    for (name, value) in headers.iter() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                out_headers.append(name, value);
            }
            _ => tracing::warn!(header = name, "dropping invalid response header"),
        }
    }
    out
}

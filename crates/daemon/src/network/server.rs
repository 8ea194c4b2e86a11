//! HTTP and WebSocket host for the hub.
//!
//! Every WebSocket connection becomes one viewer. A writer task drains the
//! viewer's outbound queue into the socket while the connection's own task
//! runs the router's input loop over the socket's incoming messages. When the
//! hub stops, both halves wind down and the server shuts down gracefully.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use protocol::{FrameKind, InboundFrame, OutboundFrame, ProtocolError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::files::{self, FileError, FileTree};
use crate::orchestrator::{HubOrchestrator, OrchestratorState, ViewerLink};
use crate::viewers::{ViewerId, ViewerRegistry};

/// Errors from running the host.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The server failed while running.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub viewers attach to.
    hub: Arc<HubOrchestrator>,
    /// Root served by the file endpoints.
    root: PathBuf,
}

impl AppState {
    /// Creates handler state for `hub`, serving its watched root.
    pub fn new(hub: Arc<HubOrchestrator>) -> Self {
        let root = hub.config().watch.root.clone();
        Self { hub, root }
    }
}

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/files", get(list_files))
        .route("/files/content", get(file_content))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the listen address.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serves viewers on `listener` until the hub stops.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ServerError> {
    let shutdown = state.hub.shutdown_token();
    let addr = listener.local_addr()?;
    info!(%addr, "Listening for viewers");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Error body returned by the HTTP endpoints.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Failures of the HTTP endpoints.
#[derive(Debug, Error)]
enum ApiError {
    #[error("missing path parameter")]
    MissingPath,

    #[error("hub is not running")]
    Unavailable,

    #[error(transparent)]
    File(#[from] FileError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingPath => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::File(FileError::EmptyPath) => StatusCode::BAD_REQUEST,
            ApiError::File(FileError::PathTraversal(_)) => StatusCode::FORBIDDEN,
            ApiError::File(FileError::PermissionDenied(_)) => StatusCode::FORBIDDEN,
            ApiError::File(FileError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::File(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct TreeResponse {
    tree: FileTree,
}

#[derive(Debug, Deserialize)]
struct ContentQuery {
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContentResponse {
    content: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    state: &'static str,
    viewers: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        state: state.hub.state().await.as_str(),
        viewers: state.hub.registry().len(),
    })
}

async fn list_files(State(state): State<AppState>) -> Result<Json<TreeResponse>, ApiError> {
    let root = state.root.clone();
    let tree = tokio::task::spawn_blocking(move || files::list_tree(&root))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(TreeResponse { tree }))
}

async fn file_content(
    State(state): State<AppState>,
    Query(query): Query<ContentQuery>,
) -> Result<Json<ContentResponse>, ApiError> {
    let path = query
        .path
        .filter(|p| !p.is_empty())
        .ok_or(ApiError::MissingPath)?;

    let root = state.root.clone();
    let content = tokio::task::spawn_blocking(move || files::read_file(&root, &path))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(ContentResponse {
        content: String::from_utf8_lossy(&content).into_owned(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.hub.state().await != OrchestratorState::Running {
        return ApiError::Unavailable.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Runs one viewer for the lifetime of its socket.
async fn handle_socket(mut socket: WebSocket, hub: Arc<HubOrchestrator>) {
    let Some(link) = hub.connect_viewer().await else {
        debug!("Hub stopped before the viewer registered");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    let ViewerLink {
        router,
        viewer,
        outbound,
    } = link;
    let viewer_id = viewer.id().clone();
    // The registry holds the only sender, so unregistering closes the queue.
    drop(viewer);

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_frames(
        sink,
        outbound,
        Arc::clone(router.registry()),
        viewer_id.clone(),
    ));

    let exit = router
        .route_viewer_input(&viewer_id, stream.map(inbound_frame))
        .await;
    hub.viewer_disconnected(&viewer_id, &exit);

    if let Err(e) = writer.await {
        warn!(viewer_id = %viewer_id, error = %e, "Viewer writer task failed");
    }
}

/// Pumps queued frames into the socket until the queue closes.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    registry: Arc<ViewerRegistry>,
    viewer_id: ViewerId,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(outbound_message(&frame)).await {
            debug!(viewer_id = %viewer_id, error = %e, "Viewer socket write failed");
            registry.unregister(&viewer_id);
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

/// Converts a frame to the socket message carrying its exact bytes.
fn outbound_message(frame: &OutboundFrame) -> Message {
    let encoded = frame.encode();
    match OutboundFrame::kind_of(&encoded) {
        FrameKind::Text => Message::Text(String::from_utf8_lossy(&encoded).into_owned()),
        FrameKind::Binary => Message::Binary(encoded.to_vec()),
    }
}

fn inbound_frame(message: Result<Message, axum::Error>) -> Result<InboundFrame, ProtocolError> {
    match message {
        Ok(Message::Text(text)) => Ok(InboundFrame::Data(Bytes::from(text))),
        Ok(Message::Binary(data)) => Ok(InboundFrame::Data(Bytes::from(data))),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Ok(InboundFrame::Control),
        Ok(Message::Close(_)) => Ok(InboundFrame::Close),
        Err(e) => Err(ProtocolError::decode(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_text_frames() {
        let message = outbound_message(&OutboundFrame::FileRefresh("a/b.txt".to_string()));
        assert_eq!(message, Message::Text("file:refresh:a/b.txt".to_string()));

        let message = outbound_message(&OutboundFrame::Output(Bytes::from_static(b"$ ls\r\n")));
        assert_eq!(message, Message::Text("$ ls\r\n".to_string()));
    }

    #[test]
    fn test_outbound_binary_frames_keep_bytes() {
        let message = outbound_message(&OutboundFrame::Output(Bytes::from_static(b"\xe2\x94")));
        assert_eq!(message, Message::Binary(vec![0xe2, 0x94]));
    }

    #[test]
    fn test_inbound_frames() {
        assert_eq!(
            inbound_frame(Ok(Message::Text("terminal:write:ls\n".to_string()))).unwrap(),
            InboundFrame::Data(Bytes::from_static(b"terminal:write:ls\n"))
        );
        assert_eq!(
            inbound_frame(Ok(Message::Binary(vec![0xff]))).unwrap(),
            InboundFrame::Data(Bytes::from_static(b"\xff"))
        );
        assert_eq!(
            inbound_frame(Ok(Message::Ping(vec![1]))).unwrap(),
            InboundFrame::Control
        );
        assert_eq!(
            inbound_frame(Ok(Message::Close(None))).unwrap(),
            InboundFrame::Close
        );
        assert!(matches!(
            inbound_frame(Err(axum::Error::new(std::io::Error::other("reset")))),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_api_error_status() {
        assert_eq!(ApiError::MissingPath.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError::File(FileError::EmptyPath).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::File(FileError::PathTraversal("../x".to_string())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::File(FileError::NotFound(PathBuf::from("x"))).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::File(FileError::NotAFile(PathBuf::from("dir"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Internal("boom".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_bind_reports_address() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let err = bind(addr).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { addr: a, .. } if a == addr));
    }
}

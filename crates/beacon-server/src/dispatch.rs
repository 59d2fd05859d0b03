//! Per-connection admission, routing, and scoped release.
//!
//! Every connection moves through admitted → (streaming | served) →
//! released. The release step runs exactly once on every exit path because
//! it lives in a drop guard.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;

use beacon_core::error::ServerError;
use beacon_core::events::Frame;

use crate::hub::{SubscriberHub, SubscriberId};
use crate::registry::{ClientKey, ConnectionId, ConnectionRegistry};
use crate::server::AppState;

/// Admission key for a peer. Connections are grouped by source IP; the
/// port changes per socket and would defeat the cap.
pub fn client_key(addr: &SocketAddr) -> ClientKey {
    addr.ip().to_string()
}

/// Releases a registry entry exactly once, whenever it is dropped.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    key: ClientKey,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Run the admission check. On rejection the caller must answer 503 and
    /// holds no resources.
    pub fn admit(
        registry: &Arc<ConnectionRegistry>,
        key: &ClientKey,
    ) -> Result<Self, ServerError> {
        match registry.admit(key) {
            Some(id) => Ok(Self {
                registry: Arc::clone(registry),
                key: key.clone(),
                id,
            }),
            None => Err(ServerError::TooManyConnections { key: key.clone() }),
        }
    }

    pub fn touch(&self) {
        self.registry.touch(&self.key);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

/// Removes the hub subscriber when the stream goes away.
struct SubscriberGuard {
    hub: Arc<SubscriberHub>,
    id: SubscriberId,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.id);
    }
}

pin_project_lite::pin_project! {
    /// The frames of one streaming connection. Owns both guards, so the
    /// registry entry and the hub slot are released when the client goes
    /// away, whether by normal close, write error, or shutdown.
    struct SubscriberStream {
        #[pin]
        frames: ReceiverStream<Frame>,
        conn: ConnectionGuard,
        _sub: SubscriberGuard,
    }
}

impl Stream for SubscriberStream {
    type Item = Result<Event, std::convert::Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.frames.poll_next(cx) {
            Poll::Ready(Some(frame)) => {
                // Every streamed frame counts as activity for the reaper.
                this.conn.touch();
                match Event::default().json_data(&frame) {
                    Ok(event) => Poll::Ready(Some(Ok(event))),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode frame");
                        Poll::Ready(None)
                    }
                }
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// `GET /events`: the live-reload subscription endpoint. Stays open until
/// the client disconnects or the server shuts down.
pub async fn events_handler(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    let key = client_key(&addr);
    let conn = match ConnectionGuard::admit(&state.registry, &key) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(client_key = %key, error = %e, "Subscription rejected");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let (id, rx) = state.hub.subscribe(key.clone());
    tracing::info!(client_key = %key, subscriber_id = %id, "Subscriber connected");

    let stream = SubscriberStream {
        frames: ReceiverStream::new(rx),
        conn,
        _sub: SubscriberGuard {
            hub: Arc::clone(&state.hub),
            id,
        },
    };

    let mut response = Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(state.keepalive_interval)
                .text("keep-alive"),
        )
        .into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Fallback: everything that is not a subscription is a static file request.
pub async fn static_handler(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    uri: Uri,
) -> Response {
    let key = client_key(&addr);
    let conn = match ConnectionGuard::admit(&state.registry, &key) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(client_key = %key, error = %e, "Request rejected");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let response = crate::statics::serve(&state.root_dir, uri.path()).await;
    conn.touch();
    response
    // conn drops here: the request/response cycle is complete.
}

/// `GET /health`: diagnostic endpoint, exempt from admission.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "subscribers": state.hub.count(),
        "tracked_keys": state.registry.key_count(),
        "live_reload": state.watch_enabled,
    }))
}

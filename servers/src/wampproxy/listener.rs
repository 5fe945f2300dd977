//! Downstream Listener (C5): accepts WebSocket upgrades, hands each text
//! frame to the dispatcher, and writes back the JSON reply frame. Binary
//! frames are a protocol error; the connection is closed, not the process.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use url::Url;

use crate::wampproxy::dispatcher::Dispatcher;
use crate::wampproxy::error::ProxyError;

#[derive(Clone)]
struct ListenerState {
    dispatcher: Dispatcher,
    connection_slots: Arc<Semaphore>,
}

/// Splits a `ws://host:port/path` listener URI into the socket address to
/// bind and the path to mount the upgrade route on.
pub fn parse_listener_uri(uri: &str) -> Result<(SocketAddr, String), ProxyError> {
    let url = Url::parse(uri).map_err(|e| ProxyError::Config(format!("invalid server uri '{uri}': {e}")))?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ProxyError::Config(format!("unsupported server uri scheme '{}'", url.scheme())));
    }
    let host = url.host_str().ok_or_else(|| ProxyError::Config(format!("server uri '{uri}' has no host")))?;
    let port = url.port_or_known_default().unwrap_or(80);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| ProxyError::Config(format!("server uri '{uri}' does not resolve to a socket address: {e}")))?;
    let path = if url.path().is_empty() { "/ws".to_string() } else { url.path().to_string() };
    Ok((addr, path))
}

/// Runs the listener until `shutdown` resolves. Binds `addr`, serves the
/// upgrade route at `path`, and stops accepting new connections on
/// shutdown while letting in-flight replies drain.
pub async fn serve(
    addr: SocketAddr,
    path: &str,
    dispatcher: Dispatcher,
    max_connections: usize,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let state = ListenerState {
        dispatcher,
        connection_slots: Arc::new(Semaphore::new(max_connections)),
    };

    let app = Router::new()
        .route(path, get(ws_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    log::info!("downstream listener live at ws://{addr}{path}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<ListenerState>,
) -> axum::response::Response {
    let permit = match state.connection_slots.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            log::warn!("rejecting connection from {addr}: max connections reached");
            return (StatusCode::SERVICE_UNAVAILABLE, "max connections reached").into_response();
        }
    };

    ws.on_upgrade(move |socket| {
        let _permit = permit;
        async move {
            handle_socket(socket, state.dispatcher, addr).await;
        }
    })
}

/// Drives one downstream connection. Frames are read in arrival order, but
/// each is dispatched on its own task so one slow upstream call cannot stall
/// the rest; replies are written to the socket in whatever order their
/// futures resolve; there is no ordering guarantee between distinct frames
/// (WAMP call IDs, not frame order, give the real correlation).
///
/// A closed connection does not cancel calls already handed to the upstream
/// session; it only stops listening for their replies, which are simply
/// dropped when the writer task exits.
async fn handle_socket(socket: WebSocket, dispatcher: Dispatcher, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = reply_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                log::warn!("connection {addr}: read error: {e}");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                let dispatcher = dispatcher.clone();
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    let reply = dispatcher.dispatch(&text).await;
                    let _ = reply_tx.send(Message::Text(reply.to_frame().into()));
                });
            }
            Message::Binary(_) => {
                log::warn!("connection {addr}: rejecting binary frame");
                let _ = reply_tx.send(Message::Close(Some(axum::extract::ws::CloseFrame {
                    code: axum::extract::ws::close_code::UNSUPPORTED,
                    reason: "binary frames are not supported".into(),
                })));
                break;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    drop(reply_tx);
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_and_path() {
        let (addr, path) = parse_listener_uri("ws://127.0.0.1:9000/ws").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9000");
        assert_eq!(path, "/ws");
    }

    #[test]
    fn defaults_to_ws_path_when_root() {
        let (_, path) = parse_listener_uri("ws://127.0.0.1:9000").unwrap();
        assert_eq!(path, "/ws");
    }

    #[test]
    fn rejects_non_ws_scheme() {
        let err = parse_listener_uri("http://127.0.0.1:9000").unwrap_err();
        assert_eq!(err.status_code(), 500);
    }
}

//! Persistent-socket transport (WebSocket).
//!
//! Each connection task forwards its lifecycle and inbound text frames to the
//! service loop as [`SocketEvent`]s and drains the client's outbound queue.
//! Events of one client travel on a single channel, so `Connected` is always
//! seen before that client's first `Text`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use agv_types::AgvError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::clients::{ClientId, Outbound};
use crate::listener::{self, ServerTask};

/// Inbound frames longer than this are cut at the nearest character
/// boundary below it.
pub const MAX_FRAME_BYTES: usize = 64;

/// First frame every client receives.
pub const GREETING: &str = "AGV Connected - Ready for commands";

#[derive(Debug)]
pub enum SocketEvent {
    Connected {
        client: ClientId,
        peer: SocketAddr,
        outbound: Outbound,
    },
    Text {
        client: ClientId,
        text: String,
    },
    Disconnected {
        client: ClientId,
    },
}

#[derive(Debug)]
pub(crate) struct SocketServerHandle {
    pub(crate) addr: SocketAddr,
    pub(crate) events: mpsc::Receiver<SocketEvent>,
    _task: ServerTask,
}

/// Cut `text` to at most `max` bytes without splitting a UTF-8 sequence.
pub fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Bind `addr` and start accepting socket clients.  Must run inside a
/// tokio runtime.
pub(crate) fn spawn_socket_server(
    addr: SocketAddr,
    queue_depth: usize,
) -> Result<SocketServerHandle, AgvError> {
    let listener = listener::bind(addr)?;
    let bound = listener
        .local_addr()
        .map_err(|e| AgvError::Transport(format!("local_addr: {e}")))?;
    let (tx, events) = mpsc::channel(queue_depth.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept = tokio::spawn(accept_loop(listener, tx, shutdown_rx));

    info!(addr = %bound, "socket server listening");
    Ok(SocketServerHandle {
        addr: bound,
        events,
        _task: ServerTask::new(accept, shutdown_tx),
    })
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::Sender<SocketEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let next_id = Arc::new(AtomicU32::new(0));
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let client = next_id.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(serve_client(stream, peer, client, events.clone(), shutdown.clone()));
                }
                Err(e) => warn!(error = %e, "socket accept error"),
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("socket accept loop stopped");
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    client: ClientId,
    events: mpsc::Sender<SocketEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%peer, error = %e, "socket handshake failed");
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    if events
        .send(SocketEvent::Connected {
            client,
            peer,
            outbound,
        })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            // ── Downstream: service loop → client ─────────────────────────
            frame = outbound_rx.recv() => match frame {
                Some(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            // ── Upstream: client → service loop ───────────────────────────
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let text = clip(text.as_str(), MAX_FRAME_BYTES).to_string();
                    if events.send(SocketEvent::Text { client, text }).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%peer, error = %e, "socket read error");
                    break;
                }
            },

            _ = shutdown.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    let _ = events.send(SocketEvent::Disconnected { client }).await;
}

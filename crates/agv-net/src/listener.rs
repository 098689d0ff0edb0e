//! Listener binding and server task ownership shared by the HTTP and socket
//! servers.

use std::net::SocketAddr;

use agv_types::AgvError;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Bind synchronously so a port conflict surfaces to the caller
/// immediately, then hand the socket to tokio.  Must run inside a runtime.
pub(crate) fn bind(addr: SocketAddr) -> Result<TcpListener, AgvError> {
    let std_listener = std::net::TcpListener::bind(addr)
        .map_err(|e| AgvError::Transport(format!("bind error on {addr}: {e}")))?;
    std_listener
        .set_nonblocking(true)
        .map_err(|e| AgvError::Transport(format!("set_nonblocking on {addr}: {e}")))?;
    TcpListener::from_std(std_listener)
        .map_err(|e| AgvError::Transport(format!("register listener {addr}: {e}")))
}

/// An accept loop plus the shutdown signal its connection tasks watch.
///
/// Dropping the value stops accepting and tells every connection task of
/// this server to finish.
#[derive(Debug)]
pub(crate) struct ServerTask {
    accept: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ServerTask {
    pub(crate) fn new(accept: JoinHandle<()>, shutdown: watch::Sender<bool>) -> Self {
        Self { accept, shutdown }
    }
}

impl Drop for ServerTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        self.accept.abort();
    }
}

//! The single shared-state record of the network subsystem.
//!
//! Mode, emergency latch, callbacks, session, client registry and the live
//! transports all sit behind one mutex.  The lock is held only for short,
//! non-blocking sections: reading or writing flags, swapping transports,
//! and queueing outbound frames.  Callbacks are cloned out and invoked
//! after the guard is released, so a callback may read state or send to
//! clients without deadlocking.
//!
//! A second, outer lock orders deliveries to the motion core.  Command
//! dispatch holds it from the gate decision through the command callback;
//! emergency transitions hold it from the flag change through the
//! emergency callback.  Once the emergency callback has reported `true`, no
//! normal-priority command admitted earlier can still be delivered.  Lock
//! order is dispatch, then state.  Command and emergency callbacks run
//! under the dispatch lock and must not ingest commands or trigger/clear
//! the emergency state themselves.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use agv_kernel::{EmergencyLatch, SessionAuthenticator};
use agv_types::{Command, NetworkMode};

use crate::clients::ClientRegistry;
use crate::http::HttpServerHandle;
use crate::radio::DnsRedirect;
use crate::socket::SocketServerHandle;

/// Receives every forwarded command.
pub type CommandCallback = Arc<dyn Fn(&Command) + Send + Sync>;
/// Receives `true` on entering and `false` on leaving the emergency state.
pub type EmergencyCallback = Arc<dyn Fn(bool) + Send + Sync>;
/// Receives status lines sent to clients.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Receives `true` once the station link is up and `false` when it is
/// lost, torn down or a join fails.
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Listening servers and the captive DNS responder of the current mode.
///
/// `generation` increases on every rebuild; work drained under one
/// generation is not put back into a newer one.
#[derive(Default)]
pub(crate) struct Transports {
    pub(crate) generation: u64,
    pub(crate) http: Option<HttpServerHandle>,
    pub(crate) socket: Option<SocketServerHandle>,
    pub(crate) dns: Option<Box<dyn DnsRedirect>>,
    pub(crate) ip: Option<Ipv4Addr>,
}

impl Transports {
    /// Drop every server.  Dropping the handles stops their accept loops
    /// and ends their connection tasks.
    pub(crate) fn teardown(&mut self) {
        self.http = None;
        self.socket = None;
        self.dns = None;
        self.ip = None;
        self.generation += 1;
    }

    pub(crate) fn http_addr(&self) -> Option<SocketAddr> {
        self.http.as_ref().map(|h| h.addr)
    }

    pub(crate) fn socket_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(|s| s.addr)
    }
}

pub(crate) struct CoreState {
    /// `None` until the first mode has been entered.
    pub(crate) mode: Option<NetworkMode>,
    pub(crate) emergency: EmergencyLatch,
    pub(crate) on_command: Option<CommandCallback>,
    pub(crate) on_emergency: Option<EmergencyCallback>,
    pub(crate) on_status: Option<StatusCallback>,
    pub(crate) on_connection: Option<ConnectionCallback>,
    /// Station link up, as last reported to `on_connection`.
    pub(crate) connected: bool,
    pub(crate) session: SessionAuthenticator,
    pub(crate) clients: ClientRegistry,
    pub(crate) transports: Transports,
}

pub(crate) struct SharedCore {
    dispatch: Mutex<()>,
    state: Mutex<CoreState>,
}

impl SharedCore {
    pub(crate) fn new(session: SessionAuthenticator) -> Self {
        Self {
            dispatch: Mutex::new(()),
            state: Mutex::new(CoreState {
                mode: None,
                emergency: EmergencyLatch::new(),
                on_command: None,
                on_emergency: None,
                on_status: None,
                on_connection: None,
                connected: false,
                session,
                clients: ClientRegistry::new(),
                transports: Transports::default(),
            }),
        }
    }

    /// Lock the state.  A panic while holding the lock leaves plain data
    /// behind, so poisoning is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialise deliveries to the motion core.  Take before [`lock`](Self::lock),
    /// never while holding it.
    pub(crate) fn dispatch(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

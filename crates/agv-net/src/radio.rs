//! Wireless radio and host control seams.
//!
//! The controller never talks to hardware directly.  Everything the radio
//! does (access point, station join, scanning, service discovery, captive
//! DNS) goes through [`WirelessRadio`]; rebooting the device goes through
//! [`SystemControl`].  [`SimulatedRadio`] is the in-process implementation
//! used by the `agvlink` binary and by tests.
//!
//! | Trait | Purpose |
//! |---|---|
//! | [`WirelessRadio`] | AP / station / scan / mDNS / DNS redirect |
//! | [`DnsRedirect`] | answer every DNS query with one address |
//! | [`SystemControl`] | device restart |

use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use agv_types::{AgvError, Credentials, ScanResult};
use async_trait::async_trait;
use tracing::{debug, info};

/// Radio operations the network controller depends on.
///
/// Only [`scan`][WirelessRadio::scan] is asynchronous; the rest are
/// expected to return promptly and are called with the shared lock held.
#[async_trait]
pub trait WirelessRadio: Send + Sync {
    /// Bring up a WPA2 access point and return its address.
    fn start_access_point(&self, ssid: &str, secret: &str) -> Result<Ipv4Addr, AgvError>;

    /// Start joining `credentials` in station mode.  Completion is observed
    /// by polling [`is_connected`][WirelessRadio::is_connected].
    fn begin_join(&self, credentials: &Credentials) -> Result<(), AgvError>;

    fn is_connected(&self) -> bool;

    /// Address obtained in station mode, if connected.
    fn local_ip(&self) -> Option<Ipv4Addr>;

    /// List visible networks.
    async fn scan(&self) -> Result<Vec<ScanResult>, AgvError>;

    /// Advertise an HTTP service under `name` (mDNS, `<name>.local`).
    fn register_service(&self, name: &str, port: u16) -> Result<(), AgvError>;

    /// Start answering every DNS lookup with `ip`.
    fn start_dns_redirect(&self, ip: Ipv4Addr) -> Result<Box<dyn DnsRedirect>, AgvError>;

    /// Leave the current network or stop the access point.
    fn disconnect(&self);
}

/// Captive-portal DNS responder.
pub trait DnsRedirect: Send {
    /// Answer at most one pending query without blocking.  Returns `true`
    /// when a query was answered.
    fn process_next_request(&mut self) -> bool;
}

/// Device-level control.
pub trait SystemControl: Send + Sync {
    /// Restart the device.  Everything in RAM, including the emergency
    /// latch and the session token, is lost.
    fn restart(&self);
}

// ---------------------------------------------------------------------------
// SimulatedRadio
// ---------------------------------------------------------------------------

/// A DNS lookup answered by a [`SimulatedDns`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsAnswer {
    pub name: String,
    pub address: Ipv4Addr,
}

#[derive(Debug, Default)]
struct DnsQueues {
    pending: VecDeque<String>,
    answered: Vec<DnsAnswer>,
}

#[derive(Debug, Default)]
struct RadioState {
    joined: Option<String>,
    access_point: Option<String>,
    service: Option<(String, u16)>,
}

/// In-process radio.
///
/// Joins succeed when [`accept_joins`][SimulatedRadio::accept_joins] is set
/// (the default) and the network name is non-empty.  DNS lookups can be
/// injected with [`simulate_lookup`][SimulatedRadio::simulate_lookup] and
/// are answered by whatever redirect the controller started.
pub struct SimulatedRadio {
    networks: Vec<ScanResult>,
    ap_ip: Ipv4Addr,
    station_ip: Ipv4Addr,
    accept_joins: AtomicBool,
    connected: AtomicBool,
    state: Mutex<RadioState>,
    dns: Arc<Mutex<DnsQueues>>,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            networks: Vec::new(),
            ap_ip: Ipv4Addr::new(192, 168, 4, 1),
            station_ip: Ipv4Addr::LOCALHOST,
            accept_joins: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            state: Mutex::new(RadioState::default()),
            dns: Arc::new(Mutex::new(DnsQueues::default())),
        }
    }

    /// Networks returned by [`scan`][WirelessRadio::scan].
    pub fn with_networks(mut self, networks: Vec<ScanResult>) -> Self {
        self.networks = networks;
        self
    }

    pub fn with_station_ip(mut self, ip: Ipv4Addr) -> Self {
        self.station_ip = ip;
        self
    }

    /// Whether subsequent joins succeed.
    pub fn accept_joins(&self, accept: bool) {
        self.accept_joins.store(accept, Ordering::SeqCst);
    }

    /// Queue a DNS lookup for the active redirect.
    pub fn simulate_lookup(&self, name: &str) {
        self.dns_queues().pending.push_back(name.to_string());
    }

    /// Lookups answered so far.
    pub fn dns_answers(&self) -> Vec<DnsAnswer> {
        self.dns_queues().answered.clone()
    }

    pub fn joined_network(&self) -> Option<String> {
        self.radio_state().joined.clone()
    }

    pub fn access_point(&self) -> Option<String> {
        self.radio_state().access_point.clone()
    }

    pub fn registered_service(&self) -> Option<(String, u16)> {
        self.radio_state().service.clone()
    }

    fn radio_state(&self) -> std::sync::MutexGuard<'_, RadioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dns_queues(&self) -> std::sync::MutexGuard<'_, DnsQueues> {
        self.dns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WirelessRadio for SimulatedRadio {
    fn start_access_point(&self, ssid: &str, _secret: &str) -> Result<Ipv4Addr, AgvError> {
        let mut state = self.radio_state();
        state.joined = None;
        state.access_point = Some(ssid.to_string());
        self.connected.store(false, Ordering::SeqCst);
        info!(ssid, ip = %self.ap_ip, "simulated access point up");
        Ok(self.ap_ip)
    }

    fn begin_join(&self, credentials: &Credentials) -> Result<(), AgvError> {
        if credentials.is_empty() {
            return Err(AgvError::Radio("network name is empty".into()));
        }
        let mut state = self.radio_state();
        state.access_point = None;
        let reachable = self.accept_joins.load(Ordering::SeqCst);
        if reachable {
            state.joined = Some(credentials.network_name().to_string());
        }
        self.connected.store(reachable, Ordering::SeqCst);
        debug!(ssid = credentials.network_name(), reachable, "simulated join started");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.is_connected().then_some(self.station_ip)
    }

    async fn scan(&self) -> Result<Vec<ScanResult>, AgvError> {
        Ok(self.networks.clone())
    }

    fn register_service(&self, name: &str, port: u16) -> Result<(), AgvError> {
        self.radio_state().service = Some((name.to_string(), port));
        info!(name, port, "simulated mDNS service registered");
        Ok(())
    }

    fn start_dns_redirect(&self, ip: Ipv4Addr) -> Result<Box<dyn DnsRedirect>, AgvError> {
        Ok(Box::new(SimulatedDns {
            address: ip,
            queues: Arc::clone(&self.dns),
        }))
    }

    fn disconnect(&self) {
        let mut state = self.radio_state();
        state.joined = None;
        state.access_point = None;
        state.service = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Redirect handed out by [`SimulatedRadio`].
pub struct SimulatedDns {
    address: Ipv4Addr,
    queues: Arc<Mutex<DnsQueues>>,
}

impl DnsRedirect for SimulatedDns {
    fn process_next_request(&mut self) -> bool {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        match queues.pending.pop_front() {
            Some(name) => {
                queues.answered.push(DnsAnswer {
                    name,
                    address: self.address,
                });
                true
            }
            None => false,
        }
    }
}

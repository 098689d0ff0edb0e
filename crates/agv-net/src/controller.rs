//! [`NetworkController`] – mode lifecycle and the public face of the
//! subsystem.
//!
//! ```text
//!            initialize()
//!                 │
//!      saved credentials? ──no──► enter_provisioning()
//!                 │yes                    ▲
//!                 ▼                       │ join failed
//!        enter_operational() ─────────────┘
//! ```
//!
//! A mode switch tears down every transport of the previous mode before the
//! new ones are bound, all under the shared lock, so no route or server of
//! the old mode is reachable afterwards.  The only part of a switch done
//! without the lock is waiting for the station join.
//!
//! Saving new credentials never switches live; it stores them and asks the
//! [`SystemControl`] for a full restart.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use agv_kernel::SessionAuthenticator;
use agv_types::{AgvError, Command, Credentials, NetworkMode};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::arbitrator::CommandArbitrator;
use crate::clients::ClientId;
use crate::config::NetworkConfig;
use crate::credentials::CredentialStore;
use crate::emergency::EmergencyState;
use crate::http::spawn_http_server;
use crate::radio::{SystemControl, WirelessRadio};
use crate::shared::{CoreState, SharedCore};
use crate::socket::spawn_socket_server;

/// Snapshot returned by [`NetworkController::network_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub mode: Option<NetworkMode>,
    pub ip: Option<Ipv4Addr>,
    pub dashboard_url: String,
    pub socket_clients: usize,
    pub emergency: bool,
    pub http_addr: Option<SocketAddr>,
    pub socket_addr: Option<SocketAddr>,
}

pub struct NetworkController {
    config: NetworkConfig,
    core: Arc<SharedCore>,
    emergency: EmergencyState,
    arbitrator: CommandArbitrator,
    radio: Arc<dyn WirelessRadio>,
    store: Arc<dyn CredentialStore>,
    system: Arc<dyn SystemControl>,
}

impl NetworkController {
    pub fn new(
        config: NetworkConfig,
        radio: Arc<dyn WirelessRadio>,
        store: Arc<dyn CredentialStore>,
        system: Arc<dyn SystemControl>,
    ) -> Self {
        let session = SessionAuthenticator::with_login_rate(
            config.admin_username.clone(),
            config.admin_password.clone(),
            config.login_attempts_per_minute,
        );
        let core = Arc::new(SharedCore::new(session));
        let emergency = EmergencyState::new(Arc::clone(&core));
        let arbitrator = CommandArbitrator::new(Arc::clone(&core), emergency.clone());
        Self {
            config,
            core,
            emergency,
            arbitrator,
            radio,
            store,
            system,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn arbitrator(&self) -> CommandArbitrator {
        self.arbitrator.clone()
    }

    pub fn emergency(&self) -> EmergencyState {
        self.emergency.clone()
    }

    // ── Callback registration (last registration wins) ────────────────────

    pub fn on_command(&self, callback: impl Fn(&Command) + Send + Sync + 'static) {
        self.core.lock().on_command = Some(Arc::new(callback));
    }

    pub fn on_emergency_state_changed(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.core.lock().on_emergency = Some(Arc::new(callback));
    }

    pub fn on_status(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.core.lock().on_status = Some(Arc::new(callback));
    }

    /// Station link changes: `true` after a successful join, `false` after a
    /// failed join or when a joined link is torn down.
    pub fn on_connection(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.core.lock().on_connection = Some(Arc::new(callback));
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// `None` before [`initialize`][Self::initialize] has entered a mode.
    pub fn mode(&self) -> Option<NetworkMode> {
        self.core.lock().mode
    }

    /// Bound HTTP address of the current mode.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.core.lock().transports.http_addr()
    }

    /// Bound socket-server address; only operational mode has one.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.core.lock().transports.socket_addr()
    }

    pub fn network_info(&self) -> NetworkInfo {
        let state = self.core.lock();
        NetworkInfo {
            mode: state.mode,
            ip: state.transports.ip,
            dashboard_url: self.config.dashboard_url(),
            socket_clients: state.clients.len(),
            emergency: state.emergency.is_active(),
            http_addr: state.transports.http_addr(),
            socket_addr: state.transports.socket_addr(),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Enter the boot mode: operational when saved credentials join,
    /// provisioning otherwise.
    ///
    /// # Errors
    ///
    /// [`AgvError::Boot`] when a transport server cannot bind.  A failing
    /// credential store is logged and treated as "nothing saved".
    pub async fn initialize(&self) -> Result<NetworkMode, AgvError> {
        let saved = match self.store.load() {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "credential store unreadable, starting setup portal");
                None
            }
        };

        match saved {
            Some(credentials) if !credentials.is_empty() => {
                info!(ssid = credentials.network_name(), "saved network found");
                self.enter_operational(&credentials).await
            }
            _ => {
                info!("no saved network, starting setup portal");
                self.enter_provisioning()?;
                Ok(NetworkMode::Provisioning)
            }
        }
    }

    /// Tear down whatever runs and bring up the setup access point, its
    /// HTTP portal and the captive DNS redirect.  Must be called inside a
    /// tokio runtime.
    pub fn enter_provisioning(&self) -> Result<(), AgvError> {
        let mut state = self.core.lock();
        self.teardown_locked(&mut state);

        let ip = self
            .radio
            .start_access_point(&self.config.ap_ssid, &self.config.ap_password)?;
        let http = spawn_http_server(
            SocketAddr::new(self.config.bind_address, self.config.http_port),
            self.config.max_events_per_tick * 4,
        )
        .map_err(boot_error)?;
        let dns = self.radio.start_dns_redirect(ip)?;

        info!(
            ssid = %self.config.ap_ssid,
            %ip,
            http = %http.addr,
            "provisioning mode: setup portal ready"
        );
        state.transports.http = Some(http);
        state.transports.dns = Some(dns);
        state.transports.ip = Some(ip);
        state.mode = Some(NetworkMode::Provisioning);
        Ok(())
    }

    /// Join `credentials` and bring up the dashboard and socket server.
    /// On join failure the controller falls back to provisioning and
    /// returns [`NetworkMode::Provisioning`].  Must be called inside a
    /// tokio runtime.
    pub async fn enter_operational(
        &self,
        credentials: &Credentials,
    ) -> Result<NetworkMode, AgvError> {
        {
            let mut state = self.core.lock();
            self.teardown_locked(&mut state);
        }
        self.report_connection(false, false);

        if !self.join(credentials).await {
            warn!(
                ssid = credentials.network_name(),
                attempts = self.config.join_attempts,
                "join failed, falling back to setup portal"
            );
            self.radio.disconnect();
            self.report_connection(false, true);
            self.enter_provisioning()?;
            return Ok(NetworkMode::Provisioning);
        }

        let mut state = self.core.lock();
        let ip = self.radio.local_ip();
        let http = spawn_http_server(
            SocketAddr::new(self.config.bind_address, self.config.http_port),
            self.config.max_events_per_tick * 4,
        )
        .map_err(boot_error)?;
        let socket = spawn_socket_server(
            SocketAddr::new(self.config.bind_address, self.config.socket_port),
            self.config.max_events_per_tick * 4,
        )
        .map_err(boot_error)?;

        if let Err(e) = self
            .radio
            .register_service(&self.config.device_name, http.addr.port())
        {
            warn!(error = %e, "service discovery registration failed");
        }

        info!(
            ssid = credentials.network_name(),
            ip = ?ip,
            url = %self.config.dashboard_url(),
            http = %http.addr,
            socket = %socket.addr,
            "operational mode: dashboard ready"
        );
        state.transports.http = Some(http);
        state.transports.socket = Some(socket);
        state.transports.ip = ip;
        state.mode = Some(NetworkMode::Operational);
        drop(state);

        self.report_connection(true, false);
        Ok(NetworkMode::Operational)
    }

    /// Record the station link state and notify on change, or always when
    /// `force` is set.
    fn report_connection(&self, connected: bool, force: bool) {
        let callback = {
            let mut state = self.core.lock();
            let changed = state.connected != connected;
            state.connected = connected;
            if !changed && !force {
                return;
            }
            state.on_connection.clone()
        };
        info!(connected, "station link");
        if let Some(callback) = callback {
            callback(connected);
        }
    }

    /// Poll the radio for up to `join_attempts × join_interval`.
    async fn join(&self, credentials: &Credentials) -> bool {
        if let Err(e) = self.radio.begin_join(credentials) {
            warn!(error = %e, "join could not start");
            return false;
        }
        for attempt in 1..=self.config.join_attempts {
            if self.radio.is_connected() {
                info!(attempt, "joined network");
                return true;
            }
            tokio::time::sleep(self.config.join_interval).await;
        }
        self.radio.is_connected()
    }

    fn teardown_locked(&self, state: &mut CoreState) {
        state.transports.teardown();
        state.clients.clear();
    }

    /// Stop every transport.  The mode is left as it was.
    pub fn shutdown(&self) {
        {
            let mut state = self.core.lock();
            self.teardown_locked(&mut state);
        }
        info!("network transports stopped");
        self.report_connection(false, false);
    }

    // ── Credentials ───────────────────────────────────────────────────────

    /// Validate and persist `credentials` without restarting.
    pub fn save_credentials(&self, credentials: &Credentials) -> Result<(), AgvError> {
        if credentials.is_empty() {
            return Err(AgvError::Protocol("network name must not be empty".into()));
        }
        self.store.save(credentials)
    }

    /// Forget the saved network and restart into the setup portal.
    pub fn clear_credentials(&self) -> Result<(), AgvError> {
        self.store.clear()?;
        warn!("saved network cleared, restarting");
        self.restart();
        Ok(())
    }

    /// Stop all transports and hand over to [`SystemControl::restart`].
    pub fn restart(&self) {
        self.shutdown();
        self.system.restart();
    }

    // ── Outbound ──────────────────────────────────────────────────────────

    /// Broadcast a status line to socket clients (operational mode only)
    /// and pass it to the status callback.
    pub fn send_status(&self, text: &str) {
        let callback = {
            let mut state = self.core.lock();
            if state.mode == Some(NetworkMode::Operational) {
                state.clients.broadcast(text);
            }
            state.on_status.clone()
        };
        if let Some(callback) = callback {
            callback(text);
        }
    }

    /// Send one frame to a single socket client.  Returns `false` outside
    /// operational mode, for an unknown client or one that has gone away.
    pub fn send_to_client(&self, client: ClientId, text: &str) -> bool {
        let mut state = self.core.lock();
        if state.mode != Some(NetworkMode::Operational) {
            return false;
        }
        state.clients.send_to(client, text)
    }

    pub(crate) fn core(&self) -> &Arc<SharedCore> {
        &self.core
    }

    pub(crate) fn radio(&self) -> Arc<dyn WirelessRadio> {
        Arc::clone(&self.radio)
    }
}

fn boot_error(e: AgvError) -> AgvError {
    error!(error = %e, "transport server failed to start");
    match e {
        AgvError::Boot(_) => e,
        other => AgvError::Boot(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::credentials::MemoryCredentialStore;
    use crate::radio::SimulatedRadio;

    #[derive(Default)]
    struct CountingRestart(AtomicUsize);

    impl SystemControl for CountingRestart {
        fn restart(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_config() -> NetworkConfig {
        NetworkConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            http_port: 0,
            socket_port: 0,
            join_attempts: 3,
            join_interval: Duration::from_millis(5),
            ..NetworkConfig::default()
        }
    }

    fn controller(
        radio: Arc<SimulatedRadio>,
        store: Arc<MemoryCredentialStore>,
    ) -> (NetworkController, Arc<CountingRestart>) {
        let system = Arc::new(CountingRestart::default());
        (
            NetworkController::new(test_config(), radio, store, system.clone()),
            system,
        )
    }

    #[tokio::test]
    async fn empty_store_boots_into_provisioning() {
        let radio = Arc::new(SimulatedRadio::new());
        let (ctl, _) = controller(radio.clone(), Arc::new(MemoryCredentialStore::new()));

        assert_eq!(ctl.initialize().await.unwrap(), NetworkMode::Provisioning);
        assert_eq!(ctl.mode(), Some(NetworkMode::Provisioning));
        assert!(ctl.http_addr().is_some());
        assert!(ctl.socket_addr().is_none());
        assert_eq!(radio.access_point().as_deref(), Some("AGV_Controller_Setup"));
    }

    #[tokio::test]
    async fn blank_saved_network_counts_as_nothing_saved() {
        let store = Arc::new(MemoryCredentialStore::with(Credentials::new("", "")));
        let (ctl, _) = controller(Arc::new(SimulatedRadio::new()), store);
        assert_eq!(ctl.initialize().await.unwrap(), NetworkMode::Provisioning);
    }

    #[tokio::test]
    async fn saved_network_boots_operational() {
        let radio = Arc::new(SimulatedRadio::new());
        let store = Arc::new(MemoryCredentialStore::with(Credentials::new("Depot", "pw")));
        let (ctl, _) = controller(radio.clone(), store);

        assert_eq!(ctl.initialize().await.unwrap(), NetworkMode::Operational);
        assert!(ctl.socket_addr().is_some());
        assert_eq!(radio.joined_network().as_deref(), Some("Depot"));
        assert_eq!(
            radio.registered_service(),
            Some(("agvcontrol".to_string(), ctl.http_addr().unwrap().port()))
        );

        let info = ctl.network_info();
        assert_eq!(info.mode, Some(NetworkMode::Operational));
        assert_eq!(info.dashboard_url, "http://agvcontrol.local");
        assert_eq!(info.ip, Some(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn failed_join_falls_back_to_provisioning() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.accept_joins(false);
        let store = Arc::new(MemoryCredentialStore::with(Credentials::new("Gone", "pw")));
        let (ctl, _) = controller(radio, store);

        assert_eq!(ctl.initialize().await.unwrap(), NetworkMode::Provisioning);
        assert!(ctl.socket_addr().is_none());
    }

    #[tokio::test]
    async fn occupied_port_is_a_boot_failure() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let config = NetworkConfig {
            http_port: port,
            ..test_config()
        };
        let ctl = NetworkController::new(
            config,
            Arc::new(SimulatedRadio::new()),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(CountingRestart::default()),
        );
        assert!(matches!(ctl.initialize().await, Err(AgvError::Boot(_))));
    }

    #[tokio::test]
    async fn switching_modes_replaces_the_servers() {
        let (ctl, _) = controller(
            Arc::new(SimulatedRadio::new()),
            Arc::new(MemoryCredentialStore::new()),
        );
        ctl.enter_provisioning().unwrap();
        assert!(ctl.http_addr().is_some());
        assert!(ctl.socket_addr().is_none());

        ctl.enter_operational(&Credentials::new("Depot", "pw"))
            .await
            .unwrap();
        assert!(ctl.http_addr().is_some());
        assert!(ctl.socket_addr().is_some());
        assert_eq!(ctl.mode(), Some(NetworkMode::Operational));
        assert_eq!(ctl.network_info().ip, Some(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn clear_credentials_wipes_store_and_restarts() {
        let store = Arc::new(MemoryCredentialStore::with(Credentials::new("Depot", "pw")));
        let (ctl, restarts) = controller(Arc::new(SimulatedRadio::new()), store.clone());
        ctl.initialize().await.unwrap();

        ctl.clear_credentials().unwrap();
        assert!(store.load().unwrap().is_none());
        assert_eq!(restarts.0.load(Ordering::SeqCst), 1);
        assert!(ctl.http_addr().is_none());
    }

    #[test]
    fn save_rejects_blank_network_name() {
        let (ctl, _) = controller(
            Arc::new(SimulatedRadio::new()),
            Arc::new(MemoryCredentialStore::new()),
        );
        assert!(matches!(
            ctl.save_credentials(&Credentials::new("   ", "pw")),
            Err(AgvError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn status_reaches_callback_and_clients() {
        let store = Arc::new(MemoryCredentialStore::with(Credentials::new("Depot", "pw")));
        let (ctl, _) = controller(Arc::new(SimulatedRadio::new()), store);
        ctl.initialize().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ctl.on_status(move |line| sink.lock().unwrap().push(line.to_string()));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        ctl.core().lock().clients.insert(0, tx);

        ctl.send_status("BATTERY: 87%");
        assert_eq!(rx.try_recv().unwrap(), "BATTERY: 87%");
        assert_eq!(*seen.lock().unwrap(), vec!["BATTERY: 87%".to_string()]);
    }

    #[tokio::test]
    async fn connection_callback_follows_the_station_link() {
        let radio = Arc::new(SimulatedRadio::new());
        let store = Arc::new(MemoryCredentialStore::with(Credentials::new("Depot", "pw")));
        let (ctl, _) = controller(radio.clone(), store);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ctl.on_connection(move |up| sink.lock().unwrap().push(up));

        ctl.initialize().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![true]);

        ctl.shutdown();
        ctl.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);

        radio.accept_joins(false);
        ctl.enter_operational(&Credentials::new("Elsewhere", "pw")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![true, false, false]);
        assert_eq!(ctl.mode(), Some(NetworkMode::Provisioning));
    }

    #[tokio::test]
    async fn provisioning_boot_reports_no_connection() {
        let (ctl, _) = controller(
            Arc::new(SimulatedRadio::new()),
            Arc::new(MemoryCredentialStore::new()),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ctl.on_connection(move |up| sink.lock().unwrap().push(up));

        ctl.initialize().await.unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_to_client_targets_one_client() {
        let store = Arc::new(MemoryCredentialStore::with(Credentials::new("Depot", "pw")));
        let (ctl, _) = controller(Arc::new(SimulatedRadio::new()), store);
        ctl.initialize().await.unwrap();

        let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
        {
            let mut state = ctl.core().lock();
            state.clients.insert(1, tx_a);
            state.clients.insert(2, tx_b);
        }

        assert!(ctl.send_to_client(2, "BATTERY: 40%"));
        assert_eq!(rx_b.try_recv().unwrap(), "BATTERY: 40%");
        assert!(rx_a.try_recv().is_err());
        assert!(!ctl.send_to_client(9, "nobody"));
    }

    #[tokio::test]
    async fn send_to_client_is_refused_in_provisioning() {
        let (ctl, _) = controller(
            Arc::new(SimulatedRadio::new()),
            Arc::new(MemoryCredentialStore::new()),
        );
        ctl.initialize().await.unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        ctl.core().lock().clients.insert(0, tx);

        assert!(!ctl.send_to_client(0, "hello"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_command_registration_wins() {
        let (ctl, _) = controller(
            Arc::new(SimulatedRadio::new()),
            Arc::new(MemoryCredentialStore::new()),
        );
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&first);
        let s = Arc::clone(&second);
        ctl.on_command(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        ctl.on_command(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        ctl.arbitrator()
            .ingest("forward", agv_types::CommandSource::SerialLink);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}

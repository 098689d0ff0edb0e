//! Runtime parameters for the network subsystem.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use agv_kernel::session::DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE;

/// SSID broadcast by the setup access point.
pub const DEFAULT_AP_SSID: &str = "AGV_Controller_Setup";
/// WPA2 passphrase of the setup access point.
pub const DEFAULT_AP_PASSWORD: &str = "12345678";
/// Service-discovery name; the dashboard is reachable at `http://<name>.local`.
pub const DEFAULT_DEVICE_NAME: &str = "agvcontrol";
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_SOCKET_PORT: u16 = 81;

/// Everything the [`NetworkController`](crate::NetworkController) needs to
/// know that is not persisted in the credential store.
///
/// Port `0` asks the OS for an ephemeral port; the bound address is then
/// available from [`NetworkController::http_addr`](crate::NetworkController::http_addr).
#[derive(Clone)]
pub struct NetworkConfig {
    pub device_name: String,
    pub admin_username: String,
    pub admin_password: String,
    pub bind_address: IpAddr,
    pub http_port: u16,
    pub socket_port: u16,
    pub ap_ssid: String,
    pub ap_password: String,
    /// Number of connection polls before a join is declared failed.
    pub join_attempts: u32,
    pub join_interval: Duration,
    /// Service loop period.
    pub tick: Duration,
    pub scan_timeout: Duration,
    /// Delay between answering `/savewifi` and restarting, so the reply
    /// reaches the browser.
    pub restart_delay: Duration,
    pub login_attempts_per_minute: u32,
    /// Upper bound on HTTP exchanges and socket events handled per tick.
    pub max_events_per_tick: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: DEFAULT_HTTP_PORT,
            socket_port: DEFAULT_SOCKET_PORT,
            ap_ssid: DEFAULT_AP_SSID.to_string(),
            ap_password: DEFAULT_AP_PASSWORD.to_string(),
            join_attempts: 20,
            join_interval: Duration::from_millis(500),
            tick: Duration::from_millis(10),
            scan_timeout: Duration::from_secs(10),
            restart_delay: Duration::from_secs(1),
            login_attempts_per_minute: DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE,
            max_events_per_tick: 16,
        }
    }
}

impl NetworkConfig {
    /// `http://<device>.local`
    pub fn dashboard_url(&self) -> String {
        format!("http://{}.local", self.device_name)
    }
}

impl fmt::Debug for NetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkConfig")
            .field("device_name", &self.device_name)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &"[redacted]")
            .field("bind_address", &self.bind_address)
            .field("http_port", &self.http_port)
            .field("socket_port", &self.socket_port)
            .field("ap_ssid", &self.ap_ssid)
            .field("ap_password", &"[redacted]")
            .field("join_attempts", &self.join_attempts)
            .field("join_interval", &self.join_interval)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

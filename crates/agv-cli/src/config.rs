//! Controller configuration – reads/writes `~/.agvlink/config.toml`.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agv_net::NetworkConfig;
use agv_types::{AgvError, ScanResult};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Persisted controller configuration.
///
/// The saved network credentials are *not* part of this file; they live in
/// the credential store at [`Config::credentials_path_in`].
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service-discovery name, `http://<device_name>.local`.
    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Dashboard / setup portal port.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Persistent socket channel port.
    #[serde(default = "default_socket_port")]
    pub socket_port: u16,

    #[serde(default = "default_admin_user")]
    pub admin_user: String,

    /// Dashboard password (plain text; the file is created owner-only).
    #[serde(default = "default_admin_password")]
    pub admin_password: String,

    #[serde(default = "default_ap_ssid")]
    pub ap_ssid: String,

    #[serde(default = "default_ap_password")]
    pub ap_password: String,

    /// Credential store location.  Defaults to `network.toml` next to this
    /// file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,

    /// Service loop heartbeat deadline in milliseconds.
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,

    /// Networks the simulated radio reports in scans.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub simulated_networks: Vec<String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("device_name", &self.device_name)
            .field("bind_address", &self.bind_address)
            .field("http_port", &self.http_port)
            .field("socket_port", &self.socket_port)
            .field("admin_user", &self.admin_user)
            .field(
                "admin_password",
                if self.admin_password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("ap_ssid", &self.ap_ssid)
            .field(
                "ap_password",
                if self.ap_password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("credentials_path", &self.credentials_path)
            .field("watchdog_timeout_ms", &self.watchdog_timeout_ms)
            .field("simulated_networks", &self.simulated_networks)
            .finish()
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.admin_password.zeroize();
        self.ap_password.zeroize();
    }
}

fn default_device_name() -> String {
    agv_net::config::DEFAULT_DEVICE_NAME.to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_socket_port() -> u16 {
    8081
}
fn default_admin_user() -> String {
    "admin".to_string()
}
fn default_admin_password() -> String {
    "admin123".to_string()
}
fn default_ap_ssid() -> String {
    agv_net::config::DEFAULT_AP_SSID.to_string()
}
fn default_ap_password() -> String {
    agv_net::config::DEFAULT_AP_PASSWORD.to_string()
}
fn default_watchdog_timeout_ms() -> u64 {
    2_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            socket_port: default_socket_port(),
            admin_user: default_admin_user(),
            admin_password: default_admin_password(),
            ap_ssid: default_ap_ssid(),
            ap_password: default_ap_password(),
            credentials_path: None,
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
            simulated_networks: Vec::new(),
        }
    }
}

impl Config {
    /// Runtime parameters for [`agv_net::NetworkController`].
    pub fn to_network_config(&self) -> Result<NetworkConfig, AgvError> {
        let bind_address: IpAddr = self.bind_address.parse().map_err(|e| {
            AgvError::Config(format!("invalid bind_address '{}': {e}", self.bind_address))
        })?;
        if self.admin_user.is_empty() || self.admin_password.is_empty() {
            return Err(AgvError::Config(
                "admin_user and admin_password must not be empty".to_string(),
            ));
        }
        Ok(NetworkConfig {
            device_name: self.device_name.clone(),
            admin_username: self.admin_user.clone(),
            admin_password: self.admin_password.clone(),
            bind_address,
            http_port: self.http_port,
            socket_port: self.socket_port,
            ap_ssid: self.ap_ssid.clone(),
            ap_password: self.ap_password.clone(),
            ..NetworkConfig::default()
        })
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms.max(1))
    }

    /// Credential store path, resolving the default against `config_dir`.
    pub fn credentials_path_in(&self, config_dir: &Path) -> PathBuf {
        self.credentials_path
            .clone()
            .unwrap_or_else(|| config_dir.join("network.toml"))
    }

    pub fn scan_results(&self) -> Vec<ScanResult> {
        self.simulated_networks
            .iter()
            .enumerate()
            .map(|(i, ssid)| ScanResult {
                ssid: ssid.clone(),
                rssi: -45 - 7 * i as i32,
                secured: true,
            })
            .collect()
    }
}

/// Return the path to `~/.agvlink/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".agvlink").join("config.toml")
}

/// Load `~/.agvlink/config.toml` with `AGV_*` overrides applied, falling
/// back to defaults when the file does not exist.
pub fn load() -> Result<Config, AgvError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the file at `path`.  `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, AgvError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| AgvError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| AgvError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `AGV_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `AGV_DEVICE_NAME` | `device_name` |
/// | `AGV_HTTP_PORT` | `http_port` |
/// | `AGV_SOCKET_PORT` | `socket_port` |
/// | `AGV_ADMIN_USER` | `admin_user` |
/// | `AGV_ADMIN_PASSWORD` | `admin_password` |
/// | `AGV_CREDENTIALS_PATH` | `credentials_path` |
///
/// Unparseable ports are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("AGV_DEVICE_NAME") {
        cfg.device_name = v;
    }
    if let Ok(v) = std::env::var("AGV_HTTP_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.http_port = port;
    }
    if let Ok(v) = std::env::var("AGV_SOCKET_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.socket_port = port;
    }
    if let Ok(v) = std::env::var("AGV_ADMIN_USER") {
        cfg.admin_user = v;
    }
    if let Ok(v) = std::env::var("AGV_ADMIN_PASSWORD") {
        cfg.admin_password.zeroize();
        cfg.admin_password = v;
    }
    if let Ok(v) = std::env::var("AGV_CREDENTIALS_PATH") {
        cfg.credentials_path = Some(PathBuf::from(v));
    }
}

/// Save the config to `~/.agvlink/config.toml`.
pub fn save(cfg: &Config) -> Result<(), AgvError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), AgvError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AgvError::Config(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                AgvError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| AgvError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| AgvError::Config(format!("failed to write {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| AgvError::Config(format!("failed to write {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_passwords() {
        let mut cfg = Config::default();
        cfg.admin_password = "hunter2-admin".to_string();
        cfg.ap_password = "hunter2-ap".to_string();
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("hunter2-admin"));
        assert!(!debug_str.contains("hunter2-ap"));
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn debug_shows_not_set_for_empty_password() {
        let mut cfg = Config::default();
        cfg.ap_password.clear();
        assert!(format!("{cfg:?}").contains("<not set>"));
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.http_port, 8080);
        assert_eq!(loaded.socket_port, 8081);
        assert_eq!(loaded.device_name, "agvcontrol");
        assert_eq!(loaded.ap_ssid, "AGV_Controller_Setup");
        assert!(loaded.credentials_path.is_none());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "device_name = \"cart7\"\nsimulated_networks = [\"Shop\", \"Dock\"]\n")
            .expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.device_name, "cart7");
        assert_eq!(loaded.admin_user, "admin");
        assert_eq!(loaded.watchdog_timeout(), Duration::from_secs(2));

        let scans = loaded.scan_results();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].ssid, "Shop");
        assert!(scans[0].rssi > scans[1].rssi);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "http_port = \"eighty\"").expect("write");
        assert!(matches!(load_from(&path), Err(AgvError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap()).expect("dir").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn config_path_points_to_agvlink_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".agvlink"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn maps_into_network_config() {
        let mut cfg = Config::default();
        cfg.bind_address = "127.0.0.1".to_string();
        cfg.http_port = 0;
        let net = cfg.to_network_config().expect("valid");
        assert_eq!(net.bind_address, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(net.http_port, 0);
        assert_eq!(net.admin_username, "admin");
        assert_eq!(net.dashboard_url(), "http://agvcontrol.local");
    }

    #[test]
    fn bad_bind_address_is_rejected() {
        let mut cfg = Config::default();
        cfg.bind_address = "not-an-ip".to_string();
        assert!(matches!(cfg.to_network_config(), Err(AgvError::Config(_))));
    }

    #[test]
    fn credentials_path_defaults_next_to_config() {
        let cfg = Config::default();
        let dir = Path::new("/home/operator/.agvlink");
        assert_eq!(cfg.credentials_path_in(dir), dir.join("network.toml"));
    }

    #[test]
    fn apply_env_overrides_changes_device_name() {
        // SAFETY: each override test owns a distinct variable.
        unsafe { std::env::set_var("AGV_DEVICE_NAME", "cart9") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.device_name, "cart9");
        unsafe { std::env::remove_var("AGV_DEVICE_NAME") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: each override test owns a distinct variable.
        unsafe { std::env::set_var("AGV_SOCKET_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.socket_port, 8081);
        unsafe { std::env::remove_var("AGV_SOCKET_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_credentials_path() {
        // SAFETY: each override test owns a distinct variable.
        unsafe { std::env::set_var("AGV_CREDENTIALS_PATH", "/var/lib/agv/net.toml") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.credentials_path, Some(PathBuf::from("/var/lib/agv/net.toml")));
        unsafe { std::env::remove_var("AGV_CREDENTIALS_PATH") };
    }
}

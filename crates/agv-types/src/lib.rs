//! `agv-types` – shared vocabulary of the AGV link subsystem.
//!
//! Everything that crosses a crate boundary lives here: the network mode,
//! saved network credentials, operator commands with their source and
//! priority tags, scan results, and the global [`AgvError`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The two mutually exclusive network modes of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Local access point + captive portal used to collect credentials.
    Provisioning,
    /// Joined to an existing network, serving the authenticated dashboard.
    Operational,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Provisioning => write!(f, "provisioning"),
            NetworkMode::Operational => write!(f, "operational"),
        }
    }
}

/// Saved network name + secret.
///
/// The secret is wiped from memory on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    #[serde(rename = "ssid")]
    network_name: String,
    #[serde(rename = "password")]
    secret: String,
}

impl Credentials {
    pub fn new(network_name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            secret: secret.into(),
        }
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// `true` when there is no network name to join.
    pub fn is_empty(&self) -> bool {
        self.network_name.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("network_name", &self.network_name)
            .field(
                "secret",
                if self.secret.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

/// Where an operator command entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandSource {
    /// The bidirectional socket server (browser dashboard or remote tool).
    Socket,
    /// The wired serial console.
    SerialLink,
    /// An authenticated HTTP action (`POST /command`).
    WebAction,
}

impl CommandSource {
    /// Short tag used when echoing a command to socket clients.
    pub fn label(self) -> &'static str {
        match self {
            CommandSource::Socket => "WS",
            CommandSource::SerialLink => "SERIAL",
            CommandSource::WebAction => "WEB",
        }
    }
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Dispatch priority assigned by the command classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Normal,
    /// Stop / clear commands. Never blocked by the emergency gate.
    High,
}

/// An operator command, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    id: Uuid,
    text: String,
    source: CommandSource,
    priority: Priority,
    received_at: DateTime<Utc>,
}

impl Command {
    pub fn new(text: impl Into<String>, source: CommandSource, priority: Priority) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            source,
            priority,
            received_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source(&self) -> CommandSource {
        self.source
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// One network found by a radio scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub ssid: String,
    pub rssi: i32,
    pub secured: bool,
}

/// Global error type spanning transports, the radio, storage and protocol
/// decoding.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum AgvError {
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Radio Error: {0}")]
    Radio(String),

    #[error("Credential Storage Error: {0}")]
    Storage(String),

    #[error("Protocol Error: {0}")]
    Protocol(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Boot Failure: {0}")]
    Boot(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = Credentials::new("shop-floor", "hunter22");
        let debug = format!("{creds:?}");
        assert!(debug.contains("shop-floor"));
        assert!(!debug.contains("hunter22"), "secret must not appear in debug output");
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn credentials_serialize_with_portal_field_names() {
        let creds = Credentials::new("X", "Y");
        let json = serde_json::to_value(&creds).unwrap();
        assert_eq!(json["ssid"], "X");
        assert_eq!(json["password"], "Y");
    }

    #[test]
    fn blank_network_name_counts_as_empty() {
        assert!(Credentials::new("   ", "secret").is_empty());
        assert!(!Credentials::new("lab", "").is_empty());
    }

    #[test]
    fn command_keeps_its_tags() {
        let cmd = Command::new("move forward", CommandSource::WebAction, Priority::Normal);
        assert_eq!(cmd.text(), "move forward");
        assert_eq!(cmd.source(), CommandSource::WebAction);
        assert_eq!(cmd.priority(), Priority::Normal);

        let other = Command::new("move forward", CommandSource::WebAction, Priority::Normal);
        assert_ne!(cmd.id(), other.id());
    }

    #[test]
    fn source_labels_match_socket_echo_prefixes() {
        assert_eq!(CommandSource::Socket.label(), "WS");
        assert_eq!(CommandSource::SerialLink.label(), "SERIAL");
        assert_eq!(CommandSource::WebAction.to_string(), "WEB");
    }

    #[test]
    fn network_mode_serializes_lowercase() {
        let json = serde_json::to_string(&NetworkMode::Operational).unwrap();
        assert_eq!(json, "\"operational\"");
        assert_eq!(NetworkMode::Provisioning.to_string(), "provisioning");
    }

    #[test]
    fn agv_error_display() {
        let err = AgvError::Radio("join timed out".to_string());
        assert!(err.to_string().contains("join timed out"));
        assert_eq!(AgvError::Unauthorized.to_string(), "Unauthorized");
    }
}

//! `agv-net` – network and command-arbitration runtime for an AGV
//! controller.
//!
//! The subsystem owns every way an operator can reach the vehicle and
//! funnels all of them into one [`CommandArbitrator`]:
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`controller`] | provisioning ⇄ operational lifecycle, credentials, status |
//! | [`arbitrator`] | trim → classify → emergency gate → dispatch |
//! | [`emergency`] | the emergency latch and its broadcasts |
//! | [`service`] | the background loop on its own thread |
//! | [`http`] / [`portal`] / [`routes`] | setup portal and dashboard |
//! | [`socket`] | persistent socket channel |
//! | [`serial`] | wired serial link framing |
//! | [`radio`] | radio and restart seams, simulated radio |
//! | [`credentials`] | persisted network credentials |
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use agv_kernel::LoopWatchdog;
//! use agv_net::{
//!     MemoryCredentialStore, NetworkConfig, NetworkController, SimulatedRadio, SystemControl,
//!     spawn_service_loop,
//! };
//!
//! struct Reboot;
//! impl SystemControl for Reboot {
//!     fn restart(&self) {}
//! }
//!
//! let controller = Arc::new(NetworkController::new(
//!     NetworkConfig::default(),
//!     Arc::new(SimulatedRadio::new()),
//!     Arc::new(MemoryCredentialStore::new()),
//!     Arc::new(Reboot),
//! ));
//! controller.on_command(|cmd| println!("motion core got {}", cmd.text()));
//!
//! let watchdog = Arc::new(LoopWatchdog::new(Duration::from_secs(2)));
//! let service = spawn_service_loop(controller, None, watchdog).expect("boot");
//! println!("booted into {}", service.boot_mode());
//! ```

pub mod arbitrator;
pub mod clients;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod emergency;
pub mod http;
mod listener;
mod portal;
pub mod radio;
pub mod routes;
pub mod serial;
pub mod service;
mod shared;
pub mod socket;

pub use arbitrator::{CommandArbitrator, Disposition};
pub use clients::ClientId;
pub use config::NetworkConfig;
pub use controller::{NetworkController, NetworkInfo};
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use emergency::EmergencyState;
pub use radio::{DnsRedirect, SimulatedRadio, SystemControl, WirelessRadio};
pub use serial::{ChannelLink, LineBuffer, WiredLink};
pub use service::{ServiceHandle, spawn_service_loop};
pub use shared::{CommandCallback, ConnectionCallback, EmergencyCallback, StatusCallback};

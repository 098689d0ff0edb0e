//! `agvlink` – host runner for the AGV network subsystem.
//!
//! 1. Loads `~/.agvlink/config.toml` (defaults when absent, `AGV_*`
//!    overrides applied).
//! 2. Boots the network controller on its service thread with a simulated
//!    radio, stdin as the wired serial link and a printing motion core.
//! 3. Supervises the service loop heartbeat and latches the emergency state
//!    when it stalls.
//! 4. Rebuilds the whole subsystem when the controller asks for a restart.
//! 5. Intercepts **Ctrl-C** to latch the emergency state and exit safely.

mod config;
mod console;
mod motion;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use agv_kernel::LoopWatchdog;
use agv_net::{
    ChannelLink, CredentialStore, FileCredentialStore, NetworkController, NetworkInfo,
    ServiceHandle, SimulatedRadio, SystemControl, spawn_service_loop,
};
use agv_types::{AgvError, NetworkMode};
use colored::Colorize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::console::ConsoleCommand;
use crate::motion::MotionCore;

const SUPERVISOR_TICK: Duration = Duration::from_millis(100);

/// Everything the supervisor loop reacts to.
#[derive(Debug)]
pub(crate) enum Signal {
    Interrupt,
    Restart,
    Serial(Vec<u8>),
    Console(ConsoleCommand),
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init_tracing("agvlink");

    print_banner();

    // ── First run ─────────────────────────────────────────────────────────
    let path = config::config_path();
    if !path.exists() {
        match config::save(&Config::default()) {
            Ok(()) => println!(
                "  {} Default config written to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            ),
            Err(e) => println!("{}: {}", "Could not write default config".yellow(), e),
        }
    }

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red().bold(), e);
            return ExitCode::from(2);
        }
    };
    println!("  Config: {}", path.display().to_string().bold());

    let (signals_tx, signals_rx) = mpsc::channel();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let interrupt = signals_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = interrupt.send(Signal::Interrupt);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; Ctrl-C will not latch the emergency state");
    }

    // ── Operator console ──────────────────────────────────────────────────
    if let Err(e) = console::spawn_reader(signals_tx.clone()) {
        warn!(error = %e, "console unavailable; serial input disabled");
    }

    println!("  Type {} for console commands.\n", "/help".bold().cyan());

    match supervise(&cfg, signals_tx, signals_rx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "controller failed");
            eprintln!("{}: {}", "Controller error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

/// [`SystemControl`] that turns a restart request into a rebuild by the
/// supervisor.
struct ChannelSystemControl(Sender<Signal>);

impl SystemControl for ChannelSystemControl {
    fn restart(&self) {
        let _ = self.0.send(Signal::Restart);
    }
}

/// One booted instance of the subsystem.  Dropped on restart.
struct Subsystem {
    controller: Arc<NetworkController>,
    service: ServiceHandle,
    serial_in: Sender<Vec<u8>>,
    stall_reported: bool,
}

impl Subsystem {
    fn boot(
        cfg: &Config,
        store: Arc<dyn CredentialStore>,
        motion: &Arc<MotionCore>,
        signals: &Sender<Signal>,
    ) -> Result<Self, AgvError> {
        let radio = Arc::new(SimulatedRadio::new().with_networks(cfg.scan_results()));
        let controller = Arc::new(NetworkController::new(
            cfg.to_network_config()?,
            radio,
            store,
            Arc::new(ChannelSystemControl(signals.clone())),
        ));
        motion::attach(motion, &controller);
        controller.on_connection(|up| {
            if up {
                println!("{}", "  ✓ Station link up".green());
            } else {
                println!("{}", "  ✗ Station link down".yellow());
            }
        });

        let (link, serial_in, serial_out) = ChannelLink::new();
        spawn_serial_echo(serial_out)
            .map_err(|e| AgvError::Boot(format!("serial echo thread: {e}")))?;

        let watchdog = Arc::new(LoopWatchdog::new(cfg.watchdog_timeout()));
        let service = spawn_service_loop(Arc::clone(&controller), Some(Box::new(link)), watchdog)?;

        let sys = Self {
            controller,
            service,
            serial_in,
            stall_reported: false,
        };
        sys.announce(cfg);
        Ok(sys)
    }

    fn announce(&self, cfg: &Config) {
        let info = self.controller.network_info();
        match self.service.boot_mode() {
            NetworkMode::Provisioning => {
                println!("  {} {}", "Mode:".bold(), "provisioning".yellow());
                println!(
                    "  Join {} and open {}",
                    cfg.ap_ssid.bold(),
                    portal_url(&info, "/setup").cyan()
                );
            }
            NetworkMode::Operational => {
                println!("  {} {}", "Mode:".bold(), "operational".green());
                println!("  Dashboard: {}", info.dashboard_url.cyan());
                println!("  Local:     {}", portal_url(&info, "/").cyan());
                if let Some(addr) = info.socket_addr {
                    println!("  Socket:    {}", format!("ws://{addr}/").cyan());
                }
            }
        }
        println!();
    }

    fn check_watchdog(&mut self) {
        let watchdog = self.service.watchdog();
        if watchdog.is_stalled() {
            if !self.stall_reported {
                error!(
                    since_ms = watchdog.since_last_beat().as_millis() as u64,
                    "service loop stalled"
                );
                self.controller.emergency().trigger("service loop stalled");
                self.stall_reported = true;
            }
        } else {
            self.stall_reported = false;
        }
    }

    fn stop(self) {
        self.controller.shutdown();
        self.service.stop();
    }
}

fn supervise(
    cfg: &Config,
    signals_tx: Sender<Signal>,
    signals: Receiver<Signal>,
) -> Result<(), AgvError> {
    let config_dir = config::config_path()
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let store: Arc<dyn CredentialStore> =
        Arc::new(FileCredentialStore::new(cfg.credentials_path_in(&config_dir)));
    let motion = Arc::new(MotionCore::new());

    let mut sys = Subsystem::boot(cfg, Arc::clone(&store), &motion, &signals_tx)?;
    info!("agvlink running");

    loop {
        match signals.recv_timeout(SUPERVISOR_TICK) {
            Ok(Signal::Serial(bytes)) => {
                if sys.serial_in.send(bytes).is_err() {
                    warn!("serial link closed");
                }
            }
            Ok(Signal::Console(ConsoleCommand::Help)) => console::print_help(),
            Ok(Signal::Console(ConsoleCommand::Status)) => {
                print_status(&sys.controller.network_info(), &motion);
            }
            Ok(Signal::Console(ConsoleCommand::Forget)) => {
                if let Err(e) = sys.controller.clear_credentials() {
                    println!("{}: {}", "Could not forget network".red(), e);
                }
            }
            Ok(Signal::Console(ConsoleCommand::Quit)) => {
                println!("{}", "  ✓ Stopping controller.".green());
                sys.stop();
                return Ok(());
            }
            Ok(Signal::Interrupt) => {
                println!();
                println!("{}", "⚠  Ctrl-C received – latching emergency stop …".yellow().bold());
                sys.controller.emergency().trigger("operator interrupt");
                sys.stop();
                println!("{}", "  ✓ Emergency latched, transports stopped.".green());
                return Ok(());
            }
            Ok(Signal::Restart) => {
                println!("{}", "  ↻ Restarting network subsystem …".yellow());
                sys.stop();
                sys = Subsystem::boot(cfg, Arc::clone(&store), &motion, &signals_tx)?;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                sys.stop();
                return Ok(());
            }
        }
        sys.check_watchdog();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Print every line the controller writes to the serial link until the
/// link is dropped.
fn spawn_serial_echo(lines: Receiver<String>) -> std::io::Result<()> {
    thread::Builder::new()
        .name("agvlink-serial-out".to_string())
        .spawn(move || {
            for line in lines {
                println!("  {} {}", "⇠".dimmed(), line);
            }
        })?;
    Ok(())
}

fn portal_url(info: &NetworkInfo, path: &str) -> String {
    match info.http_addr {
        Some(addr) => format!("http://{addr}{path}"),
        None => format!("{}{path}", info.dashboard_url),
    }
}

fn print_status(info: &NetworkInfo, motion: &MotionCore) {
    let rendered = serde_json::to_string_pretty(info).unwrap_or_else(|_| format!("{info:?}"));
    println!("{rendered}");
    let state = if motion.is_halted() { "halted".red() } else { "ready".green() };
    println!("  motion: {state} ({} commands executed)", motion.executed());
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___  _______   __  __   _      __  "#.bold().cyan());
    println!("{}", r#"  / _ |/ ___/ | / / / /  (_)__  / /__"#.bold().cyan());
    println!("{}", r#" / __ / (_ /| |/ / / /__/ / _ \/  '_/"#.bold().cyan());
    println!("{}", r#"/_/ |_\___/ |___/ /____/_/_//_/_/\_\ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "AGV Link".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Network & command arbitration for the AGV controller");
    println!();
}

//! Stand-in motion core: prints what it would drive and reports its state
//! back over the status channel.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use agv_net::NetworkController;
use agv_types::{Command, Priority};
use colored::Colorize;
use tracing::info;

pub const STATUS_HALTED: &str = "MOTION: halted";
pub const STATUS_READY: &str = "MOTION: ready";

#[derive(Debug, Default)]
pub struct MotionCore {
    executed: AtomicU64,
    halted: AtomicBool,
}

impl MotionCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execute(&self, command: &Command) {
        let n = self.executed.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            id = %command.id(),
            source = %command.source(),
            priority = ?command.priority(),
            seq = n,
            "motion command"
        );
        let stamp = command
            .received_at()
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S%.3f");
        let text = match command.priority() {
            Priority::High => command.text().red().bold(),
            Priority::Normal => command.text().normal(),
        };
        println!("  {} [{}] {}", stamp.to_string().dimmed(), command.source(), text);
    }

    /// Record a latch change and return the status line to publish.
    pub fn set_halted(&self, halted: bool) -> &'static str {
        self.halted.store(halted, Ordering::SeqCst);
        if halted {
            println!("{}", "  ⚠  EMERGENCY – motion halted".red().bold());
            STATUS_HALTED
        } else {
            println!("{}", "  ✓ Emergency cleared – motion ready".green());
            STATUS_READY
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

/// Register `core` as the controller's command and emergency sink.
///
/// A freshly built controller starts un-latched, so the core's halt flag is
/// reset to match.  The controller is held weakly so the callbacks it
/// stores do not keep it alive across a restart.
pub fn attach(core: &Arc<MotionCore>, controller: &Arc<NetworkController>) {
    if controller.emergency().is_active() {
        core.halted.store(true, Ordering::SeqCst);
    } else if core.halted.swap(false, Ordering::SeqCst) {
        info!("motion latch reset for the rebuilt controller");
    }

    let sink = Arc::clone(core);
    controller.on_command(move |cmd| sink.execute(cmd));

    let sink = Arc::clone(core);
    let weak: Weak<NetworkController> = Arc::downgrade(controller);
    controller.on_emergency_state_changed(move |active| {
        let status = sink.set_halted(active);
        if let Some(controller) = weak.upgrade() {
            controller.send_status(status);
        }
    });
}

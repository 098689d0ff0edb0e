//! [`CommandArbitrator`] – the single entry point for operator commands.
//!
//! ```text
//!  raw text ──trim──► classify ──► emergency action ──► gate ──► callback
//!                                   (trigger/clear)       │        │
//!                                                         └─► echo to clients
//! ```
//!
//! Classification happens outside the lock.  The gate reads the emergency
//! flag and, for forwarded commands in operational mode, queues the
//! `<SOURCE>: <text>` echo under the lock.  The command callback runs after
//! the state lock is released but still under the dispatch lock, so an
//! emergency raised on another thread cannot report the halt while an
//! already admitted normal command is still on its way.

use std::sync::Arc;

use agv_kernel::{EmergencyAction, EmergencyGate, Verdict, classify};
use agv_types::{Command, CommandSource, NetworkMode};
use tracing::{debug, info, warn};

use crate::emergency::EmergencyState;
use crate::shared::SharedCore;

/// What happened to an ingested command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delivered to the registered command callback.
    Forwarded,
    /// Passed the gate but nobody is registered to receive it.
    Unrouted,
    /// Normal-priority command refused during an emergency.
    Blocked,
    /// Empty after trimming; nothing was done.
    Empty,
}

impl Disposition {
    /// Whether the originating transport should send an `ACK`.
    pub fn acknowledged(self) -> bool {
        !matches!(self, Disposition::Empty)
    }
}

#[derive(Clone)]
pub struct CommandArbitrator {
    core: Arc<SharedCore>,
    emergency: EmergencyState,
}

impl CommandArbitrator {
    pub(crate) fn new(core: Arc<SharedCore>, emergency: EmergencyState) -> Self {
        Self { core, emergency }
    }

    /// Classify, gate and dispatch one inbound command.
    pub fn ingest(&self, raw: &str, source: CommandSource) -> Disposition {
        let text = raw.trim();
        if text.is_empty() {
            return Disposition::Empty;
        }

        let class = classify(text);
        match class.action {
            EmergencyAction::Trigger => {
                self.emergency
                    .trigger(&format!("{} from {}", text.to_ascii_uppercase(), source));
            }
            EmergencyAction::Clear => {
                self.emergency
                    .clear(&format!("{} from {}", text.to_ascii_uppercase(), source));
            }
            EmergencyAction::None => {}
        }

        let _dispatch = self.core.dispatch();
        let (verdict, callback) = {
            let mut state = self.core.lock();
            let verdict = EmergencyGate::admit(class.priority, state.emergency.is_active());
            if verdict == Verdict::Forward && state.mode == Some(NetworkMode::Operational) {
                state.clients.broadcast(&format!("{}: {}", source.label(), text));
            }
            (verdict, state.on_command.clone())
        };

        if verdict == Verdict::Block {
            info!(%source, command = text, "command blocked: emergency active");
            return Disposition::Blocked;
        }

        let command = Command::new(text, source, class.priority);
        match callback {
            Some(callback) => {
                debug!(%source, command = text, priority = ?class.priority, "command forwarded");
                callback(&command);
                Disposition::Forwarded
            }
            None => {
                warn!(%source, command = text, "no command receiver registered, dropping");
                Disposition::Unrouted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use agv_kernel::SessionAuthenticator;
    use agv_types::Priority;
    use tokio::sync::mpsc;

    struct Fixture {
        arbitrator: CommandArbitrator,
        emergency: EmergencyState,
        core: Arc<SharedCore>,
        received: Arc<Mutex<Vec<(String, CommandSource, Priority)>>>,
    }

    fn fixture(mode: NetworkMode) -> Fixture {
        let core = Arc::new(SharedCore::new(SessionAuthenticator::new("admin", "pw")));
        let emergency = EmergencyState::new(Arc::clone(&core));
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        {
            let mut state = core.lock();
            state.mode = Some(mode);
            state.on_command = Some(Arc::new(move |cmd: &Command| {
                sink.lock()
                    .unwrap()
                    .push((cmd.text().to_string(), cmd.source(), cmd.priority()));
            }));
        }
        Fixture {
            arbitrator: CommandArbitrator::new(Arc::clone(&core), emergency.clone()),
            emergency,
            core,
            received,
        }
    }

    #[test]
    fn normal_command_is_trimmed_and_forwarded() {
        let f = fixture(NetworkMode::Operational);
        assert_eq!(
            f.arbitrator.ingest("  forward 10 \r\n", CommandSource::Socket),
            Disposition::Forwarded
        );
        assert_eq!(
            *f.received.lock().unwrap(),
            vec![("forward 10".to_string(), CommandSource::Socket, Priority::Normal)]
        );
    }

    #[test]
    fn blank_input_is_ignored() {
        let f = fixture(NetworkMode::Operational);
        assert_eq!(f.arbitrator.ingest("   ", CommandSource::SerialLink), Disposition::Empty);
        assert!(!Disposition::Empty.acknowledged());
        assert!(f.received.lock().unwrap().is_empty());
    }

    #[test]
    fn stop_latches_and_is_still_forwarded() {
        let f = fixture(NetworkMode::Operational);
        assert_eq!(f.arbitrator.ingest("stop", CommandSource::Socket), Disposition::Forwarded);
        assert!(f.emergency.is_active());
        assert_eq!(f.received.lock().unwrap()[0].2, Priority::High);
    }

    #[test]
    fn normal_commands_are_blocked_while_latched() {
        let f = fixture(NetworkMode::Operational);
        f.arbitrator.ingest("STOP", CommandSource::WebAction);
        assert_eq!(
            f.arbitrator.ingest("forward", CommandSource::SerialLink),
            Disposition::Blocked
        );
        assert!(Disposition::Blocked.acknowledged());
        let received = f.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "STOP");
    }

    #[test]
    fn clear_releases_and_normal_traffic_resumes() {
        let f = fixture(NetworkMode::Operational);
        f.arbitrator.ingest("ESTOP", CommandSource::Socket);
        assert_eq!(
            f.arbitrator.ingest("clear_emergency", CommandSource::Socket),
            Disposition::Forwarded
        );
        assert!(!f.emergency.is_active());
        assert_eq!(f.arbitrator.ingest("left", CommandSource::Socket), Disposition::Forwarded);
    }

    #[test]
    fn missing_receiver_is_tolerated() {
        let f = fixture(NetworkMode::Operational);
        f.core.lock().on_command = None;
        assert_eq!(f.arbitrator.ingest("forward", CommandSource::Socket), Disposition::Unrouted);
    }

    #[test]
    fn operational_echo_is_tagged_with_source() {
        let f = fixture(NetworkMode::Operational);
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.core.lock().clients.insert(3, tx);

        f.arbitrator.ingest("forward", CommandSource::SerialLink);
        assert_eq!(rx.try_recv().unwrap(), "SERIAL: forward");
    }

    #[test]
    fn blocked_commands_are_not_echoed() {
        let f = fixture(NetworkMode::Operational);
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.emergency.trigger("test");
        f.core.lock().clients.insert(3, tx);

        f.arbitrator.ingest("forward", CommandSource::WebAction);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn no_echo_outside_operational_mode() {
        let f = fixture(NetworkMode::Provisioning);
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.core.lock().clients.insert(1, tx);

        assert_eq!(f.arbitrator.ingest("forward", CommandSource::Socket), Disposition::Forwarded);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn no_normal_command_arrives_after_the_halt_callback() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::thread;

        for _ in 0..100 {
            let f = fixture(NetworkMode::Operational);
            let halted = Arc::new(AtomicBool::new(false));
            let late = Arc::new(AtomicUsize::new(0));
            {
                let mut state = f.core.lock();
                let (h, l) = (Arc::clone(&halted), Arc::clone(&late));
                state.on_command = Some(Arc::new(move |cmd: &Command| {
                    if cmd.priority() == Priority::Normal && h.load(Ordering::SeqCst) {
                        l.fetch_add(1, Ordering::SeqCst);
                    }
                }));
                let h = Arc::clone(&halted);
                state.on_emergency = Some(Arc::new(move |active: bool| {
                    h.store(active, Ordering::SeqCst);
                }));
            }

            let done = Arc::new(AtomicBool::new(false));
            let worker = {
                let arbitrator = f.arbitrator.clone();
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        arbitrator.ingest("forward", CommandSource::Socket);
                    }
                })
            };

            thread::yield_now();
            f.emergency.trigger("service loop stalled");
            for _ in 0..50 {
                f.arbitrator.ingest("forward", CommandSource::SerialLink);
            }
            done.store(true, Ordering::SeqCst);
            worker.join().unwrap();

            assert!(halted.load(Ordering::SeqCst));
            assert_eq!(late.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn command_callback_may_read_emergency_state() {
        let f = fixture(NetworkMode::Operational);
        let observer = f.emergency.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        f.core.lock().on_command = Some(Arc::new(move |_cmd: &Command| {
            sink.lock().unwrap().push(observer.is_active());
        }));

        f.arbitrator.ingest("abort", CommandSource::Socket);
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }
}

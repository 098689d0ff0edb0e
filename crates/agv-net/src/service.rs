//! Background service loop.
//!
//! [`spawn_service_loop`] starts a dedicated OS thread (`agv-net-core0`)
//! with a single-threaded tokio runtime, boots the controller on it and then
//! ticks forever:
//!
//! 1. answer one captive DNS query (provisioning only)
//! 2. route a bounded batch of pending HTTP exchanges
//! 3. handle a bounded batch of socket events (operational only)
//! 4. drain and line-buffer the wired link (operational only)
//! 5. heartbeat the [`LoopWatchdog`]
//! 6. sleep one tick
//!
//! Pending work is moved out under the shared lock and processed after it
//! is released.

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread;

use agv_kernel::LoopWatchdog;
use agv_types::{AgvError, CommandSource, NetworkMode};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::arbitrator::CommandArbitrator;
use crate::controller::NetworkController;
use crate::http::{HttpExchange, Response};
use crate::portal::{self, FollowUp};
use crate::radio::DnsRedirect;
use crate::serial::{LineBuffer, WiredLink};
use crate::socket::{GREETING, SocketEvent};

pub const THREAD_NAME: &str = "agv-net-core0";

/// Owner of the running service thread.  Dropping it stops the loop.
pub struct ServiceHandle {
    thread: Option<thread::JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    watchdog: Arc<LoopWatchdog>,
    boot_mode: NetworkMode,
}

impl ServiceHandle {
    /// Mode entered by `initialize` at boot.
    pub fn boot_mode(&self) -> NetworkMode {
        self.boot_mode
    }

    pub fn watchdog(&self) -> &Arc<LoopWatchdog> {
        &self.watchdog
    }

    /// Stop the loop, tear down transports and join the thread.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("service thread panicked");
            }
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

/// Boot `controller` on a new service thread and start ticking.
///
/// Returns once [`NetworkController::initialize`] has finished, so a boot
/// failure (for example an occupied port) is reported here.
pub fn spawn_service_loop(
    controller: Arc<NetworkController>,
    link: Option<Box<dyn WiredLink>>,
    watchdog: Arc<LoopWatchdog>,
) -> Result<ServiceHandle, AgvError> {
    let (boot_tx, boot_rx) = std_mpsc::sync_channel::<Result<NetworkMode, AgvError>>(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_watchdog = Arc::clone(&watchdog);

    let thread = thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = boot_tx.send(Err(AgvError::Boot(format!("runtime: {e}"))));
                    return;
                }
            };

            runtime.block_on(async move {
                match controller.initialize().await {
                    Ok(mode) => {
                        let _ = boot_tx.send(Ok(mode));
                    }
                    Err(e) => {
                        let _ = boot_tx.send(Err(e));
                        return;
                    }
                }
                ServiceLoop::new(Arc::clone(&controller), link, loop_watchdog)
                    .run(shutdown_rx)
                    .await;
                controller.shutdown();
            });
        })
        .map_err(|e| AgvError::Boot(format!("failed to spawn {THREAD_NAME}: {e}")))?;

    let boot = boot_rx
        .recv()
        .map_err(|_| AgvError::Boot("service thread exited during boot".into()))
        .and_then(|result| result);

    match boot {
        Ok(boot_mode) => Ok(ServiceHandle {
            thread: Some(thread),
            shutdown: shutdown_tx,
            watchdog,
            boot_mode,
        }),
        Err(e) => {
            let _ = thread.join();
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceLoop
// ---------------------------------------------------------------------------

/// Work moved out of the shared state for one tick.
struct Batch {
    mode: Option<NetworkMode>,
    generation: u64,
    dns: Option<Box<dyn DnsRedirect>>,
    http: Vec<HttpExchange>,
    socket: Vec<SocketEvent>,
}

struct ServiceLoop {
    controller: Arc<NetworkController>,
    arbitrator: CommandArbitrator,
    link: Option<Box<dyn WiredLink>>,
    lines: LineBuffer,
    watchdog: Arc<LoopWatchdog>,
    restart_pending: bool,
}

impl ServiceLoop {
    fn new(
        controller: Arc<NetworkController>,
        link: Option<Box<dyn WiredLink>>,
        watchdog: Arc<LoopWatchdog>,
    ) -> Self {
        Self {
            arbitrator: controller.arbitrator(),
            controller,
            link,
            lines: LineBuffer::new(),
            watchdog,
            restart_pending: false,
        }
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let tick = self.controller.config().tick;
        info!(?tick, "service loop running");
        loop {
            self.tick();
            self.watchdog.beat();
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("service loop stopped");
    }

    fn tick(&mut self) {
        let Batch {
            mode,
            generation,
            dns,
            http,
            socket,
        } = self.drain();
        let Some(mode) = mode else {
            return;
        };

        if let Some(mut dns) = dns {
            dns.process_next_request();
            self.restore_dns(generation, dns);
        }

        for exchange in http {
            if self.generation() != generation {
                exchange.respond(Response::unavailable());
                continue;
            }
            if portal::dispatch(&self.controller, mode, exchange) == FollowUp::Restart {
                self.schedule_restart();
            }
        }

        for event in socket {
            self.on_socket_event(event);
        }

        if mode == NetworkMode::Operational {
            self.service_wired_link();
        }
    }

    fn drain(&self) -> Batch {
        let max = self.controller.config().max_events_per_tick;
        let mut guard = self.controller.core().lock();
        let state = &mut *guard;
        let mode = state.mode;
        let transports = &mut state.transports;

        let dns = match mode {
            Some(NetworkMode::Provisioning) => transports.dns.take(),
            _ => None,
        };

        let mut http = Vec::new();
        if let Some(server) = transports.http.as_mut() {
            while http.len() < max {
                match server.exchanges.try_recv() {
                    Ok(exchange) => http.push(exchange),
                    Err(_) => break,
                }
            }
        }

        let mut socket = Vec::new();
        if mode == Some(NetworkMode::Operational) {
            if let Some(server) = transports.socket.as_mut() {
                while socket.len() < max {
                    match server.events.try_recv() {
                        Ok(event) => socket.push(event),
                        Err(_) => break,
                    }
                }
            }
        }

        Batch {
            mode,
            generation: transports.generation,
            dns,
            http,
            socket,
        }
    }

    fn generation(&self) -> u64 {
        self.controller.core().lock().transports.generation
    }

    /// Put the redirect back unless the transports were rebuilt meanwhile.
    fn restore_dns(&self, generation: u64, dns: Box<dyn DnsRedirect>) {
        let mut state = self.controller.core().lock();
        if state.transports.generation == generation && state.transports.dns.is_none() {
            state.transports.dns = Some(dns);
        }
    }

    fn on_socket_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Connected {
                client,
                peer,
                outbound,
            } => {
                let _ = outbound.send(GREETING.to_string());
                let count = {
                    let mut state = self.controller.core().lock();
                    state.clients.insert(client, outbound);
                    state.clients.len()
                };
                info!(client, %peer, clients = count, "socket client connected");
            }
            SocketEvent::Text { client, text } => {
                let disposition = self.arbitrator.ingest(&text, CommandSource::Socket);
                if disposition.acknowledged() {
                    self.controller
                        .core()
                        .lock()
                        .clients
                        .send_to(client, &format!("ACK: {}", text.trim()));
                }
            }
            SocketEvent::Disconnected { client } => {
                self.controller.core().lock().clients.remove(client);
                info!(client, "socket client disconnected");
            }
        }
    }

    fn service_wired_link(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let mut bytes = Vec::new();
        link.read_available(&mut bytes);
        if bytes.is_empty() {
            return;
        }
        for line in self.lines.extend(&bytes) {
            let disposition = self.arbitrator.ingest(&line, CommandSource::SerialLink);
            if disposition.acknowledged() {
                link.write_line(&format!("ACK: {}", line.trim()));
            }
        }
    }

    fn schedule_restart(&mut self) {
        if self.restart_pending {
            return;
        }
        self.restart_pending = true;
        let controller = Arc::clone(&self.controller);
        let delay = controller.config().restart_delay;
        debug!(?delay, "restart scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            controller.restart();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use agv_types::Credentials;

    use crate::config::NetworkConfig;
    use crate::credentials::MemoryCredentialStore;
    use crate::radio::{SimulatedRadio, SystemControl};
    use crate::serial::ChannelLink;

    struct NoRestart;

    impl SystemControl for NoRestart {
        fn restart(&self) {}
    }

    fn config() -> NetworkConfig {
        NetworkConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            http_port: 0,
            socket_port: 0,
            join_attempts: 2,
            join_interval: Duration::from_millis(1),
            tick: Duration::from_millis(2),
            ..NetworkConfig::default()
        }
    }

    fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
        for _ in 0..500 {
            if let Some(value) = probe() {
                return value;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn loop_boots_beats_and_stops() {
        let controller = Arc::new(NetworkController::new(
            config(),
            Arc::new(SimulatedRadio::new()),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(NoRestart),
        ));
        let watchdog = Arc::new(LoopWatchdog::new(Duration::from_millis(200)));
        let handle = spawn_service_loop(Arc::clone(&controller), None, watchdog).unwrap();
        assert_eq!(handle.boot_mode(), NetworkMode::Provisioning);

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.watchdog().is_stalled());
        handle.stop();
        assert!(controller.http_addr().is_none());
    }

    #[test]
    fn captive_dns_is_answered_while_provisioning() {
        let radio = Arc::new(SimulatedRadio::new());
        let controller = Arc::new(NetworkController::new(
            config(),
            radio.clone(),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(NoRestart),
        ));
        let handle = spawn_service_loop(
            controller,
            None,
            Arc::new(LoopWatchdog::new(Duration::from_secs(1))),
        )
        .unwrap();

        radio.simulate_lookup("captive.apple.com");
        let answers = wait_for(|| {
            let answers = radio.dns_answers();
            (!answers.is_empty()).then_some(answers)
        });
        assert_eq!(answers[0].name, "captive.apple.com");
        assert_eq!(answers[0].address, std::net::Ipv4Addr::new(192, 168, 4, 1));
        handle.stop();
    }

    #[test]
    fn serial_lines_are_ingested_and_acknowledged() {
        let controller = Arc::new(NetworkController::new(
            config(),
            Arc::new(SimulatedRadio::new()),
            Arc::new(MemoryCredentialStore::with(Credentials::new("Depot", "pw"))),
            Arc::new(NoRestart),
        ));
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let threads = Arc::new(Mutex::new(Vec::new()));
        let thread_sink = Arc::clone(&threads);
        controller.on_command(move |cmd| {
            sink.lock().unwrap().push(cmd.text().to_string());
            thread_sink
                .lock()
                .unwrap()
                .push(thread::current().name().map(str::to_string));
        });

        let (link, to_controller, from_controller) = ChannelLink::new();
        let handle = spawn_service_loop(
            Arc::clone(&controller),
            Some(Box::new(link)),
            Arc::new(LoopWatchdog::new(Duration::from_secs(1))),
        )
        .unwrap();
        assert_eq!(handle.boot_mode(), NetworkMode::Operational);

        to_controller.send(b"forward\r\nSTOP\n".to_vec()).unwrap();
        let first = from_controller.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = from_controller.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, "ACK: forward");
        assert_eq!(second, "ACK: STOP");
        assert_eq!(*received.lock().unwrap(), vec!["forward", "STOP"]);
        assert!(controller.emergency().is_active());
        assert!(
            threads
                .lock()
                .unwrap()
                .iter()
                .all(|name| name.as_deref() == Some(THREAD_NAME))
        );
        handle.stop();
    }

    #[test]
    fn boot_failure_is_reported_to_the_caller() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let controller = Arc::new(NetworkController::new(
            NetworkConfig {
                http_port: port,
                ..config()
            },
            Arc::new(SimulatedRadio::new()),
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(NoRestart),
        ));
        let result = spawn_service_loop(
            controller,
            None,
            Arc::new(LoopWatchdog::new(Duration::from_secs(1))),
        );
        assert!(matches!(result, Err(AgvError::Boot(_))));
    }
}

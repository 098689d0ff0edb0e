//! [`EmergencyState`] – the process-wide emergency latch plus its
//! notifications.
//!
//! Every `trigger` broadcasts `SYSTEM_EMERGENCY: <reason>` and every `clear`
//! broadcasts `SYSTEM_NORMAL: <reason>` to all socket clients, whether or
//! not the state changed.  The registered emergency callback fires only on
//! an actual transition, before any command dispatch can interleave.

use std::sync::Arc;

use agv_kernel::Transition;
use tracing::{error, info};

use crate::shared::SharedCore;

/// Cloneable handle on the emergency latch.
#[derive(Clone)]
pub struct EmergencyState {
    core: Arc<SharedCore>,
}

impl EmergencyState {
    pub(crate) fn new(core: Arc<SharedCore>) -> Self {
        Self { core }
    }

    pub fn is_active(&self) -> bool {
        self.core.lock().emergency.is_active()
    }

    /// Latch the emergency state.
    pub fn trigger(&self, reason: &str) -> Transition {
        let _dispatch = self.core.dispatch();
        let (transition, callback) = {
            let mut state = self.core.lock();
            let transition = state.emergency.trigger();
            state.clients.broadcast(&format!("SYSTEM_EMERGENCY: {reason}"));
            (transition, state.on_emergency.clone())
        };

        error!(reason, changed = transition.changed(), "SYSTEM EMERGENCY");
        if transition.changed() {
            if let Some(callback) = callback {
                callback(true);
            }
        }
        transition
    }

    /// Release the emergency state.
    pub fn clear(&self, reason: &str) -> Transition {
        let _dispatch = self.core.dispatch();
        let (transition, callback) = {
            let mut state = self.core.lock();
            let transition = state.emergency.clear();
            state.clients.broadcast(&format!("SYSTEM_NORMAL: {reason}"));
            (transition, state.on_emergency.clone())
        };

        info!(reason, changed = transition.changed(), "emergency cleared");
        if transition.changed() {
            if let Some(callback) = callback {
                callback(false);
            }
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use agv_kernel::SessionAuthenticator;
    use tokio::sync::mpsc;

    fn fixture() -> (EmergencyState, Arc<SharedCore>, Arc<Mutex<Vec<bool>>>) {
        let core = Arc::new(SharedCore::new(SessionAuthenticator::new("admin", "pw")));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        core.lock().on_emergency = Some(Arc::new(move |active: bool| sink.lock().unwrap().push(active)));
        (EmergencyState::new(Arc::clone(&core)), core, seen)
    }

    #[test]
    fn callback_fires_once_per_transition() {
        let (emergency, _core, seen) = fixture();
        emergency.trigger("STOP from WS");
        emergency.trigger("STOP from WS");
        emergency.clear("operator");
        emergency.clear("operator");
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn every_call_is_broadcast() {
        let (emergency, core, _seen) = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        core.lock().clients.insert(0, tx);

        emergency.trigger("first");
        emergency.trigger("second");
        emergency.clear("done");

        assert_eq!(rx.try_recv().unwrap(), "SYSTEM_EMERGENCY: first");
        assert_eq!(rx.try_recv().unwrap(), "SYSTEM_EMERGENCY: second");
        assert_eq!(rx.try_recv().unwrap(), "SYSTEM_NORMAL: done");
    }

    #[test]
    fn callback_may_read_the_latch() {
        let core = Arc::new(SharedCore::new(SessionAuthenticator::new("admin", "pw")));
        let emergency = EmergencyState::new(Arc::clone(&core));
        let observer = emergency.clone();
        let observed = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&observed);
        core.lock().on_emergency = Some(Arc::new(move |_: bool| {
            *slot.lock().unwrap() = Some(observer.is_active());
        }));

        emergency.trigger("reentrant");
        assert_eq!(*observed.lock().unwrap(), Some(true));
    }
}

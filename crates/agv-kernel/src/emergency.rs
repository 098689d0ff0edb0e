//! [`EmergencyLatch`] – the two-state emergency machine.
//!
//! ```text
//!   Normal --trigger--> Emergency --clear--> Normal
//! ```
//!
//! There are no intermediate states.  Both operations are idempotent and
//! report whether they caused a distinct [`Transition`]; callers use that to
//! fire state-change callbacks exactly once per transition while still
//! re-broadcasting notifications on every call.

/// What a latch operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The latch moved Normal → Emergency.
    Activated,
    /// The latch moved Emergency → Normal.
    Released,
    /// The latch was already in the requested state.
    Unchanged,
}

impl Transition {
    pub fn changed(self) -> bool {
        !matches!(self, Transition::Unchanged)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmergencyLatch {
    active: bool,
}

impl EmergencyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn trigger(&mut self) -> Transition {
        if self.active {
            Transition::Unchanged
        } else {
            self.active = true;
            Transition::Activated
        }
    }

    pub fn clear(&mut self) -> Transition {
        if self.active {
            self.active = false;
            Transition::Released
        } else {
            Transition::Unchanged
        }
    }
}

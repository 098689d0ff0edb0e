//! [`EmergencyGate`] – the decision between classification and dispatch.
//!
//! Every command that the arbitrator ingests passes through
//! [`EmergencyGate::admit`] with the emergency flag value read under the
//! shared lock.  The rule is deliberately tiny:
//!
//! * High priority → always [`Verdict::Forward`].
//! * Normal priority while the flag is set → [`Verdict::Block`].
//! * Normal priority otherwise → [`Verdict::Forward`].
//!
//! # Example
//!
//! ```
//! use agv_kernel::gate::{EmergencyGate, Verdict};
//! use agv_types::Priority;
//!
//! assert_eq!(EmergencyGate::admit(Priority::Normal, true), Verdict::Block);
//! assert_eq!(EmergencyGate::admit(Priority::High, true), Verdict::Forward);
//! ```

use agv_types::Priority;

/// Outcome of the emergency gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Block,
}

/// Stateless emergency gate.
pub struct EmergencyGate;

impl EmergencyGate {
    /// Decide whether a command of `priority` may proceed given the current
    /// `emergency_active` flag.
    pub fn admit(priority: Priority, emergency_active: bool) -> Verdict {
        match (priority, emergency_active) {
            (Priority::High, _) => Verdict::Forward,
            (Priority::Normal, true) => Verdict::Block,
            (Priority::Normal, false) => Verdict::Forward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_commands_pass_when_clear() {
        assert_eq!(EmergencyGate::admit(Priority::Normal, false), Verdict::Forward);
    }

    #[test]
    fn normal_commands_are_blocked_during_emergency() {
        assert_eq!(EmergencyGate::admit(Priority::Normal, true), Verdict::Block);
    }

    #[test]
    fn high_priority_always_passes() {
        assert_eq!(EmergencyGate::admit(Priority::High, true), Verdict::Forward);
        assert_eq!(EmergencyGate::admit(Priority::High, false), Verdict::Forward);
    }
}

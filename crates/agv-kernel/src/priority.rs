//! Command priority classification.
//!
//! Classification runs on the normalised (trimmed) command text *before* the
//! emergency gate, so stop and clear commands are recognised even while the
//! system is latched.  Matching is a whole-command, case-insensitive
//! comparison of the entire text against two fixed keyword sets:
//!
//! | Keywords | Priority | Effect |
//! |---|---|---|
//! | `STOP`, `ABORT`, `EMERGENCY`, `ESTOP` | High | latch the emergency state |
//! | `CLEAR_EMERGENCY`, `RESET_EMERGENCY` | High | release the emergency state |
//! | anything else | Normal | none |
//!
//! ```
//! use agv_kernel::priority::{classify, EmergencyAction};
//! use agv_types::Priority;
//!
//! let c = classify("stop");
//! assert_eq!(c.priority, Priority::High);
//! assert_eq!(c.action, EmergencyAction::Trigger);
//!
//! assert_eq!(classify("move forward").priority, Priority::Normal);
//! ```

use agv_types::Priority;

const TRIGGER_KEYWORDS: &[&str] = &["STOP", "ABORT", "EMERGENCY", "ESTOP"];
const CLEAR_KEYWORDS: &[&str] = &["CLEAR_EMERGENCY", "RESET_EMERGENCY"];

/// What a command does to the emergency state besides being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyAction {
    None,
    Trigger,
    Clear,
}

/// Result of [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub priority: Priority,
    pub action: EmergencyAction,
}

/// Classify already-trimmed command text.
pub fn classify(text: &str) -> Classification {
    let matches = |set: &[&str]| set.iter().any(|k| text.eq_ignore_ascii_case(k));

    if matches(TRIGGER_KEYWORDS) {
        Classification {
            priority: Priority::High,
            action: EmergencyAction::Trigger,
        }
    } else if matches(CLEAR_KEYWORDS) {
        Classification {
            priority: Priority::High,
            action: EmergencyAction::Clear,
        }
    } else {
        Classification {
            priority: Priority::Normal,
            action: EmergencyAction::None,
        }
    }
}

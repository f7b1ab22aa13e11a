//! Identifier newtypes and the trace time base.
//!
//! The whole pipeline measures time as microseconds relative to the integer
//! second of the first matched trace line. A 32-bit count covers the ~35
//! minute traces this tool is built for; sums are widened to `i64` where
//! they could exceed that range.

use std::fmt;

use serde::Serialize;

/// Microseconds since the first matched line's integer-second boundary.
pub type TsUs = i32;

/// Microseconds per second, in the sum domain.
pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Process ID as it appears in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique identifier of a configured function.
///
/// Assigned in config-file order starting at 1. Id 0 is reserved for the
/// synthetic root: a pair with parent id 0 has no observed caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
pub struct FunctionId(pub i32);

impl FunctionId {
    pub const ROOT: FunctionId = FunctionId(0);

    #[must_use]
    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduler state of the outgoing task in a `sched_switch` line.
///
/// Only the two states the classifier distinguishes are decoded; everything
/// else (D, T, Z, ...) collapses to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ProcessState {
    Running,
    Interruptible,
    #[default]
    Other,
}

impl ProcessState {
    #[must_use]
    pub fn from_trace(state: &str) -> Self {
        match state {
            "R" => ProcessState::Running,
            "S" => ProcessState::Interruptible,
            _ => ProcessState::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_id_root() {
        assert!(FunctionId::ROOT.is_root());
        assert!(!FunctionId(1).is_root());
    }

    #[test]
    fn test_process_state_from_trace() {
        assert_eq!(ProcessState::from_trace("R"), ProcessState::Running);
        assert_eq!(ProcessState::from_trace("S"), ProcessState::Interruptible);
        assert_eq!(ProcessState::from_trace("D"), ProcessState::Other);
        assert_eq!(ProcessState::from_trace("R+"), ProcessState::Other);
    }
}

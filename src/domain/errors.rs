//! Structured error types for da-tool
//!
//! Every error here is non-fatal: the offending record is skipped and the
//! pipeline keeps going. Record-level kinds are printed on stdout (the
//! user-facing contract); the per-event kinds that would flood it
//! (`StackRepair`, `ValidWindowEmpty`) go through the `log` facade instead.
//! Using thiserror for the Display implementations.

use std::path::PathBuf;

use thiserror::Error;

use super::types::{FunctionId, Pid};

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// An input or output file could not be opened.
    #[error("file open failed:{}", .0.display())]
    OpenFailed(PathBuf),

    /// The trace file matched no line at all.
    #[error("trace {} matched no line", .0.display())]
    InputEmpty(PathBuf),

    /// A config record starts with a tag other than k/u/s/p.
    #[error("function cfg error :cfgType={0}")]
    UnknownConfigTag(String),

    /// The same PID filter appears twice; the first entry wins.
    #[error("pid {0} Config duplicate")]
    DuplicateFilter(Pid),

    /// More returns than entries within one (pid, function) stream.
    #[error("run error(diffLen<0)!!!,{diff},{pid} ,{function}")]
    AlignOverflow { pid: Pid, function: FunctionId, diff: i64 },

    /// A return arrived while a different function was on top of the stack.
    #[error("stack repair: pid {pid} returned {function} over open {top}")]
    StackRepair { pid: Pid, function: FunctionId, top: FunctionId },

    /// A PID has pairs but none of them survived validity marking.
    #[error("pid {0} has no valid window")]
    ValidWindowEmpty(Pid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_failed_matches_stdout_contract() {
        let err = AnalysisError::OpenFailed(PathBuf::from("/var/da-tool/tmp/analysis_input/trace"));
        assert_eq!(err.to_string(), "file open failed:/var/da-tool/tmp/analysis_input/trace");
    }

    #[test]
    fn test_duplicate_filter_message() {
        let err = AnalysisError::DuplicateFilter(Pid(7));
        assert_eq!(err.to_string(), "pid 7 Config duplicate");
    }
}

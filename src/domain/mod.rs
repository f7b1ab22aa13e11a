//! Domain model for da-tool
//!
//! Core identifier types and the non-fatal error vocabulary shared by
//! every pipeline stage.

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{FunctionId, Pid, ProcessState, TsUs, MICROS_PER_SEC};

pub use errors::AnalysisError;

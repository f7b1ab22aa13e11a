//! Trace text extraction and call-stack validity marking.
//!
//! [`TraceParser`] turns the raw ftrace text into ordered [`TraceEvent`]s;
//! [`ValidityMarker`] then decides, per event, whether the surrounding
//! call-stack episode is provably complete. Everything downstream trusts
//! the flags set here.

pub mod parser;
pub mod validity;

pub use parser::{ParsedTrace, SchedSwitch, TraceEvent, TraceParser};
pub use validity::ValidityMarker;

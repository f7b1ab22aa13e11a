//! Output writers for the analysis results.
//!
//! Every writer takes `&mut impl Write` so tests can capture output
//! in-memory; the binary hands them buffered files. Debug dumps live in
//! [`debug_dump`] and are gated by the -g level.

pub mod debug_dump;
pub mod delay_summary;
pub mod flame_stack;
pub mod sched_report;
pub mod stack_tree;

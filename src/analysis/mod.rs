//! Analysis passes over the sealed event stream.
//!
//! [`time_pair`] rebuilds entry/return pairs and the per-function latency
//! statistics, [`sched`] attributes runtime across CPUs and scheduling
//! boundaries, and [`func_stack`] reduces the pairs to per-call-stack
//! delays for the flame-graph and tree outputs.

pub mod func_stack;
pub mod sched;
pub mod time_pair;

pub use func_stack::FunctionStackAnalysis;
pub use sched::SchedAnalysis;
pub use time_pair::TimePairAnalysis;

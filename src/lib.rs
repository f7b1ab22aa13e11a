// Expose modules for testing
pub mod analysis;
pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod trace;

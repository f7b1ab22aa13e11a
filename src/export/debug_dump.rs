//! Debug dump files under the output debug directory, gated by -g.

use std::fs::File;
use std::io::BufWriter;

use log::warn;

use crate::config::{Config, DEBUG_BASIC};
use crate::domain::AnalysisError;
use crate::trace::ParsedTrace;

/// Open a dump file when the debug level allows it. Open failures follow
/// the usual non-fatal contract: message on stdout, dump skipped.
#[must_use]
pub fn debug_writer(cfg: &Config, name: &str, min_level: u8) -> Option<BufWriter<File>> {
    if !cfg.debug_at_least(min_level) {
        return None;
    }
    let path = cfg.paths.debug_dir.join(name);
    match File::create(&path) {
        Ok(file) => Some(BufWriter::new(file)),
        Err(_) => {
            println!("{}", AnalysisError::OpenFailed(path));
            None
        }
    }
}

/// Dump the parsed event sequence as JSON for offline inspection.
pub fn write_trace_events(cfg: &Config, trace: &ParsedTrace) {
    let Some(out) = debug_writer(cfg, "debug_trace.json", DEBUG_BASIC) else { return };
    if let Err(err) = serde_json::to_writer_pretty(out, &trace.events) {
        warn!("trace event dump failed: {err}");
    }
}

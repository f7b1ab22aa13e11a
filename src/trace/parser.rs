//! Regex extraction of trace events from ftrace-style text lines.
//!
//! Two patterns are tried per line, sched_switch first:
//!
//! ```text
//! <comm>-<pid> [<cpu>] dN.1 <sec>.<usec>: sched_switch: prev_comm=... ==> next_comm=...
//! <comm>-<pid> [<cpu>] dN.1 <sec>.<usec>: <symbol>: <tail>
//! ```
//!
//! Timestamps are rebased to the integer second of the first matched line
//! and carried as a microsecond count from there on. Lines matching neither
//! pattern are silently skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::{Config, DEBUG_BASIC, DEBUG_DUMP, SCHED_SWITCH_SYMBOL};
use crate::domain::{AnalysisError, Pid, ProcessState, TsUs, MICROS_PER_SEC};
use crate::export::debug_dump;

static SCHED_SWITCH_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\s+(?P<comm>.+)-(?P<pid>\d+)\s+\[(?P<cpu>\d+)\]\s+.{4}\s+(?P<sec>\d+)\.(?P<usec>\d+):\s+sched_switch:\s+prev_comm=.+prev_pid=(?P<prev_pid>\d+)\s+prev_prio=(?P<prev_prio>\d+)\s+prev_state=(?P<prev_state>\S+)\s+==>\s+next_comm=.+next_pid=(?P<next_pid>\d+)\s+next_prio=(?P<next_prio>\d+)",
    )
    .expect("sched_switch pattern is valid")
});

static FUNCTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\s*(?P<comm>.+)-(?P<pid>\d+)\s+\[(?P<cpu>\d+)\]\s+.{4}\s+(?P<sec>\d+)\.(?P<usec>\d+):\s+(?P<symbol>\w+):(?P<tail>.+)",
    )
    .expect("function pattern is valid")
});

static ARG1_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"arg1=(?P<arg1>0x[a-fA-F0-9]+)").expect("arg1 pattern is valid"));

const PROGRESS_INTERVAL: u32 = 10_000;

/// sched_switch payload: the outgoing and incoming side of one CPU handover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedSwitch {
    pub prev_pid: Pid,
    pub prev_prio: i32,
    pub prev_state: ProcessState,
    pub next_pid: Pid,
    pub next_prio: i32,
}

/// Validity flags filled in by the marker stage. A sched_switch event has
/// two independent sides (the leaving pid and the resuming pid); ordinary
/// function events only use `func`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EventValidity {
    pub func: bool,
    pub sched_prev: bool,
    pub sched_next: bool,
}

/// One matched trace line. Immutable after parsing except for the validity
/// flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub line_no: u32,
    pub pid: Pid,
    pub cpu: i32,
    pub ts: TsUs,
    pub symbol: String,
    pub arg1: Option<u64>,
    pub sched: Option<SchedSwitch>,
    pub valid: EventValidity,
}

/// The ordered event sequence plus the time base for display conversion.
#[derive(Debug, Default)]
pub struct ParsedTrace {
    pub events: Vec<TraceEvent>,
    /// Integer seconds of the first matched line.
    pub base_sec: i64,
}

impl ParsedTrace {
    /// Convert a rebased microsecond timestamp back to absolute seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_seconds(&self, ts: TsUs) -> f64 {
        self.base_sec as f64 + f64::from(ts) / MICROS_PER_SEC as f64
    }
}

pub struct TraceParser<'a> {
    cfg: &'a Config,
}

impl<'a> TraceParser<'a> {
    #[must_use]
    pub fn new(cfg: &'a Config) -> Self {
        TraceParser { cfg }
    }

    /// Parse the configured trace file. A missing file is reported on
    /// stdout and yields an empty trace.
    #[must_use]
    pub fn parse(&self) -> ParsedTrace {
        match File::open(&self.cfg.paths.trace) {
            Ok(file) => self.parse_reader(BufReader::new(file)),
            Err(_) => {
                println!("{}", AnalysisError::OpenFailed(self.cfg.paths.trace.clone()));
                ParsedTrace::default()
            }
        }
    }

    /// Parse trace lines from any reader, honoring the -b/-l window.
    pub fn parse_reader<R: BufRead>(&self, reader: R) -> ParsedTrace {
        let mut trace = ParsedTrace::default();
        let mut regex_dump = debug_dump::debug_writer(self.cfg, "debug_resolve_function_trace", DEBUG_DUMP);

        let begin = self.cfg.read_begin;
        let len = self.cfg.read_len;
        let mut line_no: u32 = 0;
        let mut matched: u32 = 0;
        let mut base_sec: Option<i64> = None;

        for line in reader.lines() {
            let Ok(line) = line else { break };
            line_no += 1;
            if line_no % PROGRESS_INTERVAL == 0 {
                println!("{matched}/{line_no} (matched/lines)");
            }
            if line_no < begin {
                continue;
            }
            if len != 0 && line_no > begin.saturating_add(len) {
                break;
            }

            let Some(event) = parse_line(&line, line_no, &mut base_sec) else { continue };
            if let Some(out) = regex_dump.as_mut() {
                let _ = writeln!(out, "{line_no}:{line}");
            }
            trace.events.push(event);
            matched += 1;
        }

        trace.base_sec = base_sec.unwrap_or(0);

        if let Some(mut out) = debug_dump::debug_writer(self.cfg, "debug_resolve_summary", DEBUG_BASIC) {
            let _ = writeln!(out, "resolve_trace finish");
            let _ = writeln!(out, "line_num :{line_no}");
            let _ = writeln!(out, "regex_num :{matched}");
        }

        if let (Some(first), Some(last)) = (trace.events.first(), trace.events.last()) {
            println!("trace delay :{}", last.ts - first.ts);
        } else {
            println!("{}", AnalysisError::InputEmpty(self.cfg.paths.trace.clone()));
        }

        trace
    }
}

/// Match one line against the two patterns, rebasing the timestamp onto the
/// first matched line's integer second.
fn parse_line(line: &str, line_no: u32, base_sec: &mut Option<i64>) -> Option<TraceEvent> {
    if let Some(caps) = SCHED_SWITCH_LINE.captures(line) {
        let sched = SchedSwitch {
            prev_pid: Pid(caps["prev_pid"].parse().ok()?),
            prev_prio: caps["prev_prio"].parse().ok()?,
            prev_state: ProcessState::from_trace(&caps["prev_state"]),
            next_pid: Pid(caps["next_pid"].parse().ok()?),
            next_prio: caps["next_prio"].parse().ok()?,
        };
        return Some(TraceEvent {
            line_no,
            pid: Pid(caps["pid"].parse().ok()?),
            cpu: caps["cpu"].parse().ok()?,
            ts: rebase_timestamp(&caps["sec"], &caps["usec"], base_sec)?,
            symbol: SCHED_SWITCH_SYMBOL.to_string(),
            arg1: None,
            sched: Some(sched),
            valid: EventValidity::default(),
        });
    }

    let caps = FUNCTION_LINE.captures(line)?;
    let arg1 = ARG1_VALUE
        .captures(&caps["tail"])
        .and_then(|sub| u64::from_str_radix(&sub["arg1"][2..], 16).ok());
    Some(TraceEvent {
        line_no,
        pid: Pid(caps["pid"].parse().ok()?),
        cpu: caps["cpu"].parse().ok()?,
        ts: rebase_timestamp(&caps["sec"], &caps["usec"], base_sec)?,
        symbol: caps["symbol"].to_string(),
        arg1,
        sched: None,
        valid: EventValidity::default(),
    })
}

#[allow(clippy::cast_possible_truncation)]
fn rebase_timestamp(sec: &str, usec: &str, base_sec: &mut Option<i64>) -> Option<TsUs> {
    let sec: i64 = sec.parse().ok()?;
    let usec: i64 = usec.parse().ok()?;
    let base = *base_sec.get_or_insert(sec);
    Some(((sec - base) * MICROS_PER_SEC + usec) as TsUs)
}

//! Entry/return pairing, call-stack reconstruction and latency statistics.
//!
//! For every (pid, function) the pairs live in parallel vectors: slot i of
//! `start`/`end`/`delay`/`parent`/... describes the i-th observed
//! invocation. The slot index is load-bearing: a child pair points back at
//! its parent's slot so the aggregator can subtract child time positionally.
//!
//! The reconstruction is deliberately forgiving. Orphan returns fabricate a
//! zero-length invalid pair, entries that never return get their end padded
//! from the start column, and both feed the per-pid valid window that bounds
//! every downstream aggregation.

use std::collections::BTreeMap;
use std::io::Write;

use log::debug;

use crate::config::{Config, SymbolKind, DEBUG_DUMP, DEBUG_STACK_WALK};
use crate::domain::{AnalysisError, FunctionId, Pid, TsUs};
use crate::export::debug_dump;
use crate::trace::ParsedTrace;

/// Delay bucket selector: every pair, non-negative returns, negative returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayBucket {
    All = 0,
    RetNonNeg = 1,
    RetNeg = 2,
}

impl DelayBucket {
    pub const ALL: [DelayBucket; 3] = [DelayBucket::All, DelayBucket::RetNonNeg, DelayBucket::RetNeg];

    /// Column suffix in `summary_delay.csv`.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            DelayBucket::All => "",
            DelayBucket::RetNonNeg => "(r>=0)",
            DelayBucket::RetNeg => "(r<0)",
        }
    }
}

/// Percentile summary of one delay bucket. All zeros when the bucket is
/// empty.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BucketStats {
    pub call_times: usize,
    pub ave: f64,
    pub sum: i64,
    pub min: i32,
    pub max: i32,
    pub p50: i32,
    pub p80: i32,
    pub p95: i32,
    pub p99: i32,
}

#[derive(Debug, Clone, Default)]
pub struct DelaySummary {
    buckets: [BucketStats; 3],
}

impl DelaySummary {
    #[must_use]
    pub fn bucket(&self, which: DelayBucket) -> &BucketStats {
        &self.buckets[which as usize]
    }
}

/// Parallel-vector store for one (pid, function).
#[derive(Debug)]
pub struct TimePairInfo {
    pub start: Vec<TsUs>,
    pub end: Vec<TsUs>,
    pub delay: Vec<i32>,
    /// Calling function, root when no caller was open.
    pub parent: Vec<FunctionId>,
    /// Slot index inside the parent's vectors, `None` for root calls.
    pub parent_slot: Vec<Option<usize>>,
    /// Direct child entries observed while this pair was open.
    pub child_count: Vec<i32>,
    /// Return values, parallel to `end` (returns only).
    pub retval: Vec<u64>,
    pub stack_str: Vec<String>,
    pub invalid: Vec<bool>,
    /// Latest orphan-return timestamp, feeding the pid's valid window.
    pub max_start_invalid: Option<TsUs>,
    /// Earliest padded end timestamp, feeding the pid's valid window.
    pub min_end_invalid: Option<TsUs>,
    pub summary: DelaySummary,
}

impl TimePairInfo {
    fn new() -> Self {
        TimePairInfo {
            start: Vec::new(),
            end: Vec::new(),
            delay: Vec::new(),
            parent: Vec::new(),
            parent_slot: Vec::new(),
            child_count: Vec::new(),
            retval: Vec::new(),
            stack_str: Vec::new(),
            invalid: Vec::new(),
            max_start_invalid: None,
            min_end_invalid: None,
            summary: DelaySummary::default(),
        }
    }

    /// Number of pairs (after alignment, `end` is at least this long).
    #[must_use]
    pub fn len(&self) -> usize {
        self.start.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    /// Return value of slot i; padded pairs have none and read as 0.
    #[must_use]
    pub fn retval_at(&self, i: usize) -> u64 {
        self.retval.get(i).copied().unwrap_or(0)
    }
}

/// `[valid_start, valid_end]` of a pid's provably complete reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidWindow {
    pub start: TsUs,
    pub end: TsUs,
}

pub struct TimePairAnalysis {
    pairs: BTreeMap<Pid, BTreeMap<FunctionId, TimePairInfo>>,
    windows: BTreeMap<Pid, ValidWindow>,
}

impl TimePairAnalysis {
    /// Run the whole pass: pair matching, alignment, validity windows and
    /// per-function statistics.
    #[must_use]
    pub fn run(cfg: &Config, trace: &ParsedTrace) -> Self {
        let mut analysis =
            TimePairAnalysis { pairs: BTreeMap::new(), windows: BTreeMap::new() };
        analysis.match_pairs(cfg, trace);
        analysis.align(cfg);
        analysis.mark_invalid(cfg);
        analysis.update_delays();
        analysis.compute_statistics();
        analysis.write_debug_pairs(cfg);
        analysis
    }

    #[must_use]
    pub fn pairs(&self) -> &BTreeMap<Pid, BTreeMap<FunctionId, TimePairInfo>> {
        &self.pairs
    }

    #[must_use]
    pub fn windows(&self) -> &BTreeMap<Pid, ValidWindow> {
        &self.windows
    }

    /// Length of the pid's valid window in microseconds, 0 when the pid has
    /// no valid pair at all.
    #[must_use]
    pub fn process_valid_time(&self, pid: Pid) -> i64 {
        self.windows
            .get(&pid)
            .map_or(0, |w| (i64::from(w.end) - i64::from(w.start)).max(0))
    }

    fn match_pairs(&mut self, cfg: &Config, trace: &ParsedTrace) {
        let sched_id = cfg.sched_switch_id();
        let mut stacks: BTreeMap<Pid, Vec<FunctionId>> = BTreeMap::new();
        let mut walk = debug_dump::debug_writer(cfg, "debug_funcstk_trace", DEBUG_STACK_WALK);

        for ev in &trace.events {
            let Some(spec) = cfg.lookup(&ev.symbol) else { continue };
            let fi = spec.id;
            let ev_valid = if spec.kind == SymbolKind::Sched {
                ev.valid.sched_prev
            } else {
                ev.valid.func
            };

            let parent = walk_stack(stacks.entry(ev.pid).or_default(), ev.pid, fi, spec.is_ret);
            if let Some(out) = walk.as_mut() {
                let _ = writeln!(
                    out,
                    "pid,{},timestamp,{},functionIndex,{fi},isRet,{},fatherFunction,{parent}",
                    ev.pid,
                    ev.ts,
                    u8::from(spec.is_ret)
                );
            }
            self.record(ev.pid, fi, spec.is_ret, ev.ts, parent, ev.arg1, ev_valid);

            // pid1->pid2 reads as: pid1 enters the scheduler, the scheduler
            // returns into pid2 at the same instant.
            if Some(fi) == sched_id {
                if let Some(sched) = ev.sched {
                    let next = sched.next_pid;
                    let parent = walk_stack(stacks.entry(next).or_default(), next, fi, true);
                    self.record(next, fi, true, ev.ts, parent, None, ev.valid.sched_next);
                }
            }
        }
    }

    /// Append one side of a pair to the (pid, fi) columns.
    fn record(
        &mut self,
        pid: Pid,
        fi: FunctionId,
        is_ret: bool,
        ts: TsUs,
        parent: FunctionId,
        arg1: Option<u64>,
        ev_valid: bool,
    ) {
        // The parent's current stack string is needed before borrowing the
        // child's columns mutably.
        let parent_stack = if parent.is_root() {
            String::new()
        } else {
            self.pairs
                .get(&pid)
                .and_then(|funcs| funcs.get(&parent))
                .and_then(|info| info.stack_str.last())
                .cloned()
                .unwrap_or_default()
        };

        if is_ret {
            let info =
                self.pairs.entry(pid).or_default().entry(fi).or_insert_with(TimePairInfo::new);
            if info.start.is_empty() {
                // First event is an end time: fabricate start = end.
                info.start.push(ts);
                info.child_count.push(0);
                info.stack_str.push(format!(".{fi}"));
                info.parent.push(FunctionId::ROOT);
                info.parent_slot.push(None);
                info.invalid.push(true);
                info.max_start_invalid = Some(ts);
            }
            info.end.push(ts);
            info.retval.push(arg1.unwrap_or(0));
            if !ev_valid {
                let slot = info.end.len() - 1;
                if let Some(flag) = info.invalid.get_mut(slot) {
                    *flag = true;
                }
            }
        } else {
            let parent_slot = if parent.is_root() {
                None
            } else {
                let pinfo = self
                    .pairs
                    .entry(pid)
                    .or_default()
                    .entry(parent)
                    .or_insert_with(TimePairInfo::new);
                let slot = pinfo.start.len().checked_sub(1);
                if let Some(slot) = slot {
                    pinfo.child_count[slot] += 1;
                }
                slot
            };

            let info =
                self.pairs.entry(pid).or_default().entry(fi).or_insert_with(TimePairInfo::new);
            info.start.push(ts);
            info.child_count.push(0);
            info.stack_str.push(format!("{parent_stack}.{fi}"));
            info.parent.push(parent);
            info.parent_slot.push(parent_slot);
            info.invalid.push(!ev_valid);
        }
    }

    /// Make `|end| >= |start|` in every column set. Entries that never
    /// returned get their own start time as a padded end and are invalid by
    /// construction.
    fn align(&mut self, cfg: &Config) {
        let mut report = debug_dump::debug_writer(cfg, "debug_time_pair_align", DEBUG_DUMP);
        for (pid, funcs) in &mut self.pairs {
            for (fi, info) in funcs.iter_mut() {
                let starts = info.start.len();
                let ends = info.end.len();
                let diff = starts as i64 - ends as i64;
                if diff < 0 {
                    println!(
                        "{}",
                        AnalysisError::AlignOverflow { pid: *pid, function: *fi, diff }
                    );
                }
                if let Some(out) = report.as_mut() {
                    if diff > 1 {
                        let _ = write!(out, "run error(diffLen>1)!!!,");
                    }
                    let _ = writeln!(out, "{diff},{pid} ,{fi} ,{starts} ,{ends}");
                }
                if diff <= 0 {
                    continue;
                }
                #[allow(clippy::cast_sign_loss)]
                let diff = diff as usize;
                for i in 0..diff {
                    let end = info.start[starts - diff + i];
                    info.end.push(end);
                    if i == 0 {
                        info.min_end_invalid = Some(end);
                    }
                }
            }
        }
    }

    /// Derive each pid's valid window and mark every pair outside it.
    ///
    /// Orphan returns poison everything up to their timestamp; padded ends
    /// poison everything from the earliest fabrication onward. What remains
    /// bounds the window.
    fn mark_invalid(&mut self, cfg: &Config) {
        for (pid, funcs) in &mut self.pairs {
            let max_invalid_start = funcs.values().filter_map(|i| i.max_start_invalid).max();
            let min_invalid_end = funcs.values().filter_map(|i| i.min_end_invalid).min();

            for info in funcs.values_mut() {
                for i in 0..info.start.len() {
                    if max_invalid_start.is_some_and(|cut| info.start[i] <= cut) {
                        info.invalid[i] = true;
                    }
                    if min_invalid_end.is_some_and(|cut| info.end[i] >= cut) {
                        info.invalid[i] = true;
                    }
                }
            }

            let mut window: Option<ValidWindow> = None;
            for info in funcs.values() {
                for i in 0..info.start.len() {
                    if info.invalid[i] {
                        continue;
                    }
                    let w = window.get_or_insert(ValidWindow {
                        start: info.start[i],
                        end: info.end[i],
                    });
                    w.start = w.start.min(info.start[i]);
                    w.end = w.end.max(info.end[i]);
                }
            }
            match window {
                Some(w) => {
                    self.windows.insert(*pid, w);
                }
                None => debug!("{}", AnalysisError::ValidWindowEmpty(*pid)),
            }
        }

        if let Some(mut out) = debug_dump::debug_writer(cfg, "debug_time_pair_mark", DEBUG_DUMP) {
            for (pid, w) in &self.windows {
                let _ = writeln!(out, "pid,{pid},validStartTime ,{}, validEndTime ,{}", w.start, w.end);
            }
        }
    }

    fn update_delays(&mut self) {
        for funcs in self.pairs.values_mut() {
            for info in funcs.values_mut() {
                info.delay = (0..info.start.len()).map(|i| info.end[i] - info.start[i]).collect();
            }
        }
    }

    /// Bucket the valid delays on the signed 32-bit view of the return
    /// value and summarize each bucket.
    fn compute_statistics(&mut self) {
        for funcs in self.pairs.values_mut() {
            for info in funcs.values_mut() {
                let mut delays: [Vec<i32>; 3] = [Vec::new(), Vec::new(), Vec::new()];
                let mut sums: [i64; 3] = [0; 3];
                for i in 0..info.delay.len() {
                    if info.invalid[i] {
                        continue;
                    }
                    let delay = info.delay[i];
                    delays[DelayBucket::All as usize].push(delay);
                    sums[DelayBucket::All as usize] += i64::from(delay);
                    let bucket = if retval_is_negative(info.retval_at(i)) {
                        DelayBucket::RetNeg
                    } else {
                        DelayBucket::RetNonNeg
                    };
                    delays[bucket as usize].push(delay);
                    sums[bucket as usize] += i64::from(delay);
                }
                for bucket in DelayBucket::ALL {
                    info.summary.buckets[bucket as usize] =
                        bucket_stats(&mut delays[bucket as usize], sums[bucket as usize]);
                }
            }
        }
    }

    fn write_debug_pairs(&self, cfg: &Config) {
        let Some(mut out) = debug_dump::debug_writer(cfg, "debug_time_pair", DEBUG_DUMP) else {
            return;
        };
        for (pid, funcs) in &self.pairs {
            for (fi, info) in funcs {
                let _ = writeln!(out, "pid:{pid},");
                let _ = writeln!(out, "functionIndex:{fi},{}", cfg.function_name(*fi));
                let _ = writeln!(
                    out,
                    "info num,{},valid info num,{},validTime,{}",
                    info.len(),
                    info.summary.bucket(DelayBucket::All).call_times,
                    self.process_valid_time(*pid)
                );
                let _ = writeln!(out, "startTime,{}", join(&info.start));
                let _ = writeln!(out, "endTime,{}", join(&info.end));
                let _ = writeln!(out, "delay,{}", join(&info.delay));
                let _ = writeln!(out, "fatherFunction,{}", join(&info.parent));
                let _ = writeln!(out, "childFuncTimes,{}", join(&info.child_count));
                let _ = writeln!(out, "strFunctionStk,{}", info.stack_str.join(","));
                let _ = writeln!(out, "isInvalid,{}", join(&info.invalid));
            }
        }
    }
}

/// Stack discipline shared with the validity sweep: pop when the top
/// matches, push otherwise, and report the caller left on top.
fn walk_stack(stack: &mut Vec<FunctionId>, pid: Pid, fi: FunctionId, is_ret: bool) -> FunctionId {
    match stack.last().copied() {
        None => {
            if !is_ret {
                stack.push(fi);
            }
            FunctionId::ROOT
        }
        Some(top) if top == fi => {
            stack.pop();
            stack.last().copied().unwrap_or(FunctionId::ROOT)
        }
        Some(top) => {
            if is_ret {
                // Best-effort repair: keep the under-top as parent.
                debug!("{}", AnalysisError::StackRepair { pid, function: fi, top });
            }
            stack.push(fi);
            stack[stack.len() - 2]
        }
    }
}

/// Lower 32 bits of the return value, compared as signed. Pointer-width
/// returns are ambiguous; the 32-bit view is the documented compromise.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn retval_is_negative(retval: u64) -> bool {
    (retval as u32 as i32) < 0
}

/// The `ceil(p*n)`-th order statistic (1-indexed) of an already sorted
/// slice; 0 for an empty one.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn percentile(sorted: &[i32], p: f64) -> i32 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.max(1) - 1]
}

#[allow(clippy::cast_precision_loss)]
fn bucket_stats(delays: &mut [i32], sum: i64) -> BucketStats {
    delays.sort_unstable();
    let Some((&min, &max)) = delays.first().zip(delays.last()) else {
        return BucketStats::default();
    };
    BucketStats {
        call_times: delays.len(),
        ave: sum as f64 / delays.len() as f64,
        sum,
        min,
        max,
        p50: percentile(delays, 0.50),
        p80: percentile(delays, 0.80),
        p95: percentile(delays, 0.95),
        p99: percentile(delays, 0.99),
    }
}

fn join<T: std::fmt::Display>(values: &[T]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

//! Scheduling interval classification and per-CPU runtime attribution.
//!
//! Every sched_switch from pid A to pid B on core c drops two anchors: a
//! "leave" for A and a "resume" for B, both at the switch timestamp. The
//! per-pid anchor sequence then turns into intervals, each one closed by
//! the pid's next anchor. The trailing anchor has no successor and is
//! dropped.

use std::collections::BTreeMap;

use crate::config::Config;
use crate::domain::{Pid, TsUs};
use crate::trace::ParsedTrace;

/// What a pid was doing between two of its anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntervalClass {
    /// Core-change anomalies, trace gaps, anything unprovable.
    #[default]
    Invalid,
    /// Off CPU between a leave and a resume.
    Scheduling,
    /// On a single core between a resume and the next leave.
    OnCore,
}

impl IntervalClass {
    /// Name used in the `process_sched_info` output.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            IntervalClass::Invalid => "invalid",
            IntervalClass::Scheduling => "scheduling",
            IntervalClass::OnCore => "running",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoreInterval {
    pub start_ts: TsUs,
    pub end_ts: TsUs,
    pub start_core: i32,
    pub end_core: i32,
    /// The anchor sides: a resume is the scheduler "returning" into the pid.
    pub start_is_ret: bool,
    pub end_is_ret: bool,
    pub class: IntervalClass,
}

impl CoreInterval {
    #[must_use]
    pub fn duration(&self) -> i64 {
        i64::from(self.end_ts) - i64::from(self.start_ts)
    }
}

/// A counter pair: over provably classified intervals, and over all of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerScope<T> {
    pub valid: T,
    pub all: T,
}

#[derive(Debug, Default)]
pub struct ProcessSchedInfo {
    pub intervals: Vec<CoreInterval>,
    /// Time spent running, per core id. Only cores with nonzero time appear.
    pub runtime_of_core: BTreeMap<i32, i64>,
    /// Off-CPU time over SCHEDULING intervals.
    pub sched_switch_delay: i64,
    /// `sched_switch_delay / delay_sum.valid`, 0 on a zero denominator.
    pub pct_sched: f64,
    pub sched_switch_times: PerScope<u32>,
    pub cpu_switch_times: PerScope<u32>,
    pub delay_sum: PerScope<i64>,
}

pub struct SchedAnalysis {
    processes: BTreeMap<Pid, ProcessSchedInfo>,
}

impl SchedAnalysis {
    #[must_use]
    pub fn run(cfg: &Config, trace: &ParsedTrace) -> Self {
        let mut analysis = SchedAnalysis { processes: BTreeMap::new() };
        analysis.build_intervals(cfg, trace);
        analysis.classify();
        analysis.aggregate();
        analysis
    }

    #[must_use]
    pub fn processes(&self) -> &BTreeMap<Pid, ProcessSchedInfo> {
        &self.processes
    }

    fn build_intervals(&mut self, cfg: &Config, trace: &ParsedTrace) {
        // Without a configured scheduling probe there is nothing to analyze.
        let Some(sched_id) = cfg.sched_switch_id() else { return };

        for ev in &trace.events {
            let is_sched = cfg.lookup(&ev.symbol).is_some_and(|spec| spec.id == sched_id);
            if !is_sched {
                continue;
            }
            self.anchor(ev.pid, ev.ts, ev.cpu, false);
            if let Some(sched) = ev.sched {
                self.anchor(sched.next_pid, ev.ts, ev.cpu, true);
            }
        }

        // The trailing anchor has no successor to close it.
        for info in self.processes.values_mut() {
            info.intervals.pop();
        }
    }

    fn anchor(&mut self, pid: Pid, ts: TsUs, core: i32, is_ret: bool) {
        let info = self.processes.entry(pid).or_default();
        if let Some(open) = info.intervals.last_mut() {
            open.end_ts = ts;
            open.end_core = core;
            open.end_is_ret = is_ret;
        }
        info.intervals.push(CoreInterval {
            start_ts: ts,
            end_ts: ts,
            start_core: core,
            end_core: core,
            start_is_ret: is_ret,
            end_is_ret: is_ret,
            class: IntervalClass::Invalid,
        });
    }

    fn classify(&mut self) {
        for info in self.processes.values_mut() {
            for interval in &mut info.intervals {
                if !interval.start_is_ret && interval.end_is_ret {
                    interval.class = IntervalClass::Scheduling;
                }
                if interval.start_is_ret
                    && !interval.end_is_ret
                    && interval.start_core == interval.end_core
                {
                    interval.class = IntervalClass::OnCore;
                }
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn aggregate(&mut self) {
        for info in self.processes.values_mut() {
            let mut sched_delay = 0_i64;
            for interval in &info.intervals {
                let delay = interval.duration();
                info.delay_sum.all += delay;
                if !interval.start_is_ret {
                    // Each leave marks one pid1->pidn switch.
                    info.sched_switch_times.all += 1;
                }
                if interval.start_core != interval.end_core {
                    info.cpu_switch_times.all += 1;
                }
                if interval.class != IntervalClass::Invalid {
                    info.delay_sum.valid += delay;
                }
                match interval.class {
                    IntervalClass::OnCore => {
                        *info.runtime_of_core.entry(interval.start_core).or_insert(0) += delay;
                    }
                    IntervalClass::Scheduling => {
                        sched_delay += delay;
                        info.sched_switch_times.valid += 1;
                        if interval.start_core != interval.end_core {
                            // CPU migration only happens while off core.
                            info.cpu_switch_times.valid += 1;
                        }
                    }
                    IntervalClass::Invalid => {}
                }
            }
            info.sched_switch_delay = sched_delay;
            info.pct_sched = if info.delay_sum.valid == 0 {
                0.0
            } else {
                sched_delay as f64 / info.delay_sum.valid as f64
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use crate::trace::TraceParser;

    fn sched_line(pid: i32, usec: u32, cpu: u32, next: i32) -> String {
        format!(
            "            test-{pid}     [{cpu:03}] d...   100.{usec:06}: sched_switch: prev_comm=a prev_pid={pid} prev_prio=120 prev_state=S ==> next_comm=b next_pid={next} next_prio=120"
        )
    }

    fn run(lines: &[String]) -> SchedAnalysis {
        let cfg =
            Config::from_records("s,sched_switch\n", Paths::with_roots("/tmp/in", "/tmp/out"));
        let trace = TraceParser::new(&cfg).parse_reader(lines.join("\n").as_bytes());
        SchedAnalysis::run(&cfg, &trace)
    }

    #[test]
    fn test_round_trip_classifies_both_pids() {
        // pid 7 leaves core 0 at 10, resumes at 20; pid 9 does the mirror.
        let analysis = run(&[sched_line(7, 10, 0, 9), sched_line(9, 20, 0, 7)]);

        let p7 = &analysis.processes()[&Pid(7)];
        assert_eq!(p7.intervals.len(), 1);
        assert_eq!(p7.intervals[0].class, IntervalClass::Scheduling);
        assert_eq!(p7.intervals[0].duration(), 10);
        assert_eq!(p7.sched_switch_delay, 10);
        assert_eq!(p7.sched_switch_times, PerScope { valid: 1, all: 1 });

        let p9 = &analysis.processes()[&Pid(9)];
        assert_eq!(p9.intervals.len(), 1);
        assert_eq!(p9.intervals[0].class, IntervalClass::OnCore);
        assert_eq!(p9.intervals[0].duration(), 10);
        assert_eq!(p9.runtime_of_core[&0], 10);
        // pid 9's only interval starts with a resume: no leave counted.
        assert_eq!(p9.sched_switch_times, PerScope { valid: 0, all: 0 });
    }

    #[test]
    fn test_cpu_migration_counts_once() {
        // pid 7 leaves core 0 and resumes on core 1: scheduling with a
        // migration; pid 9 ran across cores, which is unprovable.
        let analysis = run(&[sched_line(7, 10, 0, 9), sched_line(9, 20, 1, 7)]);

        let p7 = &analysis.processes()[&Pid(7)];
        assert_eq!(p7.intervals[0].class, IntervalClass::Scheduling);
        assert_eq!(p7.cpu_switch_times, PerScope { valid: 1, all: 1 });

        let p9 = &analysis.processes()[&Pid(9)];
        assert_eq!(p9.intervals[0].class, IntervalClass::Invalid);
        assert_eq!(p9.cpu_switch_times, PerScope { valid: 0, all: 1 });
        assert!(p9.runtime_of_core.is_empty());
    }

    #[test]
    fn test_interval_durations_partition_delay_sum() {
        let analysis = run(&[
            sched_line(7, 10, 0, 9),
            sched_line(9, 20, 0, 7),
            sched_line(7, 25, 1, 9),
            sched_line(9, 40, 1, 7),
        ]);
        for info in analysis.processes().values() {
            let by_class: i64 = info.intervals.iter().map(CoreInterval::duration).sum();
            assert_eq!(by_class, info.delay_sum.all);
            assert!(info.delay_sum.valid <= info.delay_sum.all);
        }
    }

    #[test]
    fn test_trailing_anchor_dropped() {
        let analysis = run(&[sched_line(7, 10, 0, 9)]);
        // Both pids got exactly one anchor; no interval can be closed.
        assert!(analysis.processes()[&Pid(7)].intervals.is_empty());
        assert!(analysis.processes()[&Pid(9)].intervals.is_empty());
    }

    #[test]
    fn test_without_sched_probe_analysis_is_empty() {
        let cfg = Config::from_records("k,funcA\n", Paths::with_roots("/tmp/in", "/tmp/out"));
        let trace = TraceParser::new(&cfg).parse_reader(sched_line(7, 10, 0, 9).as_bytes());
        let analysis = SchedAnalysis::run(&cfg, &trace);
        assert!(analysis.processes().is_empty());
    }

    #[test]
    fn test_pct_sched_zero_denominator() {
        let analysis = run(&[sched_line(7, 10, 0, 9), sched_line(9, 20, 1, 7)]);
        // pid 9's only interval is invalid: valid delay sum is 0.
        let p9 = &analysis.processes()[&Pid(9)];
        assert_eq!(p9.delay_sum.valid, 0);
        assert!((p9.pct_sched - 0.0).abs() < f64::EPSILON);
    }
}

//! `process_sched_info` and `summary_sched.csv` writers.
//!
//! These outputs deliberately ignore the PID filter (diagnostics cover
//! every process the trace touched); pid 0 is the idle task and skipped.

use std::io::{self, Write};

use crate::analysis::sched::SchedAnalysis;
use crate::domain::Pid;
use crate::trace::ParsedTrace;

/// Per-pid counters, per-core runtimes and the full interval list.
pub fn write_process_info<W: Write>(
    sched: &SchedAnalysis,
    trace: &ParsedTrace,
    out: &mut W,
) -> io::Result<()> {
    for (pid, info) in sched.processes() {
        if *pid == Pid(0) {
            continue;
        }
        writeln!(out, "pid,{pid},")?;
        writeln!(
            out,
            "cpuSwitchTimes,{},schedSwitchTimes,{},delaySum,{},",
            info.cpu_switch_times.all, info.sched_switch_times.all, info.delay_sum.all
        )?;
        writeln!(
            out,
            "vaildCpuSwitchTimes,{},vaildSchedSwitchTimes,{},validDelaySum,{},vaildSchedSwitchDelay,{},validRuntime,{},",
            info.cpu_switch_times.valid,
            info.sched_switch_times.valid,
            info.delay_sum.valid,
            info.sched_switch_delay,
            info.delay_sum.valid - info.sched_switch_delay
        )?;
        for (core, runtime) in &info.runtime_of_core {
            if *runtime != 0 {
                writeln!(out, " core  {core}, run time {runtime}")?;
            }
        }
        for interval in &info.intervals {
            writeln!(
                out,
                "startTime,{:.6},endTime,{:.6},startCoreId,{},endCoreId,{},coreTraceType,{}",
                trace.to_seconds(interval.start_ts),
                trace.to_seconds(interval.end_ts),
                interval.start_core,
                interval.end_core,
                interval.class.label()
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// One CSV row of valid-scope counters per pid.
pub fn write_summary<W: Write>(sched: &SchedAnalysis, out: &mut W) -> io::Result<()> {
    writeln!(
        out,
        "pid,validDelaySum,vaildSchedSwitchDelay,validSchedSwitchPercentage,validSchedSwitchTimes,validCpuSwitchTimes"
    )?;
    for (pid, info) in sched.processes() {
        if *pid == Pid(0) {
            continue;
        }
        writeln!(
            out,
            "{pid},{},{},{:.3}%,{},{},",
            info.delay_sum.valid,
            info.sched_switch_delay,
            info.pct_sched * 100.0,
            info.sched_switch_times.valid,
            info.cpu_switch_times.valid
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Paths};
    use crate::trace::TraceParser;

    fn sched_line(pid: i32, usec: u32, cpu: u32, next: i32) -> String {
        format!(
            "            test-{pid}     [{cpu:03}] d...   100.{usec:06}: sched_switch: prev_comm=a prev_pid={pid} prev_prio=120 prev_state=S ==> next_comm=b next_pid={next} next_prio=120"
        )
    }

    fn analyze(lines: &[String]) -> (ParsedTrace, SchedAnalysis) {
        let cfg =
            Config::from_records("s,sched_switch\n", Paths::with_roots("/tmp/in", "/tmp/out"));
        let trace = TraceParser::new(&cfg).parse_reader(lines.join("\n").as_bytes());
        let sched = SchedAnalysis::run(&cfg, &trace);
        (trace, sched)
    }

    #[test]
    fn test_summary_rows_for_round_trip() {
        let (_, sched) = analyze(&[sched_line(7, 10, 0, 9), sched_line(9, 20, 0, 7)]);
        let mut buf = Vec::new();
        write_summary(&sched, &mut buf).unwrap();
        let output = String::from_utf8(buf).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next().unwrap(),
            "pid,validDelaySum,vaildSchedSwitchDelay,validSchedSwitchPercentage,validSchedSwitchTimes,validCpuSwitchTimes"
        );
        assert_eq!(lines.next().unwrap(), "7,10,10,100.000%,1,0,");
        assert_eq!(lines.next().unwrap(), "9,10,0,0.000%,0,0,");
    }

    #[test]
    fn test_process_info_lists_intervals_in_seconds() {
        let (trace, sched) = analyze(&[sched_line(7, 10, 0, 9), sched_line(9, 20, 0, 7)]);
        let mut buf = Vec::new();
        write_process_info(&sched, &trace, &mut buf).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("pid,7,"));
        assert!(output.contains("pid,9,"));
        assert!(output.contains(
            "startTime,100.000010,endTime,100.000020,startCoreId,0,endCoreId,0,coreTraceType,scheduling"
        ));
        assert!(output.contains("coreTraceType,running"));
        assert!(output.contains(" core  0, run time 10"));
        assert!(output.contains("validRuntime,0,"));
    }

    #[test]
    fn test_pid_zero_not_reported() {
        let (trace, sched) = analyze(&[sched_line(7, 10, 0, 0), sched_line(0, 20, 0, 7)]);
        let mut buf = Vec::new();
        write_process_info(&sched, &trace, &mut buf).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("pid,7,"));
        assert!(!output.contains("pid,0,"));
    }
}

//! `summary_delay.csv`: per-(pid, function) percentile summaries.

use std::io::{self, Write};

use crate::analysis::time_pair::{DelayBucket, TimePairAnalysis};
use crate::config::Config;

/// One row per (pid, function) with a nonzero all-bucket call count; the
/// PID filter applies. Three column groups, one per return-value bucket.
pub fn write<W: Write>(cfg: &Config, tp: &TimePairAnalysis, out: &mut W) -> io::Result<()> {
    write!(out, "note : (r>=0) => (int)return value >=0; ave => average delay,")?;
    write!(out, "pid,function,")?;
    for bucket in DelayBucket::ALL {
        let s = bucket.label();
        write!(
            out,
            "call_times{s},ave{s},sum{s},min{s},max{s},p50{s},p80{s},p95{s},p99{s},"
        )?;
    }
    writeln!(out)?;

    for (pid, funcs) in tp.pairs() {
        if !cfg.pid_selected(*pid) {
            continue;
        }
        for (fi, info) in funcs {
            if info.summary.bucket(DelayBucket::All).call_times == 0 {
                continue;
            }
            write!(out, ",{pid},{},", cfg.function_name(*fi))?;
            for bucket in DelayBucket::ALL {
                let stats = info.summary.bucket(bucket);
                write!(
                    out,
                    "{},{:.3},{},{},{},{},{},{},{},",
                    stats.call_times,
                    stats.ave,
                    stats.sum,
                    stats.min,
                    stats.max,
                    stats.p50,
                    stats.p80,
                    stats.p95,
                    stats.p99
                )?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use crate::trace::{TraceParser, ValidityMarker};

    fn render(config: &str, trace_text: &str) -> String {
        let cfg = Config::from_records(config, Paths::with_roots("/tmp/in", "/tmp/out"));
        let mut trace = TraceParser::new(&cfg).parse_reader(trace_text.as_bytes());
        ValidityMarker::new(&cfg).mark(&mut trace.events);
        let tp = TimePairAnalysis::run(&cfg, &trace);
        let mut buf = Vec::new();
        write(&cfg, &tp, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn line(pid: i32, usec: u32, symbol: &str) -> String {
        format!("            test-{pid}     [000] d...   100.{usec:06}: {symbol}: probe")
    }

    #[test]
    fn test_header_has_three_bucket_groups() {
        let output = render("k,funcA\n", "");
        let header = output.lines().next().unwrap();
        assert!(header.contains("pid,function,"));
        assert!(header.contains("call_times,ave,sum,min,max,p50,p80,p95,p99,"));
        assert!(header.contains("call_times(r>=0),"));
        assert!(header.contains("p99(r<0),"));
    }

    #[test]
    fn test_row_per_function_with_calls() {
        let trace = [
            line(7, 0, "funcA"),
            line(7, 5, "funcA__return"),
        ]
        .join("\n");
        let output = render("k,funcA\nk,funcB\n", &trace);
        let rows: Vec<&str> = output.lines().skip(1).collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].starts_with(",7,funcA,1,5.000,5,5,5,5,5,5,5,"));
    }

    #[test]
    fn test_pid_filter_drops_rows() {
        let trace = [
            line(7, 0, "funcA"),
            line(7, 5, "funcA__return"),
            line(9, 10, "funcA"),
            line(9, 12, "funcA__return"),
        ]
        .join("\n");
        let output = render("k,funcA\np,7\n", &trace);
        assert!(output.contains(",7,funcA,"));
        assert!(!output.contains(",9,funcA,"));
    }
}

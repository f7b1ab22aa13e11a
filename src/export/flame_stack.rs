//! `func_delay_stack`: flame-graph-style per-stack records.
//!
//! Each row doubles as a flame-graph input line (`pid_7;funcA;funcB <n>`)
//! and a labeled record with the full local/global breakdown.

use std::io::{self, Write};

use crate::analysis::func_stack::FunctionStackAnalysis;
use crate::config::Config;
use crate::domain::FunctionId;

pub fn write<W: Write>(cfg: &Config, fs: &FunctionStackAnalysis, out: &mut W) -> io::Result<()> {
    for (pid, stacks) in fs.stacks() {
        if !cfg.pid_selected(*pid) {
            continue;
        }
        let Some(process) = fs.process_delay().get(pid) else { continue };
        if process.delay_sum.global <= 0 {
            continue;
        }

        write!(out, "pid_{pid}")?;
        write!(out, "; {}", process.delay_sum.local)?;
        write!(out, ",localDelaySum,{}", process.delay_sum.local)?;
        write!(out, ",localPercentage,{:.3}%", process.pct.local * 100.0)?;
        write!(out, ",globalDelaySum,{}", process.delay_sum.global)?;
        writeln!(out, ",globalPercentage,{:.3}%", process.pct.global * 100.0)?;

        for (stack, info) in stacks {
            write!(out, "pid_{pid}")?;
            for token in stack.split('.').filter(|token| !token.is_empty()) {
                let id = token.parse().map_or(FunctionId::ROOT, FunctionId);
                write!(out, ";{}", cfg.function_name(id))?;
            }
            write!(out, " {}", info.delay_sum.local)?;
            write!(out, ",localDelaySum,{}", info.delay_sum.local)?;
            write!(out, ",localAvedelay,{:.6}", info.ave.local)?;
            write!(out, ",localPercentage,{:.3}%", info.pct.local * 100.0)?;
            write!(out, ",globalDelaySum,{}", info.delay_sum.global)?;
            write!(out, ",globalAvedelay,{:.6}", info.ave.global)?;
            write!(out, ",globalPercentage,{:.3}%", info.pct.global * 100.0)?;
            write!(out, ",times ,{:>5}", info.num)?;
            writeln!(out, ",(int)ret>=0 times,{}", info.ret_nonneg_times())?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FunctionStackAnalysis, TimePairAnalysis};
    use crate::config::Paths;
    use crate::trace::{TraceParser, ValidityMarker};

    fn render(config: &str, lines: &[String]) -> String {
        let cfg = Config::from_records(config, Paths::with_roots("/tmp/in", "/tmp/out"));
        let mut trace = TraceParser::new(&cfg).parse_reader(lines.join("\n").as_bytes());
        ValidityMarker::new(&cfg).mark(&mut trace.events);
        let tp = TimePairAnalysis::run(&cfg, &trace);
        let fs = FunctionStackAnalysis::run(&tp);
        let mut buf = Vec::new();
        write(&cfg, &fs, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn line(pid: i32, usec: u32, symbol: &str) -> String {
        format!("            test-{pid}     [000] d...   100.{usec:06}: {symbol}: probe")
    }

    #[test]
    fn test_stack_rows_spell_out_symbols() {
        let output = render(
            "k,funcA\nk,funcB\n",
            &[
                line(7, 0, "funcA"),
                line(7, 1, "funcB"),
                line(7, 4, "funcB__return"),
                line(7, 5, "funcA__return"),
            ],
        );
        assert!(output.starts_with("pid_7; "));
        assert!(output.contains("pid_7;funcA 2,localDelaySum,2"));
        assert!(output.contains("pid_7;funcA;funcB 3,localDelaySum,3"));
        assert!(output.contains(",globalDelaySum,5"));
        assert!(output.contains(",times ,    1,(int)ret>=0 times,1"));
    }

    #[test]
    fn test_pid_without_valid_window_skipped() {
        // A single orphan return leaves pid 7 with no valid pair.
        let output = render("k,funcA\n", &[line(7, 0, "funcA__return")]);
        assert!(output.is_empty());
    }

    #[test]
    fn test_blank_line_terminates_each_pid() {
        let output = render(
            "k,funcA\n",
            &[line(7, 0, "funcA"), line(7, 5, "funcA__return")],
        );
        assert!(output.ends_with("\n\n"));
    }
}

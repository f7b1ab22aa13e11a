//! Stdout rendering of the per-pid call-stack tree.
//!
//! Depth-first over the prefix tree, children in insertion order. Each
//! depth contributes a fixed-width indent segment to the prefix handed
//! down; the final child of a parent swaps `├─` for `└─`.

use std::io::{self, Write};

use crate::analysis::func_stack::{FunctionStackAnalysis, ROOT_STACK};
use crate::config::Config;
use crate::domain::Pid;

/// Width of one tree depth, matching the branch glyph run.
const INDENT_WIDTH: usize = 7;

pub fn render<W: Write>(
    cfg: &Config,
    fs: &FunctionStackAnalysis,
    out: &mut W,
) -> io::Result<()> {
    writeln!(out, "Display the function delay of each pid ")?;
    for pid in fs.nodes().keys() {
        if cfg.pid_selected(*pid) {
            writeln!(out, "│")?;
            render_node(cfg, fs, *pid, false, ROOT_STACK, "", out)?;
        }
    }
    writeln!(out)
}

fn render_node<W: Write>(
    cfg: &Config,
    fs: &FunctionStackAnalysis,
    pid: Pid,
    last_child: bool,
    stack: &str,
    head: &str,
    out: &mut W,
) -> io::Result<()> {
    let mut head_next = head.to_string();
    if stack == ROOT_STACK {
        write!(out, "├──pid: {pid}")?;
        match fs.process_delay().get(&pid) {
            Some(process) if process.delay_sum.global > 0 => {
                write!(out, "{{")?;
                write!(
                    out,
                    "local:({}, {:.3}%)",
                    process.delay_sum.local,
                    process.pct.local * 100.0
                )?;
                write!(
                    out,
                    ", global:({}, {:.3}%)",
                    process.delay_sum.global,
                    process.pct.global * 100.0
                )?;
                write!(out, "}}")?;
            }
            _ => write!(out, "  data invalid!!!")?,
        }
        writeln!(out)?;
    } else {
        write!(out, "│")?;
        if !last_child {
            head_next.push('│');
        }
        for _ in 1..INDENT_WIDTH {
            write!(out, " ")?;
            head_next.push(' ');
        }
        write!(out, "{head}")?;
        write!(out, "{}", if last_child { "└─────" } else { "├─────" })?;

        let node = &fs.nodes()[&pid][stack];
        let info = &fs.stacks()[&pid][&stack[ROOT_STACK.len()..]];
        write!(out, "{}", cfg.function_name(node.function))?;
        write!(out, "{{")?;
        write!(
            out,
            "local:({}, {:.3}%, {:.3})",
            info.delay_sum.local,
            info.pct.local * 100.0,
            info.ave.local
        )?;
        write!(
            out,
            ", global:({}, {:.3}%, {:.3})",
            info.delay_sum.global,
            info.pct.global * 100.0,
            info.ave.global
        )?;
        write!(out, ", times:{}", info.num)?;
        write!(out, ", (int)ret>=0 times:{}", info.ret_nonneg_times())?;
        writeln!(out, "}}")?;
    }

    // A pid with no aggregated stacks has no root node at all.
    let children = fs
        .nodes()
        .get(&pid)
        .and_then(|nodes| nodes.get(stack))
        .map_or(&[] as &[String], |node| node.children.as_slice());
    for (i, child) in children.iter().enumerate() {
        render_node(cfg, fs, pid, i + 1 == children.len(), child, &head_next, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FunctionStackAnalysis, TimePairAnalysis};
    use crate::config::Paths;
    use crate::trace::{TraceParser, ValidityMarker};

    fn render_to_string(config: &str, lines: &[String]) -> String {
        let cfg = Config::from_records(config, Paths::with_roots("/tmp/in", "/tmp/out"));
        let mut trace = TraceParser::new(&cfg).parse_reader(lines.join("\n").as_bytes());
        ValidityMarker::new(&cfg).mark(&mut trace.events);
        let tp = TimePairAnalysis::run(&cfg, &trace);
        let fs = FunctionStackAnalysis::run(&tp);
        let mut buf = Vec::new();
        render(&cfg, &fs, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn line(pid: i32, usec: u32, symbol: &str) -> String {
        format!("            test-{pid}     [000] d...   100.{usec:06}: {symbol}: probe")
    }

    #[test]
    fn test_tree_shows_nested_stacks() {
        let output = render_to_string(
            "k,funcA\nk,funcB\n",
            &[
                line(7, 0, "funcA"),
                line(7, 1, "funcB"),
                line(7, 4, "funcB__return"),
                line(7, 5, "funcA__return"),
            ],
        );
        assert!(output.starts_with("Display the function delay of each pid \n"));
        assert!(output.contains("├──pid: 7{local:(0, 0.000%), global:(5, 100.000%)}"));
        // Each is its parent's only (hence last) child.
        assert!(output.contains("└─────funcA{local:(2, 40.000%, 2.000), global:(5, 100.000%, 5.000), times:1, (int)ret>=0 times:1}"));
        assert!(output.contains("└─────funcB{local:(3, 60.000%, 3.000), global:(3, 60.000%, 3.000), times:1, (int)ret>=0 times:1}"));
    }

    #[test]
    fn test_last_child_uses_corner_glyph() {
        let output = render_to_string(
            "k,funcA\nk,funcB\n",
            &[
                line(7, 0, "funcA"),
                line(7, 2, "funcA__return"),
                line(7, 3, "funcB"),
                line(7, 5, "funcB__return"),
            ],
        );
        // Two top-level stacks: the first forks, the second closes.
        assert!(output.contains("├─────funcA"));
        assert!(output.contains("└─────funcB"));
    }

    #[test]
    fn test_empty_window_renders_data_invalid() {
        let output = render_to_string("k,funcA\n", &[line(7, 0, "funcA__return")]);
        assert!(output.contains("├──pid: 7  data invalid!!!"));
    }

    #[test]
    fn test_filter_hides_other_pids() {
        let output = render_to_string(
            "k,funcA\np,7\n",
            &[
                line(7, 0, "funcA"),
                line(7, 2, "funcA__return"),
                line(9, 3, "funcA"),
                line(9, 5, "funcA__return"),
            ],
        );
        assert!(output.contains("├──pid: 7"));
        assert!(!output.contains("├──pid: 9"));
    }
}

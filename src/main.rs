//! Pipeline wiring: parse, mark, pair, schedule, aggregate, write.
//!
//! Every stage is non-fatal; whatever could be derived from the parsed
//! events is written out and the process exits 0.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use log::warn;

use da_tool::analysis::{FunctionStackAnalysis, SchedAnalysis, TimePairAnalysis};
use da_tool::cli::Args;
use da_tool::config::{Config, Paths};
use da_tool::domain::AnalysisError;
use da_tool::export::{debug_dump, delay_summary, flame_stack, sched_report, stack_tree};
use da_tool::trace::{TraceParser, ValidityMarker};

fn main() -> Result<()> {
    env_logger::init();
    println!("analysis start...");

    let args = Args::parse();
    let cfg = Config::load(&args, Paths::system());
    // Option handling (and its debugLevel message) comes first; leftover
    // arguments are only echoed.
    for extra in &args.extra {
        println!("Non option parameters: {extra}");
    }
    if let Err(err) = cfg.paths.prepare() {
        warn!("{err:#}");
    }
    cfg.write_debug_dump();

    println!("analysis resolve...");
    let mut trace = TraceParser::new(&cfg).parse();
    ValidityMarker::new(&cfg).mark(&mut trace.events);
    debug_dump::write_trace_events(&cfg, &trace);

    let time_pairs = TimePairAnalysis::run(&cfg, &trace);
    write_output(&cfg.paths.summary_delay, |out| delay_summary::write(&cfg, &time_pairs, out));

    let sched = SchedAnalysis::run(&cfg, &trace);
    write_output(&cfg.paths.process_sched_info, |out| {
        sched_report::write_process_info(&sched, &trace, out)
    });
    write_output(&cfg.paths.summary_sched, |out| sched_report::write_summary(&sched, out));

    let stacks = FunctionStackAnalysis::run(&time_pairs);
    {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(err) = stack_tree::render(&cfg, &stacks, &mut out) {
            warn!("tree render failed: {err}");
        }
    }
    write_output(&cfg.paths.func_delay_stack, |out| flame_stack::write(&cfg, &stacks, out));

    println!("analysis finish");
    Ok(())
}

/// Run one writer against a freshly created file; open or write failures
/// follow the usual non-fatal stdout contract.
fn write_output<F>(path: &Path, writer: F)
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    match File::create(path) {
        Ok(file) => {
            let mut out = BufWriter::new(file);
            if writer(&mut out).and_then(|()| out.flush()).is_err() {
                println!("file write failed:{}", path.display());
            }
        }
        Err(_) => println!("{}", AnalysisError::OpenFailed(path.to_path_buf())),
    }
}

//! Analysis configuration: probed symbols, PID filter, fixed paths.
//!
//! The config file has one comma-separated record per non-empty,
//! non-`#`-prefixed line:
//!
//! ```text
//! k,<symbol>   kernel function, probed at entry and exit
//! u,<symbol>   user function, probed at entry and exit
//! s,<symbol>   scheduling probe (sched_switch), entry form only
//! p,<pid>      restrict stack outputs to this PID
//! ```
//!
//! Each k/u/s record claims the next `FunctionId` (file order, starting at
//! 1). A kernel or user symbol registers two mapped names sharing that id:
//! the entry form and `<symbol>__return`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::cli::Args;
use crate::domain::{AnalysisError, FunctionId, Pid};

pub const SCHED_SWITCH_SYMBOL: &str = "sched_switch";

/// Debug level at which the summary dumps are written.
pub const DEBUG_BASIC: u8 = 1;
/// Debug level at which the full per-stage dumps are written.
pub const DEBUG_DUMP: u8 = 3;
/// Debug level at which the per-event stack walk is traced.
pub const DEBUG_STACK_WALK: u8 = 4;

const DEBUG_LEVEL_MAX: u8 = 4;

/// Kind of a configured symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Kernel,
    User,
    Sched,
}

/// One mapped trace symbol. Entry and `__return` forms of the same function
/// are two specs sharing one `FunctionId`.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub kind: SymbolKind,
    pub is_ret: bool,
    pub id: FunctionId,
}

/// Input/output locations. Production runs use the fixed `/var/da-tool`
/// roots; tests construct the same layout under a temp dir.
#[derive(Debug, Clone)]
pub struct Paths {
    pub trace: PathBuf,
    pub analysis_config: PathBuf,
    pub summary_delay: PathBuf,
    pub func_delay_stack: PathBuf,
    pub process_sched_info: PathBuf,
    pub summary_sched: PathBuf,
    pub debug_dir: PathBuf,
}

impl Paths {
    #[must_use]
    pub fn system() -> Self {
        Self::with_roots("/var/da-tool/tmp/analysis_input", "/var/da-tool/analysis_output")
    }

    pub fn with_roots(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        let input = input.as_ref();
        let output = output.as_ref();
        Paths {
            trace: input.join("trace"),
            analysis_config: input.join("analysis_config"),
            summary_delay: output.join("output/summary_delay.csv"),
            func_delay_stack: output.join("output/func_delay_stack"),
            process_sched_info: output.join("output/process_sched_info"),
            summary_sched: output.join("output/summary_sched.csv"),
            debug_dir: output.join("debug"),
        }
    }

    /// Best-effort creation of the output directories. Failures are reported
    /// by the individual writers as `file open failed`.
    pub fn prepare(&self) -> anyhow::Result<()> {
        use anyhow::Context;
        for file in [&self.summary_delay, &self.func_delay_stack] {
            if let Some(dir) = file.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create output dir {}", dir.display()))?;
            }
        }
        std::fs::create_dir_all(&self.debug_dir)
            .with_context(|| format!("failed to create debug dir {}", self.debug_dir.display()))?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Config {
    /// Mapped symbol name (entry or `__return` form) to its spec.
    functions: HashMap<String, FunctionSpec>,
    /// Function id back to the bare symbol name, for display.
    names: BTreeMap<FunctionId, String>,
    /// Empty set means "no filtering".
    filter: HashSet<Pid>,
    pub paths: Paths,
    pub read_begin: u32,
    pub read_len: u32,
    debug: u8,
}

impl Config {
    /// Build the configuration from CLI arguments, reading the analysis
    /// config file from `paths`. A missing config file is reported on stdout
    /// and yields an empty symbol table (the pipeline then produces empty
    /// outputs rather than aborting).
    #[must_use]
    pub fn load(args: &Args, paths: Paths) -> Self {
        let mut cfg = Config {
            functions: HashMap::new(),
            names: BTreeMap::new(),
            filter: HashSet::new(),
            paths,
            read_begin: args.begin,
            read_len: args.lines,
            debug: 0,
        };

        if let Some(level) = args.debug {
            if level > DEBUG_LEVEL_MAX {
                println!("debugLevel error");
            } else {
                cfg.debug = level;
            }
            println!("debugLevel : {}", cfg.debug);
        }

        match File::open(&cfg.paths.analysis_config) {
            Ok(file) => cfg.parse_records(BufReader::new(file)),
            Err(_) => {
                println!("{}", AnalysisError::OpenFailed(cfg.paths.analysis_config.clone()));
            }
        }
        cfg
    }

    /// Parse config records from any reader (tests feed strings).
    pub fn parse_records<R: BufRead>(&mut self, reader: R) {
        let mut next_id = 0;
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split(',');
            let tag = fields.next().unwrap_or_default();
            let value = fields.next().unwrap_or_default().to_string();
            match tag {
                "k" | "u" | "s" => {
                    let kind = match tag {
                        "k" => SymbolKind::Kernel,
                        "u" => SymbolKind::User,
                        _ => SymbolKind::Sched,
                    };
                    next_id += 1;
                    let id = FunctionId(next_id);
                    self.functions
                        .entry(value.clone())
                        .or_insert(FunctionSpec { kind, is_ret: false, id });
                    if kind != SymbolKind::Sched {
                        self.functions
                            .entry(format!("{value}__return"))
                            .or_insert(FunctionSpec { kind, is_ret: true, id });
                    }
                    self.names.entry(id).or_insert(value);
                }
                "p" => {
                    if let Ok(pid) = value.parse::<i32>() {
                        let pid = Pid(pid);
                        if !self.filter.insert(pid) {
                            println!("{}", AnalysisError::DuplicateFilter(pid));
                        }
                    }
                }
                other => {
                    println!("{}", AnalysisError::UnknownConfigTag(other.to_string()));
                }
            }
        }
    }

    #[must_use]
    pub fn lookup(&self, symbol: &str) -> Option<&FunctionSpec> {
        self.functions.get(symbol)
    }

    /// Bare symbol for a function id, or `""` for the root / unknown ids.
    #[must_use]
    pub fn function_name(&self, id: FunctionId) -> &str {
        self.names.get(&id).map_or("", String::as_str)
    }

    /// All configured ids with their bare symbol names, in id order.
    pub fn function_names(&self) -> impl Iterator<Item = (FunctionId, &str)> {
        self.names.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// Function id of the scheduling probe, when one is configured.
    #[must_use]
    pub fn sched_switch_id(&self) -> Option<FunctionId> {
        self.functions
            .get(SCHED_SWITCH_SYMBOL)
            .filter(|spec| spec.kind == SymbolKind::Sched)
            .map(|spec| spec.id)
    }

    /// Whether a pid passes the output filter (an empty filter passes all).
    #[must_use]
    pub fn pid_selected(&self, pid: Pid) -> bool {
        self.filter.is_empty() || self.filter.contains(&pid)
    }

    #[must_use]
    pub fn debug_at_least(&self, level: u8) -> bool {
        self.debug >= level
    }

    /// Dump the resolved symbol table and filter set for inspection.
    pub fn write_debug_dump(&self) {
        use std::io::Write;

        let Some(mut out) = crate::export::debug_dump::debug_writer(self, "debug_config_resolve", DEBUG_BASIC)
        else {
            return;
        };
        let mut specs: Vec<(&String, &FunctionSpec)> = self.functions.iter().collect();
        specs.sort_by_key(|(_, spec)| (spec.id, spec.is_ret));
        for (name, spec) in specs {
            let _ = writeln!(out, "{name},{:?},{},{}", spec.kind, spec.id, u8::from(spec.is_ret));
        }
        let mut pids: Vec<&Pid> = self.filter.iter().collect();
        pids.sort_unstable();
        for pid in pids {
            let _ = writeln!(out, "filter,{pid}");
        }
    }

    /// A config carrying only the given symbol records, for tests.
    #[must_use]
    pub fn from_records(records: &str, paths: Paths) -> Self {
        let mut cfg = Config {
            functions: HashMap::new(),
            names: BTreeMap::new(),
            filter: HashSet::new(),
            paths,
            read_begin: 0,
            read_len: 0,
            debug: 0,
        };
        cfg.parse_records(records.as_bytes());
        cfg
    }
}

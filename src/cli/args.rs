//! CLI argument definitions

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(
    name = "da-tool",
    about = "Reconstruct call stacks and latency statistics from an ftrace log",
    after_help = "\
EXAMPLES:
    da-tool                  Analyze the whole trace
    da-tool -b 10000 -l 500  Analyze 500 lines starting at line 10000
    da-tool -g 3             Analyze with debug dumps enabled"
)]
pub struct Args {
    /// First trace line to read (1-based; 0 reads from the top)
    #[arg(short = 'b', default_value_t = 0)]
    pub begin: u32,

    /// Number of trace lines to read (0 = all)
    #[arg(short = 'l', default_value_t = 0)]
    pub lines: u32,

    /// Debug verbosity (0-4), gates the dump files under the debug directory
    #[arg(short = 'g')]
    pub debug: Option<u8>,

    /// Extra arguments are echoed and otherwise ignored
    pub extra: Vec<String>,
}

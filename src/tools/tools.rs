mod disasm_cmd;
use disasm_cmd::disasm_snapshot;
mod thr_classify_cmd;
use thr_classify_cmd::thr_classify;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Decode AOT snapshot binaries and classify ARM64 disassembly output.
#[derive(Clone, Debug, Parser)]
struct Args {
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Decode a clustered snapshot and disassemble its code objects,
    /// writing `snapshot.json`, `functions.jsonl`, `call_edges.jsonl`,
    /// `unresolved_thr.jsonl`, and `string_refs.jsonl` into `--out`.
    Disasm(DisasmArgs),
    /// Classify unresolved thread-pointer accesses recorded in a prior
    /// `disasm` run's audit log.
    ThrClassify(ThrClassifyArgs),
}

/// Decode and disassemble a snapshot binary.
#[derive(Clone, Debug, Parser)]
pub(crate) struct DisasmArgs {
    /// path to the snapshot binary
    pub(crate) snapshot: PathBuf,
    /// directory to write output artifacts into
    #[arg(long = "out", default_value = "out")]
    pub(crate) out_dir: PathBuf,
}

/// Re-classify unresolved thread-pointer accesses from a saved audit log.
#[derive(Clone, Debug, Parser)]
pub(crate) struct ThrClassifyArgs {
    /// input audit log (`.jsonl`, one unresolved access per line)
    #[arg(long = "in")]
    pub(crate) input: PathBuf,
    /// directory to write `unresolved_thr.jsonl` into
    #[arg(long = "out", default_value = "out")]
    pub(crate) out_dir: PathBuf,
    /// maximum instruction gap to consider when re-deriving context
    #[arg(long = "max-gap", default_value_t = 2)]
    pub(crate) max_gap: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    match &args.operation {
        Operation::Disasm(disasm_args) => disasm_snapshot(disasm_args.clone()),
        Operation::ThrClassify(thr_args) => thr_classify(thr_args.clone()),
    }
}

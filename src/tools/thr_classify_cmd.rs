//! `snap-tools thr-classify`: re-run `THRClassifier` over a saved audit
//! log of unresolved thread-pointer accesses, each carrying the raw
//! opcode words surrounding the access so classification can be redone
//! with a different `--max-gap` than the original `disasm` run used.

use std::fs;
use std::io::{BufRead, BufReader};

use anyhow::{Context, Result};
use serde::Deserialize;

use aotsnap_rs::artifacts::{self, UnresolvedThrRecord};
use aotsnap_rs::disasm::decode::disassemble;
use aotsnap_rs::disasm::thr::ThrClassifier;

use super::ThrClassifyArgs;

#[derive(Debug, Deserialize)]
struct ThrAuditEntry {
    function: String,
    insn_offset: u32,
    thr_offset: i64,
    /// raw opcode words surrounding the access, centered on it; must be
    /// `2 * original_max_gap + 1` words long.
    context_words: Vec<u32>,
}

pub(crate) fn thr_classify(args: ThrClassifyArgs) -> Result<()> {
    let file = fs::File::open(&args.input).with_context(|| format!("opening {}", args.input.display()))?;
    let reader = BufReader::new(file);
    fs::create_dir_all(&args.out_dir).with_context(|| format!("creating {}", args.out_dir.display()))?;

    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: ThrAuditEntry =
            serde_json::from_str(&line).with_context(|| format!("parsing audit entry at line {}", line_no + 1))?;

        let center = entry.context_words.len() / 2;
        let window_start = center.saturating_sub(args.max_gap);
        let window_end = (center + args.max_gap + 1).min(entry.context_words.len());
        let insns: Vec<_> = entry.context_words[window_start..window_end]
            .iter()
            .enumerate()
            .map(|(i, word)| disassemble(entry.insn_offset + (i as u32) * 4, *word))
            .collect();
        let index = center - window_start;

        let (class, is_store, width) = ThrClassifier::classify(&insns, index, entry.thr_offset);
        records.push(UnresolvedThrRecord {
            function: entry.function,
            insn_offset: entry.insn_offset,
            thr_offset: entry.thr_offset,
            width,
            is_store,
            classification: <&'static str>::from(class).to_string(),
        });
    }

    artifacts::write_jsonl(&args.out_dir.join("unresolved_thr.jsonl"), records)?;
    Ok(())
}

//! Output artifact shapes and the JSON/JSONL writers that produce them
//! (spec §4.12/§6): `snapshot.json`, `functions.jsonl`, `call_edges.jsonl`,
//! `unresolved_thr.jsonl`, `string_refs.jsonl`.
//!
//! Grounded on the JSON-record shape used across `mstange-samply`'s
//! `samply-symbols`/`samply-api` crates: typed `Serialize` structs, one
//! record per line for the `.jsonl` contracts, a single pretty document
//! for `snapshot.json`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::disasm::thr::ThrClass;

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub version: String,
    pub feature_string: String,
    pub class_count: usize,
    pub function_count: usize,
    pub string_count: usize,
    pub diagnostic_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassRecord {
    pub ref_id: u64,
    pub name: Option<String>,
    pub owner_library: Option<String>,
    pub num_fields: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionRecord {
    pub ref_id: u64,
    pub name: Option<String>,
    pub owner_class: Option<String>,
    pub signature: Option<String>,
    pub code_start: Option<u32>,
    pub code_end: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallEdgeRecord {
    pub caller: String,
    pub callee: String,
    pub call_sites: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedThrRecord {
    pub function: String,
    pub insn_offset: u32,
    pub thr_offset: i64,
    /// 4 or 8.
    pub width: u8,
    pub is_store: bool,
    pub classification: String,
}

impl From<ThrClass> for &'static str {
    fn from(c: ThrClass) -> Self {
        match c {
            ThrClass::RuntimeEntrypoint => "RUNTIME_ENTRY",
            ThrClass::IsolateGroupPtr => "ISO_GROUP",
            ThrClass::ObjectStoreCache => "OBJSTORE",
            ThrClass::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StringRefRecord {
    pub ref_id: u64,
    pub value: String,
}

/// Write one pretty-printed JSON document.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).with_context(|| format!("serializing {}", path.display()))?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Write one JSON object per line, in iteration order.
pub fn write_jsonl<T: Serialize>(path: &Path, values: impl IntoIterator<Item = T>) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for value in values {
        serde_json::to_writer(&mut writer, &value)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_shim::TempPath;

    mod tempfile_shim {
        use std::path::PathBuf;

        pub struct TempPath(pub PathBuf);

        impl TempPath {
            pub fn new(name: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("aotsnap-test-{}-{}", std::process::id(), name));
                Self(path)
            }
        }

        impl Drop for TempPath {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }
    }

    #[test]
    fn writes_jsonl_one_record_per_line() {
        let path = TempPath::new("functions.jsonl");
        let records = vec![
            FunctionRecord { ref_id: 1, name: Some("main".into()), owner_class: None, signature: None, code_start: Some(0), code_end: Some(64) },
            FunctionRecord { ref_id: 2, name: Some("helper".into()), owner_class: None, signature: None, code_start: Some(64), code_end: Some(128) },
        ];
        write_jsonl(&path.0, records).unwrap();
        let contents = std::fs::read_to_string(&path.0).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().next().unwrap().contains("\"main\""));
    }

    #[test]
    fn writes_pretty_json_document() {
        let path = TempPath::new("snapshot.json");
        let summary = SnapshotSummary {
            version: "latest".into(),
            feature_string: "arm64,aot,product".into(),
            class_count: 10,
            function_count: 20,
            string_count: 30,
            diagnostic_count: 0,
        };
        write_json(&path.0, &summary).unwrap();
        let contents = std::fs::read_to_string(&path.0).unwrap();
        assert!(contents.contains("\"class_count\": 10"));
    }
}

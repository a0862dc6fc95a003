use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::item::ClassificationResult;
use crate::error::ClassifyError;

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    result: ClassificationResult,
}

/// Results keyed by item id, at most one per id.
///
/// Each upsert stamps the record with a fresh sequence number, so iteration
/// follows completion order and a replaced record moves to the end.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from results in completion order; later duplicates win.
    pub fn from_results(results: impl IntoIterator<Item = ClassificationResult>) -> Self {
        let mut set = Self::new();
        for result in results {
            set.upsert(result);
        }
        set
    }

    /// Removes any record for the result's id, then inserts the result.
    /// Returns the record it replaced.
    pub fn upsert(&mut self, result: ClassificationResult) -> Option<ClassificationResult> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let previous = self.entries.remove(&result.id);
        self.entries.insert(result.id.clone(), Entry { seq, result });
        previous.map(|e| e.result)
    }

    pub fn get(&self, id: &str) -> Option<&ClassificationResult> {
        self.entries.get(id).map(|e| &e.result)
    }

    /// True when the id has a successful record and must not be dispatched again.
    pub fn is_succeeded(&self, id: &str) -> bool {
        self.get(id).is_some_and(|r| r.success)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.entries.values().filter(|e| e.result.success).count()
    }

    pub fn error_count(&self) -> usize {
        self.len() - self.success_count()
    }

    /// Records in completion order.
    pub fn ordered(&self) -> Vec<&ClassificationResult> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| &e.result).collect()
    }

    /// Reads a newline-delimited JSON results file. Malformed lines are
    /// skipped with a warning.
    pub fn load_jsonl(path: &Path) -> Result<Self, ClassifyError> {
        let reader = BufReader::new(File::open(path)?);
        let mut set = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ClassificationResult>(&line) {
                Ok(result) => {
                    set.upsert(result);
                }
                Err(e) => warn!(line = idx + 1, path = %path.display(), "skipping malformed result: {e}"),
            }
        }
        Ok(set)
    }

    /// Writes every record, one JSON object per line, in completion order.
    ///
    /// The file is written beside `path` and renamed over it, so a crash
    /// mid-write leaves the previous contents intact.
    pub fn write_jsonl(&self, path: &Path) -> Result<(), ClassifyError> {
        let tmp = staging_path(path);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for result in self.ordered() {
                writeln!(writer, "{}", serde_json::to_string(result)?)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Append-only JSONL journal written while a run is in progress.
///
/// Every line is flushed as soon as it is appended, so results already
/// completed survive the process dying. Loading keeps the last line per id,
/// which makes the journal a valid resume file at any point.
pub struct ResultLog {
    writer: BufWriter<File>,
}

impl ResultLog {
    /// Opens `path` for a run seeded with `prior`.
    ///
    /// When `path` is the file `prior` was loaded from it is appended to as
    /// is; otherwise it is truncated and `prior` is copied in first.
    pub fn open(path: &Path, prior: &ResultSet, continues_file: bool) -> Result<Self, ClassifyError> {
        if continues_file && path.exists() {
            let file = OpenOptions::new().append(true).open(path)?;
            return Ok(Self {
                writer: BufWriter::new(file),
            });
        }

        let mut log = Self {
            writer: BufWriter::new(File::create(path)?),
        };
        for result in prior.ordered() {
            writeln!(log.writer, "{}", serde_json::to_string(result)?)?;
        }
        log.writer.flush()?;
        Ok(log)
    }

    pub fn append(&mut self, result: &ClassificationResult) -> Result<(), ClassifyError> {
        writeln!(self.writer, "{}", serde_json::to_string(result)?)?;
        self.writer.flush()?;
        Ok(())
    }
}

//! CSV loading into [`WorkItem`]s.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use tracing::{info, warn};

use crate::batch::WorkItem;
use crate::error::ClassifyError;

const ID_CANDIDATES: &[&str] = &["localId", "id"];
const TEXT_CANDIDATES: &[&str] = &["input", "text", "message"];

/// Explicit column choices; `None` means infer from the headers.
#[derive(Debug, Clone, Default)]
pub struct ColumnSelection {
    pub id: Option<String>,
    pub text: Option<String>,
}

/// Reads a CSV file and maps each non-blank row to a [`WorkItem`].
pub fn load_items(path: &Path, columns: &ColumnSelection) -> Result<Vec<WorkItem>, ClassifyError> {
    let file = std::fs::File::open(path)?;
    let items = read_items(file, columns)?;
    info!(rows = items.len(), path = %path.display(), "Loaded CSV");
    Ok(items)
}

pub fn read_items<R: Read>(reader: R, columns: &ColumnSelection) -> Result<Vec<WorkItem>, ClassifyError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(ClassifyError::Input("CSV has no header row".into()));
    }

    let id_col = pick_column(&headers, columns.id.as_deref(), ID_CANDIDATES, 0, "ID")?;
    let text_fallback = if headers.len() > 1 { 1 } else { 0 };
    let text_col = pick_column(&headers, columns.text.as_deref(), TEXT_CANDIDATES, text_fallback, "Text")?;

    let mut items = Vec::new();
    let mut seen = HashSet::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        let id = record.get(id_col).unwrap_or_default().to_string();
        let input = record.get(text_col).unwrap_or_default().to_string();
        if !seen.insert(id.clone()) {
            warn!(id = %id, "duplicate id in CSV; results for it will overwrite each other");
        }
        items.push(WorkItem::new(id, input));
    }

    if items.is_empty() {
        return Err(ClassifyError::Input("CSV appears empty or invalid".into()));
    }
    Ok(items)
}

fn pick_column(
    headers: &[String],
    explicit: Option<&str>,
    candidates: &[&str],
    fallback: usize,
    kind: &'static str,
) -> Result<usize, ClassifyError> {
    if let Some(name) = explicit {
        return headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ClassifyError::ColumnNotFound {
                kind,
                name: name.to_string(),
            });
    }

    Ok(candidates
        .iter()
        .find_map(|c| headers.iter().position(|h| h == c))
        .unwrap_or(fallback))
}

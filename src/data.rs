//! Data entries handed to the agents, and the prompt text built from them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::plan::text_field;

/// Characters of a suggested input shown in previews.
pub const PREVIEW_CHARS: usize = 420;
/// Characters of each entry included in an agent prompt.
pub const ENTRY_CHARS: usize = 600;
/// Characters of the previous agent's output included in the next prompt.
pub const CONTEXT_CHARS: usize = 800;
/// Most inputs accepted from the architect's suggestions.
pub const MAX_SUGGESTED_INPUTS: usize = 3;

const ELLIPSIS: &str = "...";
const NO_DATA: &str = "User did not attach additional datasets.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    #[default]
    Text,
    Csv,
    Json,
}

impl DataKind {
    /// Map a declared type onto a known kind; unknown values become `Text`.
    pub fn sanitize(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => DataKind::Csv,
            "json" => DataKind::Json,
            _ => DataKind::Text,
        }
    }

    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".csv") {
            DataKind::Csv
        } else if lower.ends_with(".json") {
            DataKind::Json
        } else {
            DataKind::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Text => "text",
            DataKind::Csv => "csv",
            DataKind::Json => "json",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DataKind::sanitize(&raw))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Suggested,
    Uploaded,
    Notes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEntry {
    #[serde(default = "input_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: DataKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: DataSource,
}

impl DataEntry {
    pub fn suggested(title: impl Into<String>, kind: DataKind, content: impl Into<String>) -> Self {
        Self {
            id: input_id(),
            title: title.into(),
            kind,
            content: content.into(),
            source: DataSource::Suggested,
        }
    }

    /// An uploaded file, typed by its extension.
    pub fn upload(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        let title = file_name.into();
        Self {
            id: new_id("upload"),
            kind: DataKind::from_file_name(&title),
            title,
            content: content.into(),
            source: DataSource::Uploaded,
        }
    }

    pub fn notes(text: impl Into<String>) -> Self {
        Self {
            id: new_id("note"),
            title: "User Notes".into(),
            kind: DataKind::Text,
            content: text.into(),
            source: DataSource::Notes,
        }
    }
}

pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

fn input_id() -> String {
    new_id("input")
}

/// Everything the user can feed the agents: the architect's suggestions
/// (each selectable), uploaded files, and free-form notes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataInputs {
    pub suggested: Vec<DataEntry>,
    pub selected: BTreeSet<String>,
    pub uploads: Vec<DataEntry>,
    pub notes: String,
}

impl DataInputs {
    /// Start from `entries` with every one of them selected.
    pub fn suggest(entries: Vec<DataEntry>) -> Self {
        let selected = entries.iter().map(|e| e.id.clone()).collect();
        Self {
            suggested: entries,
            selected,
            ..Self::default()
        }
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    /// Flip the selection of a suggested input. Returns the new state, or
    /// `None` when no suggestion has that id.
    pub fn toggle(&mut self, id: &str) -> Option<bool> {
        if !self.suggested.iter().any(|e| e.id == id) {
            return None;
        }
        if self.selected.remove(id) {
            Some(false)
        } else {
            self.selected.insert(id.to_string());
            Some(true)
        }
    }

    pub fn deselect_all(&mut self) {
        self.selected.clear();
    }

    pub fn add_upload(&mut self, entry: DataEntry) {
        self.uploads.push(entry);
    }

    pub fn remove_upload(&mut self, id: &str) -> Option<DataEntry> {
        let index = self.uploads.iter().position(|e| e.id == id)?;
        Some(self.uploads.remove(index))
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
    }

    /// Selected suggestions in suggestion order, then uploads, then the
    /// notes when they are not blank.
    pub fn collect(&self) -> Vec<DataEntry> {
        let mut entries: Vec<DataEntry> = self
            .suggested
            .iter()
            .filter(|e| self.is_selected(&e.id))
            .chain(&self.uploads)
            .cloned()
            .collect();

        let notes = self.notes.trim();
        if !notes.is_empty() {
            entries.push(DataEntry::notes(notes));
        }
        entries
    }
}

/// Bound the architect's suggested inputs.
///
/// A non-list or empty list falls back to `fallback`. Otherwise up to
/// [`MAX_SUGGESTED_INPUTS`] objects are kept, each with a title, a known
/// kind, and content from `sample`, `content` or `example`, or else the
/// problem statement.
pub fn normalize_inputs(raw: &Value, fallback: &[DataEntry], problem: &str) -> Vec<DataEntry> {
    let items = match raw.as_array() {
        Some(items) if !items.is_empty() => items,
        _ => return fallback.to_vec(),
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .take(MAX_SUGGESTED_INPUTS)
        .enumerate()
        .map(|(index, item)| {
            let title = text_field(item, "title").unwrap_or_else(|| format!("Input {}", index + 1));
            let kind = item
                .get("type")
                .and_then(Value::as_str)
                .map(DataKind::sanitize)
                .unwrap_or_default();
            let content = ["sample", "content", "example"]
                .iter()
                .find_map(|key| text_field(item, key))
                .unwrap_or_else(|| problem.trim().to_string());
            DataEntry::suggested(title, kind, content)
        })
        .collect()
}

/// Numbered prompt section listing every entry, each cut to
/// [`ENTRY_CHARS`].
pub fn format_data_entries(entries: &[DataEntry]) -> String {
    if entries.is_empty() {
        return NO_DATA.to_string();
    }
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            format!(
                "{}. {} [{}]\n{}",
                index + 1,
                entry.title,
                entry.kind,
                truncate(&entry.content, ENTRY_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `text` unchanged when it has at most `max` characters, else its first
/// `max - 3` characters followed by `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(ELLIPSIS.len())).collect();
    out.push_str(ELLIPSIS);
    out
}

use serde::{Deserialize, Serialize};

/// Placeholder that spreadsheet authors type into cells that have no value.
pub const PLACEHOLDER: &str = "-";

/// One row of performer metadata.
///
/// Optional columns are normalized on load, so downstream code only ever sees
/// `Some(text)` with real content or `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformerRecord {
    pub name: String,
    pub location: String,
    pub video_file_name: Option<String>,
    pub composition: Option<String>,
    pub raag: Option<String>,
    pub taal: Option<String>,
    pub description: Option<String>,
}

impl PerformerRecord {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            location: location.into().trim().to_string(),
            video_file_name: None,
            composition: None,
            raag: None,
            taal: None,
            description: None,
        }
    }

    pub fn with_video_file_name(mut self, value: &str) -> Self {
        self.video_file_name = optional_text(value);
        self
    }

    pub fn with_composition(mut self, value: &str) -> Self {
        self.composition = optional_text(value);
        self
    }

    pub fn with_raag(mut self, value: &str) -> Self {
        self.raag = optional_text(value);
        self
    }

    pub fn with_taal(mut self, value: &str) -> Self {
        self.taal = optional_text(value);
        self
    }

    pub fn with_description(mut self, value: &str) -> Self {
        self.description = optional_text(value);
        self
    }

    /// Short label for progress lines.
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.location)
    }
}

/// Present-or-absent normalization for optional cells: empty, whitespace-only
/// and the `-` placeholder all mean "no content".
pub fn optional_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == PLACEHOLDER {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Capitalizes the first letter of every word and lowercases the rest.
/// A word starts after any non-alphabetic character, so `o'neil` becomes
/// `O'Neil`.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

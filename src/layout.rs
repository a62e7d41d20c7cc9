use crate::record::PerformerRecord;

use std::path::{Path, PathBuf};

pub const TITLE_CARDS_DIR: &str = "title_cards";
pub const CONVERTED_DIR: &str = "converted_videos";
pub const MANIFEST_FILE: &str = "all_videos.txt";
pub const DEFAULT_OUTPUT_NAME: &str = "FINAL_VIDEO.mp4";
pub const DEFAULT_METADATA_NAME: &str = "Performer Data.xlsx";

const DEFAULT_EXT: &str = "mp4";
const TITLE_CARD_SUFFIX: &str = "_titlecard";
const CONVERTED_SUFFIX: &str = "_converted";

/// Which of the four per-performer artifacts to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipKind {
    pub title_card: bool,
    pub converted: bool,
}

impl ClipKind {
    pub const SOURCE: ClipKind = ClipKind { title_card: false, converted: false };
    pub const TITLE_CARD: ClipKind = ClipKind { title_card: true, converted: false };
    pub const CONVERTED_SOURCE: ClipKind = ClipKind { title_card: false, converted: true };
    pub const CONVERTED_TITLE_CARD: ClipKind = ClipKind { title_card: true, converted: true };
}

/// Where every artifact of a run lives, relative to one working root.
///
/// Raw source videos keep the case written in the metadata. Every generated
/// path (title cards, converted clips) is lowercased below the root so a
/// re-run finds the same files whatever capitalization the spreadsheet uses.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    output_name: String,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, output_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            output_name: output_name.into(),
        }
    }

    pub fn title_cards_dir(&self) -> PathBuf {
        self.root.join(TITLE_CARDS_DIR)
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.root.join(CONVERTED_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn output_path(&self) -> PathBuf {
        self.root.join(&self.output_name)
    }

    /// `<Name>_<Location>.mp4`, or the explicit file name (with `.mp4` added
    /// when it has no extension).
    pub fn base_file_name(record: &PerformerRecord) -> String {
        match &record.video_file_name {
            Some(explicit) => {
                if Path::new(explicit).extension().is_some() {
                    explicit.clone()
                } else {
                    format!("{}.{}", explicit, DEFAULT_EXT)
                }
            }
            None => format!("{}_{}.{}", record.name, record.location, DEFAULT_EXT),
        }
    }

    pub fn resolve(&self, record: &PerformerRecord, kind: ClipKind) -> PathBuf {
        let base = Self::base_file_name(record);
        if kind == ClipKind::SOURCE {
            return self.root.join(base);
        }

        let (stem, ext) = split_file_name(&base);
        match (kind.title_card, kind.converted) {
            (true, false) => self
                .title_cards_dir()
                .join(format!("{stem}{TITLE_CARD_SUFFIX}.{ext}").to_lowercase()),
            (true, true) => self.converted_dir().join(
                format!("{stem}{TITLE_CARD_SUFFIX}{CONVERTED_SUFFIX}.{DEFAULT_EXT}").to_lowercase(),
            ),
            _ => self
                .converted_dir()
                .join(format!("{stem}{CONVERTED_SUFFIX}.{DEFAULT_EXT}").to_lowercase()),
        }
    }

    /// Converted location for any media file, title card or source video.
    pub fn converted_path_for(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.converted_dir()
            .join(format!("{stem}{CONVERTED_SUFFIX}.{DEFAULT_EXT}").to_lowercase())
    }

    pub fn source_videos(&self, records: &[PerformerRecord]) -> Vec<PathBuf> {
        records
            .iter()
            .map(|r| self.resolve(r, ClipKind::SOURCE))
            .collect()
    }

    pub fn title_cards(&self, records: &[PerformerRecord]) -> Vec<PathBuf> {
        records
            .iter()
            .map(|r| self.resolve(r, ClipKind::TITLE_CARD))
            .collect()
    }

    /// Playback order: title card then performance for each performer, in
    /// metadata order.
    pub fn ordered_clips(&self, records: &[PerformerRecord], converted: bool) -> Vec<PathBuf> {
        let (card, video) = if converted {
            (ClipKind::CONVERTED_TITLE_CARD, ClipKind::CONVERTED_SOURCE)
        } else {
            (ClipKind::TITLE_CARD, ClipKind::SOURCE)
        };
        records
            .iter()
            .flat_map(|r| [self.resolve(r, card), self.resolve(r, video)])
            .collect()
    }

    /// Path as seen from the root directory, which is where the manifest lives.
    pub fn relative_to_root<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

fn split_file_name(file_name: &str) -> (String, String) {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_EXT.to_string());
    (stem, ext)
}

use std::path::PathBuf;

pub const DEFAULT_FONT: &str = "Helvetica-Bold";

/// Font used for title-card text: a fontconfig family name or a font file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontChoice {
    Family(String),
    File(PathBuf),
}

impl Default for FontChoice {
    fn default() -> Self {
        FontChoice::Family(DEFAULT_FONT.to_string())
    }
}

/// Everything a build needs beyond the layout and the performer list.
#[derive(Debug, Clone)]
pub struct Settings {
    pub workers: usize,
    pub ffmpeg_threads: usize,
    pub font: FontChoice,
    pub keep_intermediates: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 1,
            ffmpeg_threads: 1,
            font: FontChoice::default(),
            keep_intermediates: false,
        }
    }
}

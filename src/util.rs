use anyhow::{bail, Context, Result};
use std::process::Command;

pub fn ensure_ffmpeg_available() -> Result<()> {
    let out = Command::new("ffmpeg")
        .arg("-version")
        .output()
        .context("failed to run ffmpeg -version")?;
    if !out.status.success() {
        bail!("ffmpeg exists but returned non-zero on -version");
    }
    Ok(())
}

/// Title cards are drawn with `drawtext`, which needs an ffmpeg built with
/// libfreetype.
pub fn ensure_drawtext_available() -> Result<()> {
    let out = Command::new("ffmpeg")
        .arg("-hide_banner")
        .arg("-filters")
        .output()
        .context("failed to run ffmpeg -filters")?;
    let listing = String::from_utf8_lossy(&out.stdout);
    if !has_filter(&listing, "drawtext") {
        bail!("this ffmpeg build has no drawtext filter (rebuild with --enable-libfreetype)");
    }
    Ok(())
}

fn has_filter(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

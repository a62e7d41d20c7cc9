use crate::layout::Layout;
use crate::pipeline::RunContext;
use crate::tool::ToolCommand;

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// One concat-demuxer directive. Single quotes inside the path are closed,
/// escaped and reopened.
pub fn manifest_line(path: &Path) -> String {
    format!("file '{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

/// Manifest text for `clips`, in the given order. Paths are written relative
/// to the layout root because the demuxer resolves them against the
/// manifest's own directory.
pub fn manifest_contents(layout: &Layout, clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|clip| manifest_line(layout.relative_to_root(clip)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn write_manifest(layout: &Layout, clips: &[PathBuf]) -> Result<PathBuf> {
    let path = layout.manifest_path();
    let mut contents = manifest_contents(layout, clips);
    contents.push('\n');
    std::fs::write(&path, contents)
        .with_context(|| format!("failed to write manifest {}", path.display()))?;
    Ok(path)
}

pub fn concat_command(manifest: &Path, output: &Path) -> ToolCommand {
    ToolCommand::ffmpeg(output)
        .opt("-f", "concat")
        .opt("-safe", "0")
        .opt("-i", manifest)
        .opt("-c", "copy")
}

/// Joins `ordered_clips` without re-encoding into the layout's output file,
/// replacing any previous output.
pub fn concatenate(ctx: &RunContext<'_>, ordered_clips: &[PathBuf]) -> Result<PathBuf> {
    if ordered_clips.is_empty() {
        bail!("nothing to concatenate");
    }
    let missing = ordered_clips
        .iter()
        .filter(|clip| !clip.exists())
        .map(|clip| clip.display().to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        bail!(
            "{} converted clip(s) are missing, refusing to concatenate:\n{}",
            missing.len(),
            missing.join("\n")
        );
    }

    let manifest = write_manifest(ctx.layout, ordered_clips)?;
    let output = ctx.layout.output_path();
    ctx.progress.log(format!(
        "stitching {} clips into {}",
        ordered_clips.len(),
        output.display()
    ));

    ctx.runner
        .run(&concat_command(&manifest, &output))
        .with_context(|| format!("concatenating clips into {}", output.display()))?;
    Ok(output)
}

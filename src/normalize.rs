use crate::pipeline::{self, RunContext};
use crate::pool::ItemOutcome;
use crate::tool::ToolCommand;

use anyhow::{Context, Result};
use std::path::Path;

/// Concatenation uses stream copy, so every clip must share these.
pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_CHANNELS: u32 = 6;
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const VIDEO_TIMESCALE: &str = "30k";

/// Silent source used when the clip has no usable audio of its own. The
/// shorter of the copied video and this endless silence bounds the output.
const SILENT_AUDIO: &str = "anullsrc=channel_layout=stereo:sample_rate=48000";

pub fn normalize_command(source: &Path, output: &Path, ffmpeg_threads: usize) -> ToolCommand {
    ToolCommand::ffmpeg(output)
        .opt("-i", source)
        .opt("-f", "lavfi")
        .opt("-i", SILENT_AUDIO)
        .opt("-c:v", "copy")
        .opt("-video_track_timescale", VIDEO_TIMESCALE)
        .opt("-c:a", AUDIO_CODEC)
        .opt("-ac", AUDIO_CHANNELS.to_string())
        .opt("-ar", AUDIO_SAMPLE_RATE.to_string())
        .arg("-shortest")
        .opt("-threads", ffmpeg_threads.to_string())
}

/// Re-encodes `source` into the converted-media directory unless the
/// converted file already exists.
pub fn normalize(ctx: &RunContext<'_>, source: &Path) -> Result<ItemOutcome> {
    let output = ctx.layout.converted_path_for(source);
    if pipeline::reusable_output(ctx, &output, "converted clip")? {
        return Ok(ItemOutcome::Skipped);
    }

    let cmd = normalize_command(source, &output, ctx.settings.ffmpeg_threads);
    ctx.runner
        .run(&cmd)
        .with_context(|| format!("converting {}", source.display()))?;
    Ok(ItemOutcome::Created)
}

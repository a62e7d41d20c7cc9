use crate::layout::ClipKind;
use crate::pipeline::{self, RunContext};
use crate::pool::ItemOutcome;
use crate::record::{title_case, PerformerRecord};
use crate::settings::{FontChoice, Settings};
use crate::tool::ToolCommand;

use anyhow::{Context, Result};
use std::path::Path;

pub const WIDTH: u32 = 1920;
pub const HEIGHT: u32 = 1080;
pub const FPS: u32 = 30;
pub const DURATION_SECS: u32 = 5;
pub const WORDS_PER_LINE: usize = 9;

const TEXT_COLOR: &str = "white";
const BACKGROUND_COLOR: &str = "black";
const DESCRIPTION_LINE_SPACING: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Name,
    Location,
    Description,
    Composition,
    Raag,
    Taal,
}

/// One line of text on the card, horizontally centered at row `y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub kind: BlockKind,
    pub text: String,
    pub font_size: u32,
    pub y: u32,
}

impl TextBlock {
    fn new(kind: BlockKind, text: String, font_size: u32, y: u32) -> Self {
        Self {
            kind,
            text,
            font_size,
            y,
        }
    }
}

/// Text blocks for a performer's card, top to bottom.
///
/// Absent optional fields contribute no block at all.
pub fn layout_blocks(record: &PerformerRecord) -> Vec<TextBlock> {
    let sixth = HEIGHT / 6;
    let third = HEIGHT / 3;
    let half = HEIGHT / 2;

    let mut blocks = vec![
        TextBlock::new(BlockKind::Name, title_case(&record.name), 85, sixth),
        TextBlock::new(
            BlockKind::Location,
            format!("({})", title_case(&record.location)),
            60,
            sixth + 90,
        ),
    ];

    if let Some(description) = &record.description {
        let words = description.split_whitespace().collect::<Vec<_>>();
        for (line_idx, line) in words.chunks(WORDS_PER_LINE).enumerate() {
            blocks.push(TextBlock::new(
                BlockKind::Description,
                line.join(" "),
                45,
                third + 40 + DESCRIPTION_LINE_SPACING * line_idx as u32,
            ));
        }
    }

    if let Some(composition) = &record.composition {
        blocks.push(TextBlock::new(
            BlockKind::Composition,
            title_case(composition),
            80,
            half + 80,
        ));
    }
    if let Some(raag) = &record.raag {
        blocks.push(TextBlock::new(
            BlockKind::Raag,
            format!("Raag {}", title_case(raag)),
            70,
            half + 190,
        ));
    }
    if let Some(taal) = &record.taal {
        blocks.push(TextBlock::new(
            BlockKind::Taal,
            format!("({})", title_case(taal)),
            60,
            half + 280,
        ));
    }

    blocks
}

/// Escapes a value for a filter option inside an ffmpeg filtergraph.
///
/// Two parsers see the string: the filter's own `key=value:key=value` option
/// parser, then the filtergraph parser. Each strips one level of backslashes.
pub fn escape_filter_value(value: &str) -> String {
    let option_level = backslash_escape(value, &['\\', '\'', ':']);
    backslash_escape(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

fn backslash_escape(value: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if specials.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn drawtext(block: &TextBlock, font: &FontChoice) -> String {
    let font_opt = match font {
        FontChoice::Family(family) => format!("font={}", escape_filter_value(family)),
        FontChoice::File(path) => {
            format!("fontfile={}", escape_filter_value(&path.to_string_lossy()))
        }
    };
    format!(
        "drawtext={}:expansion=none:text={}:fontsize={}:fontcolor={}:x=(w-text_w)/2:y={}",
        font_opt,
        escape_filter_value(&block.text),
        block.font_size,
        TEXT_COLOR,
        block.y
    )
}

/// Comma-joined drawtext chain overlaying every block.
pub fn filter_chain(blocks: &[TextBlock], font: &FontChoice) -> String {
    blocks
        .iter()
        .map(|b| drawtext(b, font))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn title_card_command(record: &PerformerRecord, output: &Path, settings: &Settings) -> ToolCommand {
    let background = format!(
        "color=c={}:s={}x{}:r={}:d={}",
        BACKGROUND_COLOR, WIDTH, HEIGHT, FPS, DURATION_SECS
    );
    ToolCommand::ffmpeg(output)
        .opt("-f", "lavfi")
        .opt("-i", background)
        .opt("-vf", filter_chain(&layout_blocks(record), &settings.font))
        .opt("-c:v", "libx264")
        .opt("-pix_fmt", "yuv420p")
        .opt("-r", FPS.to_string())
        .opt("-t", DURATION_SECS.to_string())
        .opt("-threads", settings.ffmpeg_threads.to_string())
}

/// Renders the performer's title card unless it already exists on disk.
pub fn render(ctx: &RunContext<'_>, record: &PerformerRecord) -> Result<ItemOutcome> {
    let output = ctx.layout.resolve(record, ClipKind::TITLE_CARD);
    if pipeline::reusable_output(ctx, &output, "title card")? {
        return Ok(ItemOutcome::Skipped);
    }

    let cmd = title_card_command(record, &output, ctx.settings);
    ctx.runner
        .run(&cmd)
        .with_context(|| format!("rendering title card for {}", record.display_name()))?;
    Ok(ItemOutcome::Created)
}

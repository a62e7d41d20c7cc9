mod autotune;
mod layout;
mod manifest;
mod metadata;
mod normalize;
mod pipeline;
mod pool;
mod progress;
mod record;
mod settings;
mod titlecard;
mod tool;
mod util;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use layout::{Layout, DEFAULT_METADATA_NAME, DEFAULT_OUTPUT_NAME};
use pipeline::RunContext;
use progress::{format_duration, BuildSummary, ProgressConfig, ProgressMode, ProgressReporter};
use record::PerformerRecord;
use settings::{FontChoice, Settings, DEFAULT_FONT};
use std::path::{Path, PathBuf};
use tool::FfmpegRunner;

#[derive(Parser)]
#[command(
    name = "recital-reel",
    version,
    about = "Stitch a recital video: a title card before each performer's clip, joined into one file"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Args, Clone)]
struct Source {
    /// Directory holding the source videos; all outputs are written here.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Performer metadata (xlsx, xls, ods or json). Default: "Performer Data.xlsx" under --root.
    #[arg(long)]
    metadata: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render title cards, normalize every clip and concatenate them in metadata order
    Build {
        #[command(flatten)]
        source: Source,

        /// Optional override workers (ffmpeg processes run concurrently). Default: auto.
        #[arg(long)]
        workers: Option<usize>,

        /// Name of the final video inside --root.
        #[arg(long, default_value = DEFAULT_OUTPUT_NAME)]
        output: String,

        /// Font family used on title cards (resolved by fontconfig).
        #[arg(long, default_value = DEFAULT_FONT)]
        font: String,

        /// Font file used on title cards; takes precedence over --font.
        #[arg(long)]
        fontfile: Option<PathBuf>,

        /// Leave converted clips and the concat manifest on disk.
        #[arg(long, default_value_t = false)]
        keep_intermediates: bool,

        /// Progress display mode: auto (TTY-aware), rich, plain, quiet.
        #[arg(long, value_enum, default_value_t = ProgressMode::Auto)]
        progress: ProgressMode,
    },

    /// Check that every performer's source video exists
    Check {
        #[command(flatten)]
        source: Source,
    },

    /// Print the resolved file names and clip order without running ffmpeg
    Plan {
        #[command(flatten)]
        source: Source,

        /// Emit JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Build {
            source,
            workers,
            output,
            font,
            fontfile,
            keep_intermediates,
            progress,
        } => {
            let layout = Layout::new(&source.root, output);
            let records = load_records(&source)?;
            pipeline::ensure_videos_exist(&layout, &records)?;

            util::ensure_ffmpeg_available().context("ffmpeg not found in PATH")?;
            util::ensure_drawtext_available()?;

            let tune = autotune::auto_tune_for_build(workers);
            let settings = Settings {
                workers: tune.workers,
                ffmpeg_threads: tune.ffmpeg_threads,
                font: match fontfile {
                    Some(path) => FontChoice::File(path),
                    None => FontChoice::Family(font),
                },
                keep_intermediates,
            };

            let reporter = ProgressReporter::new(
                "build",
                pipeline::total_work_items(records.len()),
                ProgressConfig::new(progress),
            );
            reporter.handle().log(format!(
                "auto-tune: cores={} workers={} ffmpeg_threads={}",
                tune.cores, tune.workers, tune.ffmpeg_threads
            ));

            let runner = FfmpegRunner;
            let ctx = RunContext {
                layout: &layout,
                settings: &settings,
                runner: &runner,
                progress: reporter.handle(),
            };
            let outcome = pipeline::run_build(&ctx, &records)?;
            let finished = reporter.finish("build complete");

            print_build_summary(&BuildSummary {
                performers: records.len(),
                title_cards_rendered: outcome.title_cards.created,
                title_cards_skipped: outcome.title_cards.skipped,
                clips_converted: outcome.conversions.created,
                clips_skipped: outcome.conversions.skipped,
                title_card_time: outcome.title_cards.elapsed,
                conversion_time: outcome.conversions.elapsed,
                clip_count: outcome.clip_count,
                workers: settings.workers,
                output: outcome.output,
                cleaned: outcome.cleanup.is_some(),
                removed_files: outcome.cleanup.map(|c| c.removed_files).unwrap_or(0),
                elapsed: finished.elapsed,
                warning_count: finished.warning_count,
                warnings: finished.warnings,
            });
        }

        Commands::Check { source } => {
            let layout = Layout::new(&source.root, DEFAULT_OUTPUT_NAME);
            let records = load_records(&source)?;
            pipeline::ensure_videos_exist(&layout, &records)?;
            println!("All {} videos exist on disk", records.len());
        }

        Commands::Plan { source, json } => {
            let layout = Layout::new(&source.root, DEFAULT_OUTPUT_NAME);
            let records = load_records(&source)?;
            let entries = pipeline::plan(&layout, &records);
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!(
                        "{:>3}  {} ({})  source={}{}  card={}",
                        entry.position,
                        entry.name,
                        entry.location,
                        layout.relative_to_root(&entry.source).display(),
                        if entry.source_exists { "" } else { " [missing]" },
                        layout.relative_to_root(&entry.title_card).display(),
                    );
                }
                println!(
                    "{} performers, {} clips -> {}",
                    entries.len(),
                    entries.len() * 2,
                    layout.output_path().display()
                );
            }
        }
    }

    Ok(())
}

fn load_records(source: &Source) -> Result<Vec<PerformerRecord>> {
    let path = metadata_path(&source.root, source.metadata.as_deref());
    metadata::load_performers(&path)
}

/// A relative `--metadata` is taken as given; only the default lives under
/// the root.
fn metadata_path(root: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => root.join(DEFAULT_METADATA_NAME),
    }
}

fn print_build_summary(summary: &BuildSummary) {
    println!(
        "Build summary: performers={} title_cards={} (skipped {}) converted={} (skipped {}) clips={} workers={} output={} cleaned={} removed_files={} card_time={} convert_time={} duration={} warnings={}",
        summary.performers,
        summary.title_cards_rendered,
        summary.title_cards_skipped,
        summary.clips_converted,
        summary.clips_skipped,
        summary.clip_count,
        summary.workers,
        summary.output.display(),
        summary.cleaned,
        summary.removed_files,
        format_duration(summary.title_card_time),
        format_duration(summary.conversion_time),
        format_duration(summary.elapsed),
        summary.warning_count,
    );
    for warning in &summary.warnings {
        println!("  warning: {}", warning);
    }
}

use crate::layout::{ClipKind, Layout};
use crate::manifest;
use crate::normalize;
use crate::pool::{self, PhaseReport};
use crate::progress::ProgressHandle;
use crate::record::PerformerRecord;
use crate::settings::Settings;
use crate::titlecard;
use crate::tool::ToolRunner;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Everything a stage needs, passed explicitly to every entry point.
pub struct RunContext<'a> {
    pub layout: &'a Layout,
    pub settings: &'a Settings,
    pub runner: &'a dyn ToolRunner,
    pub progress: ProgressHandle,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub removed_files: usize,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub title_cards: PhaseReport,
    pub conversions: PhaseReport,
    pub clip_count: usize,
    pub output: PathBuf,
    pub cleanup: Option<CleanupReport>,
}

/// Resolved paths for one performer, as shown by `plan`.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEntry {
    pub position: usize,
    pub name: String,
    pub location: String,
    pub source: PathBuf,
    pub source_exists: bool,
    pub title_card: PathBuf,
    pub converted_title_card: PathBuf,
    pub converted_source: PathBuf,
}

/// Work items per build: one title card and two conversions per performer,
/// plus the final concatenation.
pub fn total_work_items(performers: usize) -> u64 {
    (performers as u64) * 3 + 1
}

pub fn plan(layout: &Layout, records: &[PerformerRecord]) -> Vec<PlanEntry> {
    records
        .iter()
        .enumerate()
        .map(|(idx, r)| {
            let source = layout.resolve(r, ClipKind::SOURCE);
            PlanEntry {
                position: idx + 1,
                name: r.name.clone(),
                location: r.location.clone(),
                source_exists: source.is_file(),
                source,
                title_card: layout.resolve(r, ClipKind::TITLE_CARD),
                converted_title_card: layout.resolve(r, ClipKind::CONVERTED_TITLE_CARD),
                converted_source: layout.resolve(r, ClipKind::CONVERTED_SOURCE),
            }
        })
        .collect()
}

/// Every resolved source video that is not on disk, in metadata order.
pub fn find_missing_videos(layout: &Layout, records: &[PerformerRecord]) -> Vec<PathBuf> {
    layout
        .source_videos(records)
        .into_iter()
        .filter(|p| !p.is_file())
        .collect()
}

/// Fails with the complete list of missing source videos.
pub fn ensure_videos_exist(layout: &Layout, records: &[PerformerRecord]) -> Result<()> {
    let missing = find_missing_videos(layout, records);
    if !missing.is_empty() {
        let listing = missing
            .iter()
            .map(|p| format!("  {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n");
        bail!(
            "The following {} video(s) were not found. Please make sure they are named correctly:\n{}",
            missing.len(),
            listing
        );
    }
    Ok(())
}

pub fn render_title_cards(ctx: &RunContext<'_>, records: &[PerformerRecord]) -> Result<PhaseReport> {
    let dir = ctx.layout.title_cards_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let cards = unique_by_output(records.iter(), |r| {
        ctx.layout.resolve(r, ClipKind::TITLE_CARD)
    });
    ctx.progress.begin_stage("title cards", cards.len() as u64);
    pool::run_parallel(
        &cards,
        ctx.settings.workers,
        &ctx.progress,
        "card",
        |r| r.display_name(),
        |r| titlecard::render(ctx, r),
    )
}

/// Normalizes all title cards, then all source videos.
pub fn convert_videos(ctx: &RunContext<'_>, records: &[PerformerRecord]) -> Result<PhaseReport> {
    let dir = ctx.layout.converted_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let all_inputs = ctx
        .layout
        .title_cards(records)
        .into_iter()
        .chain(ctx.layout.source_videos(records));
    let inputs = unique_by_output(all_inputs, |p| ctx.layout.converted_path_for(p));

    ctx.progress.begin_stage("converting", inputs.len() as u64);
    pool::run_parallel(
        &inputs,
        ctx.settings.workers,
        &ctx.progress,
        "conv",
        |p| file_label(p),
        |p| normalize::normalize(ctx, p),
    )
}

pub fn stitch_videos(ctx: &RunContext<'_>, records: &[PerformerRecord]) -> Result<PathBuf> {
    ctx.progress.begin_stage("stitching", 1);
    let clips = ctx.layout.ordered_clips(records, true);
    let output = manifest::concatenate(ctx, &clips)?;
    ctx.progress.inc_items(1);
    Ok(output)
}

/// Removes the converted-media directory and the manifest. Either may already
/// be gone after an earlier cleanup.
pub fn cleanup(layout: &Layout) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();

    let converted = layout.converted_dir();
    if converted.exists() {
        report.removed_files = WalkDir::new(&converted)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        std::fs::remove_dir_all(&converted)
            .with_context(|| format!("failed to remove {}", converted.display()))?;
    }

    let manifest = layout.manifest_path();
    if manifest.exists() {
        std::fs::remove_file(&manifest)
            .with_context(|| format!("failed to remove {}", manifest.display()))?;
        report.removed_files += 1;
    }
    Ok(report)
}

/// Preflight, title cards, conversion, concatenation, cleanup. Any failure
/// returns before cleanup so intermediates stay on disk for a re-run.
pub fn run_build(ctx: &RunContext<'_>, records: &[PerformerRecord]) -> Result<BuildOutcome> {
    if records.is_empty() {
        bail!("metadata lists no performers");
    }
    ensure_videos_exist(ctx.layout, records)?;
    ctx.progress.log(format!("all {} videos exist on disk", records.len()));

    let title_cards = render_title_cards(ctx, records).context("title card phase failed")?;
    ctx.progress.log(format!(
        "title cards ready: rendered={} skipped={}",
        title_cards.created, title_cards.skipped
    ));

    let conversions = convert_videos(ctx, records).context("conversion phase failed")?;
    ctx.progress.log(format!(
        "clips converted: converted={} skipped={}",
        conversions.created, conversions.skipped
    ));

    let output = stitch_videos(ctx, records).context("concatenation failed")?;

    let cleanup = if ctx.settings.keep_intermediates {
        ctx.progress.log("keeping intermediate files");
        None
    } else {
        ctx.progress.begin_stage("cleanup", 0);
        Some(cleanup(ctx.layout)?)
    };

    Ok(BuildOutcome {
        title_cards,
        conversions,
        clip_count: records.len() * 2,
        output,
        cleanup,
    })
}

/// Whether a stage can reuse `output` from an earlier run. Empty files are
/// left behind by interrupted runs; they are removed and reported instead.
pub(crate) fn reusable_output(ctx: &RunContext<'_>, output: &Path, what: &str) -> Result<bool> {
    let Ok(meta) = std::fs::metadata(output) else {
        return Ok(false);
    };
    if meta.len() == 0 {
        ctx.progress
            .warning(format!("discarding empty {} {}", what, output.display()));
        std::fs::remove_file(output)
            .with_context(|| format!("failed to remove {}", output.display()))?;
        return Ok(false);
    }
    ctx.progress
        .log(format!("{} {} already exists, skipping", what, output.display()));
    Ok(true)
}

/// First item for each distinct output path, in input order. Rows that repeat
/// a performer, or differ only in case, share their intermediates and must
/// not run the tool twice against one file.
fn unique_by_output<T>(items: impl IntoIterator<Item = T>, output: impl Fn(&T) -> PathBuf) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(output(item)))
        .collect()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::layout::DEFAULT_OUTPUT_NAME;
    use crate::progress::{ProgressConfig, ProgressMode, ProgressReporter};
    use crate::tool::testing::RecordingRunner;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) struct Fixture {
        pub dir: TempDir,
        pub layout: Layout,
        pub records: Vec<PerformerRecord>,
        pub settings: Settings,
        pub reporter: ProgressReporter,
    }

    impl Fixture {
        pub fn context<'a>(&'a self, runner: &'a dyn ToolRunner) -> RunContext<'a> {
            RunContext {
                layout: &self.layout,
                settings: &self.settings,
                runner,
                progress: self.reporter.handle(),
            }
        }
    }

    /// Temp root with one `<stem>.mp4` source per entry; stems are
    /// `<Name>_<Location>`.
    pub(crate) fn fixture(stems: &[&str]) -> Fixture {
        let dir = TempDir::new().expect("tempdir");
        let layout = Layout::new(dir.path(), DEFAULT_OUTPUT_NAME);
        let records = stems
            .iter()
            .map(|stem| {
                let (name, location) = stem.split_once('_').expect("stem has name_location");
                fs::write(dir.path().join(format!("{stem}.mp4")), b"video").expect("write source");
                PerformerRecord::new(name, location)
            })
            .collect::<Vec<_>>();
        let settings = Settings {
            workers: 3,
            ..Settings::default()
        };
        let reporter = ProgressReporter::new("test", 0, ProgressConfig::new(ProgressMode::Quiet));
        Fixture {
            dir,
            layout,
            records,
            settings,
            reporter,
        }
    }

    #[test]
    fn preflight_reports_exactly_the_missing_video_and_runs_nothing() {
        let fx = fixture(&["Asha_Leeds", "Ravi_Pune", "Meera_Chennai"]);
        let missing = fx.dir.path().join("Ravi_Pune.mp4");
        fs::remove_file(&missing).expect("remove source");

        assert_eq!(find_missing_videos(&fx.layout, &fx.records), vec![missing.clone()]);

        let runner = RecordingRunner::default();
        let err = run_build(&fx.context(&runner), &fx.records).expect_err("preflight must fail");
        let text = err.to_string();
        assert!(text.contains("Ravi_Pune.mp4"), "{text}");
        assert!(!text.contains("Asha_Leeds.mp4"), "{text}");
        assert!(runner.calls().is_empty());
        assert!(!fx.layout.title_cards_dir().exists());
    }

    #[test]
    fn preflight_lists_every_missing_video() {
        let fx = fixture(&["Asha_Leeds", "Ravi_Pune"]);
        let mut records = fx.records.clone();
        records.push(PerformerRecord::new("Ghost", "Nowhere"));
        records.push(PerformerRecord::new("Phantom", "Elsewhere"));

        let err = ensure_videos_exist(&fx.layout, &records).expect_err("two missing");
        let text = err.to_string();
        assert!(text.contains("2 video(s)"), "{text}");
        assert!(text.contains("Ghost_Nowhere.mp4"), "{text}");
        assert!(text.contains("Phantom_Elsewhere.mp4"), "{text}");
    }

    #[test]
    fn preflight_uses_raw_case_of_source_name() {
        let fx = fixture(&["Asha_Leeds"]);
        let shouting = vec![PerformerRecord::new("ASHA", "LEEDS")];
        let missing = find_missing_videos(&fx.layout, &shouting);
        // Case-insensitive filesystems will find the file anyway.
        if !missing.is_empty() {
            assert_eq!(missing, vec![fx.dir.path().join("ASHA_LEEDS.mp4")]);
        }
    }

    #[test]
    fn full_build_invokes_each_target_once_and_concatenates_in_order() {
        let fx = fixture(&["Asha_Leeds", "Ravi_Pune", "Meera_Chennai"]);
        let runner = RecordingRunner::default();
        let ctx = fx.context(&runner);

        let outcome = run_build(&ctx, &fx.records).expect("build succeeds");
        assert_eq!(outcome.title_cards.created, 3);
        assert_eq!(outcome.conversions.created, 6);
        assert_eq!(outcome.clip_count, 6);
        assert_eq!(outcome.output, fx.layout.output_path());

        let outputs = runner.outputs();
        assert_eq!(outputs.len(), 3 + 6 + 1);
        let unique = outputs.iter().collect::<std::collections::HashSet<_>>();
        assert_eq!(unique.len(), outputs.len());
        assert_eq!(outputs.last().unwrap(), &fx.layout.output_path());

        // Every conversion happens after every title card.
        let first_conversion = outputs
            .iter()
            .position(|p| p.starts_with(fx.layout.converted_dir()))
            .unwrap();
        let last_card = outputs
            .iter()
            .rposition(|p| p.starts_with(fx.layout.title_cards_dir()))
            .unwrap();
        assert!(last_card < first_conversion);

        assert!(!fx.layout.converted_dir().exists());
        assert!(!fx.layout.manifest_path().exists());
        assert_eq!(outcome.cleanup.unwrap().removed_files, 7);
    }

    #[test]
    fn manifest_mirrors_metadata_order() {
        let fx = fixture(&["Zed_York", "Amy_Bath", "Moe_Hull"]);
        let runner = RecordingRunner::default();
        let settings = Settings {
            keep_intermediates: true,
            ..fx.settings.clone()
        };
        let ctx = RunContext {
            settings: &settings,
            ..fx.context(&runner)
        };

        run_build(&ctx, &fx.records).expect("build succeeds");
        let manifest = fs::read_to_string(fx.layout.manifest_path()).expect("manifest kept");
        let lines = manifest.lines().collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                "file 'converted_videos/zed_york_titlecard_converted.mp4'",
                "file 'converted_videos/zed_york_converted.mp4'",
                "file 'converted_videos/amy_bath_titlecard_converted.mp4'",
                "file 'converted_videos/amy_bath_converted.mp4'",
                "file 'converted_videos/moe_hull_titlecard_converted.mp4'",
                "file 'converted_videos/moe_hull_converted.mp4'",
            ]
        );
    }

    #[test]
    fn rerun_skips_everything_already_produced() {
        let fx = fixture(&["Asha_Leeds", "Ravi_Pune"]);
        let settings = Settings {
            keep_intermediates: true,
            ..fx.settings.clone()
        };

        let first = RecordingRunner::default();
        let ctx = RunContext {
            settings: &settings,
            ..fx.context(&first)
        };
        run_build(&ctx, &fx.records).expect("first build");

        let second = RecordingRunner::default();
        let ctx = RunContext {
            settings: &settings,
            ..fx.context(&second)
        };
        let outcome = run_build(&ctx, &fx.records).expect("second build");
        assert_eq!(outcome.title_cards.skipped, 2);
        assert_eq!(outcome.conversions.skipped, 4);
        // Only the final concatenation runs again.
        assert_eq!(second.outputs(), vec![fx.layout.output_path()]);
    }

    #[test]
    fn failed_conversion_keeps_intermediates_and_skips_concat() {
        let fx = fixture(&["Asha_Leeds", "Ravi_Pune"]);
        let broken = fx.layout.resolve(&fx.records[1], ClipKind::CONVERTED_SOURCE);
        let runner = RecordingRunner::failing_on(&broken);
        let ctx = fx.context(&runner);

        let err = run_build(&ctx, &fx.records).expect_err("conversion fails");
        assert!(format!("{err:#}").contains("conversion phase failed"), "{err:#}");
        assert!(fx.layout.converted_dir().exists());
        assert!(fx.layout.title_cards_dir().exists());
        assert!(!runner.outputs().contains(&fx.layout.output_path()));
        assert!(!fx.layout.output_path().exists());
    }

    #[test]
    fn empty_leftovers_are_rebuilt_with_a_warning() {
        let fx = fixture(&["Asha_Leeds"]);
        let card = fx.layout.resolve(&fx.records[0], ClipKind::TITLE_CARD);
        fs::create_dir_all(card.parent().unwrap()).unwrap();
        fs::write(&card, b"").unwrap();

        let runner = RecordingRunner::default();
        let settings = Settings {
            keep_intermediates: true,
            ..fx.settings.clone()
        };
        let ctx = RunContext {
            settings: &settings,
            ..fx.context(&runner)
        };
        let outcome = run_build(&ctx, &fx.records).expect("build succeeds");
        assert_eq!(outcome.title_cards.created, 1);
        assert!(runner.outputs().contains(&card));
        assert!(fs::metadata(&card).unwrap().len() > 0);
    }

    #[test]
    fn shared_intermediates_are_produced_once_per_path() {
        let fx = fixture(&["Asha_Leeds", "Ravi_Pune"]);
        fs::write(fx.dir.path().join("ASHA_leeds.mp4"), b"video").expect("write source");
        let mut records = fx.records.clone();
        records.push(PerformerRecord::new("ASHA", "leeds"));
        records.push(fx.records[1].clone());

        let runner = RecordingRunner::with_delay(std::time::Duration::from_millis(100));
        let settings = Settings {
            workers: 4,
            keep_intermediates: true,
            ..fx.settings.clone()
        };
        let ctx = RunContext {
            settings: &settings,
            ..fx.context(&runner)
        };

        let outcome = run_build(&ctx, &records).expect("build succeeds");
        assert_eq!(outcome.title_cards.total(), 2);
        assert_eq!(outcome.conversions.total(), 4);
        assert_eq!(outcome.clip_count, 8);

        let outputs = runner.outputs();
        let unique = outputs.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), outputs.len(), "{outputs:#?}");
        assert_eq!(outputs.len(), 2 + 4 + 1);

        // Playback still has a card and a clip for every row.
        let manifest = fs::read_to_string(fx.layout.manifest_path()).expect("manifest kept");
        let lines = manifest.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[4], "file 'converted_videos/asha_leeds_titlecard_converted.mp4'");
        assert_eq!(lines[7], "file 'converted_videos/ravi_pune_converted.mp4'");
    }

    #[test]
    fn cleanup_tolerates_missing_intermediates() {
        let fx = fixture(&["Asha_Leeds"]);
        let report = cleanup(&fx.layout).expect("nothing to clean");
        assert_eq!(report.removed_files, 0);
    }

    #[test]
    fn plan_reports_paths_and_presence() {
        let fx = fixture(&["Asha_Leeds"]);
        let mut records = fx.records.clone();
        records.push(PerformerRecord::new("Ghost", "Nowhere"));
        let entries = plan(&fx.layout, &records);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].source_exists);
        assert!(!entries[1].source_exists);
        assert_eq!(entries[1].position, 2);
        assert!(entries[0]
            .converted_title_card
            .ends_with("converted_videos/asha_leeds_titlecard_converted.mp4"));
    }

    #[test]
    fn empty_metadata_is_rejected() {
        let fx = fixture(&[]);
        let runner = RecordingRunner::default();
        assert!(run_build(&fx.context(&runner), &[]).is_err());
    }
}

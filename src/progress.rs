use clap::ValueEnum;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, VecDeque};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const MAX_STORED_WARNINGS: usize = 32;
const TICK: Duration = Duration::from_millis(500);
const SPINNER_CHARS: &str = "|/-\\ ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum ProgressMode {
    Auto,
    Rich,
    Plain,
    Quiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedProgressMode {
    Rich,
    Plain,
    Quiet,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressConfig {
    pub mode: ProgressMode,
    /// Warn when no clip finishes for this long (a stuck ffmpeg child).
    pub idle_threshold: Duration,
    pub plain_interval: Duration,
    tty_override: Option<bool>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            mode: ProgressMode::Auto,
            idle_threshold: Duration::from_secs(120),
            plain_interval: Duration::from_secs(5),
            tty_override: None,
        }
    }
}

impl ProgressConfig {
    pub fn new(mode: ProgressMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn with_tty_override(mut self, is_tty: bool) -> Self {
        self.tty_override = Some(is_tty);
        self
    }

    pub fn resolve_mode(self) -> ResolvedProgressMode {
        let stderr_is_tty = self
            .tty_override
            .unwrap_or_else(|| std::io::stderr().is_terminal());
        match self.mode {
            ProgressMode::Auto if stderr_is_tty => ResolvedProgressMode::Rich,
            ProgressMode::Auto | ProgressMode::Plain => ResolvedProgressMode::Plain,
            ProgressMode::Rich => ResolvedProgressMode::Rich,
            ProgressMode::Quiet => ResolvedProgressMode::Quiet,
        }
    }
}

/// What the binary prints once a build has finished.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub performers: usize,
    pub title_cards_rendered: usize,
    pub title_cards_skipped: usize,
    pub clips_converted: usize,
    pub clips_skipped: usize,
    pub title_card_time: Duration,
    pub conversion_time: Duration,
    pub clip_count: usize,
    pub workers: usize,
    pub output: PathBuf,
    pub cleaned: bool,
    pub removed_files: usize,
    pub elapsed: Duration,
    pub warning_count: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressOutcome {
    pub elapsed: Duration,
    pub total_items: u64,
    pub processed_items: u64,
    pub warning_count: usize,
    pub warnings: Vec<String>,
}

/// Done/total for one counter. A total of zero means "unknown".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    done: u64,
    total: u64,
}

impl Tally {
    fn new(total: u64) -> Self {
        Self { done: 0, total }
    }

    fn add(&mut self, delta: u64) {
        self.done = self.done.saturating_add(delta);
        if self.total > 0 {
            self.done = self.done.min(self.total);
        }
    }

    fn complete(&self) -> bool {
        self.total > 0 && self.done >= self.total
    }
}

/// Shared view of a running build. Cloned into every worker; all methods
/// take `&self`.
#[derive(Clone)]
pub struct ProgressHandle {
    inner: Arc<Shared>,
}

/// Owns the ticker thread. Dropping it without [`ProgressReporter::finish`]
/// still tears the display down.
pub struct ProgressReporter {
    handle: ProgressHandle,
    ticker: Option<JoinHandle<()>>,
}

struct Shared {
    label: String,
    mode: ResolvedProgressMode,
    idle_threshold: Duration,
    plain_interval: Duration,
    state: Mutex<State>,
    bars: Option<Bars>,
    stop: AtomicBool,
    finalized: AtomicBool,
}

struct Bars {
    multi: MultiProgress,
    overall: ProgressBar,
    stage: ProgressBar,
    workers: Mutex<BTreeMap<String, ProgressBar>>,
}

#[derive(Debug)]
struct State {
    started: Instant,
    stage_name: String,
    stage: Tally,
    overall: Tally,
    last_progress: Instant,
    last_plain_line: Option<Instant>,
    last_idle_warn: Option<Instant>,
    workers: BTreeMap<String, String>,
    warnings: VecDeque<String>,
}

impl State {
    fn status_line(&self, label: &str) -> String {
        let elapsed = self.started.elapsed();
        let eta = estimate_remaining(self.overall, elapsed);
        let active = if self.workers.is_empty() {
            "-".to_string()
        } else {
            self.workers.values().cloned().collect::<Vec<_>>().join(", ")
        };
        format!(
            "[PROGRESS] {} elapsed={} stage={} {} overall={} ETA={} active={}",
            label,
            format_duration(elapsed),
            self.stage_name,
            tally_text(self.stage),
            tally_text(self.overall),
            format_eta(eta),
            active
        )
    }

    fn outcome(&self) -> ProgressOutcome {
        let warnings = self.warnings.iter().cloned().collect::<Vec<_>>();
        ProgressOutcome {
            elapsed: self.started.elapsed(),
            total_items: self.overall.total,
            processed_items: self.overall.done,
            warning_count: warnings.len(),
            warnings,
        }
    }

    fn remember_warning(&mut self, message: &str) {
        if self.warnings.len() >= MAX_STORED_WARNINGS {
            self.warnings.pop_front();
        }
        self.warnings.push_back(message.to_string());
    }
}

impl ProgressReporter {
    /// `total_items` counts every unit of work in the run across all stages.
    pub fn new(label: impl Into<String>, total_items: u64, config: ProgressConfig) -> Self {
        let label = label.into();
        let mode = config.resolve_mode();
        let now = Instant::now();

        let bars = (mode == ResolvedProgressMode::Rich).then(|| Bars::new(total_items));
        let shared = Arc::new(Shared {
            label,
            mode,
            idle_threshold: config.idle_threshold,
            plain_interval: config.plain_interval,
            state: Mutex::new(State {
                started: now,
                stage_name: "starting".to_string(),
                stage: Tally::default(),
                overall: Tally::new(total_items),
                last_progress: now,
                last_plain_line: None,
                last_idle_warn: None,
                workers: BTreeMap::new(),
                warnings: VecDeque::new(),
            }),
            bars,
            stop: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
        });

        let ticker_shared = Arc::clone(&shared);
        let ticker = thread::spawn(move || {
            while !ticker_shared.stop.load(Ordering::Relaxed) {
                thread::sleep(TICK);
                ticker_shared.tick(Instant::now());
            }
        });

        Self {
            handle: ProgressHandle { inner: shared },
            ticker: Some(ticker),
        }
    }

    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    pub fn finish(mut self, final_message: impl Into<String>) -> ProgressOutcome {
        self.stop_ticker();
        self.handle.inner.finalize(Some(final_message.into()))
    }

    fn stop_ticker(&mut self) {
        self.handle.inner.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.ticker.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop_ticker();
        self.handle.inner.finalize(None);
    }
}

impl ProgressHandle {
    /// Starts a named stage with its own item count. Items counted from here
    /// on advance both the stage and the overall total.
    pub fn begin_stage(&self, name: impl Into<String>, stage_items: u64) {
        let name = name.into();
        let line = {
            let mut state = self.inner.state.lock().unwrap();
            state.stage_name = name.clone();
            state.stage = Tally::new(stage_items);
            state.last_progress = Instant::now();
            state.status_line(&self.inner.label)
        };
        if let Some(bars) = &self.inner.bars {
            bars.stage.set_length(stage_items.max(1));
            bars.stage.set_position(0);
            bars.stage.set_prefix(name);
        }
        if self.inner.mode == ResolvedProgressMode::Plain {
            eprintln!("{line}");
        }
    }

    pub fn inc_items(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        let (stage, overall) = {
            let mut state = self.inner.state.lock().unwrap();
            state.stage.add(delta);
            state.overall.add(delta);
            state.last_progress = Instant::now();
            (state.stage, state.overall)
        };
        if let Some(bars) = &self.inner.bars {
            bars.stage.set_position(stage.done);
            bars.overall.set_position(overall.done);
        }
    }

    /// Shows what one worker is busy with, keyed by `worker_id`.
    pub fn set_operation_status(&self, worker_id: impl Into<String>, status: impl Into<String>) {
        let worker_id = worker_id.into();
        let status = status.into();
        self.inner
            .state
            .lock()
            .unwrap()
            .workers
            .insert(worker_id.clone(), status.clone());
        if let Some(bars) = &self.inner.bars {
            bars.show_worker(&worker_id, status);
        }
    }

    pub fn clear_operation(&self, worker_id: &str) {
        self.inner.state.lock().unwrap().workers.remove(worker_id);
        if let Some(bars) = &self.inner.bars {
            bars.hide_worker(worker_id);
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.inner.print("INFO", &message.into());
    }

    /// Printed like [`log`](Self::log) and also kept for the final outcome.
    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        self.inner
            .state
            .lock()
            .unwrap()
            .remember_warning(&message);
        self.inner.print("WARN", &message);
    }
}

impl Shared {
    fn tick(&self, now: Instant) {
        if self.mode == ResolvedProgressMode::Quiet {
            return;
        }

        let (plain_line, idle_message) = {
            let mut state = self.state.lock().unwrap();

            let plain_line = match state.last_plain_line {
                Some(last) if now.duration_since(last) < self.plain_interval => None,
                _ => {
                    state.last_plain_line = Some(now);
                    Some(state.status_line(&self.label))
                }
            };

            let idle_message = if idle_warning_due(
                now,
                state.last_progress,
                state.last_idle_warn,
                self.idle_threshold,
                state.overall,
            ) {
                state.last_idle_warn = Some(now);
                let msg = format!(
                    "no clip finished for {}s (stage={}, active={})",
                    now.duration_since(state.last_progress).as_secs(),
                    state.stage_name,
                    state.workers.keys().cloned().collect::<Vec<_>>().join(",")
                );
                state.remember_warning(&msg);
                Some(msg)
            } else {
                None
            };

            if let Some(bars) = &self.bars {
                bars.overall.set_message(format!(
                    "ETA {}",
                    format_eta(estimate_remaining(state.overall, state.started.elapsed()))
                ));
            }
            (plain_line, idle_message)
        };

        if self.mode == ResolvedProgressMode::Plain {
            if let Some(line) = plain_line {
                eprintln!("{line}");
            }
        }
        if let Some(msg) = idle_message {
            self.print("WARN", &msg);
        }
    }

    fn print(&self, level: &str, message: &str) {
        let line = format!("[{}] {}: {}", level, self.label, message);
        match (&self.bars, self.mode) {
            (_, ResolvedProgressMode::Quiet) => {}
            (Some(bars), _) => bars.multi.suspend(|| eprintln!("{line}")),
            (None, _) => eprintln!("{line}"),
        }
    }

    fn finalize(&self, final_message: Option<String>) -> ProgressOutcome {
        let (outcome, line) = {
            let state = self.state.lock().unwrap();
            (state.outcome(), state.status_line(&self.label))
        };
        if self.finalized.swap(true, Ordering::Relaxed) {
            return outcome;
        }

        match self.mode {
            ResolvedProgressMode::Quiet => {}
            ResolvedProgressMode::Plain => {
                eprintln!("{line}");
                if let Some(msg) = &final_message {
                    eprintln!("[DONE] {}: {}", self.label, msg);
                }
            }
            ResolvedProgressMode::Rich => {
                if let Some(bars) = &self.bars {
                    bars.finish(
                        final_message,
                        format!(
                            "{}/{} items in {}",
                            outcome.processed_items,
                            outcome.total_items,
                            format_duration(outcome.elapsed)
                        ),
                    );
                }
            }
        }
        outcome
    }
}

impl Bars {
    fn new(total_items: u64) -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(total_items.max(1)));
        overall.set_style(style(
            "{spinner:.green} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} items | {msg}",
        ));
        overall.enable_steady_tick(Duration::from_millis(120));

        let stage = multi.add(ProgressBar::new(1));
        stage.set_style(style("  {prefix:.bold} {bar:30.yellow/white} {pos}/{len}"));
        stage.set_prefix("starting");

        Self {
            multi,
            overall,
            stage,
            workers: Mutex::new(BTreeMap::new()),
        }
    }

    fn show_worker(&self, worker_id: &str, status: String) {
        let mut workers = self.workers.lock().unwrap();
        let bar = workers.entry(worker_id.to_string()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.set_style(style("    {spinner:.magenta} {prefix:.dim} {msg}"));
            bar.enable_steady_tick(Duration::from_millis(120));
            bar.set_prefix(worker_id.to_string());
            bar
        });
        bar.set_message(status);
    }

    fn hide_worker(&self, worker_id: &str) {
        if let Some(bar) = self.workers.lock().unwrap().remove(worker_id) {
            bar.finish_and_clear();
        }
    }

    fn finish(&self, final_message: Option<String>, totals: String) {
        for (_, bar) in std::mem::take(&mut *self.workers.lock().unwrap()) {
            bar.finish_and_clear();
        }
        self.stage.finish_and_clear();
        match final_message {
            Some(msg) => self.overall.finish_with_message(format!("{msg} ({totals})")),
            None => self.overall.abandon_with_message(totals),
        }
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars(SPINNER_CHARS)
}

fn tally_text(tally: Tally) -> String {
    if tally.total == 0 {
        tally.done.to_string()
    } else {
        format!("{}/{}", tally.done, tally.total)
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

fn format_eta(eta: Option<Duration>) -> String {
    eta.map(format_duration).unwrap_or_else(|| "--:--".to_string())
}

/// Linear extrapolation from the average pace so far.
fn estimate_remaining(overall: Tally, elapsed: Duration) -> Option<Duration> {
    if overall.done == 0 || overall.total == 0 || overall.complete() {
        return None;
    }
    let per_item = elapsed.as_secs_f64() / overall.done as f64;
    let remaining = (overall.total - overall.done) as f64;
    Some(Duration::from_secs_f64(per_item * remaining))
}

fn idle_warning_due(
    now: Instant,
    last_progress: Instant,
    last_idle_warn: Option<Instant>,
    idle_threshold: Duration,
    overall: Tally,
) -> bool {
    if overall.complete() || now.duration_since(last_progress) < idle_threshold {
        return false;
    }
    last_idle_warn.map_or(true, |last| now.duration_since(last) >= idle_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_resolution_respects_tty_override() {
        let auto = ProgressConfig::new(ProgressMode::Auto);
        assert_eq!(auto.with_tty_override(true).resolve_mode(), ResolvedProgressMode::Rich);
        assert_eq!(auto.with_tty_override(false).resolve_mode(), ResolvedProgressMode::Plain);

        let quiet = ProgressConfig::new(ProgressMode::Quiet).with_tty_override(true);
        assert_eq!(quiet.resolve_mode(), ResolvedProgressMode::Quiet);
    }

    #[test]
    fn remaining_time_scales_with_items_left() {
        let overall = Tally { done: 4, total: 10 };
        let eta = estimate_remaining(overall, Duration::from_secs(8)).expect("eta");
        assert_eq!(eta.as_secs(), 12);

        assert!(estimate_remaining(Tally { done: 10, total: 10 }, Duration::from_secs(8)).is_none());
        assert!(estimate_remaining(Tally { done: 0, total: 10 }, Duration::from_secs(8)).is_none());
    }

    #[test]
    fn idle_warning_repeats_only_after_another_threshold() {
        let start = Instant::now();
        let threshold = Duration::from_secs(30);
        let open = Tally { done: 1, total: 9 };

        assert!(!idle_warning_due(start + Duration::from_secs(29), start, None, threshold, open));
        assert!(idle_warning_due(start + threshold, start, None, threshold, open));
        assert!(!idle_warning_due(
            start + threshold,
            start,
            Some(start + Duration::from_secs(10)),
            threshold,
            open
        ));
        assert!(!idle_warning_due(
            start + threshold,
            start,
            None,
            threshold,
            Tally { done: 9, total: 9 }
        ));
    }

    #[test]
    fn stage_counts_reset_but_overall_accumulates() {
        let reporter = ProgressReporter::new("build", 7, ProgressConfig::new(ProgressMode::Quiet));
        let handle = reporter.handle();

        handle.begin_stage("title cards", 2);
        handle.inc_items(2);
        handle.begin_stage("converting", 4);
        handle.inc_items(1);
        {
            let state = handle.inner.state.lock().unwrap();
            assert_eq!(state.stage, Tally { done: 1, total: 4 });
            assert_eq!(state.overall, Tally { done: 3, total: 7 });
        }

        handle.inc_items(20);
        let outcome = reporter.finish("done");
        assert_eq!(outcome.processed_items, 7);
        assert_eq!(outcome.total_items, 7);
    }

    #[test]
    fn warnings_are_kept_for_the_outcome_and_bounded() {
        let reporter = ProgressReporter::new("build", 1, ProgressConfig::new(ProgressMode::Quiet));
        let handle = reporter.handle();
        for i in 0..(MAX_STORED_WARNINGS + 3) {
            handle.warning(format!("warning {i}"));
        }
        handle.log("not a warning");

        let outcome = reporter.finish("done");
        assert_eq!(outcome.warning_count, MAX_STORED_WARNINGS);
        assert_eq!(outcome.warnings.first().map(String::as_str), Some("warning 3"));
    }

    #[test]
    fn status_line_lists_active_workers_in_order() {
        let reporter = ProgressReporter::new("build", 4, ProgressConfig::new(ProgressMode::Quiet));
        let handle = reporter.handle();
        handle.begin_stage("converting", 4);
        handle.set_operation_status("conv01", "b.mp4");
        handle.set_operation_status("conv00", "a.mp4");

        let line = handle.inner.state.lock().unwrap().status_line("build");
        assert!(line.contains("stage=converting 0/4"), "{line}");
        assert!(line.contains("active=a.mp4, b.mp4"), "{line}");

        handle.clear_operation("conv00");
        let line = handle.inner.state.lock().unwrap().status_line("build");
        assert!(line.contains("active=b.mp4"), "{line}");
    }
}

use crate::progress::ProgressHandle;

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Result of one idempotent work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Created,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseReport {
    pub created: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl PhaseReport {
    #[cfg(test)]
    pub fn total(&self) -> usize {
        self.created + self.skipped
    }
}

/// Runs `work` over every item with `workers` threads.
///
/// Items are claimed through a shared cursor, so completion order is
/// arbitrary. The first failure stops workers from claiming further items;
/// in-flight items still finish before the error is returned.
pub fn run_parallel<T, D, F>(
    items: &[T],
    workers: usize,
    progress: &ProgressHandle,
    op_prefix: &str,
    describe: D,
    work: F,
) -> Result<PhaseReport>
where
    T: Sync,
    D: Fn(&T) -> String + Sync,
    F: Fn(&T) -> Result<ItemOutcome> + Sync,
{
    let started = Instant::now();
    if items.is_empty() {
        return Ok(PhaseReport::default());
    }
    let workers = workers.clamp(1, items.len());

    let next_index = AtomicUsize::new(0);
    let cancel = AtomicBool::new(false);
    let first_error = Mutex::new(None::<anyhow::Error>);
    let created = AtomicUsize::new(0);
    let skipped = AtomicUsize::new(0);

    let (next_index, cancel, first_error) = (&next_index, &cancel, &first_error);
    let (created, skipped) = (&created, &skipped);
    let (describe, work) = (&describe, &work);

    std::thread::scope(|scope| {
        let handles = (0..workers)
            .map(|worker_id| {
                scope.spawn(move || {
                    let op_id = format!("{}{:02}", op_prefix, worker_id);
                    loop {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let idx = next_index.fetch_add(1, Ordering::Relaxed);
                        if idx >= items.len() {
                            break;
                        }
                        let item = &items[idx];
                        progress.set_operation_status(
                            op_id.clone(),
                            format!("{} {}/{} {}", op_prefix, idx + 1, items.len(), describe(item)),
                        );

                        match work(item) {
                            Ok(ItemOutcome::Created) => {
                                created.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(ItemOutcome::Skipped) => {
                                skipped.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => {
                                record_error(first_error, cancel, err);
                                break;
                            }
                        }
                        progress.inc_items(1);
                    }
                    progress.clear_operation(&op_id);
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            if handle.join().is_err() {
                record_error(first_error, cancel, anyhow!("{} worker thread panicked", op_prefix));
            }
        }
    });

    if let Some(err) = first_error.lock().unwrap().take() {
        return Err(err);
    }

    Ok(PhaseReport {
        created: created.load(Ordering::Relaxed),
        skipped: skipped.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    })
}

fn record_error(first_error: &Mutex<Option<anyhow::Error>>, cancel: &AtomicBool, err: anyhow::Error) {
    let mut slot = first_error.lock().unwrap();
    if slot.is_none() {
        *slot = Some(err);
    }
    cancel.store(true, Ordering::Relaxed);
}

use sysinfo::System;

/// Memory budgeted per concurrent ffmpeg child (x264 at 1080p plus muxing).
const BYTES_PER_WORKER: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tune {
    pub cores: usize,
    pub available_ram: u64,
    pub workers: usize,
    /// `-threads` handed to each ffmpeg child so the pool does not oversubscribe the host.
    pub ffmpeg_threads: usize,
}

pub fn auto_tune_for_build(workers_override: Option<usize>) -> Tune {
    let cores = num_cpus::get().max(1);
    plan_workers(cores, available_ram_bytes(), workers_override)
}

pub fn plan_workers(cores: usize, available_ram: u64, workers_override: Option<usize>) -> Tune {
    let cores = cores.max(1);
    let workers = match workers_override {
        Some(w) => w.max(1),
        None => {
            // An unknown (zero) reading should not pin the pool to one worker.
            let by_ram = if available_ram == 0 {
                cores
            } else {
                ((available_ram / BYTES_PER_WORKER) as usize).max(1)
            };
            cores.min(by_ram)
        }
    };
    let ffmpeg_threads = (cores / workers).max(1);

    Tune {
        cores,
        available_ram,
        workers,
        ffmpeg_threads,
    }
}

fn available_ram_bytes() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

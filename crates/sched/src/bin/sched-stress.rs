//! sched-stress — synthetic frame loop driving a live scheduler.
//!
//! Stands in for the scheduler's real consumers: per-frame simulation
//! groups with dependencies, main-thread-bound submission work, serialized
//! file loads, occasional long-running jobs, and a parallel-for sweep per
//! frame. Prints a metrics snapshot as JSON on exit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use taktwerk_core::load_dotenv;
use taktwerk_sched::{ClosureTask, ParallelForParams, Priority, Scheduler, SchedulerConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Synthetic frame-loop stress harness for the task scheduler.
#[derive(Parser, Debug)]
#[command(name = "sched-stress", version, about)]
struct Cli {
    /// Number of frames to simulate.
    #[arg(long, env = "TAKT_STRESS_FRAMES", default_value_t = 120)]
    frames: u64,

    /// Simulation task groups submitted per frame.
    #[arg(long, env = "TAKT_STRESS_GROUPS", default_value_t = 8)]
    groups_per_frame: usize,

    /// Element count of the per-frame parallel-for sweep.
    #[arg(long, env = "TAKT_STRESS_ITEMS", default_value_t = 4096)]
    parallel_items: usize,

    /// Per-frame budget for some-frame main-thread work, in microseconds.
    #[arg(long, env = "TAKT_STRESS_BUDGET_US", default_value_t = 500)]
    some_frame_budget_us: u64,

    /// Path to a scheduler TOML config; falls back to env/defaults.
    #[arg(long, env = "TAKT_CONFIG")]
    config: Option<String>,
}

fn load_config(cli: &Cli) -> SchedulerConfig {
    let Some(path) = &cli.config else {
        return SchedulerConfig::from_env();
    };
    match SchedulerConfig::from_file(path) {
        Ok(config) => {
            info!(path = %path, "loaded scheduler config");
            config
        }
        Err(e) => {
            warn!(error = %e, path = %path, "failed to load config, using env/defaults");
            SchedulerConfig::from_env()
        }
    }
}

fn counting(name: &'static str, counter: &Arc<AtomicU64>) -> Arc<ClosureTask> {
    let counter = Arc::clone(counter);
    Arc::new(ClosureTask::new(name, move || {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }))
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = load_config(&cli);

    let sched = Scheduler::new(config);
    let executed = Arc::new(AtomicU64::new(0));
    let sweep_items = Arc::new(AtomicU64::new(0));
    let params = ParallelForParams { bin_size: 64, ..ParallelForParams::default() };

    info!(
        frames = cli.frames,
        groups_per_frame = cli.groups_per_frame,
        parallel_items = cli.parallel_items,
        "stress run starting"
    );
    let started = Instant::now();

    for frame in 0..cli.frames {
        // Per-frame simulation groups: a chain of system updates where each
        // group depends on the previous one, like world-update phases do.
        let mut groups = Vec::with_capacity(cli.groups_per_frame);
        for _ in 0..cli.groups_per_frame {
            let group = sched.create_task_group(Priority::EarlyThisFrame)?;
            sched.add_task(group, counting("system-update", &executed))?;
            sched.add_task(group, counting("component-sync", &executed))?;
            if let Some(&previous) = groups.last() {
                sched.add_dependency(group, previous)?;
            }
            groups.push(group);
        }
        for group in groups {
            sched.start_task_group(group)?;
        }

        // Main-thread-bound submission work for this frame.
        let submit = sched.create_task_group(Priority::ThisFrameMainThread)?;
        sched.add_task(submit, counting("queue-submit", &executed))?;
        sched.start_task_group(submit)?;

        // Serialized asset load every few frames.
        if frame % 4 == 0 {
            let load = sched.create_task_group(Priority::FileAccess)?;
            sched.add_task(load, counting("asset-load", &executed))?;
            sched.start_task_group(load)?;
        }

        // A long-running background job once in a while, canceled if it is
        // still pending when the run ends.
        if frame % 32 == 0 {
            let crunch = sched.create_task_group(Priority::LongRunning)?;
            sched.add_task(crunch, counting("background-crunch", &executed))?;
            sched.start_task_group(crunch)?;
        }

        // Data-parallel sweep over the frame's working set.
        let items = Arc::clone(&sweep_items);
        sched.parallel_for_range(0..cli.parallel_items, &params, |range| {
            items.fetch_add(range.len() as u64, Ordering::Relaxed);
        })?;

        sched.finish_frame_tasks(Some(Duration::from_micros(cli.some_frame_budget_us)));
    }

    let elapsed = started.elapsed();
    info!(
        frames = cli.frames,
        elapsed_ms = elapsed.as_millis() as u64,
        tasks = executed.load(Ordering::Relaxed),
        swept = sweep_items.load(Ordering::Relaxed),
        "stress run complete"
    );

    let metrics = sched.metrics();
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}

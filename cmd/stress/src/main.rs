//! Stress test - many gvstack threads
//!
//! Spawns a large number of threads from the starting thread. Each one
//! recurses `depth` frames on a minimum-size stack, so most of them grow
//! at least once, then unwinds and yields its way out.
//!
//! Usage: `stress [threads] [depth]`

use gvstack::{exit_on_boot_error, EngineConfig, FrameDescriptor, Runtime, SlotLayout};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static COMPLETED: AtomicU64 = AtomicU64::new(0);

fn main() {
    println!("=== gvstack Stress Test ===\n");

    let mut args = std::env::args().skip(1);
    let num_threads: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let depth: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(200);

    println!("Spawning {} threads, recursion depth {}...", num_threads, depth);

    let config = EngineConfig::from_env()
        .max_threads(num_threads + 1_000)
        .stack_words(64);

    let mut rt = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("bad config: {}", e);
            std::process::exit(2);
        }
    };

    let registered = rt.register_initializer("stress", &[], move |ctx| {
        // `dive [n]` recurses n more levels, leaving a `rise` frame per
        // level that pops and yields on the way back up
        let rise = ctx.register_descriptor(FrameDescriptor::new(
            "rise",
            SlotLayout::EMPTY,
            |m| {
                m.pop();
                m.yield_now()
            },
        ))?;
        let dive = ctx.register_descriptor(FrameDescriptor::new(
            "dive",
            SlotLayout::words(1).ok_or_else(|| ctx.fail("layout"))?,
            move |m| {
                let n = m.slot(0)?;
                if n == 0 {
                    m.pop();
                    return Ok(());
                }
                let me = m.current_descriptor();
                m.reserve(4)?;
                m.replace(rise, &[])?;
                m.push(me, &[n - 1])
            },
        ))?;
        let done = ctx.register_descriptor(FrameDescriptor::new(
            "done",
            SlotLayout::EMPTY,
            |m| {
                COMPLETED.fetch_add(1, Ordering::Relaxed);
                m.pop();
                Ok(())
            },
        ))?;
        // `worker [depth]`: leaves `done` at the bottom, then dives
        let worker = ctx.register_descriptor(FrameDescriptor::new(
            "worker",
            SlotLayout::words(1).ok_or_else(|| ctx.fail("layout"))?,
            move |m| {
                let depth = m.slot(0)?;
                m.reserve(4)?;
                m.replace(done, &[])?;
                m.push(dive, &[depth])
            },
        ))?;

        let main = ctx.register_descriptor(FrameDescriptor::new(
            "main",
            SlotLayout::EMPTY,
            move |m| {
                for _ in 0..num_threads {
                    m.spawn(worker, &[depth], 0)?;
                }
                m.pop();
                Ok(())
            },
        ))?;
        ctx.spawn_entry(main, &[], 0)?;
        Ok(())
    });
    exit_on_boot_error(registered);

    let start = Instant::now();
    let booted = rt.boot_or_exit();
    let spawn_time = start.elapsed();
    println!("\nSpawn time: {:?}", spawn_time);
    println!(
        "Spawn rate: {:.0} threads/sec",
        num_threads as f64 / spawn_time.as_secs_f64()
    );

    println!("\nRunning on {} engines...", booted.engine().config().num_engines);
    let run_start = Instant::now();
    let stats = match booted.run() {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("engine pool failed: {}", e);
            std::process::exit(1);
        }
    };
    let run_time = run_start.elapsed();
    let total_time = start.elapsed();

    println!("\n=== Results ===");
    println!("Total threads:   {}", num_threads);
    println!("Completed:       {}", COMPLETED.load(Ordering::Relaxed));
    println!("Reclaimed:       {}", stats.reclaimed);
    println!("Overflowed:      {}", stats.overflowed);
    println!("Resumes:         {}", stats.resumes);
    println!("Spawn time:      {:?}", spawn_time);
    println!("Run time:        {:?}", run_time);
    println!("Total time:      {:?}", total_time);
    println!(
        "Throughput:      {:.0} threads/sec",
        num_threads as f64 / total_time.as_secs_f64()
    );

    println!("\n=== Stress Test Complete ===");
}

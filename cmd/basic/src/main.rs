//! Basic gvstack example
//!
//! Three modules with dependencies, a starting thread that spawns workers,
//! a blocked thread woken by a sibling, and a recursive thread whose stack
//! grows while it runs.
//!
//! # Environment Variables
//!
//! - `GVS_FLUSH_EPRINT=1` - Flush debug output immediately (useful for crash debugging)
//! - `GVS_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `GVS_NUM_ENGINES`, `GVS_STACK_WORDS`, ... - see `EngineConfig::from_env`

use gvstack::{exit_on_boot_error, kdebug, kinfo, PRIM_MODULE};
use gvstack::{
    BootResult, BlockReason, DescriptorId, EngineConfig, FrameDescriptor, InitContext, Runtime,
    SlotLayout, StackError, ThreadId, Word,
};
// GVS_LOG_LEVEL=debug GVS_FLUSH_EPRINT=1 cargo run -p gvstack-basic
fn main() {
    println!("=== gvstack Basic Example ===\n");

    let config = EngineConfig::from_env();
    config.print();

    let mut rt = match Runtime::new(config) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("bad config: {}", e);
            std::process::exit(2);
        }
    };

    // Registered out of order on purpose: bootstrap sorts by dependency.
    let registered = rt
        .register_initializer("app", &["workers", "recursion"], init_app)
        .and_then(|_| rt.register_initializer("workers", &[PRIM_MODULE], init_workers))
        .and_then(|_| rt.register_initializer("recursion", &["workers"], init_recursion));
    exit_on_boot_error(registered);
    let booted = rt.boot_or_exit();

    println!("Initializers ran in order: {:?}", booted.report().order);
    println!("Starting thread {} -> {}", booted.report().entry, booted.report().outcome);

    match booted.run() {
        Ok(stats) => {
            println!("\nResumes:     {}", stats.resumes);
            println!("Reclaimed:   {}", stats.reclaimed);
            println!("Parked:      {}", stats.parked);
            println!("Overflowed:  {}", stats.overflowed);
        }
        Err(e) => eprintln!("engine pool failed: {}", e),
    }

    println!("\n=== Example Complete ===");
}

/// `counter [id, n]`: yields n times, then finishes
/// `waiter [started]`: blocks once, finishes when woken
/// `waker [thread]`: wakes `thread`, retrying until it has blocked
fn init_workers(ctx: &mut InitContext<'_>) -> BootResult<()> {
    ctx.register_descriptor(FrameDescriptor::new(
        "counter",
        SlotLayout::words(2).ok_or_else(|| ctx.fail("layout"))?,
        |m| {
            let (id, n) = (m.slot(0)?, m.slot(1)?);
            if n == 0 {
                kdebug!("[counter {}] finished", id);
                m.pop();
                return Ok(());
            }
            kdebug!("[counter {}] {} to go", id, n);
            m.set_slot(1, n - 1)?;
            m.yield_now()
        },
    ))?;

    ctx.register_descriptor(FrameDescriptor::new(
        "waiter",
        SlotLayout::words(1).ok_or_else(|| ctx.fail("layout"))?,
        |m| {
            if m.slot(0)? == 0 {
                m.set_slot(0, 1)?;
                return m.block(BlockReason::Message);
            }
            kinfo!("[waiter] woken");
            m.pop();
            Ok(())
        },
    ))?;

    ctx.register_descriptor(FrameDescriptor::new(
        "waker",
        SlotLayout::words(1).ok_or_else(|| ctx.fail("layout"))?,
        |m| {
            let target = ThreadId::from_u64(m.slot(0)? as u64);
            if m.wake(target)? {
                m.pop();
                return Ok(());
            }
            m.yield_now()
        },
    ))?;
    Ok(())
}

/// `fib [n]` computes fib(n) by pushing a frame per call, growing the stack
fn init_recursion(ctx: &mut InitContext<'_>) -> BootResult<()> {
    let add = ctx.register_descriptor(FrameDescriptor::new(
        "fib-add",
        SlotLayout::words(2).ok_or_else(|| ctx.fail("layout"))?,
        |m| {
            // [partial, pending]: pending is the second call still to make
            let partial = m.slot(0)?;
            let pending = m.slot(1)?;
            let so_far = m.result().unwrap_or(0);
            if pending == Word::MAX {
                m.set_result(partial + so_far);
                m.pop();
                return Ok(());
            }
            let Some(fib) = m.lookup("fib") else {
                return Err(StackError::UnknownDescriptor(m.current_descriptor()).into());
            };
            m.reserve(8)?;
            m.set_slot(0, so_far)?;
            m.set_slot(1, Word::MAX)?;
            m.push(fib, &[pending])
        },
    ))?;

    ctx.register_descriptor(FrameDescriptor::new(
        "fib",
        SlotLayout::words(1).ok_or_else(|| ctx.fail("layout"))?,
        move |m| {
            let fib = m.current_descriptor();
            let n = m.slot(0)?;
            if n < 2 {
                m.set_result(n);
                m.pop();
                return Ok(());
            }
            m.reserve(8)?;
            m.replace(add, &[0, n - 2])?;
            m.push(fib, &[n - 1])
        },
    ))?;
    Ok(())
}

fn init_app(ctx: &mut InitContext<'_>) -> BootResult<()> {
    let counter = need(ctx, "counter")?;
    let waiter = need(ctx, "waiter")?;
    let waker = need(ctx, "waker")?;
    let fib = need(ctx, "fib")?;

    let main = ctx.register_descriptor(FrameDescriptor::new(
        "main",
        SlotLayout::EMPTY,
        move |m| {
            kinfo!("[main] spawning threads");
            for i in 1..=3 {
                m.spawn(counter, &[i, 3], 0)?;
            }
            let w = m.spawn(waiter, &[0], 0)?;
            m.spawn(waker, &[w.as_u64() as Word], 0)?;
            m.spawn(fib, &[20], 64)?;
            m.pop();
            Ok(())
        },
    ))?;
    ctx.spawn_entry(main, &[], 0)?;
    Ok(())
}

fn need(ctx: &InitContext<'_>, name: &str) -> BootResult<DescriptorId> {
    ctx.lookup(name).ok_or_else(|| ctx.fail(format!("{} not registered", name)))
}

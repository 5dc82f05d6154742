use shfs_kit::cli;
use shfs_kit::engine::ActionEngine;
use shfs_kit::error::ActionOutcome;
use shfs_kit::volume_handle::Volume;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static CANCEL_FLAG: std::sync::OnceLock<Arc<AtomicBool>> = std::sync::OnceLock::new();

extern "C" fn on_sigint(_sig: libc::c_int) {
    if let Some(flag) = CANCEL_FLAG.get() {
        flag.store(true, Ordering::Relaxed);
    }
}

/// Installs a SIGINT handler that flips a shared flag rather than
/// terminating outright, so an in-flight action can finish its current
/// chunk and release any partial reservation cleanly before the run
/// unwinds (§5).
fn install_cancel_handler() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    CANCEL_FLAG.set(cancel.clone()).expect("installed once");
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
    cancel
}

fn main() -> anyhow::Result<()> {
    let cli = cli::parse(std::env::args_os())?;

    let level = match cli.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let cancel = install_cancel_handler();

    let mut volume = Volume::mount(&cli.members)?;
    let results = ActionEngine::new(&mut volume, cancel).run(&cli.actions);
    volume.unmount()?;

    let mut worst = 0;
    for result in &results {
        match result.outcome {
            ActionOutcome::Ok => {
                if let Some(detail) = &result.detail {
                    println!("{}: {}", result.description, detail);
                } else {
                    println!("{}: ok", result.description);
                }
            }
            ActionOutcome::UserError => {
                eprintln!("{}: {}", result.description, result.detail.as_deref().unwrap_or("error"));
                worst = worst.max(1);
            }
            ActionOutcome::Cancelled => {
                eprintln!("{}: cancelled", result.description);
                worst = worst.max(2);
            }
        }
    }

    std::process::exit(match worst {
        0 => 0,
        1 => 1,
        _ => -2_i32,
    });
}

// Soul Frame — entry point.
//
// Usage:
//   soulframe                 Run the installation
//   soulframe --audio         Run the audio engine only (debug)
//   soulframe --display       Run the display sink only (debug)
//   soulframe --vision-sim    Run a synthetic vision writer (debug)

mod audio;
mod brain;
mod command;
mod config;
mod display;
mod error;
mod geometry;
mod ipc;
mod smoothing;
mod vision_sim;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use command::Command;
use config::Config;

// ─────────────────────────────────────────────────────────────────────────────
//  Shutdown signal
// ─────────────────────────────────────────────────────────────────────────────

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Polled by every long-running loop in the process.
pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

#[cfg(unix)]
fn install_signal_handlers() {
    extern "C" fn handle(_sig: libc::c_int) {
        SHUTDOWN.store(true, Ordering::Relaxed);
    }
    unsafe {
        libc::signal(libc::SIGINT, handle as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    install_signal_handlers();

    let cfg = Config::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let has = |flag: &str| args.iter().any(|a| a == flag);

    let result = if has("--vision-sim") {
        log::info!("Starting vision sim (debug mode)");
        vision_sim::run(&cfg)
    } else if has("--audio") {
        log::info!("Starting audio engine (debug mode)");
        run_audio_only(cfg)
    } else if has("--display") {
        log::info!("Starting display sink (debug mode)");
        run_display_only(&cfg)
    } else {
        log::info!("Starting Soul Frame");
        brain::run(cfg)
    };

    if let Err(e) = result {
        log::error!("Fatal: {e}");
        std::process::exit(1);
    }
}

// ── Debug roles ──────────────────────────────────────────────────────────────

fn run_audio_only(cfg: Config) -> Result<(), error::SoulError> {
    let (tx, handle) = audio::spawn_audio(cfg);
    wait_for_shutdown();
    let _ = tx.send(Command::Shutdown);
    let _ = handle.join();
    Ok(())
}

fn run_display_only(cfg: &Config) -> Result<(), error::SoulError> {
    let (tx, handle) = display::spawn_display(cfg);
    wait_for_shutdown();
    let _ = tx.send(Command::Shutdown);
    let _ = handle.join();
    Ok(())
}

fn wait_for_shutdown() {
    while !shutdown_requested() {
        std::thread::sleep(Duration::from_millis(100));
    }
}

// Display command sink. Runs in its own thread and drains the display
// command channel: validates commands, tracks the latest gaze point and
// image, and logs at debug level. The out-of-scope GL renderer attaches
// here — handle_command is the seam where its uniforms get fed.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::command::Command;
use crate::config::Config;

const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Spawn the display sink. Returns the command sender and the thread
/// handle the coordinator watches for liveness.
pub fn spawn_display(cfg: &Config) -> (Sender<Command>, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = bounded::<Command>(64);
    let (width, height, fps) = (cfg.display_width, cfg.display_height, cfg.display_fps);
    let handle = thread::Builder::new()
        .name("display-sink".into())
        .spawn(move || run_display(&cmd_rx, width, height, fps))
        .expect("Failed to spawn display thread");
    (cmd_tx, handle)
}

struct DisplayState {
    current_image: Option<PathBuf>,
    gaze: (f32, f32),
}

fn run_display(cmd_rx: &Receiver<Command>, width: u32, height: u32, fps: u32) {
    log::info!("Display sink starting ({width}x{height} @ {fps} FPS renderer target)");
    let mut state = DisplayState {
        current_image: None,
        gaze: (0.5, 0.5),
    };

    loop {
        match cmd_rx.recv_timeout(DRAIN_TIMEOUT) {
            Ok(Command::Shutdown) => {
                log::info!("Display shutdown command received");
                break;
            }
            Ok(cmd) => handle_command(cmd, &mut state),
            Err(RecvTimeoutError::Timeout) => {
                if crate::shutdown_requested() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::info!("Display sink exiting");
}

fn handle_command(cmd: Command, state: &mut DisplayState) {
    match cmd {
        Command::LoadImage { path } => {
            log::info!("Display: load image {}", path.display());
            state.current_image = Some(path);
        }
        Command::CrossfadeImage { path, duration_ms } => {
            let from = state
                .current_image
                .take()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".into());
            log::info!(
                "Display: crossfade {from} -> {} over {duration_ms} ms",
                path.display()
            );
            state.current_image = Some(path);
        }
        Command::SetEffect {
            effect,
            intensity,
            fade_in_ms,
            params,
        } => {
            log::debug!(
                "Display: effect '{effect}' intensity {intensity:.2} fade {fade_in_ms} ms {params:?}"
            );
        }
        Command::SetEffectIntensity { effect, intensity } => {
            log::debug!("Display: effect '{effect}' intensity -> {intensity:.2}");
        }
        Command::SetVignette { intensity } => {
            log::debug!("Display: vignette {intensity:.2}");
        }
        Command::SetParallax { gaze_x, gaze_y } => {
            state.gaze = (gaze_x, gaze_y);
            log::trace!("Display: parallax {:.3},{:.3}", state.gaze.0, state.gaze.1);
        }
        other => {
            log::warn!("Display sink ignoring non-display command: {other:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_drains_and_exits_on_shutdown() {
        let (tx, handle) = spawn_display(&Config::default());
        tx.send(Command::LoadImage {
            path: PathBuf::from("/tmp/pic.jpg"),
        })
        .unwrap();
        tx.send(Command::SetParallax {
            gaze_x: 0.3,
            gaze_y: 0.7,
        })
        .unwrap();
        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_sink_exits_when_channel_closes() {
        let (tx, handle) = spawn_display(&Config::default());
        drop(tx);
        handle.join().unwrap();
    }
}

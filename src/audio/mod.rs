// Audio engine. Runs in its own thread, owns the cpal output stream and
// the mixer, and reacts to commands from the brain via a crossbeam
// channel. The device callback only ever calls Mixer::mix — it never
// allocates, logs, or takes a long lock.

pub mod curves;
pub mod mixer;
pub mod stream;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::command::Command;
use crate::config::Config;
use crate::error::SoulError;
use mixer::Mixer;
use stream::{AudioStream, BassBoost, DecodedPcm};

/// Default fade durations when a command does not carry its own.
pub const DEFAULT_FADE_IN_MS: u32 = 500;
pub const DEFAULT_FADE_OUT_MS: u32 = 800;

/// How long the command loop blocks between cleanup sweeps.
const COMMAND_TIMEOUT: Duration = Duration::from_millis(50);

// ─────────────────────────────────────────────────────────────────────────────
//  PCM cache
// ─────────────────────────────────────────────────────────────────────────────

/// Decoded PCM shared by (path, bass_boost) so re-triggering a heartbeat
/// does not re-read and re-filter the file. Playback state is per
/// AudioStream, never shared.
struct PcmCache {
    entries: HashMap<(PathBuf, bool), Arc<DecodedPcm>>,
    bass: BassBoost,
    output_rate: u32,
}

impl PcmCache {
    fn new(cfg: &Config) -> Self {
        Self {
            entries: HashMap::new(),
            bass: BassBoost {
                center_hz: cfg.bass_center_hz,
                q: cfg.bass_q,
                gain_db: cfg.bass_gain_db,
            },
            output_rate: cfg.audio_sample_rate,
        }
    }

    fn open(&mut self, path: &Path, looped: bool, bass_boost: bool) -> Result<AudioStream, SoulError> {
        let key = (path.to_path_buf(), bass_boost);
        if let Some(pcm) = self.entries.get(&key) {
            return Ok(AudioStream::new(pcm.clone(), looped));
        }
        let bass = bass_boost.then_some(self.bass);
        let pcm = Arc::new(DecodedPcm::load(path, bass, self.output_rate)?);
        self.entries.insert(key, pcm.clone());
        Ok(AudioStream::new(pcm, looped))
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Engine thread
// ─────────────────────────────────────────────────────────────────────────────

/// Spawn the audio engine. Returns the command sender and the thread
/// handle the coordinator watches for liveness.
pub fn spawn_audio(cfg: Config) -> (Sender<Command>, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = bounded::<Command>(64);
    let handle = thread::Builder::new()
        .name("audio-engine".into())
        .spawn(move || {
            if let Err(e) = run_audio_engine(&cfg, &cmd_rx) {
                log::error!("Audio engine failed: {e}");
            }
        })
        .expect("Failed to spawn audio thread");
    (cmd_tx, handle)
}

/// True if the device exposes at least one stereo output configuration.
/// A substring can match mono hardware (e.g. a mic-monitor output),
/// which must not shadow the default stereo device.
fn supports_stereo(device: &cpal::Device) -> bool {
    device
        .supported_output_configs()
        .map(|mut configs| configs.any(|c| c.channels() >= 2))
        .unwrap_or(false)
}

/// Find the first output device whose name contains `substring`
/// (case-insensitive) and that can do stereo; fall back to the default
/// device.
fn find_output_device(host: &cpal::Host, substring: &str) -> Option<cpal::Device> {
    let sub = substring.to_lowercase();
    if !sub.is_empty() {
        if let Ok(devices) = host.output_devices() {
            for device in devices {
                let name = device.name().unwrap_or_default();
                if name.to_lowercase().contains(&sub) && supports_stereo(&device) {
                    log::info!("Found audio device '{name}'");
                    return Some(device);
                }
            }
        }
        log::warn!("Audio device '{substring}' not found; falling back to default output");
    }
    host.default_output_device()
}

fn run_audio_engine(cfg: &Config, cmd_rx: &Receiver<Command>) -> Result<(), SoulError> {
    log::info!("Audio engine starting");

    let mixer = Arc::new(Mixer::new());
    let mut cache = PcmCache::new(cfg);

    let host = cpal::default_host();
    let device = find_output_device(&host, &cfg.audio_device)
        .ok_or_else(|| SoulError::DeviceOpenFailed("no output device found".into()))?;

    let stream_config = cpal::StreamConfig {
        channels: cfg.audio_channels,
        sample_rate: cpal::SampleRate(cfg.audio_sample_rate),
        buffer_size: cpal::BufferSize::Fixed(cfg.audio_block_size),
    };

    let callback_mixer = mixer.clone();
    let sample_rate = cfg.audio_sample_rate;
    let out_stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // mix() zero-fills first, so any failure mode inside it
                // degrades to silence rather than stale buffer contents.
                callback_mixer.mix(data, sample_rate);
            },
            move |err| {
                log::error!("Audio stream error: {err}");
            },
            None,
        )
        .map_err(|e| SoulError::DeviceOpenFailed(e.to_string()))?;
    out_stream
        .play()
        .map_err(|e| SoulError::DeviceOpenFailed(e.to_string()))?;

    log::info!(
        "Audio output open: {} Hz, {} ch, block {}",
        cfg.audio_sample_rate,
        cfg.audio_channels,
        cfg.audio_block_size,
    );

    // Command loop. Blocks briefly so the cleanup sweep keeps running
    // while the channel is quiet.
    let mut last_diag = std::time::Instant::now();
    loop {
        match cmd_rx.recv_timeout(COMMAND_TIMEOUT) {
            Ok(cmd) => {
                if !handle_command(cmd, &mixer, &mut cache) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if crate::shutdown_requested() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        mixer.remove_inactive();

        if last_diag.elapsed() > Duration::from_secs(5) {
            last_diag = std::time::Instant::now();
            log::debug!("Mixer: {} stream(s) live", mixer.stream_count());
        }
    }

    mixer.stop_all();
    drop(out_stream);
    log::info!("Audio engine exiting");
    Ok(())
}

/// React to one command. Returns false when the engine should shut down.
fn handle_command(cmd: Command, mixer: &Mixer, cache: &mut PcmCache) -> bool {
    match cmd {
        Command::PlayAmbient {
            path,
            looped,
            fade_ms,
        } => match cache.open(&path, looped, false) {
            Ok(mut stream) => {
                stream.set_volume(0.0);
                mixer.add_stream("ambient", stream);
                mixer.fade_stream("ambient", 1.0, fade_ms as f32);
                log::info!("Playing ambient: {}", path.display());
            }
            Err(e) => log::error!("PLAY_AMBIENT dropped: {e}"),
        },

        Command::StopAmbient { fade_ms } => {
            if mixer.fade_stream("ambient", 0.0, fade_ms as f32) {
                // Removed by the cleanup sweep once the fade lands.
                log::info!("Fading out ambient");
            }
        }

        Command::PlayHeartbeat {
            region_id,
            path,
            looped,
            bass_boost,
            fade_ms,
        } => {
            let name = heartbeat_stream_name(&region_id);
            match cache.open(&path, looped, bass_boost) {
                Ok(mut stream) => {
                    stream.set_volume(0.0);
                    mixer.add_stream(&name, stream);
                    mixer.fade_stream(&name, 1.0, fade_ms as f32);
                    log::info!("Playing heartbeat '{name}': {}", path.display());
                }
                Err(e) => log::error!("PLAY_HEARTBEAT dropped: {e}"),
            }
        }

        Command::StopHeartbeat { region_id, fade_ms } => {
            let name = heartbeat_stream_name(&region_id);
            if mixer.fade_stream(&name, 0.0, fade_ms as f32) {
                log::info!("Fading out heartbeat '{name}'");
            }
        }

        Command::SetVolume { stream, volume } => {
            if mixer.set_stream_volume(&stream, volume) {
                log::debug!("Set volume of '{stream}' to {volume:.2}");
            } else {
                log::warn!("SET_VOLUME: stream '{stream}' not found");
            }
        }

        Command::FadeAll { target, fade_ms } => {
            mixer.fade_all(target, fade_ms as f32);
            log::info!("Fading all streams to {target:.2} over {fade_ms} ms");
        }

        Command::StopAll => {
            mixer.stop_all();
            cache.clear();
            log::info!("All streams stopped");
        }

        Command::Shutdown => {
            log::info!("Audio shutdown command received");
            mixer.stop_all();
            cache.clear();
            return false;
        }

        other => {
            log::warn!("Audio engine ignoring non-audio command: {other:?}");
        }
    }
    true
}

/// Mixer stream name for a region's heartbeat.
pub fn heartbeat_stream_name(region_id: &str) -> String {
    format!("heartbeat_{region_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, channels: u16, num_frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..num_frames {
            for ch in 0..channels {
                let v = ((i as i32 % 100) - 50) * (ch as i32 + 1) * 100;
                w.write_sample(v as i16).unwrap();
            }
        }
        w.finalize().unwrap();
    }

    fn temp_wav(name: &str, channels: u16) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "soulframe_audio_{}_{}_{name}.wav",
            std::process::id(),
            channels
        ));
        write_test_wav(&path, channels, 256);
        path
    }

    #[test]
    fn test_cache_shares_decoded_pcm() {
        let cfg = Config::default();
        let mut cache = PcmCache::new(&cfg);
        let path = temp_wav("cache", 2);

        let a = cache.open(&path, true, false).unwrap();
        let b = cache.open(&path, true, false).unwrap();
        // One decode, two independent play cursors.
        assert_eq!(cache.entries.len(), 1);
        drop((a, b));

        // Bass-boosted variant is a distinct cache entry.
        cache.open(&path, true, true).unwrap();
        assert_eq!(cache.entries.len(), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_mono_wav_duplicated_to_stereo() {
        let path = temp_wav("mono", 1);
        let pcm = DecodedPcm::load(&path, None, 44_100).unwrap();
        assert_eq!(pcm.num_frames(), 256);
        for frame in pcm.frames.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_play_and_stop_heartbeat_dispatch() {
        let cfg = Config::default();
        let mixer = Mixer::new();
        let mut cache = PcmCache::new(&cfg);
        let path = temp_wav("hb", 2);

        assert!(handle_command(
            Command::PlayHeartbeat {
                region_id: "eyes".into(),
                path: path.clone(),
                looped: true,
                bass_boost: true,
                fade_ms: 100,
            },
            &mixer,
            &mut cache,
        ));
        assert!(mixer.has_stream("heartbeat_eyes"));
        assert!(mixer
            .with_stream("heartbeat_eyes", |s| s.is_fading())
            .unwrap());

        assert!(handle_command(
            Command::StopHeartbeat {
                region_id: "eyes".into(),
                fade_ms: 0,
            },
            &mixer,
            &mut cache,
        ));
        // Zero-duration fade snaps to silence; the sweep reaps it.
        mixer.remove_inactive();
        assert!(!mixer.has_stream("heartbeat_eyes"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_ambient_replaced_then_faded_out() {
        let cfg = Config::default();
        let mixer = Mixer::new();
        let mut cache = PcmCache::new(&cfg);
        let path = temp_wav("amb", 2);

        let play = Command::PlayAmbient {
            path: path.clone(),
            looped: true,
            fade_ms: 100,
        };
        assert!(handle_command(play.clone(), &mixer, &mut cache));
        assert!(mixer.has_stream("ambient"));

        // A second PLAY_AMBIENT retires the fading predecessor rather
        // than clicking it off.
        assert!(handle_command(play, &mixer, &mut cache));
        assert_eq!(mixer.stream_count(), 2);

        assert!(handle_command(
            Command::StopAmbient { fade_ms: 0 },
            &mixer,
            &mut cache
        ));
        mixer.remove_inactive();
        assert!(!mixer.has_stream("ambient"));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_drops_command() {
        let cfg = Config::default();
        let mixer = Mixer::new();
        let mut cache = PcmCache::new(&cfg);
        assert!(handle_command(
            Command::PlayAmbient {
                path: PathBuf::from("/nonexistent/ambient.wav"),
                looped: true,
                fade_ms: 100,
            },
            &mixer,
            &mut cache,
        ));
        assert_eq!(mixer.stream_count(), 0);
    }

    #[test]
    fn test_shutdown_stops_loop() {
        let cfg = Config::default();
        let mixer = Mixer::new();
        let mut cache = PcmCache::new(&cfg);
        assert!(!handle_command(Command::Shutdown, &mixer, &mut cache));
        assert_eq!(mixer.stream_count(), 0);
    }
}

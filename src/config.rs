// Runtime configuration: compiled defaults, every field overridable via a
// SOULFRAME_* environment variable. Invalid values fall back to the
// default with a warning rather than aborting the installation.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory containing image packages (one subdirectory each).
    pub gallery_dir: PathBuf,

    // ── Display ─────────────────────────────────────────────────────────
    pub display_width: u32,
    pub display_height: u32,
    pub display_fps: u32,

    // ── Camera (consumed by the external vision process / the sim role) ─
    pub camera_index: u32,
    pub camera_width: u32,
    pub camera_height: u32,
    pub camera_fps: u32,

    // ── Vision IPC ──────────────────────────────────────────────────────
    /// Name of the shared-memory segment the vision process writes.
    pub shm_name: String,
    /// How long the coordinator waits for the segment to appear.
    pub shm_connect_timeout_s: f32,
    /// Vision samples older than this are treated as "no face".
    pub vision_stale_timeout_s: f32,

    // ── Audio ───────────────────────────────────────────────────────────
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub audio_block_size: u32,
    /// Case-insensitive substring matched against output device names.
    pub audio_device: String,

    /// Bass boost for heartbeat streams (peaking EQ at the sub crossover).
    pub bass_center_hz: f32,
    pub bass_q: f32,
    pub bass_gain_db: f32,

    // ── State machine ───────────────────────────────────────────────────
    pub presence_distance_cm: f32,
    pub close_distance_cm: f32,
    pub presence_lost_timeout_s: f32,
    pub idle_face_lost_timeout_s: f32,
    pub gaze_dwell_ms: u32,
    pub gaze_min_confidence: f32,
    pub withdraw_gaze_away_timeout_s: f32,
    pub withdraw_fade_duration_s: f32,
    pub idle_image_cycle_s: f32,

    // ── Transitions ─────────────────────────────────────────────────────
    pub default_fade_in_ms: u32,
    pub default_fade_out_ms: u32,
    pub default_audio_crossfade_ms: u32,

    // ── Brain ───────────────────────────────────────────────────────────
    pub brain_tick_hz: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("content/gallery"),

            display_width: 1920,
            display_height: 1080,
            display_fps: 60,

            camera_index: 0,
            camera_width: 640,
            camera_height: 480,
            camera_fps: 30,

            shm_name: "soulframe_vision".to_string(),
            shm_connect_timeout_s: 10.0,
            vision_stale_timeout_s: 2.0,

            audio_sample_rate: 44_100,
            audio_channels: 2,
            audio_block_size: 1024,
            audio_device: "seeed".to_string(),

            bass_center_hz: 60.0,
            bass_q: 0.7,
            bass_gain_db: 12.0,

            presence_distance_cm: 300.0,
            close_distance_cm: 80.0,
            presence_lost_timeout_s: 3.0,
            idle_face_lost_timeout_s: 5.0,
            gaze_dwell_ms: 1500,
            gaze_min_confidence: 0.6,
            withdraw_gaze_away_timeout_s: 8.0,
            withdraw_fade_duration_s: 4.0,
            idle_image_cycle_s: 300.0,

            default_fade_in_ms: 2000,
            default_fade_out_ms: 2000,
            default_audio_crossfade_ms: 3000,

            brain_tick_hz: 30,
        }
    }
}

impl Config {
    /// Build the configuration from defaults plus SOULFRAME_* overrides.
    pub fn from_env() -> Self {
        let mut c = Self::default();

        if let Ok(dir) = env::var("SOULFRAME_GALLERY") {
            c.gallery_dir = PathBuf::from(dir);
        }
        if let Ok(name) = env::var("SOULFRAME_SHM_NAME") {
            if !name.is_empty() {
                c.shm_name = name;
            }
        }
        if let Ok(dev) = env::var("SOULFRAME_AUDIO_DEVICE") {
            c.audio_device = dev;
        }

        override_num("SOULFRAME_DISPLAY_WIDTH", &mut c.display_width);
        override_num("SOULFRAME_DISPLAY_HEIGHT", &mut c.display_height);
        override_num("SOULFRAME_DISPLAY_FPS", &mut c.display_fps);

        override_num("SOULFRAME_CAMERA_INDEX", &mut c.camera_index);
        override_num("SOULFRAME_CAMERA_WIDTH", &mut c.camera_width);
        override_num("SOULFRAME_CAMERA_HEIGHT", &mut c.camera_height);
        override_num("SOULFRAME_CAMERA_FPS", &mut c.camera_fps);

        override_num("SOULFRAME_SHM_TIMEOUT_S", &mut c.shm_connect_timeout_s);
        override_num("SOULFRAME_VISION_STALE_S", &mut c.vision_stale_timeout_s);

        override_num("SOULFRAME_AUDIO_RATE", &mut c.audio_sample_rate);
        override_num("SOULFRAME_AUDIO_CHANNELS", &mut c.audio_channels);
        override_num("SOULFRAME_AUDIO_BLOCK", &mut c.audio_block_size);

        override_num("SOULFRAME_BASS_CENTER_HZ", &mut c.bass_center_hz);
        override_num("SOULFRAME_BASS_Q", &mut c.bass_q);
        override_num("SOULFRAME_BASS_GAIN_DB", &mut c.bass_gain_db);

        override_num("SOULFRAME_PRESENCE_CM", &mut c.presence_distance_cm);
        override_num("SOULFRAME_CLOSE_CM", &mut c.close_distance_cm);
        override_num("SOULFRAME_PRESENCE_LOST_S", &mut c.presence_lost_timeout_s);
        override_num("SOULFRAME_FACE_LOST_S", &mut c.idle_face_lost_timeout_s);
        override_num("SOULFRAME_GAZE_DWELL_MS", &mut c.gaze_dwell_ms);
        override_num("SOULFRAME_GAZE_CONFIDENCE", &mut c.gaze_min_confidence);
        override_num("SOULFRAME_GAZE_AWAY_S", &mut c.withdraw_gaze_away_timeout_s);
        override_num("SOULFRAME_WITHDRAW_S", &mut c.withdraw_fade_duration_s);
        override_num("SOULFRAME_IMAGE_CYCLE_S", &mut c.idle_image_cycle_s);

        override_num("SOULFRAME_FADE_IN_MS", &mut c.default_fade_in_ms);
        override_num("SOULFRAME_FADE_OUT_MS", &mut c.default_fade_out_ms);
        override_num("SOULFRAME_CROSSFADE_MS", &mut c.default_audio_crossfade_ms);

        override_num("SOULFRAME_TICK_HZ", &mut c.brain_tick_hz);

        c
    }

    /// Duration of one brain tick.
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_micros(1_000_000 / u64::from(self.brain_tick_hz.max(1)))
    }
}

/// Overwrite `slot` with a parsed environment value if present and valid.
fn override_num<T>(key: &str, slot: &mut T)
where
    T: FromStr + Display + Copy,
{
    if let Ok(raw) = env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => {
                log::warn!("Ignoring invalid {key}='{raw}', keeping {slot}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.shm_name, "soulframe_vision");
        assert_eq!(c.audio_sample_rate, 44_100);
        assert_eq!(c.brain_tick_hz, 30);
        assert!((c.presence_distance_cm - 300.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_env_override_and_invalid_fallback() {
        env::set_var("SOULFRAME_PRESENCE_CM", "250");
        env::set_var("SOULFRAME_GAZE_DWELL_MS", "not-a-number");
        let c = Config::from_env();
        env::remove_var("SOULFRAME_PRESENCE_CM");
        env::remove_var("SOULFRAME_GAZE_DWELL_MS");

        assert!((c.presence_distance_cm - 250.0).abs() < f32::EPSILON);
        // Invalid value keeps the default.
        assert_eq!(c.gaze_dwell_ms, 1500);
    }

    #[test]
    fn test_tick_period() {
        let c = Config::default();
        assert_eq!(c.tick_period().as_micros(), 33_333);
    }
}

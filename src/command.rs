// Commands sent from the brain to the display and audio subsystems.
// Typed variants rather than a kind + parameter map, so a malformed
// command cannot be constructed.

use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ── Display ─────────────────────────────────────────────────────────
    LoadImage {
        path: PathBuf,
    },
    CrossfadeImage {
        path: PathBuf,
        duration_ms: u32,
    },
    SetEffect {
        effect: String,
        intensity: f32,
        fade_in_ms: u32,
        /// Effect-specific shader parameters from the region metadata.
        params: BTreeMap<String, f64>,
    },
    SetEffectIntensity {
        effect: String,
        intensity: f32,
    },
    SetVignette {
        intensity: f32,
    },
    SetParallax {
        gaze_x: f32,
        gaze_y: f32,
    },

    // ── Audio ───────────────────────────────────────────────────────────
    PlayAmbient {
        path: PathBuf,
        looped: bool,
        fade_ms: u32,
    },
    StopAmbient {
        fade_ms: u32,
    },
    PlayHeartbeat {
        region_id: String,
        path: PathBuf,
        looped: bool,
        bass_boost: bool,
        fade_ms: u32,
    },
    StopHeartbeat {
        region_id: String,
        fade_ms: u32,
    },
    SetVolume {
        stream: String,
        volume: f32,
    },
    FadeAll {
        target: f32,
        fade_ms: u32,
    },
    StopAll,

    // ── System ──────────────────────────────────────────────────────────
    Shutdown,
}

impl Command {
    /// True for commands the audio engine consumes (Shutdown goes to both).
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            Command::PlayAmbient { .. }
                | Command::StopAmbient { .. }
                | Command::PlayHeartbeat { .. }
                | Command::StopHeartbeat { .. }
                | Command::SetVolume { .. }
                | Command::FadeAll { .. }
                | Command::StopAll
        )
    }
}

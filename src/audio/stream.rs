// A single loopable audio source: pre-decoded stereo PCM with a linear
// volume fade envelope and an optional bass-boost EQ baked in at load
// time. Playback state lives per stream; the decoded PCM is shared via
// Arc so re-triggering a heartbeat does not re-read the file.

use std::path::Path;
use std::sync::Arc;

use crate::error::SoulError;

// ─────────────────────────────────────────────────────────────────────────────
//  Bass boost (Audio EQ Cookbook peaking filter)
// ─────────────────────────────────────────────────────────────────────────────

/// Peaking-EQ parameters for the heartbeat bass boost.
#[derive(Debug, Clone, Copy)]
pub struct BassBoost {
    pub center_hz: f32,
    pub q: f32,
    pub gain_db: f32,
}

/// Direct-form-I biquad. Coefficients from the Audio EQ Cookbook peaking
/// formulas, normalized by a0.
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    fn peaking(center_hz: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * center_hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    fn process(&mut self, x: f32) -> f32 {
        let x = f64::from(x);
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y as f32
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Decoded PCM
// ─────────────────────────────────────────────────────────────────────────────

/// Interleaved stereo f32 frames decoded once at load time.
#[derive(Debug)]
pub struct DecodedPcm {
    pub frames: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedPcm {
    pub fn num_frames(&self) -> usize {
        self.frames.len() / 2
    }

    /// Decode a WAV file to interleaved stereo f32. Mono is duplicated to
    /// both channels; extra channels beyond two are dropped. A
    /// sample-rate mismatch with the output device is logged but not an
    /// error (playback will be pitch-shifted; resampling is out of scope).
    pub fn load(
        path: &Path,
        bass_boost: Option<BassBoost>,
        output_rate: u32,
    ) -> Result<Self, SoulError> {
        let load_err = |reason: String| SoulError::AudioLoadFailed {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = hound::WavReader::open(path).map_err(|e| load_err(e.to_string()))?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            return Err(load_err("zero channels".into()));
        }

        // Decode to f32 regardless of the on-disk sample format.
        let raw: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| load_err(e.to_string()))?,
            (hound::SampleFormat::Int, bits) if bits <= 32 => {
                let scale = 1.0 / (1i64 << (bits - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| load_err(e.to_string()))?
            }
            (fmt, bits) => {
                return Err(load_err(format!("unsupported format {fmt:?}/{bits}bit")));
            }
        };

        if spec.sample_rate != output_rate {
            log::warn!(
                "Sample-rate mismatch: {} is {} Hz, output is {} Hz — playback will be pitch-shifted",
                path.display(),
                spec.sample_rate,
                output_rate,
            );
        }

        // Fold to interleaved stereo.
        let num_frames = raw.len() / channels;
        let mut frames = Vec::with_capacity(num_frames * 2);
        for frame in raw.chunks_exact(channels) {
            let left = frame[0];
            let right = if channels >= 2 { frame[1] } else { frame[0] };
            frames.push(left);
            frames.push(right);
        }

        if num_frames == 0 {
            log::warn!("Audio file has zero frames: {}", path.display());
        }

        // Bass boost is applied once here, per channel, not per mix block.
        if let Some(bb) = bass_boost {
            let sr = f64::from(spec.sample_rate);
            let mut left = Biquad::peaking(bb.center_hz.into(), bb.q.into(), bb.gain_db.into(), sr);
            let mut right =
                Biquad::peaking(bb.center_hz.into(), bb.q.into(), bb.gain_db.into(), sr);
            for frame in frames.chunks_exact_mut(2) {
                frame[0] = left.process(frame[0]);
                frame[1] = right.process(frame[1]);
            }
            log::debug!("Bass boost applied to {}", path.display());
        }

        Ok(Self {
            frames,
            sample_rate: spec.sample_rate,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  AudioStream
// ─────────────────────────────────────────────────────────────────────────────

pub struct AudioStream {
    pcm: Arc<DecodedPcm>,
    looped: bool,

    /// Play cursor in frames.
    position: usize,
    finished: bool,

    volume: f32,
    fade_target: f32,
    /// Volume units per second; sign encodes direction.
    fade_rate: f32,
    fading: bool,
}

impl AudioStream {
    pub fn new(pcm: Arc<DecodedPcm>, looped: bool) -> Self {
        let finished = pcm.num_frames() == 0;
        Self {
            pcm,
            looped,
            position: 0,
            finished,
            volume: 0.0,
            fade_target: 0.0,
            fade_rate: 0.0,
            fading: false,
        }
    }

    // ── Playback ─────────────────────────────────────────────────────────

    /// Fill `out` (interleaved stereo, so `out.len() / 2` frames) from the
    /// play cursor. Wraps when looping; otherwise zero-fills the
    /// remainder and marks the stream finished.
    pub fn read(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let total = self.pcm.num_frames();
        if total == 0 {
            self.finished = true;
            return;
        }

        let mut remaining = out.len() / 2;
        let mut write = 0usize;
        while remaining > 0 {
            let available = total - self.position;
            if available == 0 {
                if self.looped {
                    self.position = 0;
                    continue;
                }
                self.finished = true;
                break; // rest stays zero
            }
            let chunk = remaining.min(available);
            let src = &self.pcm.frames[self.position * 2..(self.position + chunk) * 2];
            out[write * 2..(write + chunk) * 2].copy_from_slice(src);
            self.position += chunk;
            write += chunk;
            remaining -= chunk;
        }
        if self.position >= total && self.looped {
            self.position = 0;
        }
    }

    // ── Volume / fade ────────────────────────────────────────────────────

    /// Snap to a volume, cancelling any fade.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.fade_target = self.volume;
        self.fading = false;
    }

    /// Begin a linear volume transition over `duration_ms`.
    pub fn set_fade(&mut self, target_volume: f32, duration_ms: f32) {
        let target = target_volume.clamp(0.0, 1.0);
        if duration_ms <= 0.0 {
            self.set_volume(target);
            return;
        }
        if (self.volume - target).abs() < 1e-6 {
            self.volume = target;
            self.fade_target = target;
            self.fading = false;
            return;
        }
        self.fade_target = target;
        self.fade_rate = (target - self.volume) / (duration_ms / 1000.0);
        self.fading = true;
    }

    /// Advance the fade by `dt` seconds, clamping on overshoot.
    pub fn update(&mut self, dt: f32) {
        if !self.fading {
            return;
        }
        self.volume += self.fade_rate * dt;
        if (self.fade_rate > 0.0 && self.volume >= self.fade_target)
            || (self.fade_rate < 0.0 && self.volume <= self.fade_target)
        {
            self.volume = self.fade_target;
            self.fading = false;
        }
        self.volume = self.volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_fading(&self) -> bool {
        self.fading
    }

    /// Audible now, or fading toward audible.
    pub fn is_active(&self) -> bool {
        if self.finished {
            return false;
        }
        self.volume > 0.0 || (self.fading && self.fade_target > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_from_frames(frames: Vec<f32>, sample_rate: u32) -> Arc<DecodedPcm> {
        Arc::new(DecodedPcm {
            frames,
            sample_rate,
        })
    }

    fn ramp_pcm(num_frames: usize) -> Arc<DecodedPcm> {
        let mut frames = Vec::with_capacity(num_frames * 2);
        for i in 0..num_frames {
            let v = i as f32;
            frames.push(v);
            frames.push(-v);
        }
        pcm_from_frames(frames, 44_100)
    }

    #[test]
    fn test_read_loops_around() {
        let mut s = AudioStream::new(ramp_pcm(4), true);
        s.set_volume(1.0);
        let mut out = vec![0.0f32; 12]; // 6 frames from a 4-frame source
        s.read(&mut out);
        let lefts: Vec<f32> = out.chunks(2).map(|f| f[0]).collect();
        assert_eq!(lefts, vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0]);
        assert!(s.is_active()); // looping never finishes
    }

    #[test]
    fn test_read_zero_fills_and_finishes_when_not_looping() {
        let mut s = AudioStream::new(ramp_pcm(4), false);
        s.set_volume(1.0);
        let mut out = vec![9.9f32; 12];
        s.read(&mut out);
        let lefts: Vec<f32> = out.chunks(2).map(|f| f[0]).collect();
        assert_eq!(lefts, vec![0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
        assert!(!s.is_active());
    }

    #[test]
    fn test_fade_completes_and_clamps() {
        let mut s = AudioStream::new(ramp_pcm(8), true);
        s.set_volume(0.0);
        s.set_fade(1.0, 1000.0);
        assert!(s.is_fading());

        // Ten 100 ms steps cover the full second.
        for _ in 0..10 {
            s.update(0.1);
        }
        assert!((s.volume() - 1.0).abs() < 1e-6);
        assert!(!s.is_fading());

        // Overshoot clamps rather than oscillates.
        s.set_fade(0.0, 100.0);
        s.update(10.0);
        assert_eq!(s.volume(), 0.0);
        assert!(!s.is_fading());
    }

    #[test]
    fn test_set_fade_zero_duration_snaps() {
        let mut s = AudioStream::new(ramp_pcm(8), true);
        s.set_fade(0.7, 0.0);
        assert!((s.volume() - 0.7).abs() < 1e-6);
        assert!(!s.is_fading());
    }

    #[test]
    fn test_is_active_rules() {
        let mut s = AudioStream::new(ramp_pcm(8), true);
        // Silent and not fading: inactive.
        assert!(!s.is_active());
        // Fading toward audible: active even at volume 0.
        s.set_fade(1.0, 500.0);
        assert!(s.is_active());
        // Fading out from audible: still active until silent.
        s.set_volume(1.0);
        s.set_fade(0.0, 500.0);
        assert!(s.is_active());
        s.update(1.0);
        assert!(!s.is_active());
    }

    #[test]
    fn test_zero_frame_source_is_inactive() {
        let mut s = AudioStream::new(pcm_from_frames(vec![], 44_100), true);
        s.set_volume(1.0);
        assert!(!s.is_active());
        let mut out = vec![1.0f32; 8];
        s.read(&mut out);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_peaking_biquad_boosts_center_leaves_highs() {
        let sr = 44_100.0f64;
        // 12 dB boost at 60 Hz.
        let mut low = Biquad::peaking(60.0, 0.7, 12.0, sr);
        let mut high = Biquad::peaking(60.0, 0.7, 12.0, sr);

        let rms = |freq: f64, bq: &mut Biquad| -> f64 {
            let mut acc = 0.0f64;
            let n = 44_100usize;
            for i in 0..n {
                let x = (2.0 * std::f64::consts::PI * freq * i as f64 / sr).sin() as f32;
                let y = bq.process(x);
                // Skip the settling transient.
                if i > n / 4 {
                    acc += f64::from(y) * f64::from(y);
                }
            }
            acc.sqrt()
        };

        let low_rms = rms(60.0, &mut low);
        let high_rms = rms(8000.0, &mut high);
        // ~4x amplitude at the center, roughly unity far above it.
        assert!(low_rms > high_rms * 2.5);
    }
}

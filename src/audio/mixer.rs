// Summing mixer. A name→stream map behind one mutex shared by the
// command thread (insert/remove/fade requests) and the real-time device
// callback (mix). Fade envelopes advance inside mix() only, so there is
// a single writer for fade state and the lock hold time is bounded by
// the block size.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

use super::stream::AudioStream;

/// Replaced streams get this long to fade out under a retiring name, so
/// a replacement arriving mid-fade cannot click.
const RETIRE_FADE_MS: f32 = 200.0;

/// Scratch preallocation in samples; covers device blocks up to 4096
/// stereo frames without allocating in the callback.
const SCRATCH_SAMPLES: usize = 4096 * 2;

struct MixerInner {
    streams: HashMap<String, AudioStream>,
    master_volume: f32,
    scratch: Vec<f32>,
    retire_seq: u64,
}

pub struct Mixer {
    inner: Mutex<MixerInner>,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MixerInner {
                streams: HashMap::new(),
                master_volume: 1.0,
                scratch: vec![0.0; SCRATCH_SAMPLES],
                retire_seq: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MixerInner> {
        // A panic while holding the lock must not silence the callback
        // forever; the stream map is still structurally sound.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ── Stream management (command thread) ───────────────────────────────

    /// Install `stream` under `name`. An active stream already holding
    /// that name is re-keyed to a retiring slot and faded out quickly
    /// instead of being cut, then reaped by `remove_inactive`.
    pub fn add_stream(&self, name: &str, stream: AudioStream) {
        let mut inner = self.lock();
        if let Some(mut old) = inner.streams.remove(name) {
            if old.is_active() {
                inner.retire_seq += 1;
                let retire_name = format!("_retiring_{}_{}", name, inner.retire_seq);
                old.set_fade(0.0, RETIRE_FADE_MS);
                inner.streams.insert(retire_name, old);
            }
        }
        inner.streams.insert(name.to_string(), stream);
        log::debug!("Added stream '{name}'");
    }

    pub fn remove_stream(&self, name: &str) {
        if self.lock().streams.remove(name).is_some() {
            log::debug!("Removed stream '{name}'");
        }
    }

    pub fn has_stream(&self, name: &str) -> bool {
        self.lock().streams.contains_key(name)
    }

    /// Run `f` against the named stream, if present. Used by the
    /// dispatcher for targeted mutations and by tests for inspection.
    pub fn with_stream<R>(&self, name: &str, f: impl FnOnce(&mut AudioStream) -> R) -> Option<R> {
        self.lock().streams.get_mut(name).map(f)
    }

    /// Start a fade on one stream. Returns false if the name is unknown.
    pub fn fade_stream(&self, name: &str, target_volume: f32, duration_ms: f32) -> bool {
        self.with_stream(name, |s| s.set_fade(target_volume, duration_ms))
            .is_some()
    }

    /// Snap one stream's volume. Returns false if the name is unknown.
    pub fn set_stream_volume(&self, name: &str, volume: f32) -> bool {
        self.with_stream(name, |s| s.set_volume(volume)).is_some()
    }

    pub fn fade_all(&self, target_volume: f32, duration_ms: f32) {
        let mut inner = self.lock();
        for stream in inner.streams.values_mut() {
            stream.set_fade(target_volume, duration_ms);
        }
    }

    /// Remove every stream immediately, without fading.
    pub fn stop_all(&self) {
        let mut inner = self.lock();
        inner.streams.clear();
        log::debug!("All streams stopped and removed");
    }

    /// Reap streams that have finished fading to silence. Idempotent;
    /// called periodically from the command thread.
    pub fn remove_inactive(&self) -> usize {
        let mut inner = self.lock();
        let before = inner.streams.len();
        inner
            .streams
            .retain(|_, s| s.is_active() || s.volume() > 0.0);
        let removed = before - inner.streams.len();
        if removed > 0 {
            log::debug!("Removed {removed} inactive stream(s)");
        }
        removed
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.lock().master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn stream_count(&self) -> usize {
        self.lock().streams.len()
    }

    // ── Mixing (device callback) ─────────────────────────────────────────

    /// Sum all active streams into `out` (interleaved stereo), advancing
    /// each stream's fade by the block duration first. Output is clamped
    /// to [-1, +1]. Never fails; an empty mixer produces silence.
    pub fn mix(&self, out: &mut [f32], sample_rate: u32) {
        out.fill(0.0);
        if sample_rate == 0 {
            return;
        }
        let dt = (out.len() / 2) as f32 / sample_rate as f32;

        let mut inner = self.lock();
        let inner = &mut *inner;
        if inner.scratch.len() < out.len() {
            // Only hit when the device delivers a larger block than the
            // preallocation covers.
            inner.scratch.resize(out.len(), 0.0);
        }

        for stream in inner.streams.values_mut() {
            stream.update(dt);
            if !stream.is_active() {
                continue;
            }
            let vol = stream.volume();
            if vol <= 0.0 {
                continue;
            }
            let scratch = &mut inner.scratch[..out.len()];
            stream.read(scratch);
            for (o, s) in out.iter_mut().zip(scratch.iter()) {
                *o += s * vol;
            }
        }

        let master = inner.master_volume;
        for o in out.iter_mut() {
            *o = (*o * master).clamp(-1.0, 1.0);
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stream::DecodedPcm;
    use std::sync::Arc;

    const RATE: u32 = 44_100;

    fn constant_stream(value: f32, num_frames: usize) -> AudioStream {
        let pcm = DecodedPcm {
            frames: vec![value; num_frames * 2],
            sample_rate: RATE,
        };
        AudioStream::new(Arc::new(pcm), true)
    }

    #[test]
    fn test_mix_sums_and_scales() {
        let mixer = Mixer::new();
        let mut a = constant_stream(0.25, 64);
        a.set_volume(1.0);
        let mut b = constant_stream(0.5, 64);
        b.set_volume(0.5);
        mixer.add_stream("a", a);
        mixer.add_stream("b", b);

        let mut out = vec![0.0f32; 32];
        mixer.mix(&mut out, RATE);
        // 0.25 * 1.0 + 0.5 * 0.5 = 0.5
        for &v in &out {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mix_output_clamped() {
        let mixer = Mixer::new();
        for i in 0..4 {
            let mut s = constant_stream(0.9, 64);
            s.set_volume(1.0);
            mixer.add_stream(&format!("s{i}"), s);
        }
        let mut out = vec![0.0f32; 32];
        mixer.mix(&mut out, RATE);
        for &v in &out {
            assert!(v <= 1.0);
        }
    }

    #[test]
    fn test_fade_completes_across_mix_calls() {
        let mixer = Mixer::new();
        let s = constant_stream(1.0, 8192);
        mixer.add_stream("s", s);
        mixer.fade_stream("s", 1.0, 1000.0);

        // Ten mixes of 100 ms of audio each; loudness grows monotonically.
        let block = RATE as usize / 10;
        let mut out = vec![0.0f32; block * 2];
        let mut prev_level = -1.0f32;
        for _ in 0..10 {
            mixer.mix(&mut out, RATE);
            let level: f32 = out.iter().map(|v| v.abs()).sum::<f32>() / out.len() as f32;
            assert!(level >= prev_level - 1e-4);
            prev_level = level;
        }

        let (vol, fading) = mixer
            .with_stream("s", |s| (s.volume(), s.is_fading()))
            .unwrap();
        assert!((vol - 1.0).abs() < 1e-5);
        assert!(!fading);
    }

    #[test]
    fn test_add_stream_retires_active_predecessor() {
        let mixer = Mixer::new();
        let mut old = constant_stream(0.5, 64);
        old.set_volume(1.0);
        mixer.add_stream("ambient", old);

        let mut new = constant_stream(0.5, 64);
        new.set_volume(1.0);
        mixer.add_stream("ambient", new);

        // Old stream lives on under a retiring slot while it fades.
        assert_eq!(mixer.stream_count(), 2);
        assert!(mixer.has_stream("ambient"));

        // Run the retiring fade to completion, then reap.
        let mut out = vec![0.0f32; (RATE as usize / 2) * 2];
        mixer.mix(&mut out, RATE); // 500 ms ≫ 200 ms retire fade
        mixer.remove_inactive();
        assert_eq!(mixer.stream_count(), 1);
        assert!(mixer.has_stream("ambient"));
    }

    #[test]
    fn test_add_stream_inactive_predecessor_simply_replaced() {
        let mixer = Mixer::new();
        mixer.add_stream("ambient", constant_stream(0.5, 64)); // volume 0, inactive
        mixer.add_stream("ambient", constant_stream(0.5, 64));
        assert_eq!(mixer.stream_count(), 1);
    }

    #[test]
    fn test_remove_inactive_is_idempotent() {
        let mixer = Mixer::new();
        mixer.add_stream("quiet", constant_stream(0.5, 64));
        assert_eq!(mixer.remove_inactive(), 1);
        assert_eq!(mixer.remove_inactive(), 0);
        assert_eq!(mixer.stream_count(), 0);
    }

    #[test]
    fn test_fade_all_touches_every_stream() {
        let mixer = Mixer::new();
        for i in 0..3 {
            let mut s = constant_stream(0.2, 64);
            s.set_volume(1.0);
            mixer.add_stream(&format!("s{i}"), s);
        }
        mixer.fade_all(0.0, 100.0);
        for i in 0..3 {
            assert!(mixer
                .with_stream(&format!("s{i}"), |s| s.is_fading())
                .unwrap());
        }
    }

    #[test]
    fn test_stop_all_clears_immediately() {
        let mixer = Mixer::new();
        mixer.add_stream("a", constant_stream(0.2, 64));
        mixer.add_stream("b", constant_stream(0.2, 64));
        mixer.stop_all();
        assert_eq!(mixer.stream_count(), 0);
        let mut out = vec![1.0f32; 16];
        mixer.mix(&mut out, RATE);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_master_volume_applied() {
        let mixer = Mixer::new();
        let mut s = constant_stream(0.8, 64);
        s.set_volume(1.0);
        mixer.add_stream("s", s);
        mixer.set_master_volume(0.5);
        let mut out = vec![0.0f32; 16];
        mixer.mix(&mut out, RATE);
        for &v in &out {
            assert!((v - 0.4).abs() < 1e-6);
        }
    }
}

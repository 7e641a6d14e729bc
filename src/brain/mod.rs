// Brain coordinator. One 30 Hz tick: read the seqlock, smooth, run the
// interaction model and the state machine, and dispatch idempotent,
// rate-limited commands to the display and audio subsystems.

pub mod image_manager;
pub mod interaction;
pub mod state_machine;

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::audio::{self, DEFAULT_FADE_IN_MS, DEFAULT_FADE_OUT_MS};
use crate::command::Command;
use crate::config::Config;
use crate::display;
use crate::error::SoulError;
use crate::ipc::{FaceSample, VisionShmReader};
use crate::smoothing::{DistanceSmoother, GazeSmoother};
use image_manager::{ImageManager, ImagePackage};
use interaction::{InteractionModel, InteractionResult};
use state_machine::{FsmInput, InteractionState, StateMachine};

/// Below this change, parallax updates are suppressed.
const GAZE_EPSILON: f32 = 0.005;
/// Below this change, volume updates are suppressed.
const VOLUME_EPSILON: f32 = 0.01;
/// EMA alpha for gaze smoothing.
const GAZE_ALPHA: f32 = 0.25;
/// Bounded wait for subsystem threads on shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
//  Transition command recipes
// ─────────────────────────────────────────────────────────────────────────────

/// Commands emitted for a single state transition, in dispatch order.
/// Pure so the recipes are testable without channels.
fn transition_commands(
    old: InteractionState,
    new: InteractionState,
    pkg: &ImagePackage,
    dwell_regions: &[String],
    cfg: &Config,
) -> Vec<Command> {
    use InteractionState::*;
    let mut cmds = Vec::new();

    match (old, new) {
        (Idle, Presence) => {
            if let Some(ambient) = &pkg.meta.ambient {
                match pkg.media_path(&ambient.file) {
                    Ok(path) => cmds.push(Command::PlayAmbient {
                        path,
                        looped: ambient.looped,
                        fade_ms: DEFAULT_FADE_IN_MS,
                    }),
                    Err(e) => log::warn!("Ambient for '{}' skipped: {e}", pkg.meta.id),
                }
            }
            cmds.push(set_effect("kenburns", 0.3, 0, &[]));
            cmds.push(set_effect("parallax", 0.2, 0, &[]));
        }

        (Presence, Engaged) => {
            for rid in dwell_regions {
                let Some(region) = pkg.meta.regions.iter().find(|r| &r.id == rid) else {
                    continue;
                };
                for ve in &region.visual_effects {
                    if ve.trigger != "on_gaze_dwell" {
                        continue;
                    }
                    let mut params: Vec<(&str, f64)> =
                        ve.params.iter().map(|(k, v)| (k.as_str(), *v)).collect();
                    if ve.effect_type == "breathing" {
                        if !ve.params.contains_key("amplitude") {
                            params.push(("amplitude", 0.008));
                        }
                        if !ve.params.contains_key("frequency") {
                            params.push(("frequency", 0.25));
                        }
                    }
                    cmds.push(set_effect(&ve.effect_type, 0.6, ve.fade_in_ms, &params));
                }
            }
        }

        (Engaged, CloseInteraction) => {
            cmds.push(Command::SetVignette { intensity: 0.8 });
            cmds.push(Command::SetEffectIntensity {
                effect: "breathing".into(),
                intensity: 1.0,
            });
        }

        (CloseInteraction, Engaged) => {
            cmds.push(Command::SetVignette { intensity: 0.0 });
            cmds.push(Command::SetEffectIntensity {
                effect: "breathing".into(),
                intensity: 0.6,
            });
        }

        (_, Withdrawing) => {
            let fade_ms = if pkg.meta.fade_out_ms > 0 {
                pkg.meta.fade_out_ms
            } else {
                cfg.default_fade_out_ms
            };
            cmds.push(Command::FadeAll {
                target: 0.0,
                fade_ms,
            });
            cmds.push(Command::SetEffectIntensity {
                effect: "breathing".into(),
                intensity: 0.0,
            });
            cmds.push(Command::SetVignette { intensity: 0.0 });
            cmds.push(Command::SetParallax {
                gaze_x: 0.5,
                gaze_y: 0.5,
            });
        }

        (Withdrawing, Idle) => {
            cmds.push(Command::StopAll);
            cmds.push(Command::SetEffectIntensity {
                effect: "kenburns".into(),
                intensity: 0.0,
            });
            cmds.push(Command::SetEffectIntensity {
                effect: "parallax".into(),
                intensity: 0.0,
            });
        }

        _ => {}
    }

    cmds
}

fn set_effect(effect: &str, intensity: f32, fade_in_ms: u32, params: &[(&str, f64)]) -> Command {
    Command::SetEffect {
        effect: effect.to_string(),
        intensity,
        fade_in_ms,
        params: params.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Coordinator
// ─────────────────────────────────────────────────────────────────────────────

pub struct Coordinator {
    cfg: Config,
    reader: VisionShmReader,
    images: ImageManager,
    display_tx: Sender<Command>,
    audio_tx: Sender<Command>,

    fsm: StateMachine,
    model: InteractionModel,
    gaze: GazeSmoother,
    distance: DistanceSmoother,

    /// Last smoothed sample the tick acted on.
    current: FaceSample,
    /// When the last fresh sample arrived from the reader.
    last_fresh: Instant,

    /// True once PLAY_AMBIENT was emitted for this image session.
    ambient_started: bool,
    /// Started heartbeats: region id → start time (for the fade-in grace).
    heartbeats: HashMap<String, Instant>,

    // Previously sent values, for epsilon rate-limiting.
    sent_parallax: Option<(f32, f32)>,
    sent_ambient_volume: Option<f32>,
    sent_heartbeat_volume: HashMap<String, f32>,
}

impl Coordinator {
    pub fn new(
        cfg: Config,
        reader: VisionShmReader,
        images: ImageManager,
        display_tx: Sender<Command>,
        audio_tx: Sender<Command>,
    ) -> Self {
        let fsm = StateMachine::new(&cfg);
        let model = InteractionModel::new(cfg.close_distance_cm, cfg.presence_distance_cm);
        Self {
            cfg,
            reader,
            images,
            display_tx,
            audio_tx,
            fsm,
            model,
            gaze: GazeSmoother::new(GAZE_ALPHA),
            distance: DistanceSmoother::new(),
            current: FaceSample::default(),
            last_fresh: Instant::now(),
            ambient_started: false,
            heartbeats: HashMap::new(),
            sent_parallax: None,
            sent_ambient_volume: None,
            sent_heartbeat_volume: HashMap::new(),
        }
    }

    pub fn state(&self) -> InteractionState {
        self.fsm.state()
    }

    /// Show the first image and apply its thresholds.
    pub fn start(&mut self) {
        if let Some(pkg) = self.images.current() {
            if let Some(path) = pkg.image_path() {
                self.send_display(Command::LoadImage { path });
            }
            self.apply_image_thresholds();
        }
    }

    /// One coordinator tick.
    pub fn tick(&mut self, dt: f32) {
        let stale = Duration::from_secs_f32(self.cfg.vision_stale_timeout_s);

        // 1. Read vision, smooth, or degrade to stale handling.
        if let Some(sample) = self.reader.read() {
            if self.last_fresh.elapsed() > stale {
                // The feed stalled and recovered; old filter state would
                // drag the new readings.
                self.gaze.reset();
                self.distance.reset();
            }
            self.last_fresh = Instant::now();
            self.current = self.smooth(sample);
        } else if self.last_fresh.elapsed() > stale && self.current.face_detected() {
            log::warn!("Vision data stale, assuming no face");
            self.current = FaceSample {
                frame_counter: self.current.frame_counter,
                ..Default::default()
            };
            self.gaze.reset();
            self.distance.reset();
        }

        // 2. Interaction model (regions withheld while WITHDRAWING).
        let result = if self.fsm.state() == InteractionState::Withdrawing {
            self.model.update(&self.current, &[], dt)
        } else {
            match self.images.current() {
                Some(pkg) => self.model.update(&self.current, &pkg.meta.regions, dt),
                None => self.model.update(&self.current, &[], dt),
            }
        };

        // 3. State machine, with the current image's thresholds applied.
        self.apply_image_thresholds();
        let transition = self.fsm.update(&FsmInput {
            face_detected: self.current.face_detected(),
            distance_cm: self.current.face_distance_cm,
            gaze_confidence: self.current.gaze_confidence,
            active_regions: &result.active_regions,
            dwell_regions: &result.dwell_regions,
            min_active_confidence: result.min_active_confidence,
            dt,
        });

        // 4. Transition command set.
        if let Some((old, new)) = transition {
            self.on_transition(old, new, &result.dwell_regions);
        }

        // 5. Continuous, epsilon-gated updates.
        if matches!(
            self.fsm.state(),
            InteractionState::Presence | InteractionState::Engaged | InteractionState::CloseInteraction
        ) {
            self.update_parallax();
            self.update_ambient_volume();
            self.update_heartbeats(&result);
        }

        // 6. Idle image cycling.
        if self.fsm.should_cycle_image() {
            self.cycle_image();
        }
    }

    // ── Tick helpers ─────────────────────────────────────────────────────

    fn smooth(&mut self, sample: FaceSample) -> FaceSample {
        let mut smoothed = sample;
        if sample.face_detected() {
            let (gx, gy) = self.gaze.update(sample.gaze_x, sample.gaze_y);
            smoothed.gaze_x = gx;
            smoothed.gaze_y = gy;
            smoothed.face_distance_cm = self.distance.update(sample.face_distance_cm);
        }
        smoothed
    }

    fn apply_image_thresholds(&mut self) {
        if let Some(pkg) = self.images.current() {
            self.fsm.set_thresholds(
                pkg.meta.presence_distance_cm,
                pkg.meta.close_distance_cm,
                self.cfg.withdraw_fade_duration_s,
            );
            self.model
                .set_distance_thresholds(pkg.meta.close_distance_cm, pkg.meta.presence_distance_cm);
        }
    }

    fn on_transition(&mut self, old: InteractionState, new: InteractionState, dwell: &[String]) {
        let Some(pkg) = self.images.current() else {
            return;
        };
        let cmds = transition_commands(old, new, pkg, dwell, &self.cfg);
        let plays_ambient = cmds
            .iter()
            .any(|c| matches!(c, Command::PlayAmbient { .. }));
        for cmd in cmds {
            self.route(cmd);
        }

        if plays_ambient {
            self.ambient_started = true;
        }
        match new {
            InteractionState::Withdrawing => {
                // Everything audible is fading to zero; heartbeats must
                // restart from scratch on the next engagement.
                self.heartbeats.clear();
                self.sent_heartbeat_volume.clear();
                self.sent_ambient_volume = None;
                self.sent_parallax = None;
            }
            InteractionState::Idle => {
                self.ambient_started = false;
            }
            _ => {}
        }
    }

    fn update_parallax(&mut self) {
        let (gx, gy) = (self.current.gaze_x, self.current.gaze_y);
        let changed = match self.sent_parallax {
            None => true,
            Some((px, py)) => (gx - px).abs() > GAZE_EPSILON || (gy - py).abs() > GAZE_EPSILON,
        };
        if changed {
            self.send_display(Command::SetParallax {
                gaze_x: gx,
                gaze_y: gy,
            });
            self.sent_parallax = Some((gx, gy));
        }
    }

    fn update_ambient_volume(&mut self) {
        if !self.ambient_started {
            return;
        }
        let Some(pkg) = self.images.current() else {
            return;
        };
        let Some(ambient) = &pkg.meta.ambient else {
            return;
        };
        if !self.current.face_detected() {
            return;
        }
        let volume = ambient.fade_curve.volume_at(
            self.current.face_distance_cm,
            ambient.fade_in_distance_cm,
            ambient.fade_in_complete_cm,
        );
        let changed = match self.sent_ambient_volume {
            None => true,
            Some(prev) => (volume - prev).abs() > VOLUME_EPSILON,
        };
        if changed {
            self.send_audio(Command::SetVolume {
                stream: "ambient".into(),
                volume,
            });
            self.sent_ambient_volume = Some(volume);
        }
    }

    fn update_heartbeats(&mut self, result: &InteractionResult) {
        let Some(pkg) = self.images.current() else {
            return;
        };
        let distance = self.current.face_distance_cm;
        let mut to_send: Vec<Command> = Vec::new();

        for rid in &result.dwell_regions {
            let Some(region) = pkg.meta.regions.iter().find(|r| &r.id == rid) else {
                continue;
            };
            let Some(hb) = &region.heartbeat else {
                continue;
            };

            match self.heartbeats.get(rid).copied() {
                None => match pkg.media_path(&hb.file) {
                    Ok(path) => {
                        to_send.push(Command::PlayHeartbeat {
                            region_id: rid.clone(),
                            path,
                            looped: hb.looped,
                            bass_boost: hb.bass_boost,
                            fade_ms: hb.fade_in_ms,
                        });
                        self.heartbeats.insert(rid.clone(), Instant::now());
                    }
                    Err(e) => log::warn!("Heartbeat for region '{rid}' skipped: {e}"),
                },
                Some(started) => {
                    // Let the startup fade finish before modulating, or the
                    // first SET_VOLUME would snap it loud.
                    let grace = Duration::from_millis(u64::from(hb.fade_in_ms));
                    if started.elapsed() < grace {
                        continue;
                    }
                    let volume =
                        hb.curve
                            .volume_at(distance, hb.max_distance_cm, hb.min_distance_cm);
                    let changed = match self.sent_heartbeat_volume.get(rid) {
                        None => true,
                        Some(prev) => (volume - prev).abs() > VOLUME_EPSILON,
                    };
                    if changed {
                        to_send.push(Command::SetVolume {
                            stream: audio::heartbeat_stream_name(rid),
                            volume,
                        });
                        self.sent_heartbeat_volume.insert(rid.clone(), volume);
                    }
                }
            }
        }

        // Heartbeats whose region is no longer dwelled fade out and are
        // forgotten.
        let stopped: Vec<String> = self
            .heartbeats
            .keys()
            .filter(|rid| !result.dwell_regions.contains(*rid))
            .cloned()
            .collect();
        for rid in stopped {
            to_send.push(Command::StopHeartbeat {
                region_id: rid.clone(),
                fade_ms: DEFAULT_FADE_OUT_MS,
            });
            self.heartbeats.remove(&rid);
            self.sent_heartbeat_volume.remove(&rid);
        }

        for cmd in to_send {
            self.send_audio(cmd);
        }
    }

    fn cycle_image(&mut self) {
        let Some(pkg) = self.images.next() else {
            return;
        };
        let path = pkg.image_path();
        let fade_ms = pkg.meta.fade_in_ms;
        let crossfade_ms = pkg.meta.audio_crossfade_ms;
        let title = pkg.meta.title.clone();
        log::info!("Idle cycle to image '{title}'");

        if let Some(path) = path {
            self.send_display(Command::CrossfadeImage {
                path,
                duration_ms: fade_ms,
            });
        }
        self.send_audio(Command::FadeAll {
            target: 0.0,
            fade_ms: crossfade_ms,
        });

        self.gaze.reset();
        self.distance.reset();
        self.model.reset();
        self.fsm.reset();
        self.heartbeats.clear();
        self.sent_heartbeat_volume.clear();
        self.sent_ambient_volume = None;
        self.sent_parallax = None;
        self.ambient_started = false;
        self.apply_image_thresholds();
    }

    fn route(&self, cmd: Command) {
        if cmd.is_audio() {
            self.send_audio(cmd);
        } else {
            self.send_display(cmd);
        }
    }

    fn send_display(&self, cmd: Command) {
        if self.display_tx.send(cmd).is_err() {
            log::warn!("Display channel closed");
        }
    }

    fn send_audio(&self, cmd: Command) {
        if self.audio_tx.send(cmd).is_err() {
            log::warn!("Audio channel closed");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Run loop
// ─────────────────────────────────────────────────────────────────────────────

/// Paces the tick loop against absolute deadlines so per-tick overhead
/// does not accumulate as drift. OS sleep granularity (~1 ms) is coarse
/// next to a 33 ms tick, so each wait sleeps the bulk and spins a final
/// slack window sized from the tick period itself.
struct TickPacer {
    period: Duration,
    spin_slack: Duration,
    next: Instant,
}

impl TickPacer {
    fn new(period: Duration) -> Self {
        let spin_slack =
            (period / 16).clamp(Duration::from_micros(200), Duration::from_millis(2));
        Self {
            period,
            spin_slack,
            next: Instant::now() + period,
        }
    }

    fn wait(&mut self) {
        self.next += self.period;
        let now = Instant::now();
        if self.next < now {
            // A slow tick put us behind; restart the timeline rather
            // than racing through catch-up ticks.
            self.next = now;
            return;
        }
        let wake = self.next - self.spin_slack;
        if now < wake {
            thread::sleep(wake - now);
        }
        while Instant::now() < self.next {
            std::hint::spin_loop();
        }
    }
}

/// Run the full installation: spawn the audio and display threads,
/// attach to the vision segment, and drive the coordinator loop until
/// shutdown.
pub fn run(cfg: Config) -> Result<(), SoulError> {
    let mut images = ImageManager::new(cfg.gallery_dir.clone());
    if images.scan(&cfg) == 0 {
        return Err(SoulError::MetadataInvalid {
            path: cfg.gallery_dir.clone(),
            reason: "no loadable image packages".into(),
        });
    }

    let reader = VisionShmReader::connect(
        &cfg.shm_name,
        Duration::from_secs_f32(cfg.shm_connect_timeout_s),
    )?;

    let (audio_tx, audio_handle) = audio::spawn_audio(cfg.clone());
    let (display_tx, display_handle) = display::spawn_display(&cfg);

    let mut coordinator = Coordinator::new(
        cfg.clone(),
        reader,
        images,
        display_tx.clone(),
        audio_tx.clone(),
    );
    coordinator.start();

    let period = cfg.tick_period();
    let dt = period.as_secs_f32();
    let mut pacer = TickPacer::new(period);
    log::info!("Brain loop running at {} Hz", cfg.brain_tick_hz);

    loop {
        if crate::shutdown_requested() {
            log::info!("Shutdown requested");
            break;
        }
        // Liveness: a dead subsystem takes the installation down
        // gracefully rather than leaving it half-alive.
        if audio_handle.is_finished() {
            log::error!("Audio engine exited unexpectedly, shutting down");
            break;
        }
        if display_handle.is_finished() {
            log::error!("Display sink exited unexpectedly, shutting down");
            break;
        }

        coordinator.tick(dt);
        pacer.wait();
    }

    // Orderly shutdown: both subsystems get SHUTDOWN, then a bounded join.
    let _ = audio_tx.send(Command::Shutdown);
    let _ = display_tx.send(Command::Shutdown);
    join_with_timeout("audio", audio_handle, JOIN_TIMEOUT);
    join_with_timeout("display", display_handle, JOIN_TIMEOUT);
    log::info!("Soul Frame stopped");
    Ok(())
}

/// Join a subsystem thread, giving up (and detaching it) after `timeout`.
fn join_with_timeout(name: &str, handle: thread::JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("{name} thread did not stop within {timeout:?}, detaching");
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    let _ = handle.join();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::VisionShmWriter;
    use crossbeam_channel::{unbounded, Receiver};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    const DT: f32 = 1.0 / 32.0;

    static TEST_ID: AtomicU64 = AtomicU64::new(0);

    struct Rig {
        writer: VisionShmWriter,
        coordinator: Coordinator,
        display_rx: Receiver<Command>,
        audio_rx: Receiver<Command>,
        gallery: PathBuf,
        frame: u32,
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            fs::remove_dir_all(&self.gallery).ok();
        }
    }

    const METADATA: &str = r#"{
        "id": "scene",
        "title": "Scene",
        "image": { "filename": "pic.jpg" },
        "audio": {
            "ambient": {
                "file": "audio/ambient.wav",
                "fade_in_distance_cm": 200,
                "fade_in_complete_cm": 100,
                "fade_curve": "linear"
            }
        },
        "interaction": {
            "min_interaction_distance_cm": 300,
            "close_interaction_distance_cm": 80
        },
        "regions": [
            {
                "id": "r1",
                "shape": { "points_normalized": [[0.2, 0.2], [0.8, 0.2], [0.8, 0.8], [0.2, 0.8]] },
                "gaze_trigger": { "dwell_time_ms": 1500, "min_confidence": 0.6 },
                "heartbeat": {
                    "file": "audio/heart.wav",
                    "fade_in_ms": 100,
                    "intensity_by_distance": { "max_distance_cm": 150, "min_distance_cm": 30, "curve": "linear" }
                },
                "visual_effects": [
                    { "type": "breathing", "trigger": "on_gaze_dwell", "fade_in_ms": 3000 }
                ]
            }
        ]
    }"#;

    fn build_rig(metadata: &str) -> Rig {
        let id = TEST_ID.fetch_add(1, Ordering::Relaxed);
        let tag = format!("{}_{}", std::process::id(), id);

        let gallery = std::env::temp_dir().join(format!("soulframe_brain_{tag}"));
        let pkg_dir = gallery.join("scene");
        fs::create_dir_all(pkg_dir.join("audio")).unwrap();
        fs::write(pkg_dir.join("metadata.json"), metadata).unwrap();
        fs::write(pkg_dir.join("pic.jpg"), b"jpeg").unwrap();
        fs::write(pkg_dir.join("audio/ambient.wav"), b"wav").unwrap();
        fs::write(pkg_dir.join("audio/heart.wav"), b"wav").unwrap();

        let cfg = Config {
            gallery_dir: gallery.clone(),
            ..Config::default()
        };

        let shm_name = format!("soulframe_brain_test_{tag}");
        let writer = VisionShmWriter::create(&shm_name).unwrap();
        let reader = VisionShmReader::connect(&shm_name, Duration::from_secs(1)).unwrap();

        let mut images = ImageManager::new(gallery.clone());
        assert_eq!(images.scan(&cfg), 1);

        let (display_tx, display_rx) = unbounded();
        let (audio_tx, audio_rx) = unbounded();
        let mut coordinator = Coordinator::new(cfg, reader, images, display_tx, audio_tx);
        coordinator.start();

        let rig = Rig {
            writer,
            coordinator,
            display_rx,
            audio_rx,
            gallery,
            frame: 0,
        };
        // Drain the startup LOAD_IMAGE.
        let startup: Vec<Command> = rig.display_rx.try_iter().collect();
        assert!(matches!(startup[0], Command::LoadImage { .. }));
        rig
    }

    impl Rig {
        fn feed(&mut self, num_faces: u32, distance: f32, gaze: (f32, f32), confidence: f32) {
            self.frame += 1;
            self.writer.write(&FaceSample {
                frame_counter: self.frame,
                num_faces,
                face_distance_cm: distance,
                gaze_x: gaze.0,
                gaze_y: gaze.1,
                gaze_confidence: confidence,
                head_yaw: 0.0,
                head_pitch: 0.0,
                timestamp_ns: u64::from(self.frame) * 33_000_000,
            });
            self.coordinator.tick(DT);
        }

        fn drain_audio(&self) -> Vec<Command> {
            self.audio_rx.try_iter().collect()
        }

        fn drain_display(&self) -> Vec<Command> {
            self.display_rx.try_iter().collect()
        }
    }

    #[test]
    fn test_presence_entry_emits_ambient_then_effects() {
        let mut rig = build_rig(METADATA);
        rig.feed(1, 250.0, (0.5, 0.5), 0.9);
        assert_eq!(rig.coordinator.state(), InteractionState::Presence);

        let audio = rig.drain_audio();
        assert!(matches!(
            audio[0],
            Command::PlayAmbient { fade_ms: 500, .. }
        ));

        let display = rig.drain_display();
        assert!(matches!(
            &display[0],
            Command::SetEffect { effect, intensity, .. }
                if effect == "kenburns" && (*intensity - 0.3).abs() < 1e-6
        ));
        assert!(matches!(
            &display[1],
            Command::SetEffect { effect, intensity, .. }
                if effect == "parallax" && (*intensity - 0.2).abs() < 1e-6
        ));
    }

    #[test]
    fn test_dwell_engages_and_starts_heartbeat_once() {
        let mut rig = build_rig(METADATA);
        // 1.5 s dwell at 32 Hz is 48 ticks; run spares beyond it.
        for _ in 0..60 {
            rig.feed(1, 150.0, (0.5, 0.5), 0.9);
        }
        assert_eq!(rig.coordinator.state(), InteractionState::Engaged);

        let plays: Vec<Command> = rig
            .drain_audio()
            .into_iter()
            .filter(|c| matches!(c, Command::PlayHeartbeat { .. }))
            .collect();
        assert_eq!(plays.len(), 1);
        assert!(matches!(
            &plays[0],
            Command::PlayHeartbeat { region_id, fade_ms: 100, .. } if region_id == "r1"
        ));

        // The dwell-triggered visual effect went out with defaults filled.
        let effects: Vec<Command> = rig
            .drain_display()
            .into_iter()
            .filter(|c| matches!(c, Command::SetEffect { .. }))
            .collect();
        let breathing = effects
            .iter()
            .find_map(|c| match c {
                Command::SetEffect { effect, params, .. } if effect == "breathing" => Some(params),
                _ => None,
            })
            .expect("breathing effect emitted");
        assert!((breathing["amplitude"] - 0.008).abs() < 1e-9);
        assert!((breathing["frequency"] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_heartbeat_volume_suppressed_during_grace_then_modulated() {
        let mut rig = build_rig(METADATA);
        for _ in 0..60 {
            rig.feed(1, 150.0, (0.5, 0.5), 0.9);
        }
        rig.drain_audio();

        // The metadata grace period is 100 ms; wait it out, then move the
        // viewer so the distance-modulated volume must change.
        thread::sleep(Duration::from_millis(150));
        for _ in 0..30 {
            rig.feed(1, 60.0, (0.5, 0.5), 0.9);
        }
        let volumes: Vec<Command> = rig
            .drain_audio()
            .into_iter()
            .filter(
                |c| matches!(c, Command::SetVolume { stream, .. } if stream == "heartbeat_r1"),
            )
            .collect();
        assert!(!volumes.is_empty());
    }

    #[test]
    fn test_heartbeat_stopped_when_gaze_leaves() {
        let mut rig = build_rig(METADATA);
        for _ in 0..60 {
            rig.feed(1, 150.0, (0.5, 0.5), 0.9);
        }
        rig.drain_audio();

        // Gaze moves off the region (still confident, still present).
        for _ in 0..3 {
            rig.feed(1, 150.0, (0.05, 0.05), 0.9);
        }
        let stops: Vec<Command> = rig
            .drain_audio()
            .into_iter()
            .filter(|c| matches!(c, Command::StopHeartbeat { .. }))
            .collect();
        assert_eq!(stops.len(), 1);
    }

    #[test]
    fn test_close_interaction_hysteresis_scenario() {
        let mut rig = build_rig(METADATA);
        for _ in 0..60 {
            rig.feed(1, 150.0, (0.5, 0.5), 0.9);
        }
        assert_eq!(rig.coordinator.state(), InteractionState::Engaged);

        // The distance Kalman needs a few ticks to track a step change;
        // keep feeding until it settles inside the threshold.
        for _ in 0..40 {
            rig.feed(1, 70.0, (0.5, 0.5), 0.9);
        }
        assert_eq!(rig.coordinator.state(), InteractionState::CloseInteraction);
        let display = rig.drain_display();
        assert!(display
            .iter()
            .any(|c| matches!(c, Command::SetVignette { intensity } if (*intensity - 0.8).abs() < 1e-6)));

        // 100 cm is inside min(120, 300): still CLOSE.
        for _ in 0..40 {
            rig.feed(1, 100.0, (0.5, 0.5), 0.9);
        }
        assert_eq!(rig.coordinator.state(), InteractionState::CloseInteraction);

        // 130 cm clears the band: ENGAGED again, vignette off.
        rig.drain_display();
        for _ in 0..40 {
            rig.feed(1, 130.0, (0.5, 0.5), 0.9);
        }
        assert_eq!(rig.coordinator.state(), InteractionState::Engaged);
        let display = rig.drain_display();
        assert!(display
            .iter()
            .any(|c| matches!(c, Command::SetVignette { intensity } if *intensity == 0.0)));
    }

    #[test]
    fn test_withdraw_on_face_loss_then_idle_stops_all() {
        let mut rig = build_rig(METADATA);
        for _ in 0..60 {
            rig.feed(1, 150.0, (0.5, 0.5), 0.9);
        }
        assert_eq!(rig.coordinator.state(), InteractionState::Engaged);
        rig.drain_audio();
        rig.drain_display();

        // 5 s of no face (160 ticks at 32 Hz) reaches the face-lost
        // timeout.
        for _ in 0..165 {
            rig.feed(0, 0.0, (0.0, 0.0), 0.0);
        }
        assert_eq!(rig.coordinator.state(), InteractionState::Withdrawing);
        let audio = rig.drain_audio();
        assert!(audio
            .iter()
            .any(|c| matches!(c, Command::FadeAll { target, .. } if *target == 0.0)));
        let display = rig.drain_display();
        assert!(display
            .iter()
            .any(|c| matches!(c, Command::SetParallax { gaze_x, gaze_y } if *gaze_x == 0.5 && *gaze_y == 0.5)));

        // 4 s withdraw fade (128 ticks) lands in IDLE with STOP_ALL.
        for _ in 0..130 {
            rig.feed(0, 0.0, (0.0, 0.0), 0.0);
        }
        assert_eq!(rig.coordinator.state(), InteractionState::Idle);
        let audio = rig.drain_audio();
        assert!(audio.iter().any(|c| matches!(c, Command::StopAll)));
    }

    #[test]
    fn test_parallax_rate_limited_by_epsilon() {
        let mut rig = build_rig(METADATA);
        rig.feed(1, 250.0, (0.5, 0.5), 0.9);
        rig.drain_display();

        // A static gaze produces no further parallax traffic.
        for _ in 0..20 {
            rig.feed(1, 250.0, (0.5, 0.5), 0.9);
        }
        let parallax: Vec<Command> = rig
            .drain_display()
            .into_iter()
            .filter(|c| matches!(c, Command::SetParallax { .. }))
            .collect();
        assert!(parallax.len() <= 1); // at most the first post-entry send

        // A real move produces traffic again.
        for _ in 0..10 {
            rig.feed(1, 250.0, (0.8, 0.3), 0.9);
        }
        let parallax: Vec<Command> = rig
            .drain_display()
            .into_iter()
            .filter(|c| matches!(c, Command::SetParallax { .. }))
            .collect();
        assert!(!parallax.is_empty());
    }

    #[test]
    fn test_ambient_volume_follows_distance_curve() {
        let mut rig = build_rig(METADATA);
        // Enter presence; ambient config is linear 200→100 cm.
        for _ in 0..50 {
            rig.feed(1, 150.0, (0.05, 0.05), 0.9); // gaze off-region
        }
        let volumes: Vec<f32> = rig
            .drain_audio()
            .into_iter()
            .filter_map(|c| match c {
                Command::SetVolume { stream, volume } if stream == "ambient" => Some(volume),
                _ => None,
            })
            .collect();
        assert!(!volumes.is_empty());
        // Smoothed distance converges to 150 cm → halfway up the fade.
        let last = *volumes.last().unwrap();
        assert!((last - 0.5).abs() < 0.1, "ambient volume {last}");
    }

    #[test]
    fn test_transition_recipe_without_ambient_config() {
        let no_ambient = METADATA.replace(
            r#""audio": {
            "ambient": {
                "file": "audio/ambient.wav",
                "fade_in_distance_cm": 200,
                "fade_in_complete_cm": 100,
                "fade_curve": "linear"
            }
        },"#,
            "",
        );
        let mut rig = build_rig(&no_ambient);
        rig.feed(1, 250.0, (0.5, 0.5), 0.9);
        assert_eq!(rig.coordinator.state(), InteractionState::Presence);
        // No ambient file: no PLAY_AMBIENT, but the effects still go out.
        assert!(rig.drain_audio().is_empty());
        let effects = rig
            .drain_display()
            .into_iter()
            .filter(|c| matches!(c, Command::SetEffect { .. }))
            .count();
        assert_eq!(effects, 2);
    }
}

// Synthetic vision writer for bench debugging without a camera. Sweeps
// a scripted viewer: walks in, wanders their gaze across the frame in a
// slow Lissajous figure, and periodically steps away.

use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::SoulError;
use crate::ipc::{FaceSample, VisionShmWriter};

pub fn run(cfg: &Config) -> Result<(), SoulError> {
    let mut writer = VisionShmWriter::create(&cfg.shm_name)?;
    let period = Duration::from_micros(1_000_000 / u64::from(cfg.camera_fps.max(1)));
    log::info!(
        "Vision sim writing to '{}' at {} Hz (standing in for camera {} at {}x{})",
        cfg.shm_name,
        cfg.camera_fps,
        cfg.camera_index,
        cfg.camera_width,
        cfg.camera_height,
    );

    let start = Instant::now();
    let mut frame: u32 = 0;
    let mut next = Instant::now();

    while !crate::shutdown_requested() {
        let t = start.elapsed().as_secs_f32();
        frame += 1;

        // 40-second cycle: approach for 30 s, step away for 10 s.
        let phase = t % 40.0;
        let present = phase < 30.0;
        let distance = 320.0 - 80.0 * (phase / 10.0).min(3.0);

        writer.write(&FaceSample {
            frame_counter: frame,
            num_faces: u32::from(present),
            face_distance_cm: if present { distance } else { 0.0 },
            gaze_x: 0.5 + 0.35 * (0.31 * t).sin(),
            gaze_y: 0.5 + 0.35 * (0.23 * t).cos(),
            gaze_confidence: if present { 0.9 } else { 0.0 },
            head_yaw: 0.15 * (0.11 * t).sin(),
            head_pitch: 0.08 * (0.17 * t).cos(),
            timestamp_ns: start.elapsed().as_nanos() as u64,
        });

        next += period;
        let now = Instant::now();
        if next < now {
            next = now;
        }
        std::thread::sleep(next.saturating_duration_since(Instant::now()));
    }

    log::info!("Vision sim exiting");
    Ok(())
}

// Vision → brain shared-memory channel.
//
// A 44-byte segment: 4-byte seqlock counter followed by a 40-byte face
// sample, little-endian. Single writer (the vision process), single
// reader (the brain). The writer is a real-time camera loop, so the
// protocol is lock-free: the counter goes odd while the payload is being
// written and even once it is committed; a reader that observes an odd
// counter or a counter change across its copy discards the read.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::error::SoulError;

/// Payload size on the wire: <IIffffffQ>.
pub const SAMPLE_SIZE: usize = 40;
/// Seqlock counter in front of the payload.
const SEQ_SIZE: usize = 4;
/// Total segment size.
pub const SEGMENT_SIZE: usize = SEQ_SIZE + SAMPLE_SIZE;

// ─────────────────────────────────────────────────────────────────────────────
//  Face sample
// ─────────────────────────────────────────────────────────────────────────────

/// One snapshot of the vision pipeline output.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaceSample {
    /// Strictly increasing per committed write.
    pub frame_counter: u32,
    pub num_faces: u32,
    pub face_distance_cm: f32,
    /// Normalized screen coordinates, 0.0–1.0.
    pub gaze_x: f32,
    pub gaze_y: f32,
    pub gaze_confidence: f32,
    /// Head pose in radians.
    pub head_yaw: f32,
    pub head_pitch: f32,
    /// Monotonic capture timestamp in nanoseconds.
    pub timestamp_ns: u64,
}

impl FaceSample {
    pub fn face_detected(&self) -> bool {
        self.num_faces > 0
    }

    pub fn to_bytes(&self) -> [u8; SAMPLE_SIZE] {
        let mut b = [0u8; SAMPLE_SIZE];
        b[0..4].copy_from_slice(&self.frame_counter.to_le_bytes());
        b[4..8].copy_from_slice(&self.num_faces.to_le_bytes());
        b[8..12].copy_from_slice(&self.face_distance_cm.to_le_bytes());
        b[12..16].copy_from_slice(&self.gaze_x.to_le_bytes());
        b[16..20].copy_from_slice(&self.gaze_y.to_le_bytes());
        b[20..24].copy_from_slice(&self.gaze_confidence.to_le_bytes());
        b[24..28].copy_from_slice(&self.head_yaw.to_le_bytes());
        b[28..32].copy_from_slice(&self.head_pitch.to_le_bytes());
        b[32..40].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8; SAMPLE_SIZE]) -> Self {
        let f32_at = |i: usize| f32::from_le_bytes(b[i..i + 4].try_into().unwrap());
        Self {
            frame_counter: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            num_faces: u32::from_le_bytes(b[4..8].try_into().unwrap()),
            face_distance_cm: f32_at(8),
            gaze_x: f32_at(12),
            gaze_y: f32_at(16),
            gaze_confidence: f32_at(20),
            head_yaw: f32_at(24),
            head_pitch: f32_at(28),
            timestamp_ns: u64::from_le_bytes(b[32..40].try_into().unwrap()),
        }
    }
}

/// Filesystem location of the named segment. /dev/shm where available so
/// the mapping is backed by RAM; the temp dir otherwise.
fn segment_path(name: &str) -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.join(name)
    } else {
        std::env::temp_dir().join(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Writer (vision side)
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the segment: creates it, publishes samples, unlinks it on drop.
pub struct VisionShmWriter {
    mmap: MmapMut,
    path: PathBuf,
}

impl VisionShmWriter {
    pub fn create(name: &str) -> Result<Self, SoulError> {
        let path = segment_path(name);
        // Clean up any stale segment from a crashed previous run.
        let _ = fs::remove_file(&path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(SEGMENT_SIZE as u64)?;
        let mmap = unsafe { MmapOptions::new().len(SEGMENT_SIZE).map_mut(&file)? };
        log::info!("Vision segment created at {}", path.display());
        Ok(Self { mmap, path })
    }

    fn seq(&self) -> &AtomicU32 {
        // Segment starts with a 4-byte counter; page alignment of the
        // mapping guarantees the required alignment.
        unsafe { &*(self.mmap.as_ptr() as *const AtomicU32) }
    }

    /// Publish one sample. Counter goes odd, payload is written, counter
    /// goes even — the payload copy is infallible here, so readers can
    /// never be left wedged on a stuck odd counter.
    pub fn write(&mut self, sample: &FaceSample) {
        let bytes = sample.to_bytes();
        let s0 = self.seq().load(Ordering::Relaxed);
        self.seq().store(s0.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        unsafe {
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.mmap.as_mut_ptr().add(SEQ_SIZE),
                SAMPLE_SIZE,
            );
        }
        self.seq().store(s0.wrapping_add(2), Ordering::Release);
    }
}

impl Drop for VisionShmWriter {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Could not unlink vision segment: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Reader (brain side)
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only view of the segment. Detaches without unlinking; tolerates
/// the writer vanishing (reads then keep returning the last frame, which
/// the duplicate check maps to "no new data").
pub struct VisionShmReader {
    mmap: Mmap,
    last_frame: u32,
}

impl VisionShmReader {
    /// Attach to the segment, polling until `timeout` elapses.
    pub fn connect(name: &str, timeout: Duration) -> Result<Self, SoulError> {
        let path = segment_path(name);
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(file) = OpenOptions::new().read(true).open(&path) {
                let len = file.metadata().map(|m| m.len()).unwrap_or(0);
                if len >= SEGMENT_SIZE as u64 {
                    let mmap = unsafe { MmapOptions::new().len(SEGMENT_SIZE).map(&file)? };
                    log::info!("Attached to vision segment at {}", path.display());
                    return Ok(Self {
                        mmap,
                        last_frame: 0,
                    });
                }
            }
            if Instant::now() >= deadline {
                return Err(SoulError::IpcUnavailable(name.to_string()));
            }
            thread::sleep(Duration::from_millis(100));
        }
    }

    /// Latest committed sample, or `None` when the writer is mid-update,
    /// the copy was torn, or the frame was already returned once.
    pub fn read(&mut self) -> Option<FaceSample> {
        let seq = unsafe { &*(self.mmap.as_ptr() as *const AtomicU32) };

        let seq1 = seq.load(Ordering::Acquire);
        if seq1 & 1 != 0 {
            return None; // writer mid-update
        }

        let mut payload = [0u8; SAMPLE_SIZE];
        unsafe {
            ptr::copy_nonoverlapping(
                self.mmap.as_ptr().add(SEQ_SIZE),
                payload.as_mut_ptr(),
                SAMPLE_SIZE,
            );
        }

        fence(Ordering::Acquire);
        let seq2 = seq.load(Ordering::Relaxed);
        if seq1 != seq2 {
            return None; // torn read
        }

        let sample = FaceSample::from_bytes(&payload);
        if sample.frame_counter == self.last_frame {
            return None; // already delivered
        }
        self.last_frame = sample.frame_counter;
        Some(sample)
    }
}

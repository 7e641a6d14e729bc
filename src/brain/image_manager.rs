// Gallery image packages. Each package is a subdirectory holding one
// image file, an audio/ subdirectory, and a metadata.json document.
// Scanning validates every package up front; parsing never yields a
// half-built model — a package either becomes a complete ImageMetadata
// or is skipped with a warning.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::audio::curves::FadeCurve;
use crate::config::Config;
use crate::error::SoulError;
use crate::geometry::Point;

// ─────────────────────────────────────────────────────────────────────────────
//  Runtime model
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct GazeTrigger {
    pub dwell_time_ms: u32,
    pub min_confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    /// Relative to the package directory.
    pub file: String,
    pub looped: bool,
    pub bass_boost: bool,
    pub fade_in_ms: u32,
    pub max_distance_cm: f32,
    pub min_distance_cm: f32,
    pub curve: FadeCurve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisualEffect {
    pub effect_type: String,
    pub params: BTreeMap<String, f64>,
    pub trigger: String,
    pub fade_in_ms: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Unique within the image; synthesized when missing.
    pub id: String,
    pub label: String,
    /// Normalized polygon vertices in insertion order.
    pub points: Vec<Point>,
    pub gaze_trigger: GazeTrigger,
    pub heartbeat: Option<HeartbeatConfig>,
    pub visual_effects: Vec<VisualEffect>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmbientConfig {
    pub file: String,
    pub looped: bool,
    /// Ambient starts fading in at this distance…
    pub fade_in_distance_cm: f32,
    /// …and reaches full volume here.
    pub fade_in_complete_cm: f32,
    pub fade_curve: FadeCurve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub version: u32,
    pub id: String,
    pub title: String,
    pub image_filename: String,
    pub image_width: u32,
    pub image_height: u32,
    pub ambient: Option<AmbientConfig>,
    pub regions: Vec<Region>,
    pub presence_distance_cm: f32,
    pub close_distance_cm: f32,
    pub fade_in_ms: u32,
    pub fade_out_ms: u32,
    pub audio_crossfade_ms: u32,
}

/// A validated package: metadata plus the directory it lives in.
#[derive(Debug, Clone)]
pub struct ImagePackage {
    pub meta: ImageMetadata,
    pub dir: PathBuf,
}

impl ImagePackage {
    /// Absolute path of the package's image file.
    pub fn image_path(&self) -> Option<PathBuf> {
        resolve_inside(&self.dir, &self.meta.image_filename).ok()
    }

    /// Resolve a relative media path, rejecting anything escaping the
    /// package directory.
    pub fn media_path(&self, relative: &str) -> Result<PathBuf, SoulError> {
        resolve_inside(&self.dir, relative)
    }
}

/// Resolve `relative` against `dir` and require the result to stay
/// inside `dir`. Lexical: the target does not need to exist yet.
fn resolve_inside(dir: &Path, relative: &str) -> Result<PathBuf, SoulError> {
    use std::path::Component;

    let root = dir
        .canonicalize()
        .map_err(|_| SoulError::PathEscape(dir.to_path_buf()))?;
    let mut resolved = root.clone();
    for comp in Path::new(relative).components() {
        match comp {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                resolved.pop();
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(SoulError::PathEscape(PathBuf::from(relative)));
            }
        }
    }
    if resolved.starts_with(&root) && resolved != root {
        Ok(resolved)
    } else {
        Err(SoulError::PathEscape(dir.join(relative)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Raw schema (loose leaves; coerced with warnings below)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    image: RawImage,
    #[serde(default)]
    audio: RawAudio,
    #[serde(default)]
    interaction: RawInteraction,
    #[serde(default)]
    transitions: RawTransitions,
    #[serde(default)]
    regions: Vec<RawRegion>,
}

#[derive(Debug, Default, Deserialize)]
struct RawImage {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    width: Option<Value>,
    #[serde(default)]
    height: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAudio {
    #[serde(default)]
    ambient: Option<RawAmbient>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAmbient {
    #[serde(default)]
    file: Option<String>,
    #[serde(default, rename = "loop")]
    looped: Option<bool>,
    #[serde(default)]
    fade_in_distance_cm: Option<Value>,
    #[serde(default)]
    fade_in_complete_cm: Option<Value>,
    #[serde(default)]
    fade_curve: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInteraction {
    #[serde(default)]
    min_interaction_distance_cm: Option<Value>,
    #[serde(default)]
    close_interaction_distance_cm: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTransitions {
    #[serde(default)]
    fade_in_ms: Option<Value>,
    #[serde(default)]
    fade_out_ms: Option<Value>,
    #[serde(default)]
    audio_crossfade_ms: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRegion {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    shape: RawShape,
    #[serde(default)]
    gaze_trigger: RawGazeTrigger,
    #[serde(default)]
    heartbeat: Option<RawHeartbeat>,
    #[serde(default)]
    visual_effects: Vec<RawVisualEffect>,
}

#[derive(Debug, Default, Deserialize)]
struct RawShape {
    #[serde(default, rename = "type")]
    shape_type: Option<String>,
    #[serde(default)]
    points_normalized: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGazeTrigger {
    #[serde(default)]
    dwell_time_ms: Option<Value>,
    #[serde(default)]
    min_confidence: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHeartbeat {
    #[serde(default)]
    file: Option<String>,
    #[serde(default, rename = "loop")]
    looped: Option<bool>,
    #[serde(default)]
    bass_boost: Option<bool>,
    #[serde(default)]
    fade_in_ms: Option<Value>,
    #[serde(default)]
    intensity_by_distance: RawDistanceIntensity,
}

#[derive(Debug, Default, Deserialize)]
struct RawDistanceIntensity {
    #[serde(default)]
    max_distance_cm: Option<Value>,
    #[serde(default)]
    min_distance_cm: Option<Value>,
    #[serde(default)]
    curve: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawVisualEffect {
    #[serde(default, rename = "type")]
    effect_type: Option<String>,
    #[serde(default)]
    params: BTreeMap<String, Value>,
    #[serde(default)]
    trigger: Option<String>,
    #[serde(default)]
    fade_in_ms: Option<Value>,
}

/// Coerce a loose JSON value to f32, defaulting with a warning.
fn as_f32(v: &Option<Value>, default: f32, what: &str) -> f32 {
    match v {
        None => default,
        Some(Value::Number(n)) => n.as_f64().map(|f| f as f32).unwrap_or(default),
        Some(other) => {
            log::warn!("Invalid {what} ({other}), using default {default}");
            default
        }
    }
}

/// Coerce a loose JSON value to u32, defaulting with a warning.
fn as_u32(v: &Option<Value>, default: u32, what: &str) -> u32 {
    match v {
        None => default,
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|u| u32::try_from(u).ok())
            .unwrap_or_else(|| {
                log::warn!("Invalid {what} ({n}), using default {default}");
                default
            }),
        Some(other) => {
            log::warn!("Invalid {what} ({other}), using default {default}");
            default
        }
    }
}

/// A polygon vertex must be a `[x, y]` pair of numbers; anything else is
/// dropped with a warning.
fn parse_point(v: &Value) -> Option<Point> {
    let pair = v.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    let x = pair[0].as_f64()? as f32;
    let y = pair[1].as_f64()? as f32;
    Some((x, y))
}

// ─────────────────────────────────────────────────────────────────────────────
//  Validation
// ─────────────────────────────────────────────────────────────────────────────

fn parse_metadata(json_path: &Path, cfg: &Config) -> Result<ImageMetadata, SoulError> {
    let text = fs::read_to_string(json_path)?;
    let raw: RawMetadata =
        serde_json::from_str(&text).map_err(|e| SoulError::MetadataInvalid {
            path: json_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let dir_name = json_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // Regions, with id synthesis and in-image deduplication.
    let mut regions: Vec<Region> = Vec::with_capacity(raw.regions.len());
    let mut seen_ids: HashSet<String> = HashSet::new();
    for r in &raw.regions {
        let mut points = Vec::new();
        for p in &r.shape.points_normalized {
            match parse_point(p) {
                Some(pt) => points.push(pt),
                None => log::warn!("Skipping malformed polygon point: {p}"),
            }
        }
        if let Some(t) = r.shape.shape_type.as_deref() {
            if t != "polygon" {
                log::warn!("Unknown shape type '{t}' in {dir_name}, treating as polygon");
            }
        }

        let mut id = r.id.clone().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            id = format!("region_{}", regions.len());
        }
        if seen_ids.contains(&id) {
            let mut suffix = 1;
            while seen_ids.contains(&format!("{id}_{suffix}")) {
                suffix += 1;
            }
            id = format!("{id}_{suffix}");
        }
        seen_ids.insert(id.clone());

        let heartbeat = r.heartbeat.as_ref().map(|hb| {
            let dist = &hb.intensity_by_distance;
            HeartbeatConfig {
                file: hb.file.clone().unwrap_or_default(),
                looped: hb.looped.unwrap_or(true),
                bass_boost: hb.bass_boost.unwrap_or(true),
                fade_in_ms: as_u32(&hb.fade_in_ms, 2000, "heartbeat fade_in_ms"),
                max_distance_cm: as_f32(&dist.max_distance_cm, 150.0, "heartbeat max_distance_cm"),
                min_distance_cm: as_f32(&dist.min_distance_cm, 30.0, "heartbeat min_distance_cm"),
                curve: FadeCurve::parse_or_linear(
                    dist.curve.as_deref().unwrap_or("exponential"),
                ),
            }
        });

        let visual_effects = r
            .visual_effects
            .iter()
            .map(|ve| {
                let params = ve
                    .params
                    .iter()
                    .filter_map(|(k, v)| match v.as_f64() {
                        Some(f) => Some((k.clone(), f)),
                        None => {
                            log::warn!("Dropping non-numeric effect param '{k}' in {dir_name}");
                            None
                        }
                    })
                    .collect();
                VisualEffect {
                    effect_type: ve.effect_type.clone().unwrap_or_else(|| "breathing".into()),
                    params,
                    trigger: ve.trigger.clone().unwrap_or_else(|| "on_gaze_dwell".into()),
                    fade_in_ms: as_u32(&ve.fade_in_ms, 3000, "effect fade_in_ms"),
                }
            })
            .collect();

        regions.push(Region {
            id,
            label: r.label.clone().unwrap_or_default(),
            points,
            gaze_trigger: GazeTrigger {
                dwell_time_ms: as_u32(&r.gaze_trigger.dwell_time_ms, cfg.gaze_dwell_ms, "dwell_time_ms"),
                min_confidence: as_f32(
                    &r.gaze_trigger.min_confidence,
                    cfg.gaze_min_confidence,
                    "min_confidence",
                ),
            },
            heartbeat,
            visual_effects,
        });
    }

    let ambient = raw.audio.ambient.as_ref().map(|aa| AmbientConfig {
        file: aa.file.clone().unwrap_or_default(),
        looped: aa.looped.unwrap_or(true),
        fade_in_distance_cm: as_f32(&aa.fade_in_distance_cm, 200.0, "fade_in_distance_cm"),
        fade_in_complete_cm: as_f32(&aa.fade_in_complete_cm, 100.0, "fade_in_complete_cm"),
        fade_curve: FadeCurve::parse_or_linear(aa.fade_curve.as_deref().unwrap_or("ease_in_out")),
    });

    Ok(ImageMetadata {
        version: as_u32(&raw.version, 1, "version"),
        id: raw.id.unwrap_or_else(|| dir_name.clone()),
        title: raw.title.unwrap_or_default(),
        image_filename: raw.image.filename.unwrap_or_else(|| "image.jpg".into()),
        image_width: as_u32(&raw.image.width, 1920, "image width"),
        image_height: as_u32(&raw.image.height, 1080, "image height"),
        ambient,
        regions,
        presence_distance_cm: as_f32(
            &raw.interaction.min_interaction_distance_cm,
            cfg.presence_distance_cm,
            "min_interaction_distance_cm",
        ),
        close_distance_cm: as_f32(
            &raw.interaction.close_interaction_distance_cm,
            cfg.close_distance_cm,
            "close_interaction_distance_cm",
        ),
        fade_in_ms: as_u32(&raw.transitions.fade_in_ms, cfg.default_fade_in_ms, "fade_in_ms"),
        fade_out_ms: as_u32(&raw.transitions.fade_out_ms, cfg.default_fade_out_ms, "fade_out_ms"),
        audio_crossfade_ms: as_u32(
            &raw.transitions.audio_crossfade_ms,
            cfg.default_audio_crossfade_ms,
            "audio_crossfade_ms",
        ),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
//  ImageManager
// ─────────────────────────────────────────────────────────────────────────────

/// Loads, indexes, and cycles through gallery image packages.
pub struct ImageManager {
    gallery_dir: PathBuf,
    packages: Vec<ImagePackage>,
    index: usize,
}

impl ImageManager {
    pub fn new(gallery_dir: PathBuf) -> Self {
        Self {
            gallery_dir,
            packages: Vec::new(),
            index: 0,
        }
    }

    /// Scan the gallery directory in sorted order and populate the
    /// playlist. Invalid packages are logged and skipped. Returns the
    /// number of packages found.
    pub fn scan(&mut self, cfg: &Config) -> usize {
        self.packages.clear();
        self.index = 0;

        if !self.gallery_dir.is_dir() {
            log::warn!("Gallery directory does not exist: {}", self.gallery_dir.display());
            return 0;
        }

        for entry in WalkDir::new(&self.gallery_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            let subdir = entry.path().to_path_buf();
            let meta_path = subdir.join("metadata.json");
            if !meta_path.is_file() {
                log::debug!("Skipping {} — no metadata.json", subdir.display());
                continue;
            }
            let meta = match parse_metadata(&meta_path, cfg) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("Skipping {}: {e}", subdir.display());
                    continue;
                }
            };
            match resolve_inside(&subdir, &meta.image_filename) {
                Ok(image_path) if image_path.is_file() => {
                    if meta.version > 1 {
                        log::warn!(
                            "Package {} uses schema version {}, newer than supported",
                            meta.id,
                            meta.version,
                        );
                    }
                    log::info!(
                        "Loaded image package: {} ({}x{}, {} region(s))",
                        meta.id,
                        meta.image_width,
                        meta.image_height,
                        meta.regions.len(),
                    );
                    for r in &meta.regions {
                        log::debug!("  region '{}' {}", r.id, r.label);
                    }
                    self.packages.push(ImagePackage { meta, dir: subdir });
                }
                _ => {
                    log::warn!(
                        "Skipping {} — image file '{}' missing or outside the package",
                        subdir.display(),
                        meta.image_filename,
                    );
                }
            }
        }

        log::info!("Gallery scan complete: {} image(s) found", self.packages.len());
        self.packages.len()
    }

    pub fn current(&self) -> Option<&ImagePackage> {
        self.packages.get(self.index)
    }

    /// Advance with wrap-around.
    pub fn next(&mut self) -> Option<&ImagePackage> {
        if self.packages.is_empty() {
            return None;
        }
        self.index = (self.index + 1) % self.packages.len();
        let pkg = &self.packages[self.index];
        log::info!(
            "Advanced to image {}/{}: {}",
            self.index + 1,
            self.packages.len(),
            pkg.meta.title,
        );
        Some(pkg)
    }

    /// Step back with wrap-around.
    pub fn prev(&mut self) -> Option<&ImagePackage> {
        if self.packages.is_empty() {
            return None;
        }
        self.index = (self.index + self.packages.len() - 1) % self.packages.len();
        let pkg = &self.packages[self.index];
        log::info!(
            "Rewound to image {}/{}: {}",
            self.index + 1,
            self.packages.len(),
            pkg.meta.title,
        );
        Some(pkg)
    }
}

// Interaction model: gaze hit-testing against the current image's
// regions, per-region dwell accounting, and a distance-based intensity
// factor. Regions are read-only references handed in each tick; all
// mutable state (dwell timers) lives here.

use std::collections::{HashMap, HashSet};

use crate::brain::image_manager::Region;
use crate::geometry::point_in_polygon;
use crate::ipc::FaceSample;

/// Output of a single InteractionModel::update call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionResult {
    /// Regions whose polygon currently contains the gaze point.
    pub active_regions: Vec<String>,
    /// Regions whose dwell timer has reached their trigger threshold.
    pub dwell_regions: Vec<String>,
    /// 1.0 close, 0.0 far, linear between the per-image thresholds.
    pub distance_factor: f32,
    /// Minimum `min_confidence` among the dwelled regions (0 if none);
    /// the state machine uses it as its gaze-away threshold.
    pub min_active_confidence: f32,
}

pub struct InteractionModel {
    dwell_timers: HashMap<String, f32>,
    prev_active: HashSet<String>,
    near_cm: f32,
    far_cm: f32,
}

impl InteractionModel {
    pub fn new(near_cm: f32, far_cm: f32) -> Self {
        Self {
            dwell_timers: HashMap::new(),
            prev_active: HashSet::new(),
            near_cm,
            far_cm,
        }
    }

    /// Per-image distance thresholds for the intensity factor.
    pub fn set_distance_thresholds(&mut self, near_cm: f32, far_cm: f32) {
        self.near_cm = near_cm;
        self.far_cm = far_cm;
    }

    pub fn update(&mut self, sample: &FaceSample, regions: &[Region], dt: f32) -> InteractionResult {
        let mut active: Vec<String> = Vec::new();
        let mut dwelled: Vec<String> = Vec::new();

        let confidence = sample.gaze_confidence;
        if sample.face_detected() && confidence > 0.0 {
            for region in regions {
                if region.points.is_empty() {
                    continue;
                }
                if !point_in_polygon(sample.gaze_x, sample.gaze_y, &region.points) {
                    continue;
                }
                active.push(region.id.clone());

                let min_conf = region.gaze_trigger.min_confidence;
                let timer = self.dwell_timers.entry(region.id.clone()).or_insert(0.0);
                if confidence >= min_conf {
                    *timer += dt;
                    if *timer >= region.gaze_trigger.dwell_time_ms as f32 / 1000.0 {
                        dwelled.push(region.id.clone());
                    }
                } else {
                    // Hit but not trusted: dwell starts over.
                    *timer = 0.0;
                }
            }
        }

        // Drop timers for regions the gaze has left since last tick.
        let active_set: HashSet<String> = active.iter().cloned().collect();
        for rid in self.prev_active.difference(&active_set) {
            self.dwell_timers.remove(rid);
        }
        self.prev_active = active_set;

        let min_active_confidence = dwelled
            .iter()
            .filter_map(|rid| regions.iter().find(|r| &r.id == rid))
            .map(|r| r.gaze_trigger.min_confidence)
            .fold(f32::INFINITY, f32::min);

        InteractionResult {
            active_regions: active,
            dwell_regions: dwelled,
            distance_factor: self.distance_factor(sample),
            min_active_confidence: if min_active_confidence.is_finite() {
                min_active_confidence
            } else {
                0.0
            },
        }
    }

    pub fn reset(&mut self) {
        self.dwell_timers.clear();
        self.prev_active.clear();
    }

    /// 1.0 at or inside `near`, 0.0 at or beyond `far`, linear between.
    /// Collapses to a step at `near` when the thresholds are inverted.
    fn distance_factor(&self, sample: &FaceSample) -> f32 {
        if !sample.face_detected() {
            return 0.0;
        }
        let d = sample.face_distance_cm;
        let (near, far) = (self.near_cm, self.far_cm);
        if near >= far {
            return if d <= near { 1.0 } else { 0.0 };
        }
        if d <= near {
            1.0
        } else if d >= far {
            0.0
        } else {
            1.0 - (d - near) / (far - near)
        }
    }
}

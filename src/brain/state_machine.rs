// Five-state interaction FSM: IDLE → PRESENCE → ENGAGED →
// CLOSE_INTERACTION, any non-IDLE → WITHDRAWING → IDLE.
//
// Timers are plain data and transitions are a function of
// (state, timers, inputs), so every rule is unit-testable. External
// signals only ever move timers; the state itself changes exclusively
// inside update().

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionState {
    Idle,
    Presence,
    Engaged,
    CloseInteraction,
    Withdrawing,
}

impl InteractionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Presence => "PRESENCE",
            Self::Engaged => "ENGAGED",
            Self::CloseInteraction => "CLOSE_INTERACTION",
            Self::Withdrawing => "WITHDRAWING",
        }
    }
}

/// Per-tick inputs, produced by the interaction model and the smoothed
/// vision sample.
#[derive(Debug, Clone, Copy)]
pub struct FsmInput<'a> {
    pub face_detected: bool,
    pub distance_cm: f32,
    pub gaze_confidence: f32,
    pub active_regions: &'a [String],
    pub dwell_regions: &'a [String],
    /// Minimum trigger confidence of the dwelled regions (0 if none).
    pub min_active_confidence: f32,
    pub dt: f32,
}

/// Global timeouts; the distances are per-image and set separately.
#[derive(Debug, Clone, Copy)]
struct FsmTimeouts {
    presence_lost_s: f32,
    idle_face_lost_s: f32,
    gaze_away_s: f32,
    idle_image_cycle_s: f32,
    default_min_confidence: f32,
}

pub struct StateMachine {
    state: InteractionState,
    timeouts: FsmTimeouts,

    // Per-image thresholds, re-applied before each tick.
    presence_cm: f32,
    close_cm: f32,
    withdraw_s: f32,

    // Timers in accumulated seconds.
    face_lost_timer: f32,
    gaze_away_timer: f32,
    withdraw_timer: f32,
    idle_image_timer: f32,

    should_cycle_image: bool,
}

impl StateMachine {
    pub fn new(cfg: &Config) -> Self {
        Self {
            state: InteractionState::Idle,
            timeouts: FsmTimeouts {
                presence_lost_s: cfg.presence_lost_timeout_s,
                idle_face_lost_s: cfg.idle_face_lost_timeout_s,
                gaze_away_s: cfg.withdraw_gaze_away_timeout_s,
                idle_image_cycle_s: cfg.idle_image_cycle_s,
                default_min_confidence: cfg.gaze_min_confidence,
            },
            presence_cm: cfg.presence_distance_cm,
            close_cm: cfg.close_distance_cm,
            withdraw_s: cfg.withdraw_fade_duration_s,
            face_lost_timer: 0.0,
            gaze_away_timer: 0.0,
            withdraw_timer: 0.0,
            idle_image_timer: 0.0,
            should_cycle_image: false,
        }
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    /// One-tick pulse raised in IDLE when the cycle interval elapses.
    pub fn should_cycle_image(&self) -> bool {
        self.should_cycle_image
    }

    /// Apply the current image's thresholds. Called before each tick and
    /// again after an image change.
    pub fn set_thresholds(&mut self, presence_cm: f32, close_cm: f32, withdraw_s: f32) {
        self.presence_cm = presence_cm;
        self.close_cm = close_cm;
        self.withdraw_s = withdraw_s;
    }

    /// Advance one tick. Returns `Some((old, new))` when a transition
    /// fired.
    pub fn update(&mut self, input: &FsmInput) -> Option<(InteractionState, InteractionState)> {
        use InteractionState::*;

        // In ENGAGED/CLOSE the gaze-away confidence threshold follows the
        // dwelled regions' own trigger confidence; elsewhere the global
        // default applies.
        let conf_threshold = match self.state {
            Engaged | CloseInteraction if input.min_active_confidence > 0.0 => {
                input.min_active_confidence
            }
            _ => self.timeouts.default_min_confidence,
        };

        if input.face_detected {
            self.face_lost_timer = 0.0;
        } else {
            self.face_lost_timer += input.dt;
        }

        let gazing = !input.active_regions.is_empty() && input.gaze_confidence >= conf_threshold;
        if gazing {
            self.gaze_away_timer = 0.0;
        } else {
            self.gaze_away_timer += input.dt;
        }

        let old = self.state;
        let new = match self.state {
            Idle => self.tick_idle(input),
            Presence => self.tick_presence(input),
            Engaged => self.tick_engaged(input),
            CloseInteraction => self.tick_close(input),
            Withdrawing => self.tick_withdrawing(input),
        };

        if let Some(new) = new {
            self.enter(old, new);
            return Some((old, new));
        }
        None
    }

    /// Force back to IDLE, clearing all timers. Used on image changes.
    pub fn reset(&mut self) {
        self.state = InteractionState::Idle;
        self.face_lost_timer = 0.0;
        self.gaze_away_timer = 0.0;
        self.withdraw_timer = 0.0;
        self.idle_image_timer = 0.0;
        self.should_cycle_image = false;
    }

    // ── Per-state rules ──────────────────────────────────────────────────

    fn tick_idle(&mut self, input: &FsmInput) -> Option<InteractionState> {
        self.idle_image_timer += input.dt;
        if self.idle_image_timer >= self.timeouts.idle_image_cycle_s {
            self.should_cycle_image = true;
            self.idle_image_timer = 0.0;
        } else {
            self.should_cycle_image = false;
        }

        (input.face_detected && input.distance_cm < self.presence_cm)
            .then_some(InteractionState::Presence)
    }

    fn tick_presence(&self, input: &FsmInput) -> Option<InteractionState> {
        if self.face_lost_timer >= self.timeouts.presence_lost_s {
            return Some(InteractionState::Withdrawing);
        }
        if input.face_detected && input.distance_cm >= self.presence_cm {
            // Viewer stepped back out of range.
            return Some(InteractionState::Withdrawing);
        }
        if !input.dwell_regions.is_empty() {
            return Some(InteractionState::Engaged);
        }
        None
    }

    fn tick_engaged(&self, input: &FsmInput) -> Option<InteractionState> {
        if self.face_lost_timer >= self.timeouts.idle_face_lost_s {
            return Some(InteractionState::Withdrawing);
        }
        if input.face_detected && input.distance_cm < self.close_cm {
            return Some(InteractionState::CloseInteraction);
        }
        if self.gaze_away_timer >= self.timeouts.gaze_away_s {
            return Some(InteractionState::Withdrawing);
        }
        None
    }

    fn tick_close(&self, input: &FsmInput) -> Option<InteractionState> {
        if self.face_lost_timer >= self.timeouts.idle_face_lost_s
            || self.gaze_away_timer >= self.timeouts.gaze_away_s
        {
            return Some(InteractionState::Withdrawing);
        }
        // Hysteresis: leaving CLOSE needs clear separation, capped by the
        // presence threshold.
        let exit_cm = (1.5 * self.close_cm).min(self.presence_cm);
        if input.face_detected && input.distance_cm > exit_cm {
            return Some(InteractionState::Engaged);
        }
        None
    }

    fn tick_withdrawing(&mut self, input: &FsmInput) -> Option<InteractionState> {
        self.withdraw_timer += input.dt;
        (self.withdraw_timer >= self.withdraw_s).then_some(InteractionState::Idle)
    }

    fn enter(&mut self, old: InteractionState, new: InteractionState) {
        log::info!("State transition: {} -> {}", old.name(), new.name());
        self.state = new;
        self.should_cycle_image = false;
        match new {
            InteractionState::Idle => {
                self.idle_image_timer = 0.0;
            }
            InteractionState::Engaged => {
                // Preserved when returning from CLOSE so a viewer cannot
                // bounce across the hysteresis edge to dodge the
                // gaze-away timeout.
                if old == InteractionState::Presence {
                    self.gaze_away_timer = 0.0;
                }
            }
            InteractionState::Withdrawing => {
                self.withdraw_timer = 0.0;
            }
            _ => {}
        }
    }
}

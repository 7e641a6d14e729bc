// Distance→volume mapping curves. Each maps a viewer distance in cm to
// a volume in 0.0–1.0: full volume at or inside `min_cm`, silent at or
// beyond `max_cm`, with the curve shaping the falloff in between.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadeCurve {
    #[default]
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    Exponential,
}

impl FadeCurve {
    /// Recognised names: `linear`, `ease_in`, `ease_out`,
    /// `ease_in_out` / `smoothstep`, `exponential` / `exp`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "linear" => Some(Self::Linear),
            "ease_in" => Some(Self::EaseIn),
            "ease_out" => Some(Self::EaseOut),
            "ease_in_out" | "smoothstep" => Some(Self::EaseInOut),
            "exponential" | "exp" => Some(Self::Exponential),
            _ => None,
        }
    }

    /// Parse with a warning fallback — a typo in a metadata document must
    /// not take the installation down.
    pub fn parse_or_linear(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            log::warn!("Unknown fade curve '{name}', using linear");
            Self::Linear
        })
    }

    /// Volume for a viewer at `distance_cm`. Degenerate ranges
    /// (`max_cm <= min_cm`) collapse to a step function.
    pub fn volume_at(self, distance_cm: f32, max_cm: f32, min_cm: f32) -> f32 {
        if max_cm <= min_cm {
            return if distance_cm <= min_cm { 1.0 } else { 0.0 };
        }
        if distance_cm <= min_cm {
            return 1.0;
        }
        if distance_cm >= max_cm {
            return 0.0;
        }
        let t = (distance_cm - min_cm) / (max_cm - min_cm);
        let vol = match self {
            Self::Linear => 1.0 - t,
            Self::EaseIn => 1.0 - t * t,
            Self::EaseOut => {
                let inv = 1.0 - t;
                inv * inv
            }
            Self::EaseInOut => 1.0 - t * t * (3.0 - 2.0 * t),
            Self::Exponential => {
                // Normalized so the curve reaches exactly 0.0 at max_cm:
                // (e^(-5t) - e^(-5)) / (1 - e^(-5))
                let floor = (-5.0f32).exp();
                ((-5.0 * t).exp() - floor) / (1.0 - floor)
            }
        };
        vol.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURVES: [FadeCurve; 5] = [
        FadeCurve::Linear,
        FadeCurve::EaseIn,
        FadeCurve::EaseOut,
        FadeCurve::EaseInOut,
        FadeCurve::Exponential,
    ];

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!(FadeCurve::parse("linear"), Some(FadeCurve::Linear));
        assert_eq!(FadeCurve::parse("smoothstep"), Some(FadeCurve::EaseInOut));
        assert_eq!(FadeCurve::parse("exp"), Some(FadeCurve::Exponential));
        assert_eq!(FadeCurve::parse("bogus"), None);
        assert_eq!(FadeCurve::parse_or_linear("bogus"), FadeCurve::Linear);
    }

    #[test]
    fn test_boundaries() {
        for curve in CURVES {
            assert_eq!(curve.volume_at(30.0, 150.0, 30.0), 1.0);
            assert_eq!(curve.volume_at(10.0, 150.0, 30.0), 1.0);
            assert_eq!(curve.volume_at(150.0, 150.0, 30.0), 0.0);
            assert_eq!(curve.volume_at(500.0, 150.0, 30.0), 0.0);
        }
    }

    #[test]
    fn test_monotonically_non_increasing() {
        for curve in CURVES {
            let mut prev = 1.0f32;
            let mut d = 30.0f32;
            while d <= 150.0 {
                let v = curve.volume_at(d, 150.0, 30.0);
                assert!(
                    v <= prev + 1e-6,
                    "{curve:?} not monotone at {d}: {v} > {prev}"
                );
                prev = v;
                d += 1.0;
            }
        }
    }

    #[test]
    fn test_degenerate_range_is_step() {
        for curve in CURVES {
            assert_eq!(curve.volume_at(79.9, 80.0, 80.0), 1.0);
            assert_eq!(curve.volume_at(80.0, 80.0, 80.0), 1.0);
            assert_eq!(curve.volume_at(80.1, 80.0, 80.0), 0.0);
            assert_eq!(curve.volume_at(50.0, 40.0, 60.0), 1.0);
            assert_eq!(curve.volume_at(70.0, 40.0, 60.0), 0.0);
        }
    }

    #[test]
    fn test_midpoint_ordering() {
        // At the halfway point the eased curves bracket linear.
        let mid = |c: FadeCurve| c.volume_at(90.0, 150.0, 30.0);
        assert!((mid(FadeCurve::Linear) - 0.5).abs() < 1e-6);
        assert!(mid(FadeCurve::EaseIn) > mid(FadeCurve::Linear));
        assert!(mid(FadeCurve::EaseOut) < mid(FadeCurve::Linear));
    }
}

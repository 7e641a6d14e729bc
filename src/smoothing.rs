// Signal smoothing for the vision feed: per-axis EMA for gaze, a 1-D
// Kalman filter for distance. Both tolerate non-finite inputs by
// returning the last value, and both reset on vision stalls and image
// transitions.

/// Exponential moving average.
///
/// Higher alpha = less smoothing (more responsive), lower = more stable.
#[derive(Debug, Clone)]
pub struct EmaFilter {
    alpha: f32,
    value: Option<f32>,
}

impl EmaFilter {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, measurement: f32) -> f32 {
        if !measurement.is_finite() {
            return self.value.unwrap_or(0.0);
        }
        let v = match self.value {
            None => measurement,
            Some(prev) => self.alpha * measurement + (1.0 - self.alpha) * prev,
        };
        self.value = Some(v);
        v
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Scalar 1-D Kalman filter.
///
/// `q` is the expected per-step change of the true value, `r` the sensor
/// noise. The first valid measurement initializes `x = z`, `p = r`.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    q: f32,
    r: f32,
    x: Option<f32>,
    p: f32,
}

impl KalmanFilter {
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        Self {
            q: process_noise,
            r: measurement_noise,
            x: None,
            p: 1.0,
        }
    }

    pub fn update(&mut self, measurement: f32) -> f32 {
        if !measurement.is_finite() {
            return self.x.unwrap_or(0.0);
        }
        let mut x = match self.x {
            None => {
                self.x = Some(measurement);
                self.p = self.r;
                return measurement;
            }
            Some(x) => x,
        };

        // Predict
        self.p += self.q;

        // Update
        let denom = self.p + self.r;
        if denom == 0.0 {
            return x;
        }
        let k = self.p / denom;
        x += k * (measurement - x);
        self.p *= 1.0 - k;

        self.x = Some(x);
        x
    }

    pub fn value(&self) -> Option<f32> {
        self.x
    }

    pub fn reset(&mut self) {
        self.x = None;
        self.p = 1.0;
    }
}

/// Smooths 2-D gaze coordinates with an independent EMA per axis.
#[derive(Debug, Clone)]
pub struct GazeSmoother {
    x: EmaFilter,
    y: EmaFilter,
}

impl GazeSmoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            x: EmaFilter::new(alpha),
            y: EmaFilter::new(alpha),
        }
    }

    pub fn update(&mut self, x: f32, y: f32) -> (f32, f32) {
        (self.x.update(x), self.y.update(y))
    }

    pub fn reset(&mut self) {
        self.x.reset();
        self.y.reset();
    }
}

/// Smooths distance readings with a Kalman filter tuned for slow walking
/// speed against a noisy monocular estimate.
#[derive(Debug, Clone)]
pub struct DistanceSmoother {
    filter: KalmanFilter,
}

impl DistanceSmoother {
    pub fn new() -> Self {
        Self {
            filter: KalmanFilter::new(0.5, 5.0),
        }
    }

    pub fn update(&mut self, distance_cm: f32) -> f32 {
        self.filter.update(distance_cm)
    }

    pub fn reset(&mut self) {
        self.filter.reset();
    }
}

impl Default for DistanceSmoother {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_first_sample_initializes() {
        let mut f = EmaFilter::new(0.25);
        assert_eq!(f.value(), None);
        assert!((f.update(0.8) - 0.8).abs() < 1e-6);
        // 0.25 * 0.4 + 0.75 * 0.8 = 0.7
        assert!((f.update(0.4) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_ema_rejects_non_finite() {
        let mut f = EmaFilter::new(0.25);
        assert_eq!(f.update(f32::NAN), 0.0);
        f.update(0.5);
        assert!((f.update(f32::INFINITY) - 0.5).abs() < 1e-6);
        assert_eq!(f.value(), Some(0.5));
    }

    #[test]
    fn test_ema_reset() {
        let mut f = EmaFilter::new(0.25);
        f.update(1.0);
        f.reset();
        assert_eq!(f.value(), None);
        assert!((f.update(0.2) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_kalman_initializes_and_converges() {
        let mut k = KalmanFilter::new(0.5, 5.0);
        assert!((k.update(200.0) - 200.0).abs() < 1e-6);
        // Feed a constant new reading; estimate must move toward it
        // monotonically without overshooting.
        let mut prev = 200.0;
        for _ in 0..50 {
            let v = k.update(100.0);
            assert!(v <= prev + 1e-6);
            assert!(v >= 100.0 - 1e-3);
            prev = v;
        }
        assert!((prev - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_kalman_non_finite_returns_last() {
        let mut k = KalmanFilter::new(0.5, 5.0);
        assert_eq!(k.update(f32::NAN), 0.0);
        k.update(150.0);
        assert!((k.update(f32::NAN) - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_gaze_smoother_axes_independent() {
        let mut g = GazeSmoother::new(0.5);
        g.update(0.0, 1.0);
        let (x, y) = g.update(1.0, 0.0);
        assert!((x - 0.5).abs() < 1e-6);
        assert!((y - 0.5).abs() < 1e-6);
    }
}

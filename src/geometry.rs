// Point-in-polygon hit testing for gaze regions.
// All coordinates are normalized 0.0–1.0.

pub type Point = (f32, f32);

/// Ray-casting point-in-polygon test on a closed polyline.
///
/// Polygons with fewer than 3 points never contain anything. Edge
/// behavior follows the strict comparisons below (inclusive on the
/// left/top edges, exclusive on the right/bottom) and is deterministic
/// for a given input.
pub fn point_in_polygon(px: f32, py: f32, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

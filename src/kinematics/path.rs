//! Planar path geometry used by the kinematics calculator.

/// A point in physical units (μm).
pub type Point = (f64, f64);

pub fn distance(a: Point, b: Point) -> f64 {
    (b.0 - a.0).hypot(b.1 - a.1)
}

/// Sum of consecutive point-to-point distances.
pub fn path_length(points: &[Point]) -> f64 {
    points.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Centered moving average.
///
/// The window radius shrinks near both ends so every window stays
/// symmetric; the first and last points are therefore kept as they are and
/// the smoothed path is never longer than the raw one.
pub fn smooth(points: &[Point], window: usize) -> Vec<Point> {
    let half = window / 2;
    let last = points.len().saturating_sub(1);

    (0..points.len())
        .map(|i| {
            let radius = half.min(i).min(last - i);
            let slice = &points[i - radius..=i + radius];
            let n = slice.len() as f64;
            let (sx, sy) = slice
                .iter()
                .fold((0.0, 0.0), |(sx, sy), p| (sx + p.0, sy + p.1));
            (sx / n, sy / n)
        })
        .collect()
}

/// A line through `origin` with unit `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    pub origin: Point,
    pub direction: Point,
}

impl Line {
    /// Perpendicular distance from `p` to the line.
    pub fn distance_to(&self, p: Point) -> f64 {
        let (dx, dy) = self.direction;
        ((p.0 - self.origin.0) * dy - (p.1 - self.origin.1) * dx).abs()
    }
}

/// Orthogonal least-squares line through the points.
///
/// Minimises perpendicular distances rather than regressing y on x, so ALH
/// values differ from tools that fit y = a + bx, and vertical tracks still
/// get a line. Returns `None` when all points coincide and no direction
/// exists.
pub fn fit_line(points: &[Point]) -> Option<Line> {
    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let (dx, dy) = (p.0 - cx, p.1 - cy);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    if sxx + syy == 0.0 {
        return None;
    }

    // Principal axis of the scatter matrix.
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(Line {
        origin: (cx, cy),
        direction: (theta.cos(), theta.sin()),
    })
}

/// Number of sign changes of the lateral displacement.
///
/// Points are taken relative to the first one and projected onto the axis
/// perpendicular to the overall displacement. Returns `None` when the path
/// has no net displacement.
pub fn lateral_crossings(points: &[Point]) -> Option<usize> {
    let (first, last) = (*points.first()?, *points.last()?);
    let norm = distance(first, last);
    if norm == 0.0 {
        return None;
    }

    let (ux, uy) = ((last.0 - first.0) / norm, (last.1 - first.1) / norm);
    let perpendicular = (-uy, ux);

    let lateral: Vec<f64> = points
        .iter()
        .map(|p| (p.0 - first.0) * perpendicular.0 + (p.1 - first.1) * perpendicular.1)
        .collect();

    Some(lateral.windows(2).filter(|w| w[0] * w[1] < 0.0).count())
}

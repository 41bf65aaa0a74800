//! Polyline simplification and polygon smoothing for flood-extent outlines.

pub type Point = (f64, f64);

fn distance(a: Point, b: Point) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Distance from `p` to the segment `a`-`b`.
fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return distance(p, a);
    }
    let t = (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0);
    distance(p, (a.0 + t * dx, a.1 + t * dy))
}

/// Douglas-Peucker simplification.
///
/// Keeps both endpoints and every point farther than `tolerance` from the
/// simplified line. Output preserves input order.
pub fn douglas_peucker(points: &[Point], tolerance: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    let mut stack = vec![(0, points.len() - 1)];

    while let Some((anchor, floater)) = stack.pop() {
        let mut max_dist = 0.0;
        let mut farthest = anchor;
        for i in anchor + 1..floater {
            let d = distance_to_segment(points[i], points[anchor], points[floater]);
            if d > max_dist {
                max_dist = d;
                farthest = i;
            }
        }
        if max_dist <= tolerance {
            keep[anchor] = true;
            keep[floater] = true;
        } else {
            stack.push((anchor, farthest));
            stack.push((farthest, floater));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Averages consecutive groups of `sample_size` points and closes the ring.
///
/// The last group may be smaller. An empty input gives an empty ring.
pub fn simple_moving_average(points: &[Point], sample_size: usize) -> Vec<Point> {
    let mut smoothed: Vec<Point> = points
        .chunks(sample_size.max(1))
        .map(|group| {
            let n = group.len() as f64;
            let (sx, sy) = group.iter().fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
            (sx / n, sy / n)
        })
        .collect();
    if let Some(first) = smoothed.first().copied() {
        smoothed.push(first);
    }
    smoothed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collinear_points_reduce_to_endpoints() {
        let line: Vec<Point> = (0..10).map(|i| (i as f64, 2.0 * i as f64)).collect();
        assert_eq!(douglas_peucker(&line, 0.01), vec![(0.0, 0.0), (9.0, 18.0)]);
    }

    #[test]
    fn test_peak_above_tolerance_is_kept() {
        let pts = vec![(0.0, 0.0), (1.0, 0.1), (2.0, 5.0), (3.0, 0.1), (4.0, 0.0)];
        let simplified = douglas_peucker(&pts, 1.0);
        assert_eq!(simplified, vec![(0.0, 0.0), (2.0, 5.0), (4.0, 0.0)]);
    }

    #[test]
    fn test_zero_tolerance_keeps_every_bend() {
        let pts = vec![(0.0, 0.0), (1.0, 1.0), (2.0, 0.0), (3.0, 1.0)];
        assert_eq!(douglas_peucker(&pts, 0.0), pts);
    }

    #[test]
    fn test_moving_average_closes_ring() {
        let pts = vec![(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (1.0, 1.0)];
        let smoothed = simple_moving_average(&pts, 2);
        assert_eq!(smoothed, vec![(1.0, 0.0), (1.0, 2.0), (1.0, 1.0), (1.0, 0.0)]);
    }

    #[test]
    fn test_moving_average_of_nothing_is_empty() {
        assert!(simple_moving_average(&[], 3).is_empty());
    }
}

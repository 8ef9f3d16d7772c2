//! Periodic geometry in fractional coordinates.
//!
//! All distances follow the minimum-image convention on the unit torus [0, 1)^3.
//! Distances are fractional: they are only meaningful for cubic cells, where multiplying
//! by the edge length `a` gives the absolute distance. Non-cubic cells are not corrected for.

/// Minimum-image offset for a single axis difference `d = x1 - x0`.
///
/// Offsets of exactly +-0.5 keep their sign.
#[inline]
pub fn minimum_image(d: f64) -> f64 {
    if d > 0.5 {
        d - 1.0
    } else if d < -0.5 {
        d + 1.0
    } else {
        d
    }
}

/// Per-axis minimum-image offset from `p1` to `p2`.
#[inline]
pub fn minimum_image_offset(p1: &[f64; 3], p2: &[f64; 3]) -> [f64; 3] {
    [
        minimum_image(p2[0] - p1[0]),
        minimum_image(p2[1] - p1[1]),
        minimum_image(p2[2] - p1[2]),
    ]
}

/// Minimum-image Euclidean distance between two fractional points.
#[inline]
pub fn periodic_distance(p1: &[f64; 3], p2: &[f64; 3]) -> f64 {
    let [dx, dy, dz] = minimum_image_offset(p1, p2);
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Largest pairwise distance, or `0.0` when there is no pair.
pub fn max_pair_distance(points: &[[f64; 3]]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    pairs(points)
        .map(|(p1, p2)| periodic_distance(p1, p2))
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Smallest pairwise distance, or `1.0` when there is no pair.
pub fn min_pair_distance(points: &[[f64; 3]]) -> f64 {
    if points.len() < 2 {
        return 1.0;
    }
    pairs(points)
        .map(|(p1, p2)| periodic_distance(p1, p2))
        .fold(f64::INFINITY, f64::min)
}

/// Smallest distance from `point` to any of `others`, or `1.0` if `others` is empty.
///
/// `min_pair_distance(others).min(min_distance_to(point, others))` equals
/// `min_pair_distance` over `others + [point]`, so callers trying many candidate points
/// only pay for the mutual distances of `others` once.
pub fn min_distance_to(point: &[f64; 3], others: &[[f64; 3]]) -> f64 {
    others
        .iter()
        .map(|o| periodic_distance(point, o))
        .fold(1.0, f64::min)
}

/// Move `x0` toward the nearest periodic image of `x1` by a fraction `strength` of the
/// separating offset, wrapping the result back into [0, 1).
#[inline]
pub fn displace(x0: f64, x1: f64, strength: f64) -> f64 {
    let x = (x0 + minimum_image(x1 - x0) * strength).rem_euclid(1.0);
    // rem_euclid rounds tiny negatives up to exactly 1.0
    if x >= 1.0 { 0.0 } else { x }
}

/// Apply [`displace`] independently on each axis.
pub fn displace_position(from: &[f64; 3], target: &[f64; 3], strength: f64) -> [f64; 3] {
    [
        displace(from[0], target[0], strength),
        displace(from[1], target[1], strength),
        displace(from[2], target[2], strength),
    ]
}

/// All unordered pairs of a slice.
fn pairs<T>(items: &[T]) -> impl Iterator<Item = (&T, &T)> {
    items
        .iter()
        .enumerate()
        .flat_map(move |(i, a)| items[i + 1..].iter().map(move |b| (a, b)))
}

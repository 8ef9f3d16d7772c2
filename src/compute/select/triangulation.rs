//! Planar Delaunay triangulation and convex hull over two property dimensions.
//!
//! Triangles come from `delaunator`; the hull is computed here with a monotone chain.
//! Duplicate points are collapsed onto the first occurrence; every returned index refers to the
//! caller's original point list.

/// A planar point.
pub type Point = [f64; 2];

/// Delaunay triangulation of a point set.
#[derive(Debug, Clone)]
pub struct Triangulation {
    /// Triangles as indices into the input points.
    pub simplices: Vec<[usize; 3]>,
    /// Convex hull vertices in counter-clockwise order, indices into the input points.
    pub hull: Vec<usize>,
}

/// Twice the signed area of `(a, b, c)`; positive when counter-clockwise.
#[inline]
fn orient(a: &Point, b: &Point, c: &Point) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Unsigned area of a triangle.
pub fn triangle_area(a: &Point, b: &Point, c: &Point) -> f64 {
    orient(a, b, c).abs() / 2.0
}

/// Euclidean distance between two points.
#[inline]
pub fn distance(a: &Point, b: &Point) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Indices of the first occurrence of each distinct point.
fn distinct_indices(points: &[Point]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by(|&i, &j| {
        points[i][0]
            .total_cmp(&points[j][0])
            .then(points[i][1].total_cmp(&points[j][1]))
            .then(i.cmp(&j))
    });
    order.dedup_by(|later, first| points[*later] == points[*first]);
    order.sort_unstable();
    order
}

/// Convex hull of `indices` via Andrew's monotone chain, counter-clockwise.
///
/// Collinear boundary points are dropped.
fn convex_hull(points: &[Point], indices: &[usize]) -> Vec<usize> {
    let mut sorted = indices.to_vec();
    sorted.sort_by(|&i, &j| {
        points[i][0]
            .total_cmp(&points[j][0])
            .then(points[i][1].total_cmp(&points[j][1]))
    });
    if sorted.len() < 3 {
        return sorted;
    }

    let mut hull: Vec<usize> = Vec::with_capacity(2 * sorted.len());
    for pass in [sorted.clone(), sorted.into_iter().rev().collect()] {
        let floor = hull.len();
        for i in pass {
            while hull.len() >= floor + 2 {
                let n = hull.len();
                if orient(&points[hull[n - 2]], &points[hull[n - 1]], &points[i]) > 0.0 {
                    break;
                }
                hull.pop();
            }
            hull.push(i);
        }
        // last point of each chain starts the next
        hull.pop();
    }
    hull
}

/// Triangulate `points`.
///
/// Returns `None` when fewer than three distinct points exist or all of them are collinear.
pub fn triangulate(points: &[Point]) -> Option<Triangulation> {
    let distinct = distinct_indices(points);
    if distinct.len() < 3 {
        return None;
    }
    let hull = convex_hull(points, &distinct);
    if hull.len() < 3 {
        return None;
    }

    let vertices: Vec<delaunator::Point> = distinct
        .iter()
        .map(|&i| delaunator::Point {
            x: points[i][0],
            y: points[i][1],
        })
        .collect();
    let delaunay = delaunator::triangulate(&vertices);
    if delaunay.triangles.is_empty() {
        return None;
    }

    let simplices = delaunay
        .triangles
        .chunks_exact(3)
        .map(|t| [distinct[t[0]], distinct[t[1]], distinct[t[2]]])
        .collect();

    Some(Triangulation { simplices, hull })
}

impl Triangulation {
    /// Hull edges as index pairs, closing the polygon.
    pub fn hull_edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.hull
            .iter()
            .zip(self.hull.iter().cycle().skip(1))
            .map(|(&a, &b)| (a, b))
    }

    /// Each hull vertex paired with the summed length of its two hull edges.
    pub fn hull_weights(&self, points: &[Point]) -> Vec<(usize, f64)> {
        let mut weights: Vec<(usize, f64)> = self.hull.iter().map(|&i| (i, 0.0)).collect();
        let len = self.hull.len();
        for (k, (a, b)) in self.hull_edges().enumerate() {
            let d = distance(&points[a], &points[b]);
            weights[k].1 += d;
            weights[(k + 1) % len].1 += d;
        }
        weights
    }

    /// Each triangle paired with its unsigned area.
    pub fn simplex_areas(&self, points: &[Point]) -> Vec<([usize; 3], f64)> {
        self.simplices
            .iter()
            .map(|&[a, b, c]| ([a, b, c], triangle_area(&points[a], &points[b], &points[c])))
            .collect()
    }
}

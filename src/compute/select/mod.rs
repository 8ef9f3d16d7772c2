//! Parent selection strategies.
//!
//! Every strategy picks `num_parents` population indices from the evaluated population and
//! the archive, then maps them to material ids and property tuples. Strategies that sample
//! do so with the caller's RNG, so a seeded RNG reproduces a selection exactly.

mod triangulation;

pub use triangulation::{Point, Triangulation, triangle_area, triangulate};

use rand::Rng;
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::seq::SliceRandom;

use crate::schema::SelectorConfig;

use super::archive::{Archive, BinIndex};

/// Parent selection errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectError {
    #[error("Cannot select parents from an empty population")]
    EmptyPopulation,
    #[error("Population has {ids} ids but {properties} property tuples")]
    LengthMismatch { ids: usize, properties: usize },
    #[error("Population index {index} out of range for population of {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Property {property} out of range for {dimensions}-dimensional properties")]
    PropertyOutOfRange { property: usize, dimensions: usize },
    #[error("Invalid selection weights: {0}")]
    Weights(#[from] WeightedError),
}

/// Selected parents, aligned by position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parents {
    pub ids: Vec<u64>,
    pub properties: Vec<Vec<f64>>,
}

impl Parents {
    fn from_indices(indices: &[usize], ids: &[u64], properties: &[Vec<f64>]) -> Self {
        Self {
            ids: indices.iter().map(|&i| ids[i]).collect(),
            properties: indices.iter().map(|&i| properties[i].clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Choose `num_parents` parents from the population using `selector`.
///
/// `ids[i]` and `properties[i]` describe population index `i`, which is what the archive
/// stores.
pub fn select_parents<R: Rng + ?Sized>(
    selector: &SelectorConfig,
    num_parents: usize,
    ids: &[u64],
    properties: &[Vec<f64>],
    archive: &Archive,
    rng: &mut R,
) -> Result<Parents, SelectError> {
    if ids.len() != properties.len() {
        return Err(SelectError::LengthMismatch {
            ids: ids.len(),
            properties: properties.len(),
        });
    }
    if ids.is_empty() {
        return Err(SelectError::EmptyPopulation);
    }

    let indices = match selector {
        SelectorConfig::Best { property } => best(num_parents, properties, *property)?,
        SelectorConfig::Specific { index } => specific(num_parents, ids.len(), *index)?,
        SelectorConfig::DensityBin => density_bin(num_parents, archive, rng)?,
        SelectorConfig::NeighborBin { radius } => neighbor_bin(num_parents, archive, *radius, rng)?,
        SelectorConfig::TriangulationHull => {
            triangulation_or_best(num_parents, properties, rng, hull)?
        }
        SelectorConfig::TriangulationSimplex => {
            triangulation_or_best(num_parents, properties, rng, simplex)?
        }
    };

    Ok(Parents::from_indices(&indices, ids, properties))
}

/// Indices of the `num_parents` highest values of one property, in ascending order.
///
/// Equal values keep population order.
pub fn best(
    num_parents: usize,
    properties: &[Vec<f64>],
    property: usize,
) -> Result<Vec<usize>, SelectError> {
    let dimensions = properties.first().map_or(0, Vec::len);
    if property >= dimensions {
        return Err(SelectError::PropertyOutOfRange {
            property,
            dimensions,
        });
    }
    let mut order: Vec<usize> = (0..properties.len()).collect();
    order.sort_by(|&i, &j| properties[i][property].total_cmp(&properties[j][property]));
    let skip = order.len().saturating_sub(num_parents);
    Ok(order.split_off(skip))
}

/// `num_parents` copies of one population index.
pub fn specific(num_parents: usize, len: usize, index: usize) -> Result<Vec<usize>, SelectError> {
    if index >= len {
        return Err(SelectError::IndexOutOfRange { index, len });
    }
    Ok(vec![index; num_parents])
}

/// Draw one occupant uniformly from each drawn bin.
fn occupants_of<R: Rng + ?Sized>(archive: &Archive, bins: &[BinIndex], rng: &mut R) -> Vec<usize> {
    bins.iter()
        .filter_map(|bin| archive.occupants(bin).choose(rng).copied())
        .collect()
}

/// Sample sparsely populated bins, weighting each by the inverse of its occupant count.
///
/// Candidate bins are the `num_parents` least populated, widened to include every bin tied
/// with the last one.
pub fn density_bin<R: Rng + ?Sized>(
    num_parents: usize,
    archive: &Archive,
    rng: &mut R,
) -> Result<Vec<usize>, SelectError> {
    let mut bins: Vec<(BinIndex, usize)> = archive
        .occupied_bins()
        .map(|(bin, occupants)| (bin, occupants.len()))
        .collect();
    if bins.is_empty() {
        return Err(SelectError::EmptyPopulation);
    }
    bins.sort_by_key(|(_, count)| *count);

    let cutoff_index = num_parents.saturating_sub(1).min(bins.len() - 1);
    let cutoff = bins[cutoff_index].1;
    bins.retain(|(_, count)| *count <= cutoff);

    let dist = WeightedIndex::new(bins.iter().map(|(_, count)| 1.0 / *count as f64))?;
    let drawn: Vec<BinIndex> = (0..num_parents)
        .map(|_| bins[dist.sample(rng)].0.clone())
        .collect();
    Ok(occupants_of(archive, &drawn, rng))
}

/// Occupied bins with an empty bin within Chebyshev distance `radius`.
pub fn frontier_bins(archive: &Archive, radius: usize) -> Vec<BinIndex> {
    archive
        .occupied_bins()
        .map(|(bin, _)| bin)
        .filter(|bin| {
            archive
                .neighborhood(bin, radius)
                .iter()
                .any(|n| archive.count(n) == 0)
        })
        .collect()
}

/// Sample frontier bins uniformly with replacement.
///
/// Falls back to [`density_bin`] once the archive has no frontier left.
pub fn neighbor_bin<R: Rng + ?Sized>(
    num_parents: usize,
    archive: &Archive,
    radius: usize,
    rng: &mut R,
) -> Result<Vec<usize>, SelectError> {
    let frontier = frontier_bins(archive, radius);
    if frontier.is_empty() {
        log::debug!("No frontier bins within radius {radius}; using density-bin selection");
        return density_bin(num_parents, archive, rng);
    }
    let drawn: Vec<BinIndex> = (0..num_parents)
        .filter_map(|_| frontier.choose(rng).cloned())
        .collect();
    Ok(occupants_of(archive, &drawn, rng))
}

/// Run a triangulation strategy on the first two property dimensions.
///
/// Degenerate point sets (fewer than three distinct points, or all collinear) select by
/// best value of the last property instead.
fn triangulation_or_best<R, F>(
    num_parents: usize,
    properties: &[Vec<f64>],
    rng: &mut R,
    strategy: F,
) -> Result<Vec<usize>, SelectError>
where
    R: Rng + ?Sized,
    F: FnOnce(usize, &Triangulation, &[Point], &mut R) -> Result<Vec<usize>, SelectError>,
{
    let dimensions = properties.first().map_or(0, Vec::len);
    if dimensions < 2 {
        return Err(SelectError::PropertyOutOfRange {
            property: 1,
            dimensions,
        });
    }
    let points: Vec<Point> = properties.iter().map(|p| [p[0], p[1]]).collect();
    match triangulate(&points) {
        Some(triangulation) => strategy(num_parents, &triangulation, points.as_slice(), rng),
        None => {
            log::debug!(
                "Triangulation degenerate for {} points; selecting best of property {}",
                points.len(),
                dimensions - 1
            );
            best(num_parents, properties, dimensions - 1)
        }
    }
}

/// Sample hull points weighted by incident hull-edge length, without replacement.
///
/// When more parents are needed than hull points exist, the hull is drawn again from full.
/// Every hull point stays in the pool; it is not truncated to the `num_parents` heaviest.
pub fn hull<R: Rng + ?Sized>(
    num_parents: usize,
    triangulation: &Triangulation,
    points: &[Point],
    rng: &mut R,
) -> Result<Vec<usize>, SelectError> {
    let weights = triangulation.hull_weights(points);
    let mut pool: Vec<(usize, f64)> = Vec::new();
    let mut chosen = Vec::with_capacity(num_parents);
    while chosen.len() < num_parents {
        if pool.is_empty() {
            pool = weights.clone();
        }
        let dist = WeightedIndex::new(pool.iter().map(|(_, w)| *w))?;
        chosen.push(pool.swap_remove(dist.sample(rng)).0);
    }
    chosen.sort_unstable();
    Ok(chosen)
}

/// Sample the largest triangles weighted by area, then one vertex of each uniformly.
pub fn simplex<R: Rng + ?Sized>(
    num_parents: usize,
    triangulation: &Triangulation,
    points: &[Point],
    rng: &mut R,
) -> Result<Vec<usize>, SelectError> {
    let mut areas = triangulation.simplex_areas(points);
    areas.sort_by(|a, b| a.1.total_cmp(&b.1));
    let keep = num_parents.min(areas.len());
    let largest = &areas[areas.len() - keep..];
    if largest.is_empty() {
        return Ok(Vec::new());
    }

    let dist = WeightedIndex::new(largest.iter().map(|(_, area)| *area))?;
    Ok((0..num_parents)
        .map(|_| largest[dist.sample(rng)].0[rng.gen_range(0..3)])
        .collect())
}

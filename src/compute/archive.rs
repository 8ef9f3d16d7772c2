//! N-dimensional bin archive over evaluated property space.
//!
//! Each dimension covers one configured property range split into equal bins. A bin holds
//! the population indices of every material whose properties fall inside it. Bins only
//! ever grow.

use serde::{Deserialize, Serialize};

use crate::schema::SearchConfig;

/// Bin coordinates, one index per dimension.
pub type BinIndex = Vec<usize>;

/// Bin index of `value` in `[lo, hi]` split into `bins` equal bins.
///
/// Out-of-range values saturate into the first or last bin.
pub fn calc_bin(value: f64, lo: f64, hi: f64, bins: usize) -> usize {
    let clamped = value.clamp(lo, hi);
    let bin = ((clamped - lo) / (hi - lo) * bins as f64).floor() as usize;
    bin.min(bins.saturating_sub(1))
}

/// Bin every property tuple in `values`, using `num_bins` bins per dimension.
pub fn calc_bins<V: AsRef<[f64]>>(
    values: &[V],
    num_bins: usize,
    ranges: &[(f64, f64)],
) -> Vec<BinIndex> {
    values
        .iter()
        .map(|v| {
            v.as_ref()
                .iter()
                .zip(ranges)
                .map(|(x, (lo, hi))| calc_bin(*x, *lo, *hi, num_bins))
                .collect()
        })
        .collect()
}

/// Occupancy grid of the explored property space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    shape: Vec<usize>,
    ranges: Vec<(f64, f64)>,
    /// Row-major occupant lists, one per bin.
    bins: Vec<Vec<usize>>,
    occupied: usize,
}

impl Archive {
    /// Create an empty archive with `shape[d]` bins over `ranges[d]` per dimension.
    pub fn new(shape: Vec<usize>, ranges: Vec<(f64, f64)>) -> Self {
        assert_eq!(shape.len(), ranges.len(), "one range per dimension");
        let total = shape.iter().product();
        Self {
            shape,
            ranges,
            bins: vec![Vec::new(); total],
            occupied: 0,
        }
    }

    /// Empty archive spanning the configured bin properties.
    pub fn from_config(config: &SearchConfig) -> Self {
        let ranges = config.bin_ranges();
        Self::new(vec![config.num_bins; ranges.len()], ranges)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dimensions(&self) -> usize {
        self.shape.len()
    }

    /// Total number of bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Bin coordinates for a property tuple.
    pub fn bin_for(&self, values: &[f64]) -> BinIndex {
        values
            .iter()
            .zip(self.ranges.iter().zip(&self.shape))
            .map(|(x, ((lo, hi), n))| calc_bin(*x, *lo, *hi, *n))
            .collect()
    }

    fn offset(&self, bin: &[usize]) -> Option<usize> {
        if bin.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (i, n) in bin.iter().zip(&self.shape) {
            if i >= n {
                return None;
            }
            offset = offset * n + i;
        }
        Some(offset)
    }

    fn coordinates(&self, mut offset: usize) -> BinIndex {
        let mut coords = vec![0; self.shape.len()];
        for (c, n) in coords.iter_mut().zip(&self.shape).rev() {
            *c = offset % n;
            offset /= n;
        }
        coords
    }

    /// Record population index `index` as an occupant of `bin`.
    ///
    /// Returns `false` if `bin` lies outside the grid.
    pub fn insert(&mut self, bin: &[usize], index: usize) -> bool {
        let Some(offset) = self.offset(bin) else {
            return false;
        };
        let occupants = &mut self.bins[offset];
        if occupants.is_empty() {
            self.occupied += 1;
        }
        occupants.push(index);
        true
    }

    /// Bin a property tuple and record `index` in that bin.
    pub fn add(&mut self, values: &[f64], index: usize) -> BinIndex {
        let bin = self.bin_for(values);
        self.insert(&bin, index);
        bin
    }

    /// Population indices in `bin`; empty for bins outside the grid.
    pub fn occupants(&self, bin: &[usize]) -> &[usize] {
        self.offset(bin)
            .map(|o| self.bins[o].as_slice())
            .unwrap_or(&[])
    }

    /// Number of occupants in `bin`.
    pub fn count(&self, bin: &[usize]) -> usize {
        self.occupants(bin).len()
    }

    /// Every bin with at least one occupant, in row-major order.
    pub fn occupied_bins(&self) -> impl Iterator<Item = (BinIndex, &[usize])> + '_ {
        self.bins
            .iter()
            .enumerate()
            .filter(|(_, occupants)| !occupants.is_empty())
            .map(|(offset, occupants)| (self.coordinates(offset), occupants.as_slice()))
    }

    /// Number of bins with at least one occupant.
    pub fn occupied_count(&self) -> usize {
        self.occupied
    }

    /// Fraction of bins with at least one occupant.
    pub fn coverage(&self) -> f64 {
        if self.bins.is_empty() {
            return 0.0;
        }
        self.occupied as f64 / self.bins.len() as f64
    }

    /// Bins within Chebyshev distance `radius` of `bin`, clipped to the grid.
    ///
    /// Includes `bin` itself.
    pub fn neighborhood(&self, bin: &[usize], radius: usize) -> Vec<BinIndex> {
        let mut result: Vec<BinIndex> = vec![Vec::with_capacity(bin.len())];
        for (c, n) in bin.iter().zip(&self.shape) {
            let lo = c.saturating_sub(radius);
            let hi = c.saturating_add(radius).min(n - 1);
            result = result
                .into_iter()
                .flat_map(|prefix| {
                    (lo..=hi).map(move |i| {
                        let mut next = prefix.clone();
                        next.push(i);
                        next
                    })
                })
                .collect();
        }
        result
    }
}

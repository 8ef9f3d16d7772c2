//! Partial-charge generation and neutrality maintenance.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::schema::CHARGE_TOLERANCE;

/// Charge balancing errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChargeError {
    #[error("Cannot rebalance charges within limits; residual net charge {residual:e}")]
    Infeasible { residual: f64 },
    #[error("Charge index {index} out of range for {len} charges")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Perturb `value` by up to half of `strength * (hi - lo)` either way, clamped to `limits`.
///
/// At `strength = 1.0` a value at the midpoint is redrawn uniformly over the whole range.
pub fn perturb_unweighted<R: Rng + ?Sized>(
    value: f64,
    strength: f64,
    limits: (f64, f64),
    rng: &mut R,
) -> f64 {
    let max_change = strength * (limits.1 - limits.0);
    let delta = if max_change > 0.0 {
        rng.gen_range(-max_change..=max_change)
    } else {
        0.0
    };
    (value + delta / 2.0).clamp(limits.0, limits.1)
}

/// Draw `count` charges in `[-abs_max, abs_max]` that sum to zero.
///
/// Each charge is drawn from the interval that still lets the remaining charges cancel
/// the running total, so the last charge closes the balance exactly.
pub fn random_charges<R: Rng + ?Sized>(count: usize, abs_max: f64, rng: &mut R) -> Vec<f64> {
    let mut total = 0.0;
    let mut charges = Vec::with_capacity(count);
    for i in 0..count {
        let remaining = (count - i - 1) as f64 * abs_max;
        let lo = (-remaining - total).max(-abs_max);
        let hi = (remaining - total).min(abs_max);
        let q = if lo < hi { rng.gen_range(lo..=hi) } else { lo };
        total += q;
        charges.push(q);
    }
    charges
}

/// Restore zero net charge by shifting charges not listed in `exclude`.
///
/// Adjustable charges are visited in random order, each at most once. Every visit moves
/// the charge as far toward cancelling the residual as `limits` allow.
pub fn rebalance_charges<R: Rng + ?Sized>(
    charges: &mut [f64],
    limits: (f64, f64),
    exclude: &[usize],
    rng: &mut R,
) -> Result<(), ChargeError> {
    let mut delta: f64 = charges.iter().sum();
    let mut adjustable: Vec<usize> = (0..charges.len())
        .filter(|i| !exclude.contains(i))
        .collect();
    adjustable.shuffle(rng);

    for i in adjustable {
        if delta.abs() <= CHARGE_TOLERANCE {
            return Ok(());
        }
        let q = (charges[i] - delta).clamp(limits.0, limits.1);
        delta += q - charges[i];
        charges[i] = q;
    }

    if delta.abs() <= CHARGE_TOLERANCE {
        Ok(())
    } else {
        Err(ChargeError::Infeasible { residual: delta })
    }
}

/// Perturb the charge at `index` and rebalance every other charge around it.
///
/// A lone charge is pinned at zero.
pub fn mutate_charge<R: Rng + ?Sized>(
    charges: &[f64],
    index: usize,
    strength: f64,
    limits: (f64, f64),
    rng: &mut R,
) -> Result<Vec<f64>, ChargeError> {
    if index >= charges.len() {
        return Err(ChargeError::IndexOutOfRange {
            index,
            len: charges.len(),
        });
    }
    if charges.len() == 1 {
        return Ok(vec![0.0]);
    }

    let mut mutated = charges.to_vec();
    mutated[index] = perturb_unweighted(charges[index], strength, limits, rng);
    rebalance_charges(&mut mutated, limits, &[index], rng)?;
    Ok(mutated)
}

/// Apply [`mutate_charge`] to every charge in turn.
pub fn mutate_charges<R: Rng + ?Sized>(
    charges: &[f64],
    strength: f64,
    limits: (f64, f64),
    rng: &mut R,
) -> Result<Vec<f64>, ChargeError> {
    let mut mutated = charges.to_vec();
    for i in 0..charges.len() {
        mutated = mutate_charge(&mutated, i, strength, limits, rng)?;
    }
    Ok(mutated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn within(charges: &[f64], limits: (f64, f64)) -> bool {
        charges.iter().all(|q| *q >= limits.0 && *q <= limits.1)
    }

    #[test]
    fn test_random_charges_total_is_zero() {
        let mut rng = StdRng::seed_from_u64(0);
        for n in [1, 2, 3, 10] {
            let q = random_charges(n, 1.0, &mut rng);
            assert_eq!(q.len(), n);
            assert!(q.iter().sum::<f64>().abs() < 1e-12);
            assert!(within(&q, (-1.0, 1.0)));
        }
        assert_eq!(random_charges(1, 1.0, &mut rng), vec![0.0]);
    }

    #[test]
    fn test_rebalance_excludes_indices() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut q = vec![0.8, 0.0, 0.0];
        rebalance_charges(&mut q, (-1.0, 1.0), &[0], &mut rng).unwrap();
        assert_eq!(q[0], 0.8);
        assert!(q.iter().sum::<f64>().abs() < 1e-12);
    }

    #[test]
    fn test_rebalance_infeasible() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut q = vec![0.9, 0.9, -0.5];
        let err = rebalance_charges(&mut q, (-0.5, 1.0), &[0, 1], &mut rng).unwrap_err();
        assert!(matches!(err, ChargeError::Infeasible { residual } if residual > 0.0));

        let mut all_excluded = vec![0.5, 0.0];
        assert!(rebalance_charges(&mut all_excluded, (-1.0, 1.0), &[0, 1], &mut rng).is_err());
    }

    #[test]
    fn test_mutate_charge_total_is_zero() {
        let mut rng = StdRng::seed_from_u64(0);
        let limits = (-1.0, 1.0);
        assert_eq!(mutate_charge(&[0.0], 0, 0.2, limits, &mut rng).unwrap(), vec![0.0]);
        for start in [
            vec![-1.0, 1.0],
            vec![-0.5, -0.5, 1.0],
            vec![0.5, 0.5, -1.0],
        ] {
            let q = mutate_charge(&start, 0, 0.2, limits, &mut rng).unwrap();
            assert!(q.iter().sum::<f64>().abs() < 1e-12);
            assert!(within(&q, limits));
        }
    }

    #[test]
    fn test_mutate_charge_changes_target() {
        let mut rng = StdRng::seed_from_u64(0);
        let q = mutate_charge(&[0.5, -0.5], 0, 0.2, (-1.0, 1.0), &mut rng).unwrap();
        assert_ne!(q[0], 0.5);
        assert!(matches!(
            mutate_charge(&[0.5, -0.5], 2, 0.2, (-1.0, 1.0), &mut rng),
            Err(ChargeError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_random_and_mutate_charges_aggregate() {
        let limits = (-1.0, 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let n = rng.gen_range(2..8);
            let q = random_charges(n, limits.1, &mut rng);
            assert!(q.iter().sum::<f64>().abs() < 1e-9);
            assert!(within(&q, limits));

            let qn = mutate_charges(&q, 1.0, limits, &mut rng).unwrap();
            assert!(qn.iter().sum::<f64>().abs() < 1e-9);
            assert!(within(&qn, limits));
        }
    }

    #[test]
    fn test_perturb_unweighted_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1000 {
            let v = perturb_unweighted(5.9, 1.0, (2.0, 6.0), &mut rng);
            assert!((2.0..=6.0).contains(&v));
            let v = perturb_unweighted(4.0, 0.1, (2.0, 6.0), &mut rng);
            assert!((3.8..=4.2).contains(&v));
        }
        assert_eq!(perturb_unweighted(3.0, 0.0, (2.0, 6.0), &mut rng), 3.0);
    }
}

//! Random pseudomaterial generation.
//!
//! Materials are drawn uniformly within the configured structure bounds and rejected
//! when any two sites sit closer than the minimum site distance.

use rand::Rng;

use crate::schema::{AtomSite, AtomType, Lattice, Material, StructureConfig};

use super::charges::random_charges;
use super::geometry::{min_distance_to, min_pair_distance};

/// Errors from random generation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error(
        "Failed to create a material with sites at least {minimum_site_distance} apart in {attempts} attempts"
    )]
    AttemptsExhausted {
        attempts: usize,
        minimum_site_distance: f64,
    },
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, bounds: (f64, f64)) -> f64 {
    if bounds.0 < bounds.1 {
        rng.gen_range(bounds.0..=bounds.1)
    } else {
        bounds.0
    }
}

/// Draw `count` atom types with sigma and epsilon uniform in their limits.
pub fn random_atom_types<R: Rng + ?Sized>(
    count: usize,
    config: &StructureConfig,
    rng: &mut R,
) -> Vec<AtomType> {
    (0..count)
        .map(|_| AtomType {
            sigma: uniform(rng, config.sigma_limits),
            epsilon: uniform(rng, config.epsilon_limits),
        })
        .collect()
}

/// Draw a uniformly random fractional position.
pub fn random_position<R: Rng + ?Sized>(rng: &mut R) -> [f64; 3] {
    [rng.r#gen(), rng.r#gen(), rng.r#gen()]
}

/// Place one site per charge at a random position with a random atom type.
pub fn random_atom_sites<R: Rng + ?Sized>(
    charges: &[f64],
    num_atom_types: usize,
    rng: &mut R,
) -> Vec<AtomSite> {
    charges
        .iter()
        .map(|&charge| AtomSite {
            position: random_position(rng),
            charge,
            atom_type: rng.gen_range(0..num_atom_types),
        })
        .collect()
}

/// Search up to `trials` random positions for one that keeps the minimum pair distance
/// of `existing` plus the new position above `distance` (absolute), in a cubic cell of
/// edge `a`.
pub fn find_site_with_minimum_distance<R: Rng + ?Sized>(
    existing: &[[f64; 3]],
    distance: f64,
    a: f64,
    trials: usize,
    rng: &mut R,
) -> Option<[f64; 3]> {
    let base = min_pair_distance(existing);
    (0..trials)
        .map(|_| random_position(rng))
        .find(|trial| base.min(min_distance_to(trial, existing)) * a > distance)
}

/// Generate a new random material.
pub fn new_material<R: Rng + ?Sized>(
    config: &StructureConfig,
    rng: &mut R,
) -> Result<Material, GenerationError> {
    for attempt in 0..config.generation_attempts {
        let a = uniform(rng, config.lattice_constant_limits);
        let lattice = if config.lattice_cubic {
            Lattice::cubic(a)
        } else {
            Lattice {
                a,
                b: uniform(rng, config.lattice_constant_limits),
                c: uniform(rng, config.lattice_constant_limits),
            }
        };

        let atom_types = random_atom_types(config.number_of_atom_types, config, rng);
        let num_atoms = rng.gen_range(config.num_atoms_limits.0..=config.num_atoms_limits.1);
        let charges = random_charges(num_atoms, config.max_abs_charge(), rng);
        let atom_sites = random_atom_sites(&charges, atom_types.len(), rng);

        let material = Material::new(lattice, atom_types, atom_sites);
        if material.min_pair_distance() * material.lattice.a > config.minimum_site_distance {
            return Ok(material);
        }
        log::trace!("Generation attempt {} rejected: sites too close", attempt + 1);
    }

    Err(GenerationError::AttemptsExhausted {
        attempts: config.generation_attempts,
        minimum_site_distance: config.minimum_site_distance,
    })
}

/// Pick a uniformly random atom type index, if any exist.
pub fn random_atom_type<R: Rng + ?Sized>(num_atom_types: usize, rng: &mut R) -> Option<usize> {
    (num_atom_types > 0).then(|| rng.gen_range(0..num_atom_types))
}

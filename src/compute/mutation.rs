//! Mutation of a parent pseudomaterial into a child.
//!
//! The child starts as a copy of the parent's structure. Each configured perturbation kind
//! is then applied in a fixed order: number of atoms, atom type assignments, atom types,
//! lattice, atom sites, charges.

use std::collections::BTreeSet;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::schema::{
    AtomSite, Material, PerturbMode, Perturbation, PerturbationKind, StructureConfig,
};

use super::charges::{ChargeError, mutate_charges, perturb_unweighted, rebalance_charges};
use super::generator::{find_site_with_minimum_distance, random_atom_types, random_position};
use super::geometry::{displace_position, min_distance_to, min_pair_distance};

/// Errors from mutation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MutationError {
    #[error("Charge rebalancing failed: {0}")]
    Charge(#[from] ChargeError),
    #[error("No perturbation kinds configured")]
    NoPerturbations,
}

/// Produce a child of `parent` under `config`.
pub fn mutate_material<R: Rng + ?Sized>(
    parent: &Material,
    config: &StructureConfig,
    rng: &mut R,
) -> Result<Material, MutationError> {
    let mut child = parent.spawn_child();

    let configured: BTreeSet<PerturbationKind> = config.perturb.iter().copied().collect();
    let kinds = match config.perturb_type {
        PerturbMode::Random => {
            let options: Vec<_> = configured.into_iter().collect();
            let kind = *options.choose(rng).ok_or(MutationError::NoPerturbations)?;
            child.perturbation = Perturbation::Only(kind);
            BTreeSet::from([kind])
        }
        PerturbMode::All => {
            child.perturbation = Perturbation::All;
            configured
        }
    };

    log::debug!(
        "Parent id: {:?}, perturbing: {} {:?}",
        parent.id,
        child.perturbation,
        kinds
    );

    let ms = config.mutation_strength;

    if config.number_of_atom_types > child.atom_types.len() {
        let missing = config.number_of_atom_types - child.atom_types.len();
        log::debug!("Adding {missing} random atom types to match the configured count");
        child
            .atom_types
            .extend(random_atom_types(missing, config, rng));
    }

    if kinds.contains(&PerturbationKind::NumAtoms) && rng.r#gen::<f64>() < ms {
        if rng.gen_bool(0.5) {
            remove_atom(&mut child, config, rng)?;
        } else {
            add_atom(&mut child, config, rng)?;
        }
    }

    if kinds.contains(&PerturbationKind::AtomTypeAssignments) {
        let num_types = child.atom_types.len();
        for (i, site) in child.atom_sites.iter_mut().enumerate() {
            if rng.r#gen::<f64>() < ms * ms {
                let new_type = rng.gen_range(0..num_types);
                log::debug!(
                    "Reassigning atom type for site {i} from {} to {new_type}",
                    site.atom_type
                );
                site.atom_type = new_type;
            }
        }
    }

    if kinds.contains(&PerturbationKind::AtomTypes) {
        for atom_type in &mut child.atom_types {
            atom_type.sigma = perturb_unweighted(atom_type.sigma, ms, config.sigma_limits, rng);
            atom_type.epsilon =
                perturb_unweighted(atom_type.epsilon, ms, config.epsilon_limits, rng);
        }
    }

    if kinds.contains(&PerturbationKind::Lattice) {
        let limits = config.lattice_constant_limits;
        let trial_a = perturb_unweighted(child.lattice.a, ms, limits, rng);
        child.lattice.a = trial_a.max(child.min_unit_cell_a(config.minimum_site_distance));
        if config.lattice_cubic {
            child.lattice.b = child.lattice.a;
            child.lattice.c = child.lattice.a;
        } else {
            child.lattice.b = perturb_unweighted(child.lattice.b, ms, limits, rng);
            child.lattice.c = perturb_unweighted(child.lattice.c, ms, limits, rng);
        }
    }

    if kinds.contains(&PerturbationKind::AtomSites) {
        let failed = move_sites(
            &mut child.atom_sites,
            child.lattice.a,
            ms,
            config.minimum_site_distance,
            config.placement_trials,
            rng,
        );
        if failed > 0 {
            log::warn!("Failed to move {failed} of {} sites", child.atom_sites.len());
        }
    }

    if kinds.contains(&PerturbationKind::Charges) {
        let charges = mutate_charges(&child.charges(), ms, config.charge_limits, rng)?;
        child.set_charges(&charges);
    }

    log_parent_child_diff(parent, &child);
    Ok(child)
}

fn remove_atom<R: Rng + ?Sized>(
    child: &mut Material,
    config: &StructureConfig,
    rng: &mut R,
) -> Result<(), ChargeError> {
    if child.atom_sites.len() <= config.num_atoms_limits.0 {
        return Ok(());
    }
    let index = rng.gen_range(0..child.atom_sites.len());
    let removed = child.atom_sites.remove(index);
    log::debug!("Removing atom site {index}: {removed:?}");

    let mut charges = child.charges();
    rebalance_charges(&mut charges, config.charge_limits, &[], rng)?;
    child.set_charges(&charges);
    Ok(())
}

fn add_atom<R: Rng + ?Sized>(
    child: &mut Material,
    config: &StructureConfig,
    rng: &mut R,
) -> Result<(), ChargeError> {
    if child.atom_sites.len() >= config.num_atoms_limits.1 {
        return Ok(());
    }

    let Some(position) = find_site_with_minimum_distance(
        &child.positions(),
        config.minimum_site_distance,
        child.lattice.a,
        config.placement_trials,
        rng,
    ) else {
        log::warn!("Failed to add a new atom site");
        return Ok(());
    };

    let (lo, hi) = config.charge_limits;
    let charge = if lo < hi { rng.gen_range(lo..=hi) } else { lo };
    child.atom_sites.push(AtomSite {
        position,
        charge,
        atom_type: rng.gen_range(0..child.atom_types.len()),
    });
    log::debug!("Added atom site at {position:?}");

    let new_index = child.atom_sites.len() - 1;
    let mut charges = child.charges();
    rebalance_charges(&mut charges, config.charge_limits, &[new_index], rng)?;
    child.set_charges(&charges);
    Ok(())
}

/// Move every site toward a random target along the shorter periodic path.
///
/// A move is accepted when the minimum pair distance of the other sites plus the moved
/// one stays above `distance / a`. Sites with no acceptable move in `trials` attempts stay
/// put. Returns the number of sites left unmoved.
pub fn move_sites<R: Rng + ?Sized>(
    sites: &mut [AtomSite],
    a: f64,
    strength: f64,
    distance: f64,
    trials: usize,
    rng: &mut R,
) -> usize {
    let mut failed = 0;
    for i in 0..sites.len() {
        let others: Vec<[f64; 3]> = sites
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, s)| s.position)
            .collect();

        match find_move_position(&sites[i].position, &others, a, strength, distance, trials, rng)
        {
            Some(position) => sites[i].position = position,
            None => failed += 1,
        }
    }
    failed
}

/// Try up to `trials` displacements of `position` that keep every site far enough apart.
pub fn find_move_position<R: Rng + ?Sized>(
    position: &[f64; 3],
    others: &[[f64; 3]],
    a: f64,
    strength: f64,
    distance: f64,
    trials: usize,
    rng: &mut R,
) -> Option<[f64; 3]> {
    let base = min_pair_distance(others);
    (0..trials)
        .map(|_| displace_position(position, &random_position(rng), strength))
        .find(|trial| base.min(min_distance_to(trial, others)) > distance / a)
}

fn log_parent_child_diff(parent: &Material, child: &Material) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let p = &parent.lattice;
    let c = &child.lattice;
    log::debug!(
        "lattice constants: ({:.2}, {:.2}, {:.2}) => ({:.2}, {:.2}, {:.2})",
        p.a,
        p.b,
        p.c,
        c.a,
        c.b,
        c.c
    );
    log::debug!(
        "number of atoms: {} => {}",
        parent.atom_sites.len(),
        child.atom_sites.len()
    );
    let format_types = |m: &Material| {
        m.atom_types
            .iter()
            .map(|t| format!("({:.1}, {:.1})", t.epsilon, t.sigma))
            .collect::<Vec<_>>()
            .join(", ")
    };
    log::debug!(
        "atom types: {} => {}",
        format_types(parent),
        format_types(child)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::new_material;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config() -> StructureConfig {
        StructureConfig {
            lattice_constant_limits: (8.0, 16.0),
            number_of_atom_types: 3,
            sigma_limits: (2.0, 6.0),
            epsilon_limits: (2.516, 342.176),
            num_atoms_limits: (2, 10),
            charge_limits: (-1.0, 1.0),
            minimum_site_distance: 1.0,
            mutation_strength: 0.5,
            ..Default::default()
        }
    }

    fn site(position: [f64; 3]) -> AtomSite {
        AtomSite {
            position,
            charge: 0.0,
            atom_type: 0,
        }
    }

    #[test]
    fn test_child_keeps_invariants() {
        let mut rng = StdRng::seed_from_u64(11);
        let config = config();
        let mut parent = new_material(&config, &mut rng).unwrap();
        parent.id = Some(1);

        let mut current = parent;
        for generation in 2..40 {
            let mut child = mutate_material(&current, &config, &mut rng).unwrap();
            assert_eq!(child.parent_id, current.id);
            assert_eq!(child.generation, generation);
            assert_eq!(child.perturbation, Perturbation::All);
            assert!(child.lattice.is_cubic());
            assert!(child.net_charge().abs() < 1e-9);
            assert!(child.atom_sites.iter().all(|s| s.charge.abs() <= 1.0));
            assert!(child.atom_sites.iter().all(|s| s.atom_type < 3));
            let n = child.atom_sites.len();
            assert!((2..=10).contains(&n));
            let separation = child.min_pair_distance() * child.lattice.a;
            assert!(separation >= config.minimum_site_distance - 1e-9);

            child.id = Some(generation as u64);
            current = child;
        }
    }

    #[test]
    fn test_random_mode_applies_one_kind() {
        let mut rng = StdRng::seed_from_u64(3);
        let config = StructureConfig {
            perturb: vec![PerturbationKind::AtomTypes, PerturbationKind::Lattice],
            perturb_type: PerturbMode::Random,
            ..config()
        };
        let parent = new_material(&config, &mut rng).unwrap();

        for _ in 0..50 {
            let child = mutate_material(&parent, &config, &mut rng).unwrap();
            match child.perturbation {
                Perturbation::Only(PerturbationKind::AtomTypes) => {
                    assert_eq!(child.lattice, parent.lattice);
                    assert_ne!(child.atom_types, parent.atom_types);
                }
                Perturbation::Only(PerturbationKind::Lattice) => {
                    assert_eq!(child.atom_types, parent.atom_types);
                }
                other => panic!("unexpected perturbation {other}"),
            }
            assert_eq!(child.atom_sites, parent.atom_sites);
        }
    }

    #[test]
    fn test_atom_types_topped_up() {
        let mut rng = StdRng::seed_from_u64(4);
        let config = config();
        let mut parent = new_material(&config, &mut rng).unwrap();
        parent.atom_types.truncate(1);
        for s in &mut parent.atom_sites {
            s.atom_type = 0;
        }

        let child = mutate_material(
            &parent,
            &StructureConfig {
                perturb: vec![PerturbationKind::Charges],
                ..config.clone()
            },
            &mut rng,
        )
        .unwrap();
        assert_eq!(child.atom_types.len(), 3);
        assert_eq!(child.atom_types[0], parent.atom_types[0]);
    }

    #[test]
    fn test_lattice_never_shrinks_below_site_spacing() {
        let mut rng = StdRng::seed_from_u64(8);
        let parent = new_material(&config(), &mut rng).unwrap();
        let config = StructureConfig {
            lattice_constant_limits: (1.0, 16.0),
            perturb: vec![PerturbationKind::Lattice],
            mutation_strength: 1.0,
            ..config()
        };
        let min_a = parent.min_unit_cell_a(config.minimum_site_distance);
        for _ in 0..200 {
            let child = mutate_material(&parent, &config, &mut rng).unwrap();
            assert!(child.lattice.a >= min_a);
        }
    }

    #[test]
    fn test_non_cubic_lattice_edges_move_independently() {
        let mut rng = StdRng::seed_from_u64(9);
        let config = StructureConfig {
            lattice_cubic: false,
            perturb: vec![PerturbationKind::Lattice],
            ..config()
        };
        let parent = new_material(&config, &mut rng).unwrap();
        let (lo, hi) = config.lattice_constant_limits;

        let mut independent_b = false;
        let mut independent_c = false;
        for _ in 0..100 {
            let child = mutate_material(&parent, &config, &mut rng).unwrap();
            let [da, db, dc] = [
                child.lattice.a - parent.lattice.a,
                child.lattice.b - parent.lattice.b,
                child.lattice.c - parent.lattice.c,
            ];
            assert!((lo..=hi).contains(&child.lattice.b));
            assert!((lo..=hi).contains(&child.lattice.c));
            independent_b |= db != 0.0 && db != da;
            independent_c |= dc != 0.0 && dc != da && dc != db;
            assert_eq!(child.atom_sites, parent.atom_sites);
        }
        assert!(independent_b);
        assert!(independent_c);
    }

    #[test]
    fn test_move_single_site_passes() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(find_move_position(&[0.5, 0.5, 0.5], &[], 2.0, 0.2, 0.7, 1, &mut rng).is_some());
    }

    #[test]
    fn test_move_on_too_small_lattice_fails() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(find_move_position(&[0.5, 0.5, 0.5], &[], 2.0, 0.2, 2.1, 1, &mut rng).is_none());
    }

    #[test]
    fn test_move_on_bcc_at_minimum_lattice_fails() {
        let mut rng = StdRng::seed_from_u64(0);
        let others = [[0.0, 0.0, 0.0]];
        assert!(
            find_move_position(&[0.5, 0.5, 0.5], &others, 1.0, 0.2, 4.5, 1000, &mut rng).is_none()
        );
    }

    #[test]
    fn test_moves_keep_distance() {
        let mut rng = StdRng::seed_from_u64(12);
        let others = [[0.0, 0.0, 0.0]];
        let a = 2.0;
        let distance = 3f64.sqrt() / 2.0;
        let mut found = 0;
        for _ in 0..1000 {
            if let Some(p) =
                find_move_position(&[0.5, 0.5, 0.5], &others, a, 0.2, distance, 1, &mut rng)
            {
                found += 1;
                assert!(a * min_pair_distance(&[others[0], p]) >= distance);
            }
        }
        assert_eq!(found, 1000);
    }

    #[test]
    fn test_move_sites_reports_failures() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut sites = vec![site([0.0, 0.0, 0.0]), site([0.5, 0.5, 0.5])];
        let before = sites.clone();
        let failed = move_sites(&mut sites, 1.0, 0.2, 4.5, 10, &mut rng);
        assert_eq!(failed, 2);
        assert_eq!(sites, before);
    }
}

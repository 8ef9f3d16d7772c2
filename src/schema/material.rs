//! Pseudomaterial data model.
//!
//! A material is a periodic unit cell (lattice edges `a`, `b`, `c`) holding a set of
//! Lennard-Jones atom types and a set of charged atom sites in fractional coordinates.
//! Lineage is recorded as a plain `parent_id`; materials never hold references to each other.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compute::{max_pair_distance, min_pair_distance};

/// Tolerance on the net charge of a material.
pub const CHARGE_TOLERANCE: f64 = 1e-12;

/// Evaluated property values keyed by property name.
pub type Properties = BTreeMap<String, f64>;

/// Lennard-Jones parameters for one atom type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtomType {
    pub sigma: f64,
    pub epsilon: f64,
}

/// One atom site in fractional coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtomSite {
    /// Fractional position, each axis in [0, 1).
    pub position: [f64; 3],
    /// Partial charge.
    pub charge: f64,
    /// Index into the owning material's `atom_types`.
    pub atom_type: usize,
}

/// Unit cell edge lengths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Lattice {
    /// Cubic cell with every edge equal to `a`.
    pub fn cubic(a: f64) -> Self {
        Self { a, b: a, c: a }
    }

    pub fn volume(&self) -> f64 {
        self.a * self.b * self.c
    }

    pub fn is_cubic(&self) -> bool {
        self.a == self.b && self.b == self.c
    }
}

/// A perturbation kind that the mutation operator can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerturbationKind {
    NumAtoms,
    AtomTypeAssignments,
    AtomTypes,
    Lattice,
    AtomSites,
    Charges,
}

impl PerturbationKind {
    pub const ALL: [PerturbationKind; 6] = [
        PerturbationKind::NumAtoms,
        PerturbationKind::AtomTypeAssignments,
        PerturbationKind::AtomTypes,
        PerturbationKind::Lattice,
        PerturbationKind::AtomSites,
        PerturbationKind::Charges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PerturbationKind::NumAtoms => "num_atoms",
            PerturbationKind::AtomTypeAssignments => "atom_type_assignments",
            PerturbationKind::AtomTypes => "atom_types",
            PerturbationKind::Lattice => "lattice",
            PerturbationKind::AtomSites => "atom_sites",
            PerturbationKind::Charges => "charges",
        }
    }
}

/// Label recording how a material was derived from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perturbation {
    /// Randomly generated; no parent.
    #[default]
    None,
    /// Every configured kind was applied.
    All,
    /// Exactly one kind was applied.
    Only(PerturbationKind),
}

impl fmt::Display for Perturbation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Perturbation::None => write!(f, "none"),
            Perturbation::All => write!(f, "all"),
            Perturbation::Only(kind) => write!(f, "{}", kind.as_str()),
        }
    }
}

/// Identity of a material: the store id once persisted, a UUID before that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialId {
    Stored(u64),
    Transient(Uuid),
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialId::Stored(id) => write!(f, "{id}"),
            MaterialId::Transient(uuid) => write!(f, "{uuid}"),
        }
    }
}

/// A candidate pseudomaterial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Store id, assigned on persistence.
    pub id: Option<u64>,
    /// Transient identity used before persistence.
    pub uuid: Uuid,
    /// Id of the material this one was mutated from.
    pub parent_id: Option<u64>,
    /// Generation number, starting at 1.
    pub generation: usize,
    pub perturbation: Perturbation,
    pub lattice: Lattice,
    pub atom_types: Vec<AtomType>,
    pub atom_sites: Vec<AtomSite>,
    /// Properties reported by the simulator. Empty until evaluated.
    #[serde(default)]
    pub properties: Properties,
}

impl Material {
    /// Create an unpersisted generation-1 material.
    pub fn new(lattice: Lattice, atom_types: Vec<AtomType>, atom_sites: Vec<AtomSite>) -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            parent_id: None,
            generation: 1,
            perturbation: Perturbation::None,
            lattice,
            atom_types,
            atom_sites,
            properties: Properties::new(),
        }
    }

    /// Copy the structure into a fresh, unpersisted child of this material.
    ///
    /// Evaluated properties are not carried over.
    pub fn spawn_child(&self) -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            parent_id: self.id,
            generation: self.generation + 1,
            perturbation: Perturbation::All,
            lattice: self.lattice,
            atom_types: self.atom_types.clone(),
            atom_sites: self.atom_sites.clone(),
            properties: Properties::new(),
        }
    }

    pub fn id_or_uuid(&self) -> MaterialId {
        match self.id {
            Some(id) => MaterialId::Stored(id),
            None => MaterialId::Transient(self.uuid),
        }
    }

    pub fn volume(&self) -> f64 {
        self.lattice.volume()
    }

    pub fn number_density(&self) -> f64 {
        self.atom_sites.len() as f64 / self.volume()
    }

    /// Sum of the epsilon of every site's atom type.
    pub fn total_epsilon(&self) -> f64 {
        self.atom_sites
            .iter()
            .filter_map(|s| self.atom_types.get(s.atom_type))
            .map(|t| t.epsilon)
            .sum()
    }

    pub fn epsilon_density(&self) -> f64 {
        self.total_epsilon() / self.volume()
    }

    pub fn positions(&self) -> Vec<[f64; 3]> {
        self.atom_sites.iter().map(|s| s.position).collect()
    }

    /// Largest periodic site separation, in fractional units.
    pub fn max_pair_distance(&self) -> f64 {
        max_pair_distance(&self.positions())
    }

    /// Smallest periodic site separation, in fractional units.
    pub fn min_pair_distance(&self) -> f64 {
        min_pair_distance(&self.positions())
    }

    /// Smallest edge `a` that keeps the current sites `min_distance` apart.
    pub fn min_unit_cell_a(&self, min_distance: f64) -> f64 {
        min_distance / self.min_pair_distance()
    }

    /// Number of cell repeats per axis needed to cover a potential cutoff.
    pub fn minimum_unit_cells(&self, cutoff: f64) -> (usize, usize, usize) {
        (
            (2.0 * cutoff / self.lattice.a).ceil() as usize,
            (2.0 * cutoff / self.lattice.b).ceil() as usize,
            (2.0 * cutoff / self.lattice.c).ceil() as usize,
        )
    }

    pub fn charges(&self) -> Vec<f64> {
        self.atom_sites.iter().map(|s| s.charge).collect()
    }

    /// Overwrite site charges in order.
    pub fn set_charges(&mut self, charges: &[f64]) {
        for (site, q) in self.atom_sites.iter_mut().zip(charges) {
            site.charge = *q;
        }
    }

    pub fn net_charge(&self) -> f64 {
        self.atom_sites.iter().map(|s| s.charge).sum()
    }

    /// Check the structural invariants every persisted material must satisfy.
    pub fn validate(&self, minimum_site_distance: f64) -> Result<(), MaterialError> {
        let net = self.net_charge();
        if net.abs() > 1e-9 {
            return Err(MaterialError::NetCharge(net));
        }

        for (index, site) in self.atom_sites.iter().enumerate() {
            if site.atom_type >= self.atom_types.len() {
                return Err(MaterialError::DanglingAtomType {
                    site: index,
                    atom_type: site.atom_type,
                });
            }
        }

        let separation = self.min_pair_distance() * self.lattice.a;
        if self.atom_sites.len() > 1 && separation <= minimum_site_distance {
            return Err(MaterialError::SitesTooClose {
                separation,
                minimum: minimum_site_distance,
            });
        }

        Ok(())
    }
}

/// Violations of the material invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MaterialError {
    #[error("Net charge {0:e} is not neutral")]
    NetCharge(f64),
    #[error("Site {site} references missing atom type {atom_type}")]
    DanglingAtomType { site: usize, atom_type: usize },
    #[error("Sites are {separation:.4} apart, minimum is {minimum:.4}")]
    SitesTooClose { separation: f64, minimum: f64 },
}

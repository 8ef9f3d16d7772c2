//! Search configuration types.
//!
//! Configuration is a JSON document. Optional fields fall back to the defaults defined
//! here; call [`SearchConfig::validate`] after loading.

use serde::{Deserialize, Serialize};

use super::PerturbationKind;

/// Top-level configuration for a quality-diversity run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// How children are produced after the first generation.
    #[serde(default)]
    pub generator: GeneratorKind,
    /// Parent selection strategy (ignored by the random generator).
    #[serde(default)]
    pub selector: SelectorConfig,
    /// Properties that span the archive, one per dimension.
    pub bin_properties: Vec<BinProperty>,
    /// Number of bins per dimension.
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,
    /// Children evaluated per generation.
    #[serde(default = "default_children_per_generation")]
    pub children_per_generation: usize,
    /// Last generation to run (inclusive).
    #[serde(default = "default_max_generations")]
    pub max_generations: usize,
    /// Worker pool size.
    #[serde(default = "default_num_processes")]
    pub num_processes: usize,
    /// Seed for the generation-1 population.
    #[serde(default = "default_initial_points_random_seed")]
    pub initial_points_random_seed: u64,
    /// Seed for generations 2 and later. Drawn from entropy when absent.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Structure bounds and mutation settings.
    pub structure: StructureConfig,
    /// Structural descriptors reported by the built-in simulator.
    #[serde(default)]
    pub simulation: DescriptorConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorKind::default(),
            selector: SelectorConfig::default(),
            bin_properties: vec![
                BinProperty {
                    name: "number_density".into(),
                    range: (0.0, 0.2),
                    log10: false,
                },
                BinProperty {
                    name: "epsilon_density".into(),
                    range: (0.0, 20.0),
                    log10: false,
                },
            ],
            num_bins: default_num_bins(),
            children_per_generation: default_children_per_generation(),
            max_generations: default_max_generations(),
            num_processes: default_num_processes(),
            initial_points_random_seed: default_initial_points_random_seed(),
            random_seed: None,
            structure: StructureConfig::default(),
            simulation: DescriptorConfig::default(),
        }
    }
}

fn default_num_bins() -> usize {
    40
}
fn default_children_per_generation() -> usize {
    100
}
fn default_max_generations() -> usize {
    50
}
fn default_num_processes() -> usize {
    1
}
fn default_initial_points_random_seed() -> u64 {
    42
}

/// Child production mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratorKind {
    /// Every child is a fresh random material; no parents are selected.
    Random,
    /// Children are mutated from selected parents.
    #[default]
    Mutate,
}

/// Parent selection strategy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SelectorConfig {
    /// Weight convex-hull points by incident hull-edge length.
    TriangulationHull,
    /// Weight Delaunay triangles by area.
    TriangulationSimplex,
    /// Favor sparsely populated bins.
    #[default]
    DensityBin,
    /// Favor occupied bins next to empty ones.
    NeighborBin {
        #[serde(default = "default_neighbor_radius")]
        radius: usize,
    },
    /// Highest values of one bin property.
    Best {
        #[serde(default = "default_best_property")]
        property: usize,
    },
    /// Always the same population index.
    Specific { index: usize },
}

fn default_neighbor_radius() -> usize {
    1
}
fn default_best_property() -> usize {
    1
}

/// One archive dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinProperty {
    /// Property name as reported by the simulator.
    pub name: String,
    /// Binned range. With `log10`, both ends are exponents.
    pub range: (f64, f64),
    /// Bin `log10(value)` instead of the raw value.
    #[serde(default)]
    pub log10: bool,
}

/// How multiple perturbation kinds are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerturbMode {
    /// Apply one uniformly chosen kind.
    Random,
    /// Apply every configured kind.
    #[default]
    All,
}

/// Structure bounds shared by the generator and the mutation operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureConfig {
    pub lattice_constant_limits: (f64, f64),
    #[serde(default = "default_lattice_cubic")]
    pub lattice_cubic: bool,
    pub number_of_atom_types: usize,
    pub sigma_limits: (f64, f64),
    pub epsilon_limits: (f64, f64),
    pub num_atoms_limits: (usize, usize),
    pub charge_limits: (f64, f64),
    /// Minimum absolute distance between any two sites.
    #[serde(default)]
    pub minimum_site_distance: f64,
    /// Kinds the mutation operator may apply.
    #[serde(default = "default_perturb")]
    pub perturb: Vec<PerturbationKind>,
    #[serde(default)]
    pub perturb_type: PerturbMode,
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f64,
    /// Whole-material redraws allowed when generating.
    #[serde(default = "default_generation_attempts")]
    pub generation_attempts: usize,
    /// Random positions tried when adding or moving a site.
    #[serde(default = "default_placement_trials")]
    pub placement_trials: usize,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            lattice_constant_limits: (13.0, 52.0),
            lattice_cubic: default_lattice_cubic(),
            number_of_atom_types: 4,
            sigma_limits: (1.052, 6.549),
            epsilon_limits: (1.258, 513.264),
            num_atoms_limits: (2, 20),
            charge_limits: (-1.0, 1.0),
            minimum_site_distance: 0.0,
            perturb: default_perturb(),
            perturb_type: PerturbMode::default(),
            mutation_strength: default_mutation_strength(),
            generation_attempts: default_generation_attempts(),
            placement_trials: default_placement_trials(),
        }
    }
}

fn default_lattice_cubic() -> bool {
    true
}
fn default_perturb() -> Vec<PerturbationKind> {
    PerturbationKind::ALL.to_vec()
}
fn default_mutation_strength() -> f64 {
    0.2
}
fn default_generation_attempts() -> usize {
    10
}
fn default_placement_trials() -> usize {
    100
}

/// Toggles for the descriptors reported by the built-in simulator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DescriptorConfig {
    /// Descriptor names to report. Empty reports all of them.
    #[serde(default)]
    pub descriptors: Vec<String>,
}

// ============================================================================
// Validation
// ============================================================================

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("At least one bin property is required")]
    NoBinProperties,
    #[error("Bin count must be non-zero")]
    InvalidBinCount,
    #[error("Children per generation must be non-zero")]
    InvalidChildren,
    #[error("Worker count must be non-zero")]
    InvalidProcessCount,
    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(String),
    #[error("Mutation strength {0} must lie in [0, 1]")]
    InvalidMutationStrength(f64),
    #[error("No perturbation kinds configured")]
    NoPerturbations,
    #[error("Number of atom types must be non-zero")]
    NoAtomTypes,
    #[error("Selector {selector} needs {needed} bin properties, found {found}")]
    SelectorDimensions {
        selector: &'static str,
        needed: usize,
        found: usize,
    },
    #[error("Best selector property {property} is out of range for {dimensions} dimensions")]
    InvalidBestProperty { property: usize, dimensions: usize },
    #[error("Generation attempt budget must be non-zero")]
    InvalidAttempts,
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SearchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Archive ranges, one per dimension.
    pub fn bin_ranges(&self) -> Vec<(f64, f64)> {
        self.bin_properties.iter().map(|p| p.range).collect()
    }

    /// Validate search configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bin_properties.is_empty() {
            return Err(ConfigError::NoBinProperties);
        }
        if self.num_bins == 0 {
            return Err(ConfigError::InvalidBinCount);
        }
        if self.children_per_generation == 0 {
            return Err(ConfigError::InvalidChildren);
        }
        if self.num_processes == 0 {
            return Err(ConfigError::InvalidProcessCount);
        }

        for p in &self.bin_properties {
            if p.range.0 >= p.range.1 {
                return Err(ConfigError::InvalidBounds(format!(
                    "bin property {} range ({}, {}) is empty",
                    p.name, p.range.0, p.range.1
                )));
            }
        }

        let dimensions = self.bin_properties.len();
        match &self.selector {
            SelectorConfig::TriangulationHull | SelectorConfig::TriangulationSimplex
                if dimensions < 2 =>
            {
                return Err(ConfigError::SelectorDimensions {
                    selector: "triangulation",
                    needed: 2,
                    found: dimensions,
                });
            }
            SelectorConfig::Best { property } if *property >= dimensions => {
                return Err(ConfigError::InvalidBestProperty {
                    property: *property,
                    dimensions,
                });
            }
            _ => {}
        }

        self.structure.validate()
    }
}

impl StructureConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check_bounds = |bounds: (f64, f64), name: &str| {
            if bounds.0 > bounds.1 {
                Err(ConfigError::InvalidBounds(format!(
                    "{} min ({}) > max ({})",
                    name, bounds.0, bounds.1
                )))
            } else {
                Ok(())
            }
        };

        check_bounds(self.lattice_constant_limits, "lattice_constant")?;
        check_bounds(self.sigma_limits, "sigma")?;
        check_bounds(self.epsilon_limits, "epsilon")?;
        check_bounds(self.charge_limits, "charge")?;
        check_bounds(
            (self.num_atoms_limits.0 as f64, self.num_atoms_limits.1 as f64),
            "num_atoms",
        )?;

        if self.lattice_constant_limits.0 <= 0.0 {
            return Err(ConfigError::InvalidBounds(
                "lattice constants must be positive".into(),
            ));
        }
        if self.num_atoms_limits.0 == 0 {
            return Err(ConfigError::InvalidBounds(
                "materials need at least one atom".into(),
            ));
        }
        if self.charge_limits.0 > 0.0 || self.charge_limits.1 < 0.0 {
            return Err(ConfigError::InvalidBounds(
                "charge limits must contain zero".into(),
            ));
        }
        if self.number_of_atom_types == 0 {
            return Err(ConfigError::NoAtomTypes);
        }
        if !(0.0..=1.0).contains(&self.mutation_strength) {
            return Err(ConfigError::InvalidMutationStrength(self.mutation_strength));
        }
        if self.perturb.is_empty() {
            return Err(ConfigError::NoPerturbations);
        }
        if self.generation_attempts == 0 {
            return Err(ConfigError::InvalidAttempts);
        }

        Ok(())
    }

    /// Largest absolute charge a single site may carry.
    pub fn max_abs_charge(&self) -> f64 {
        self.charge_limits.0.abs().min(self.charge_limits.1.abs())
    }
}

//! Property evaluation.
//!
//! External engines plug into the search through [`Simulator`]. [`DescriptorSimulator`] is a
//! deterministic built-in that reports structural descriptors computed directly from the
//! material.

use crate::schema::{DescriptorConfig, Material, Properties};

/// Simulation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("Unknown descriptor: {0}")]
    UnknownDescriptor(String),
    #[error("Simulation of material {material} did not report property {property}")]
    MissingProperty { material: String, property: String },
    #[error("Simulation failed for material {material}: {reason}")]
    Failed { material: String, reason: String },
}

/// Evaluates a material into named property values.
///
/// Implementations are shared across worker threads.
pub trait Simulator: Send + Sync {
    fn evaluate(&self, material: &Material) -> Result<Properties, SimulationError>;
}

impl<F> Simulator for F
where
    F: Fn(&Material) -> Result<Properties, SimulationError> + Send + Sync,
{
    fn evaluate(&self, material: &Material) -> Result<Properties, SimulationError> {
        self(material)
    }
}

/// A structural descriptor computed from a material alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descriptor {
    Volume,
    NumberDensity,
    TotalEpsilon,
    EpsilonDensity,
    MaxPairDistance,
    MinPairDistance,
    NetCharge,
}

impl Descriptor {
    pub const ALL: [Descriptor; 7] = [
        Descriptor::Volume,
        Descriptor::NumberDensity,
        Descriptor::TotalEpsilon,
        Descriptor::EpsilonDensity,
        Descriptor::MaxPairDistance,
        Descriptor::MinPairDistance,
        Descriptor::NetCharge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Descriptor::Volume => "volume",
            Descriptor::NumberDensity => "number_density",
            Descriptor::TotalEpsilon => "total_epsilon",
            Descriptor::EpsilonDensity => "epsilon_density",
            Descriptor::MaxPairDistance => "max_pair_distance",
            Descriptor::MinPairDistance => "min_pair_distance",
            Descriptor::NetCharge => "net_charge",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    /// Evaluate this descriptor; pair distances are absolute (scaled by `a`).
    pub fn compute(&self, material: &Material) -> f64 {
        match self {
            Descriptor::Volume => material.volume(),
            Descriptor::NumberDensity => material.number_density(),
            Descriptor::TotalEpsilon => material.total_epsilon(),
            Descriptor::EpsilonDensity => material.epsilon_density(),
            Descriptor::MaxPairDistance => material.max_pair_distance() * material.lattice.a,
            Descriptor::MinPairDistance => material.min_pair_distance() * material.lattice.a,
            Descriptor::NetCharge => material.net_charge(),
        }
    }
}

/// Built-in simulator reporting structural descriptors.
#[derive(Debug, Clone)]
pub struct DescriptorSimulator {
    descriptors: Vec<Descriptor>,
}

impl DescriptorSimulator {
    /// Create a simulator for the configured descriptors; an empty list selects all of them.
    pub fn new(config: &DescriptorConfig) -> Result<Self, SimulationError> {
        let descriptors = if config.descriptors.is_empty() {
            Descriptor::ALL.to_vec()
        } else {
            config
                .descriptors
                .iter()
                .map(|name| {
                    Descriptor::from_name(name)
                        .ok_or_else(|| SimulationError::UnknownDescriptor(name.clone()))
                })
                .collect::<Result<_, _>>()?
        };
        Ok(Self { descriptors })
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }
}

impl Simulator for DescriptorSimulator {
    fn evaluate(&self, material: &Material) -> Result<Properties, SimulationError> {
        Ok(self
            .descriptors
            .iter()
            .map(|d| (d.name().to_string(), d.compute(material)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AtomSite, AtomType, Lattice};

    fn material() -> Material {
        Material::new(
            Lattice::cubic(2.0),
            vec![AtomType {
                sigma: 3.0,
                epsilon: 10.0,
            }],
            vec![
                AtomSite {
                    position: [0.0, 0.0, 0.0],
                    charge: 0.5,
                    atom_type: 0,
                },
                AtomSite {
                    position: [0.5, 0.5, 0.5],
                    charge: -0.5,
                    atom_type: 0,
                },
            ],
        )
    }

    #[test]
    fn test_all_descriptors_by_default() {
        let sim = DescriptorSimulator::new(&DescriptorConfig::default()).unwrap();
        let props = sim.evaluate(&material()).unwrap();
        assert_eq!(props.len(), Descriptor::ALL.len());
        assert!((props["volume"] - 8.0).abs() < 1e-12);
        assert!((props["number_density"] - 0.25).abs() < 1e-12);
        assert!((props["max_pair_distance"] - 3f64.sqrt()).abs() < 1e-12);
        assert!(props["net_charge"].abs() < 1e-12);
    }

    #[test]
    fn test_selected_descriptors() {
        let config = DescriptorConfig {
            descriptors: vec!["volume".into(), "total_epsilon".into()],
        };
        let props = DescriptorSimulator::new(&config)
            .unwrap()
            .evaluate(&material())
            .unwrap();
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["total_epsilon", "volume"]);
    }

    #[test]
    fn test_unknown_descriptor() {
        let config = DescriptorConfig {
            descriptors: vec!["henry_coefficient".into()],
        };
        assert_eq!(
            DescriptorSimulator::new(&config).unwrap_err(),
            SimulationError::UnknownDescriptor("henry_coefficient".into())
        );
    }

    #[test]
    fn test_closure_simulator() {
        let sim = |m: &Material| -> Result<Properties, SimulationError> {
            Ok([("sites".to_string(), m.atom_sites.len() as f64)].into())
        };
        assert_eq!(sim.evaluate(&material()).unwrap()["sites"], 2.0);
    }
}

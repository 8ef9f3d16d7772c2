//! Generation loop of the quality-diversity search.
//!
//! Generation 1 is a random population drawn from `initial_points_random_seed`. Every later
//! generation selects parents from the running population, produces and evaluates children
//! on a worker pool, and folds the results into the archive. Materials are persisted as they
//! are evaluated, so a run can be restarted from any completed generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{BinProperty, ConfigError, GeneratorKind, Material, SearchConfig};

use super::archive::Archive;
use super::generator::{GenerationError, new_material};
use super::mutation::{MutationError, mutate_material};
use super::select::{SelectError, select_parents};
use super::simulation::{SimulationError, Simulator};
use super::store::{MaterialStore, StoreError};

/// Restart reconciliation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RestartError {
    #[error("Cannot restart at generation {0}; restarts begin at generation 2")]
    InvalidGeneration(usize),
    #[error("Expected {expected} stored materials but found only {found}")]
    TooFew { expected: usize, found: usize },
    #[error(
        "Expected {expected} stored materials but found {found}; rerun with the restart override to delete the excess"
    )]
    TooMany { expected: usize, found: usize },
    #[error("Expected highest material id {expected} but found {found:?}")]
    IdMismatch { expected: u64, found: Option<u64> },
    #[error("Expected {expected} materials before generation {generation} but found {found}")]
    GenerationMismatch {
        generation: usize,
        expected: usize,
        found: usize,
    },
    #[error("A fresh run needs an empty store, but it holds {0} materials")]
    StoreNotEmpty(usize),
}

/// Top-level search errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),
    #[error("Selection error: {0}")]
    Select(#[from] SelectError),
    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Restart error: {0}")]
    Restart(#[from] RestartError),
    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// How to start a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Resume at this generation from materials already in the store.
    pub restart_generation: Option<usize>,
    /// Delete stored materials beyond the expected count instead of failing.
    pub override_restart_errors: bool,
    /// Stop after this generation instead of the configured maximum.
    pub max_generations: Option<usize>,
}

/// Per-generation progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub generation: usize,
    pub max_generations: usize,
    /// Fraction of archive bins with at least one occupant.
    pub coverage: f64,
    pub occupied_bins: usize,
    pub total_bins: usize,
    /// Materials in the running population.
    pub population: usize,
}

/// Accumulated run state: population ids, their property tuples, and the archive.
///
/// `ids[i]` and `properties[i]` belong to population index `i`, which is what archive bins
/// hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub ids: Vec<u64>,
    pub properties: Vec<Vec<f64>>,
    pub archive: Archive,
}

impl RunState {
    pub fn new(archive: Archive) -> Self {
        Self {
            ids: Vec::new(),
            properties: Vec::new(),
            archive,
        }
    }

    /// Append an evaluated material to the population and the archive.
    pub fn push(&mut self, id: u64, properties: Vec<f64>) {
        let index = self.ids.len();
        self.archive.add(&properties, index);
        self.ids.push(id);
        self.properties.push(properties);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn coverage(&self) -> f64 {
        self.archive.coverage()
    }
}

/// Extract the binned property tuple from an evaluated material.
///
/// `log10` properties are floored at `10^lo` before taking the logarithm.
pub fn property_tuple(
    material: &Material,
    bin_properties: &[BinProperty],
) -> Result<Vec<f64>, SimulationError> {
    bin_properties
        .iter()
        .map(|p| {
            let value = material.properties.get(&p.name).copied().ok_or_else(|| {
                SimulationError::MissingProperty {
                    material: material.id_or_uuid().to_string(),
                    property: p.name.clone(),
                }
            })?;
            Ok(if p.log10 {
                value.max(10f64.powf(p.range.0)).log10()
            } else {
                value
            })
        })
        .collect()
}

/// One child to produce.
#[derive(Debug, Clone, Copy)]
struct ChildTask {
    generation: usize,
    seed: u64,
    parent: Option<u64>,
}

/// State owned by one worker thread for the lifetime of a generation.
struct WorkerContext<'a, S, Sim> {
    store: S,
    simulator: &'a Sim,
    config: &'a SearchConfig,
}

impl<S: MaterialStore, Sim: Simulator> WorkerContext<'_, S, Sim> {
    /// Produce, evaluate and persist one child.
    fn evaluate_child(&mut self, task: ChildTask) -> Result<(u64, Vec<f64>), SearchError> {
        let mut rng = StdRng::seed_from_u64(task.seed);
        let mut material = match task.parent {
            Some(parent_id) => {
                let parent = self.store.require(parent_id)?;
                mutate_material(&parent, &self.config.structure, &mut rng)?
            }
            None => new_material(&self.config.structure, &mut rng)?,
        };
        material.generation = task.generation;
        material.properties = self.simulator.evaluate(&material)?;

        let properties = property_tuple(&material, &self.config.bin_properties)?;
        let id = self.store.insert(material)?;
        log::debug!("Material {id} (generation {}): {properties:?}", task.generation);
        Ok((id, properties))
    }
}

/// Runs the search against a store and a simulator.
pub struct SearchEngine<S, Sim> {
    config: SearchConfig,
    store: S,
    simulator: Sim,
    cancelled: Arc<AtomicBool>,
}

impl<S, Sim> SearchEngine<S, Sim>
where
    S: MaterialStore + Clone,
    Sim: Simulator,
{
    pub fn new(config: SearchConfig, store: S, simulator: Sim) -> Self {
        Self {
            config,
            store,
            simulator,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Flag checked between generations; setting it stops the run after the current one.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Run to completion without progress reporting.
    pub fn run(&self, options: &RunOptions) -> Result<RunState, SearchError> {
        self.run_with_callback(options, |_| {})
    }

    /// Run, calling `callback` after every completed generation.
    pub fn run_with_callback<F>(
        &self,
        options: &RunOptions,
        mut callback: F,
    ) -> Result<RunState, SearchError>
    where
        F: FnMut(&GenerationProgress),
    {
        self.config.validate()?;
        let max_generations = options.max_generations.unwrap_or(self.config.max_generations);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_processes)
            .build()?;

        let (mut state, first_generation) = match options.restart_generation {
            Some(generation) => {
                let state = self.restore(generation, options.override_restart_errors)?;
                log::info!(
                    "Restarting at generation {generation} with {} materials (coverage {:.4})",
                    state.len(),
                    state.coverage()
                );
                (state, generation)
            }
            None => {
                let found = self.store.count()?;
                if found > 0 {
                    return Err(RestartError::StoreNotEmpty(found).into());
                }
                let mut state = RunState::new(Archive::from_config(&self.config));
                let tasks: Vec<ChildTask> = (0..self.config.children_per_generation)
                    .map(|i| ChildTask {
                        generation: 1,
                        seed: self.config.initial_points_random_seed.wrapping_add(i as u64),
                        parent: None,
                    })
                    .collect();
                self.evaluate_generation(&pool, tasks, &mut state)?;
                callback(&self.report(1, max_generations, &state));
                (state, 2)
            }
        };

        for generation in first_generation..=max_generations {
            if self.cancelled.load(Ordering::Relaxed) {
                log::info!("Search cancelled before generation {generation}");
                break;
            }
            let mut rng = self.generation_rng(generation);
            let tasks = self.plan_generation(generation, &state, &mut rng)?;
            self.evaluate_generation(&pool, tasks, &mut state)?;
            callback(&self.report(generation, max_generations, &state));
        }

        Ok(state)
    }

    fn generation_rng(&self, generation: usize) -> StdRng {
        match self.config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(generation as u64)),
            None => StdRng::from_entropy(),
        }
    }

    /// Choose parents (unless generating at random) and assign every child a seed.
    fn plan_generation(
        &self,
        generation: usize,
        state: &RunState,
        rng: &mut StdRng,
    ) -> Result<Vec<ChildTask>, SearchError> {
        let children = self.config.children_per_generation;
        let parents = match self.config.generator {
            GeneratorKind::Random => Vec::new(),
            GeneratorKind::Mutate => {
                let parents = select_parents(
                    &self.config.selector,
                    children,
                    &state.ids,
                    &state.properties,
                    &state.archive,
                    rng,
                )?;
                if parents.is_empty() {
                    return Err(SelectError::EmptyPopulation.into());
                }
                parents.ids
            }
        };

        Ok((0..children)
            .map(|i| ChildTask {
                generation,
                seed: rng.r#gen(),
                parent: (!parents.is_empty()).then(|| parents[i % parents.len()]),
            })
            .collect())
    }

    /// Evaluate `tasks` on the worker pool and fold the results into `state` in task order.
    fn evaluate_generation(
        &self,
        pool: &rayon::ThreadPool,
        tasks: Vec<ChildTask>,
        state: &mut RunState,
    ) -> Result<(), SearchError> {
        let results: Vec<(u64, Vec<f64>)> = pool.install(|| {
            tasks
                .into_par_iter()
                .map_init(
                    || WorkerContext {
                        store: self.store.clone(),
                        simulator: &self.simulator,
                        config: &self.config,
                    },
                    |ctx, task| ctx.evaluate_child(task),
                )
                .collect::<Result<Vec<_>, SearchError>>()
        })?;

        for (id, properties) in results {
            state.push(id, properties);
        }
        Ok(())
    }

    fn report(
        &self,
        generation: usize,
        max_generations: usize,
        state: &RunState,
    ) -> GenerationProgress {
        let progress = GenerationProgress {
            generation,
            max_generations,
            coverage: state.coverage(),
            occupied_bins: state.archive.occupied_count(),
            total_bins: state.archive.len(),
            population: state.len(),
        };
        log::info!(
            "Generation {}/{}: coverage {:.4} ({} of {} bins, {} materials)",
            progress.generation,
            progress.max_generations,
            progress.coverage,
            progress.occupied_bins,
            progress.total_bins,
            progress.population
        );
        progress
    }

    /// Reconcile the store with a restart at `generation` and rebuild the run state from it.
    pub fn restore(
        &self,
        generation: usize,
        override_errors: bool,
    ) -> Result<RunState, SearchError> {
        if generation < 2 {
            return Err(RestartError::InvalidGeneration(generation).into());
        }
        let expected = (generation - 1) * self.config.children_per_generation;
        let found = self.store.count()?;

        if found < expected {
            return Err(RestartError::TooFew { expected, found }.into());
        }
        if found > expected {
            if !override_errors {
                return Err(RestartError::TooMany { expected, found }.into());
            }
            let deleted = self.store.delete_after(expected as u64)?;
            log::warn!(
                "Deleted {deleted} materials beyond id {expected} to restart at generation {generation}"
            );
        }

        let max_id = self.store.max_id()?;
        if max_id.unwrap_or(0) != expected as u64 {
            return Err(RestartError::IdMismatch {
                expected: expected as u64,
                found: max_id,
            }
            .into());
        }

        let materials = self.store.by_generation(0..generation)?;
        if materials.len() != expected {
            return Err(RestartError::GenerationMismatch {
                generation,
                expected,
                found: materials.len(),
            }
            .into());
        }

        let mut state = RunState::new(Archive::from_config(&self.config));
        for material in &materials {
            let properties = property_tuple(material, &self.config.bin_properties)?;
            state.push(material.id.unwrap_or_default(), properties);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{DescriptorSimulator, InMemoryStore};
    use crate::schema::{DescriptorConfig, Properties, SelectorConfig, StructureConfig};

    fn config() -> SearchConfig {
        SearchConfig {
            bin_properties: vec![
                BinProperty {
                    name: "number_density".into(),
                    range: (0.0, 0.01),
                    log10: false,
                },
                BinProperty {
                    name: "volume".into(),
                    range: (3.0, 4.0),
                    log10: true,
                },
            ],
            num_bins: 5,
            children_per_generation: 2,
            max_generations: 2,
            num_processes: 2,
            random_seed: Some(7),
            structure: StructureConfig {
                lattice_constant_limits: (10.0, 20.0),
                number_of_atom_types: 2,
                num_atoms_limits: (2, 6),
                minimum_site_distance: 0.5,
                generation_attempts: 100,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn engine(
        config: SearchConfig,
        store: InMemoryStore,
    ) -> SearchEngine<InMemoryStore, DescriptorSimulator> {
        let simulator = DescriptorSimulator::new(&DescriptorConfig::default()).unwrap();
        SearchEngine::new(config, store, simulator)
    }

    fn assert_each_index_binned_once(state: &RunState) {
        let mut seen = vec![0; state.len()];
        for (_, occupants) in state.archive.occupied_bins() {
            for &i in occupants {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_two_generations_end_to_end() {
        let store = InMemoryStore::new();
        let state = engine(config(), store.clone()).run(&RunOptions::default()).unwrap();

        let mut ids = state.ids.clone();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(store.count().unwrap(), 4);
        assert_eq!(state.properties.len(), 4);
        assert_each_index_binned_once(&state);

        assert_eq!(store.by_generation(1..2).unwrap().len(), 2);
        for child in store.by_generation(2..3).unwrap() {
            assert!(child.parent_id.is_some_and(|p| p <= 2));
            assert!(child.net_charge().abs() < 1e-9);
        }
    }

    #[test]
    fn test_coverage_never_decreases() {
        let config = SearchConfig {
            max_generations: 5,
            num_processes: 1,
            selector: SelectorConfig::NeighborBin { radius: 1 },
            ..config()
        };
        let mut coverages = Vec::new();
        engine(config, InMemoryStore::new())
            .run_with_callback(&RunOptions::default(), |p| coverages.push(p.coverage))
            .unwrap();
        assert_eq!(coverages.len(), 5);
        assert!(coverages.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_cancel_stops_between_generations() {
        let config = SearchConfig {
            max_generations: 10,
            ..config()
        };
        let engine = engine(config, InMemoryStore::new());
        let cancel = engine.cancel_handle();
        let mut generations = Vec::new();
        let state = engine
            .run_with_callback(&RunOptions::default(), |p| {
                generations.push(p.generation);
                if p.generation == 2 {
                    cancel.store(true, Ordering::Relaxed);
                }
            })
            .unwrap();
        assert_eq!(generations, vec![1, 2]);
        assert_eq!(state.len(), 4);
    }

    #[test]
    fn test_initial_population_is_reproducible() {
        let config = SearchConfig {
            max_generations: 1,
            ..config()
        };
        let run = || {
            let store = InMemoryStore::new();
            engine(config.clone(), store.clone()).run(&RunOptions::default()).unwrap();
            let mut materials = store.by_generation(1..2).unwrap();
            materials.sort_by(|a, b| a.lattice.a.total_cmp(&b.lattice.a));
            materials.into_iter().map(|m| m.lattice).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_random_generator_has_no_parents() {
        let config = SearchConfig {
            generator: GeneratorKind::Random,
            ..config()
        };
        let store = InMemoryStore::new();
        engine(config, store.clone()).run(&RunOptions::default()).unwrap();
        let children = store.by_generation(2..3).unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|m| m.parent_id.is_none()));
    }

    #[test]
    fn test_fresh_run_requires_empty_store() {
        let store = InMemoryStore::new();
        engine(config(), store.clone()).run(&RunOptions::default()).unwrap();
        assert!(matches!(
            engine(config(), store).run(&RunOptions::default()),
            Err(SearchError::Restart(RestartError::StoreNotEmpty(4)))
        ));
    }

    #[test]
    fn test_restart_continues_run() {
        let store = InMemoryStore::new();
        engine(config(), store.clone()).run(&RunOptions::default()).unwrap();

        let options = RunOptions {
            restart_generation: Some(3),
            max_generations: Some(4),
            ..Default::default()
        };
        let state = engine(config(), store.clone()).run(&options).unwrap();
        assert_eq!(state.len(), 8);
        assert_eq!(store.max_id().unwrap(), Some(8));
        assert_each_index_binned_once(&state);
    }

    #[test]
    fn test_restart_count_mismatch() {
        let store = InMemoryStore::new();
        engine(config(), store.clone()).run(&RunOptions::default()).unwrap();
        let restart = |generation, override_restart_errors| {
            engine(config(), store.clone()).run(&RunOptions {
                restart_generation: Some(generation),
                override_restart_errors,
                max_generations: Some(generation - 1),
            })
        };

        assert!(matches!(
            restart(4, false),
            Err(SearchError::Restart(RestartError::TooFew {
                expected: 6,
                found: 4
            }))
        ));
        assert!(matches!(
            restart(2, false),
            Err(SearchError::Restart(RestartError::TooMany {
                expected: 2,
                found: 4
            }))
        ));
        assert!(matches!(
            restart(1, false),
            Err(SearchError::Restart(RestartError::InvalidGeneration(1)))
        ));

        let state = restart(2, true).unwrap();
        assert_eq!(state.ids, vec![1, 2]);
        assert_eq!(store.count().unwrap(), 2);
    }

    fn stored_materials(generations: &[usize]) -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut rng = StdRng::seed_from_u64(0);
        for &generation in generations {
            let mut material = crate::compute::new_material(&config().structure, &mut rng).unwrap();
            material.generation = generation;
            store.insert(material).unwrap();
        }
        store
    }

    #[test]
    fn test_restart_rejects_id_gap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("materials.json");
        stored_materials(&[1, 1]).save(&path).unwrap();

        let mut snapshot: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        snapshot["materials"][1]["id"] = serde_json::json!(3);
        std::fs::write(&path, snapshot.to_string()).unwrap();

        let store = InMemoryStore::load(&path).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert!(matches!(
            engine(config(), store).restore(2, false),
            Err(SearchError::Restart(RestartError::IdMismatch {
                expected: 2,
                found: Some(3)
            }))
        ));
    }

    #[test]
    fn test_restart_rejects_misplaced_generation() {
        let store = stored_materials(&[1, 5]);
        assert!(matches!(
            engine(config(), store).restore(2, false),
            Err(SearchError::Restart(RestartError::GenerationMismatch {
                generation: 2,
                expected: 2,
                found: 1
            }))
        ));
    }

    #[test]
    fn test_property_tuple_log10_floor() {
        let mut material = crate::compute::new_material(
            &config().structure,
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();
        material.properties = Properties::from([
            ("a".to_string(), 0.5),
            ("b".to_string(), 1000.0),
            ("c".to_string(), 0.0),
        ]);
        let bins = [
            BinProperty {
                name: "a".into(),
                range: (0.0, 1.0),
                log10: false,
            },
            BinProperty {
                name: "b".into(),
                range: (0.0, 4.0),
                log10: true,
            },
            BinProperty {
                name: "c".into(),
                range: (-6.0, -2.0),
                log10: true,
            },
        ];
        let tuple = property_tuple(&material, &bins).unwrap();
        assert_eq!(tuple[0], 0.5);
        assert!((tuple[1] - 3.0).abs() < 1e-12);
        assert!((tuple[2] + 6.0).abs() < 1e-12);

        let missing = [BinProperty {
            name: "henrys_co2".into(),
            range: (0.0, 1.0),
            log10: false,
        }];
        assert!(matches!(
            property_tuple(&material, &missing),
            Err(SimulationError::MissingProperty { .. })
        ));
    }

    #[test]
    fn test_simulator_failure_is_fatal() {
        let failing = |m: &Material| -> Result<Properties, SimulationError> {
            Err(SimulationError::Failed {
                material: m.id_or_uuid().to_string(),
                reason: "engine crashed".into(),
            })
        };
        let engine = SearchEngine::new(config(), InMemoryStore::new(), failing);
        assert!(matches!(
            engine.run(&RunOptions::default()),
            Err(SearchError::Simulation(SimulationError::Failed { .. }))
        ));
    }
}

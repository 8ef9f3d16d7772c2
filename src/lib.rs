//! HTSOHM - quality-diversity search over hypothetical porous materials.
//!
//! Pseudomaterials (a periodic lattice, Lennard-Jones atom types and charged atom sites)
//! are generated at random, evaluated, and binned into an N-dimensional archive over their
//! properties. Each later generation selects parents from the archive and mutates them,
//! steering the population toward unexplored regions of property space.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration types and the material data model
//! - `compute`: Geometry, generation, mutation, archive, selection and the search loop
//!
//! # Example
//!
//! ```rust,no_run
//! use htsohm::{
//!     compute::{DescriptorSimulator, InMemoryStore, RunOptions, SearchEngine},
//!     schema::SearchConfig,
//! };
//!
//! let config = SearchConfig::default();
//! let simulator = DescriptorSimulator::new(&config.simulation).unwrap();
//! let engine = SearchEngine::new(config, InMemoryStore::new(), simulator);
//!
//! let state = engine.run(&RunOptions::default()).unwrap();
//! println!("Final coverage: {:.4}", state.coverage());
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{Archive, InMemoryStore, MaterialStore, RunState, SearchEngine, Simulator};
pub use schema::{Material, SearchConfig};

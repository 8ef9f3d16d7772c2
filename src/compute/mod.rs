//! Compute module - search algorithms over hypothetical materials.

mod archive;
mod charges;
mod generator;
mod geometry;
mod mutation;
mod search;
mod simulation;
mod store;

pub mod select;

pub use archive::*;
pub use charges::*;
pub use generator::*;
pub use geometry::*;
pub use mutation::*;
pub use search::*;
pub use select::{Parents, SelectError, select_parents};
pub use simulation::*;
pub use store::*;

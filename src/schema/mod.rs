//! Schema module - Configuration and data model for pseudomaterial search.

mod config;
mod material;

pub use config::*;
pub use material::*;

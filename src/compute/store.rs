//! Material persistence.
//!
//! The search talks to storage only through [`MaterialStore`]. Each worker holds its own
//! handle; for [`InMemoryStore`] a handle is a clone sharing the same table.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::schema::Material;

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Material {0} not found")]
    NotFound(u64),
    #[error("Store lock poisoned")]
    Poisoned,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence collaborator for evaluated materials.
///
/// Ids are assigned by the store on insert, sequentially from 1.
pub trait MaterialStore: Send + Sync {
    /// Persist `material`, returning its assigned id.
    fn insert(&self, material: Material) -> Result<u64, StoreError>;

    /// Fetch one material by id.
    fn get(&self, id: u64) -> Result<Option<Material>, StoreError>;

    /// Materials whose generation lies in `generations`, ordered by id.
    fn by_generation(&self, generations: Range<usize>) -> Result<Vec<Material>, StoreError>;

    /// Number of stored materials.
    fn count(&self) -> Result<usize, StoreError>;

    /// Largest assigned id, if any material is stored.
    fn max_id(&self) -> Result<Option<u64>, StoreError>;

    /// Delete every material with id greater than `id`, returning how many were removed.
    ///
    /// Calling it again with the same `id` removes nothing.
    fn delete_after(&self, id: u64) -> Result<usize, StoreError>;

    /// Fetch one material, failing if it does not exist.
    fn require(&self, id: u64) -> Result<Material, StoreError> {
        self.get(id)?.ok_or(StoreError::NotFound(id))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    materials: Vec<Material>,
}

/// Store keeping every material in memory, ordered by id.
///
/// Clones share one table, so cloning is how a worker opens its own connection. The table
/// can be written to and read back from a JSON snapshot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    table: Arc<Mutex<Snapshot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Snapshot>, StoreError> {
        self.table.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Load a store from a snapshot written by [`InMemoryStore::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let reader = BufReader::new(File::open(path)?);
        let mut snapshot: Snapshot = serde_json::from_reader(reader)?;
        snapshot.materials.sort_by_key(|m| m.id);
        let max_id = snapshot.materials.iter().filter_map(|m| m.id).max();
        snapshot.next_id = snapshot.next_id.max(max_id.map_or(1, |id| id + 1));
        Ok(Self {
            table: Arc::new(Mutex::new(snapshot)),
        })
    }

    /// Load a store from `path` if it exists, otherwise start empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Write every stored material to `path` as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let table = self.lock()?;
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &*table)?;
        writer.flush()?;
        Ok(())
    }
}

impl MaterialStore for InMemoryStore {
    fn insert(&self, mut material: Material) -> Result<u64, StoreError> {
        let mut table = self.lock()?;
        let id = table.next_id.max(1);
        table.next_id = id + 1;
        material.id = Some(id);
        table.materials.push(material);
        Ok(id)
    }

    fn get(&self, id: u64) -> Result<Option<Material>, StoreError> {
        let table = self.lock()?;
        Ok(table
            .materials
            .binary_search_by_key(&Some(id), |m| m.id)
            .ok()
            .map(|i| table.materials[i].clone()))
    }

    fn by_generation(&self, generations: Range<usize>) -> Result<Vec<Material>, StoreError> {
        let table = self.lock()?;
        Ok(table
            .materials
            .iter()
            .filter(|m| generations.contains(&m.generation))
            .cloned()
            .collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.materials.len())
    }

    fn max_id(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.lock()?.materials.last().and_then(|m| m.id))
    }

    fn delete_after(&self, id: u64) -> Result<usize, StoreError> {
        let mut table = self.lock()?;
        let before = table.materials.len();
        table.materials.retain(|m| m.id.is_some_and(|i| i <= id));
        table.next_id = id + 1;
        Ok(before - table.materials.len())
    }
}

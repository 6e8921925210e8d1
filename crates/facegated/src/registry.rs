//! In-memory registry of reference faces.
//!
//! Records keep insertion order, which is also the order `find_match`
//! scans in: the first record the matcher accepts wins.

use chrono::{DateTime, Utc};
use facegate_core::{Embedding, Matcher};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Opaque face identifier (a UUID v4 string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceId(String);

impl FaceId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FaceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One registered reference face.
#[derive(Debug, Clone)]
pub struct FaceRecord {
    pub id: FaceId,
    pub name: String,
    pub image_path: PathBuf,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The externally visible part of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceSummary {
    pub id: FaceId,
    pub name: String,
}

impl From<&FaceRecord> for FaceSummary {
    fn from(record: &FaceRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("face not found: {0}")]
    NotFound(FaceId),
}

#[derive(Debug, Default)]
pub struct FaceRegistry {
    records: Vec<FaceRecord>,
    /// Ids of every record ever registered, so deleted ids are never reissued.
    issued: HashSet<FaceId>,
    /// Ids handed out by `allocate_id` whose upload is still being validated.
    pending: HashSet<FaceId>,
}

impl FaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an identifier that this registry has never issued before.
    ///
    /// The reservation ends with [`register`](Self::register) or
    /// [`release`](Self::release).
    pub fn allocate_id(&mut self) -> FaceId {
        loop {
            let id = FaceId::generate();
            if !self.issued.contains(&id) && self.pending.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Drop a reservation whose upload was rejected.
    pub fn release(&mut self, id: &FaceId) {
        self.pending.remove(id);
    }

    /// Insert a record under an id obtained from [`allocate_id`](Self::allocate_id).
    pub fn register(
        &mut self,
        id: FaceId,
        name: String,
        embedding: Embedding,
        image_path: PathBuf,
    ) -> FaceId {
        debug_assert!(self.position(&id).is_none(), "face id {id} registered twice");
        self.pending.remove(&id);
        self.issued.insert(id.clone());

        let now = Utc::now();
        self.records.push(FaceRecord {
            id: id.clone(),
            name,
            image_path,
            embedding,
            created_at: now,
            updated_at: now,
        });
        id
    }

    /// All faces in registration order.
    pub fn list(&self) -> Vec<FaceSummary> {
        self.records.iter().map(FaceSummary::from).collect()
    }

    pub fn get(&self, id: &FaceId) -> Result<&FaceRecord, RegistryError> {
        self.position(id)
            .map(|idx| &self.records[idx])
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Replace the embedding of an existing record.
    pub fn update(&mut self, id: &FaceId, embedding: Embedding) -> Result<(), RegistryError> {
        let idx = self
            .position(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let record = &mut self.records[idx];
        record.embedding = embedding;
        record.updated_at = Utc::now();
        Ok(())
    }

    /// Evict a record and hand it back so the caller can release its file.
    pub fn remove(&mut self, id: &FaceId) -> Result<FaceRecord, RegistryError> {
        let idx = self
            .position(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        Ok(self.records.remove(idx))
    }

    /// First record, in registration order, that `matcher` accepts for `probe`.
    pub fn find_match(&self, probe: &Embedding, matcher: &dyn Matcher) -> Option<&FaceRecord> {
        self.records
            .iter()
            .find(|record| matcher.matches(probe, &record.embedding))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of ids held back from reuse, registered or reserved.
    #[cfg(test)]
    pub fn reserved_ids(&self) -> usize {
        self.issued.len() + self.pending.len()
    }

    fn position(&self, id: &FaceId) -> Option<usize> {
        self.records.iter().position(|record| record.id == *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::CosineMatcher;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn register(registry: &mut FaceRegistry, name: &str, values: &[f32]) -> FaceId {
        let id = registry.allocate_id();
        let path = PathBuf::from(format!("/faces/{id}.jpg"));
        registry.register(id, name.to_string(), emb(values), path)
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = FaceRegistry::new();
        let id = register(&mut registry, "Alice", &[1.0, 0.0]);

        let record = registry.get(&id).unwrap();
        assert_eq!(record.name, "Alice");
        assert_eq!(record.image_path, PathBuf::from(format!("/faces/{id}.jpg")));
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_allocated_ids_are_unique() {
        let mut registry = FaceRegistry::new();
        let ids: HashSet<FaceId> = (0..100).map(|_| registry.allocate_id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_removed_id_is_not_reissued() {
        let mut registry = FaceRegistry::new();
        let id = register(&mut registry, "Alice", &[1.0]);
        registry.remove(&id).unwrap();
        assert!(registry.issued.contains(&id));

        for _ in 0..50 {
            assert_ne!(registry.allocate_id(), id);
        }
    }

    #[test]
    fn test_released_id_is_forgotten() {
        let mut registry = FaceRegistry::new();
        let id = registry.allocate_id();
        assert_eq!(registry.reserved_ids(), 1);

        registry.release(&id);
        assert_eq!(registry.reserved_ids(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_moves_reservation_to_issued() {
        let mut registry = FaceRegistry::new();
        let id = register(&mut registry, "Alice", &[1.0]);
        assert!(registry.issued.contains(&id));
        assert!(registry.pending.is_empty());
        assert_eq!(registry.reserved_ids(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let mut registry = FaceRegistry::new();
        let a = register(&mut registry, "Alice", &[1.0, 0.0]);
        let b = register(&mut registry, "Bob", &[0.0, 1.0]);
        let c = register(&mut registry, "Carol", &[1.0, 1.0]);

        let listed = registry.list();
        let ids: Vec<&FaceId> = listed.iter().map(|s| &s.id).collect();
        assert_eq!(ids, vec![&a, &b, &c]);
        assert_eq!(listed[1].name, "Bob");
    }

    #[test]
    fn test_update_replaces_embedding_only() {
        let mut registry = FaceRegistry::new();
        let id = register(&mut registry, "Alice", &[1.0, 0.0]);
        let before = registry.get(&id).unwrap().clone();

        registry.update(&id, emb(&[0.0, 1.0])).unwrap();

        let after = registry.get(&id).unwrap();
        assert_eq!(after.embedding, emb(&[0.0, 1.0]));
        assert_eq!(after.name, before.name);
        assert_eq!(after.image_path, before.image_path);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let mut registry = FaceRegistry::new();
        let ghost = FaceId::from("ghost".to_string());

        assert_eq!(registry.get(&ghost).err(), Some(RegistryError::NotFound(ghost.clone())));
        assert_eq!(registry.update(&ghost, emb(&[1.0])), Err(RegistryError::NotFound(ghost.clone())));
        assert!(registry.remove(&ghost).is_err());
    }

    #[test]
    fn test_remove_returns_record() {
        let mut registry = FaceRegistry::new();
        let a = register(&mut registry, "Alice", &[1.0, 0.0]);
        let b = register(&mut registry, "Bob", &[0.0, 1.0]);

        let removed = registry.remove(&a).unwrap();
        assert_eq!(removed.name, "Alice");
        assert_eq!(registry.list(), vec![FaceSummary { id: b, name: "Bob".into() }]);
    }

    #[test]
    fn test_find_match_first_hit_wins() {
        let mut registry = FaceRegistry::new();
        register(&mut registry, "Other", &[0.0, 1.0]);
        let first = register(&mut registry, "First", &[1.0, 0.1]);
        register(&mut registry, "Closer", &[1.0, 0.0]);

        // "Closer" is the better match, but "First" was registered earlier.
        let hit = registry.find_match(&emb(&[1.0, 0.0]), &CosineMatcher::new(0.9)).unwrap();
        assert_eq!(hit.id, first);
    }

    #[test]
    fn test_find_match_none() {
        let mut registry = FaceRegistry::new();
        assert!(registry.find_match(&emb(&[1.0]), &CosineMatcher::new(0.5)).is_none());

        register(&mut registry, "Alice", &[0.0, 1.0]);
        assert!(registry.find_match(&emb(&[1.0, 0.0]), &CosineMatcher::new(0.5)).is_none());
    }
}

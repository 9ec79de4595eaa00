//! Persisted document layout and the document-store contract.
//!
//! The external store holds one logical document per
//! `(EntityKey, CapabilityKind)`. Each top-level field carries the
//! timestamp of its last write so concurrent writers converge with
//! last-write-wins at the field level. A removed field leaves a tombstone
//! stamped with the removing write, so an older write cannot bring it back.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::CapabilityKind;
use crate::error::StoreResult;
use crate::key::EntityKey;

// =============================================================================
// StoredDocument
// =============================================================================

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    /// Entity the record belongs to.
    pub key: EntityKey,
    /// Capability the record belongs to.
    pub kind: CapabilityKind,
    /// Serialized record value.
    pub value: Value,
    /// Time of the newest write merged into this document.
    pub written_at: DateTime<Utc>,
    /// Per top-level field write times (objects only).
    #[serde(default)]
    pub field_stamps: BTreeMap<String, DateTime<Utc>>,
    /// Removal times of top-level fields no longer present.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tombstones: BTreeMap<String, DateTime<Utc>>,
}

impl StoredDocument {
    /// Builds a document from a local write, stamping every top-level field.
    pub fn from_write(
        key: EntityKey,
        kind: CapabilityKind,
        value: Value,
        written_at: DateTime<Utc>,
    ) -> Self {
        let field_stamps = match &value {
            Value::Object(map) => map.keys().map(|k| (k.clone(), written_at)).collect(),
            _ => BTreeMap::new(),
        };
        Self {
            key,
            kind,
            value,
            written_at,
            field_stamps,
            tombstones: BTreeMap::new(),
        }
    }

    /// Marks top-level fields as removed by this write.
    ///
    /// Fields still present in the value are ignored.
    pub fn with_removed<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let present = |field: &String| self.value.as_object().is_some_and(|map| map.contains_key(field));
        let removed: Vec<String> = fields.into_iter().filter(|f| !present(f)).collect();
        for field in removed {
            self.tombstones.insert(field, self.written_at);
        }
        self
    }

    /// Merges `incoming` into `self` with field-level last-write-wins.
    ///
    /// Objects merge field by field, keeping whichever side stamped a field
    /// later (ties go to `incoming`). A tombstone removes a field stamped at
    /// or before it and blocks older writes of that field. Any other shape
    /// falls back to whole-document comparison of `written_at`.
    pub fn merge_lww(&mut self, incoming: StoredDocument) {
        let StoredDocument {
            value: incoming_value,
            written_at: incoming_at,
            field_stamps: incoming_stamps,
            tombstones: incoming_tombstones,
            ..
        } = incoming;

        match (&mut self.value, incoming_value) {
            (Value::Object(current), Value::Object(next)) => {
                for (field, value) in next {
                    let stamp = incoming_stamps.get(&field).copied().unwrap_or(incoming_at);
                    let floor = self.field_stamps.get(&field).max(self.tombstones.get(&field));
                    if floor.is_none_or(|existing| stamp >= *existing) {
                        current.insert(field.clone(), value);
                        self.tombstones.remove(&field);
                        self.field_stamps.insert(field, stamp);
                    }
                }
                for (field, removed_at) in incoming_tombstones {
                    if self.field_stamps.get(&field).is_some_and(|stamp| *stamp > removed_at) {
                        continue;
                    }
                    current.remove(&field);
                    self.field_stamps.remove(&field);
                    let tombstone = self.tombstones.entry(field).or_insert(removed_at);
                    *tombstone = (*tombstone).max(removed_at);
                }
            }
            (current, value) => {
                if incoming_at >= self.written_at {
                    *current = value;
                    self.field_stamps = incoming_stamps;
                    self.tombstones = incoming_tombstones;
                }
            }
        }
        self.written_at = self.written_at.max(incoming_at);
    }
}

// =============================================================================
// Dotted paths
// =============================================================================

/// Reads a nested field addressed as `"a.b.c"`.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Writes a nested field addressed as `"a.b.c"`, creating intermediate
/// objects and replacing non-object values that sit on the path.
pub fn set_path(value: &mut Value, path: &str, new_value: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    set_segments(value, &segments, new_value);
}

/// Removes a nested field addressed as `"a.b.c"`, returning its value.
pub fn remove_path(value: &mut Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let (last, parents) = segments.split_last()?;
    parents
        .iter()
        .try_fold(value, |current, segment| current.as_object_mut()?.get_mut(*segment))?
        .as_object_mut()?
        .remove(*last)
}

fn set_segments(value: &mut Value, segments: &[&str], new_value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *value = new_value;
        return;
    };
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    if let Value::Object(map) = value {
        let child = map.entry((*first).to_string()).or_insert(Value::Null);
        set_segments(child, rest, new_value);
    }
}

// =============================================================================
// DocumentStore
// =============================================================================

/// The external document store behind the persistence gateway.
///
/// Implementations must apply [`StoredDocument::merge_lww`] against any
/// existing document on write.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Store identity for logs.
    fn name(&self) -> &str;

    /// Loads the document for `(key, kind)`.
    async fn load(
        &self,
        key: &EntityKey,
        kind: CapabilityKind,
    ) -> StoreResult<Option<StoredDocument>>;

    /// Writes (merges) one document.
    async fn write(&self, document: StoredDocument) -> StoreResult<()>;

    /// Writes a batch; one result per document, in order.
    async fn write_batch(&self, documents: Vec<StoredDocument>) -> Vec<StoreResult<()>> {
        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            results.push(self.write(document).await);
        }
        results
    }

    /// Round-trip check used to decide whether parked writes can be retried.
    async fn ping(&self) -> StoreResult<Duration>;
}

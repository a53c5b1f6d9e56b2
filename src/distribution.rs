//! Run-wide partition distribution.
//!
//! Maps `(worker, partition schema, step copy)` to the partition that copy
//! serves. It is computed once per split from the partition plan and the same
//! instance is attached to every produced pipeline, so both ends of a
//! re-partitioning hop route rows identically without negotiating at runtime.
//!
//! ## Usage
//!
//! ```rust
//! use weave_split::distribution::PartitionDistribution;
//!
//! let mut distribution = PartitionDistribution::new();
//! distribution.add_partition("w1", "customers", 0, 0, "p0");
//! distribution.add_partition("w2", "customers", 0, 1, "p1");
//!
//! let slot = distribution.partition("w2", "customers", 0).unwrap();
//! assert_eq!(slot.number, 1);
//! assert_eq!(slot.id, "p1");
//! ```

use crate::error::SplitError;
use crate::partitioning::PartitionSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The partition served by one step copy.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionSlot {
  /// Position of the partition in the expanded schema.
  pub number: usize,
  /// Partition ID.
  pub id: String,
}

/// `(worker, schema, copy) -> partition` for one split.
///
/// Copies are dense: copy `n` of a step on a worker is the `n`-th slot
/// registered for that worker and schema.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDistribution {
  /// worker -> schema -> slots indexed by copy.
  slots: BTreeMap<String, BTreeMap<String, Vec<PartitionSlot>>>,
  /// The logical schemas, so the runtime can resolve numbers back to IDs.
  original_schemas: Vec<PartitionSchema>,
}

impl PartitionDistribution {
  /// Creates an empty distribution.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers the partition served by `copy` of a step partitioned on `schema` on `worker`.
  ///
  /// Copies must be registered in order; re-registering an existing copy
  /// replaces its slot.
  pub fn add_partition(
    &mut self,
    worker: &str,
    schema: &str,
    copy: usize,
    number: usize,
    id: impl Into<String>,
  ) {
    let slots = self
      .slots
      .entry(worker.to_string())
      .or_default()
      .entry(schema.to_string())
      .or_default();
    let slot = PartitionSlot {
      number,
      id: id.into(),
    };
    if copy < slots.len() {
      slots[copy] = slot;
    } else {
      slots.push(slot);
    }
  }

  /// Looks up the partition of a step copy.
  pub fn partition(&self, worker: &str, schema: &str, copy: usize) -> Option<&PartitionSlot> {
    self.slots.get(worker)?.get(schema)?.get(copy)
  }

  /// Like [`partition`](Self::partition) but a miss is an invariant violation.
  pub fn require_partition(
    &self,
    worker: &str,
    schema: &str,
    copy: usize,
  ) -> Result<&PartitionSlot, SplitError> {
    self.partition(worker, schema, copy).ok_or_else(|| {
      SplitError::invariant(format!(
        "no partition registered for worker '{}', schema '{}', copy {}",
        worker, schema, copy
      ))
    })
  }

  /// All slots of a worker for a schema, indexed by copy.
  pub fn worker_slots(&self, worker: &str, schema: &str) -> &[PartitionSlot] {
    self
      .slots
      .get(worker)
      .and_then(|schemas| schemas.get(schema))
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  /// Schema names with at least one registered slot.
  pub fn schema_names(&self) -> BTreeSet<&str> {
    self
      .slots
      .values()
      .flat_map(|schemas| schemas.keys().map(String::as_str))
      .collect()
  }

  /// Number of registered slots.
  pub fn len(&self) -> usize {
    self
      .slots
      .values()
      .flat_map(|schemas| schemas.values())
      .map(Vec::len)
      .sum()
  }

  /// Returns true if nothing is registered.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Records the logical partition schemas.
  pub fn set_original_schemas(&mut self, schemas: Vec<PartitionSchema>) {
    self.original_schemas = schemas;
  }

  /// The logical partition schemas.
  pub fn original_schemas(&self) -> &[PartitionSchema] {
    &self.original_schemas
  }

  /// Checks that `expected` IDs are each served by exactly one step copy.
  ///
  /// # Errors
  ///
  /// Returns an invariant violation naming the first missing, duplicated or
  /// unexpected partition.
  pub fn validate_coverage(&self, schema: &str, expected: &[String]) -> Result<(), SplitError> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for schemas in self.slots.values() {
      for slot in schemas.get(schema).into_iter().flatten() {
        *seen.entry(slot.id.as_str()).or_default() += 1;
      }
    }
    for id in expected {
      match seen.remove(id.as_str()) {
        Some(1) => {}
        Some(n) => {
          return Err(SplitError::invariant(format!(
            "partition '{}' of schema '{}' is served by {} step copies",
            id, schema, n
          )));
        }
        None => {
          return Err(SplitError::invariant(format!(
            "partition '{}' of schema '{}' is not served by any step copy",
            id, schema
          )));
        }
      }
    }
    if let Some(id) = seen.keys().next() {
      return Err(SplitError::invariant(format!(
        "schema '{}' distributes unknown partition '{}'",
        schema, id
      )));
    }
    Ok(())
  }
}

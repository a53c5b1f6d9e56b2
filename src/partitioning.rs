//! # Partitioning Contract
//!
//! Declares how a step's rows are split across partitions. A step is
//! partitioned when it carries a [`PartitioningConfig`] with a method other
//! than [`PartitionMethod::None`] and a [`PartitionSchema`].
//!
//! A schema either lists its partition IDs explicitly or is *dynamic*: it
//! asks for a number of partitions per worker and is expanded once the worker
//! count is known. During a split two views are derived from a schema:
//!
//! - the **worker-local** schema keeps its name but only the IDs living on one
//!   worker ([`PartitionSchema::retain_for_worker`]);
//! - the **target** schema keeps the full expanded ID list under the name
//!   `"<name> (target)"` ([`target_schema_name`]) and tells an upstream step
//!   how to route rows it does not own.
//!
//! ## Usage
//!
//! ```rust
//! use weave_split::partitioning::{PartitionMethod, PartitionSchema, PartitioningConfig};
//!
//! let schema = PartitionSchema::explicit("customers", ["p0", "p1", "p2", "p3", "p4"]);
//! let config = PartitioningConfig::new(PartitionMethod::modulo("customer_id"), schema.clone());
//! assert!(config.is_partitioned());
//!
//! // Worker 0 of 2 owns every other partition, starting with the first.
//! let local = schema.retain_for_worker(2, 0);
//! assert_eq!(local.partition_ids(), Some(&["p0".to_string(), "p2".to_string(), "p4".to_string()][..]));
//! ```

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};

const TARGET_SCHEMA_SUFFIX: &str = " (target)";

/// Returns the name under which the full (target) view of a schema is registered.
pub fn target_schema_name(name: &str) -> String {
  format!("{}{}", name, TARGET_SCHEMA_SUFFIX)
}

/// Strips the target suffix from a schema name, if present.
pub fn schema_name_from_target(name: &str) -> &str {
  name.strip_suffix(TARGET_SCHEMA_SUFFIX).unwrap_or(name)
}

/// Partition identifiers of a schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionIds {
  /// Fixed, ordered list of partition IDs.
  Explicit(Vec<String>),
  /// Resolved at split time to `worker_count * per_worker` partitions.
  Dynamic {
    /// Partitions each worker should own.
    per_worker: usize,
  },
}

/// A named, ordered set of partition identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionSchema {
  /// Schema name. Worker-local views keep it; target views add a suffix.
  pub name: String,
  /// Explicit IDs or the dynamic rule.
  pub ids: PartitionIds,
}

impl PartitionSchema {
  /// Creates a schema with a fixed list of partition IDs.
  pub fn explicit<I, S>(name: impl Into<String>, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      name: name.into(),
      ids: PartitionIds::Explicit(ids.into_iter().map(Into::into).collect()),
    }
  }

  /// Creates a dynamic schema with `per_worker` partitions on every worker.
  pub fn dynamic(name: impl Into<String>, per_worker: usize) -> Self {
    Self {
      name: name.into(),
      ids: PartitionIds::Dynamic { per_worker },
    }
  }

  /// Returns true if the IDs are only known once the worker count is.
  pub fn is_dynamic(&self) -> bool {
    matches!(self.ids, PartitionIds::Dynamic { .. })
  }

  /// Returns the explicit partition IDs, or `None` for an unexpanded dynamic schema.
  pub fn partition_ids(&self) -> Option<&[String]> {
    match &self.ids {
      PartitionIds::Explicit(ids) => Some(ids),
      PartitionIds::Dynamic { .. } => None,
    }
  }

  /// Expands a dynamic schema to `worker_count * per_worker` IDs named `P1..Pn`.
  ///
  /// `per_worker_hint` overrides the schema's own per-worker count. Explicit
  /// schemas are returned unchanged.
  ///
  /// # Errors
  ///
  /// Returns [`ConfigurationError::PartitionCountOverflow`] if the total does
  /// not fit in a `usize`.
  pub fn expand(
    &self,
    worker_count: usize,
    per_worker_hint: Option<usize>,
  ) -> Result<PartitionSchema, ConfigurationError> {
    match &self.ids {
      PartitionIds::Explicit(_) => Ok(self.clone()),
      PartitionIds::Dynamic { per_worker } => {
        let per_worker = per_worker_hint.unwrap_or(*per_worker);
        let total = worker_count.checked_mul(per_worker).ok_or_else(|| {
          ConfigurationError::PartitionCountOverflow {
            schema: self.name.clone(),
            per_worker,
            workers: worker_count,
          }
        })?;
        Ok(PartitionSchema {
          name: self.name.clone(),
          ids: PartitionIds::Explicit((1..=total).map(|n| format!("P{}", n)).collect()),
        })
      }
    }
  }

  /// Keeps only the partitions owned by one worker.
  ///
  /// Partition `i` belongs to worker `i % worker_count`. Must be called on an
  /// expanded schema; a dynamic schema is returned unchanged.
  pub fn retain_for_worker(&self, worker_count: usize, worker_index: usize) -> PartitionSchema {
    match &self.ids {
      PartitionIds::Explicit(ids) if worker_count > 0 => PartitionSchema {
        name: self.name.clone(),
        ids: PartitionIds::Explicit(
          ids
            .iter()
            .enumerate()
            .filter(|(i, _)| i % worker_count == worker_index)
            .map(|(_, id)| id.clone())
            .collect(),
        ),
      },
      _ => self.clone(),
    }
  }

  /// Returns a copy of this schema under another name.
  pub fn renamed(&self, name: impl Into<String>) -> PartitionSchema {
    PartitionSchema {
      name: name.into(),
      ids: self.ids.clone(),
    }
  }
}

/// How rows are mapped to partitions at runtime.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method")]
pub enum PartitionMethod {
  /// Not partitioned.
  #[default]
  None,
  /// Hash of a field value modulo the partition count.
  Hash {
    /// Field to hash.
    field: String,
  },
  /// Integer field value modulo the partition count.
  Modulo {
    /// Integer field.
    field: String,
  },
}

impl PartitionMethod {
  /// Hash partitioning on `field`.
  pub fn hash(field: impl Into<String>) -> Self {
    PartitionMethod::Hash { field: field.into() }
  }

  /// Modulo partitioning on `field`.
  pub fn modulo(field: impl Into<String>) -> Self {
    PartitionMethod::Modulo { field: field.into() }
  }
}

/// Partitioning of a step: a method plus the schema it partitions over.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitioningConfig {
  /// Row-to-partition mapping.
  pub method: PartitionMethod,
  /// Schema the rows are spread over.
  pub schema: Option<PartitionSchema>,
}

impl PartitioningConfig {
  /// A config that does not partition.
  pub fn none() -> Self {
    Self::default()
  }

  /// Partitions over `schema` with `method`.
  pub fn new(method: PartitionMethod, schema: PartitionSchema) -> Self {
    Self {
      method,
      schema: Some(schema),
    }
  }

  /// Returns true if rows are actually split across partitions.
  pub fn is_partitioned(&self) -> bool {
    self.method != PartitionMethod::None && self.schema.is_some()
  }

  /// Returns the schema when partitioned.
  pub fn partition_schema(&self) -> Option<&PartitionSchema> {
    if self.is_partitioned() {
      self.schema.as_ref()
    } else {
      None
    }
  }

  /// Returns a copy of this config over another schema.
  pub fn with_schema(&self, schema: PartitionSchema) -> Self {
    Self {
      method: self.method.clone(),
      schema: Some(schema),
    }
  }
}

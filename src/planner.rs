//! # Partition Assignment Planner
//!
//! Decides which worker owns which partition of every partition schema used
//! by a clustered, partitioned step. Dynamic schemas are expanded first
//! (`worker_count * per_worker` partitions named `P1..Pn`), then partition IDs
//! are dealt to the workers round-robin in ID order: partition `i` goes to
//! worker `i % worker_count`, workers taken in topology order with the
//! coordinator skipped.
//!
//! The plan is a pure function of the pipeline's schemas and the topology, so
//! splitting the same pipeline twice yields the same assignment.
//!
//! ## Usage
//!
//! ```rust
//! use weave_split::cluster::{ClusterServer, ClusterTopology};
//! use weave_split::partitioning::{PartitionMethod, PartitionSchema, PartitioningConfig};
//! use weave_split::pipeline::{Pipeline, Step};
//! use weave_split::planner::PartitionPlan;
//!
//! let topology = ClusterTopology::new(
//!   "cluster",
//!   vec![
//!     ClusterServer::coordinator("coord", "10.0.0.1", 8080),
//!     ClusterServer::worker("w1", "10.0.0.2", 8081),
//!     ClusterServer::worker("w2", "10.0.0.3", 8081),
//!   ],
//! );
//! let schema = PartitionSchema::explicit("customers", ["p0", "p1", "p2", "p3", "p4"]);
//! let mut pipeline = Pipeline::new("orders");
//! pipeline
//!   .add_step(
//!     Step::new("lookup", "db_lookup")
//!       .clustered("cluster")
//!       .partitioned(PartitioningConfig::new(PartitionMethod::modulo("id"), schema)),
//!   )
//!   .unwrap();
//!
//! let plan = PartitionPlan::build(&pipeline, &topology).unwrap();
//! assert_eq!(plan.partitions_for("w1", "customers"), ["p0", "p2", "p4"]);
//! assert_eq!(plan.partitions_for("w2", "customers"), ["p1", "p3"]);
//! ```

use crate::cluster::ClusterTopology;
use crate::distribution::PartitionDistribution;
use crate::error::ConfigurationError;
use crate::partitioning::{PartitionSchema, target_schema_name};
use crate::pipeline::{Pipeline, Step};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Partition ownership for one split.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
  /// Worker names in topology order.
  workers: Vec<String>,
  /// Schemas as declared by the steps, keyed by name.
  original: BTreeMap<String, PartitionSchema>,
  /// Schemas with dynamic IDs expanded, keyed by name.
  expanded: BTreeMap<String, PartitionSchema>,
  /// schema -> worker -> owned IDs. Every worker has an entry.
  assignments: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PartitionPlan {
  /// Plans every schema used by a clustered, partitioned step of `pipeline`.
  ///
  /// # Errors
  ///
  /// - [`ConfigurationError::ConflictingSchema`] if two steps use different
  ///   schemas under one name.
  /// - [`ConfigurationError::PartitionShortfall`] if a schema has fewer
  ///   partitions than the topology has workers.
  /// - [`ConfigurationError::PartitionCountOverflow`] if a dynamic schema
  ///   cannot be expanded.
  pub fn build(pipeline: &Pipeline, topology: &ClusterTopology) -> Result<Self, ConfigurationError> {
    let workers: Vec<String> = topology.workers().map(|w| w.name.clone()).collect();
    let worker_count = workers.len();

    let mut declared: BTreeMap<String, (&PartitionSchema, &Step)> = BTreeMap::new();
    for step in pipeline.steps.iter().filter(|s| s.is_clustered()) {
      let Some(schema) = step.partition_schema() else {
        continue;
      };
      match declared.get(&schema.name) {
        Some((first_schema, first_step)) if *first_schema != schema => {
          return Err(ConfigurationError::ConflictingSchema {
            schema: schema.name.clone(),
            first: first_step.name.clone(),
            second: step.name.clone(),
          });
        }
        Some(_) => {}
        None => {
          declared.insert(schema.name.clone(), (schema, step));
        }
      }
    }

    let mut plan = PartitionPlan {
      workers,
      original: BTreeMap::new(),
      expanded: BTreeMap::new(),
      assignments: BTreeMap::new(),
    };

    for (name, (schema, _)) in declared {
      let expanded = schema.expand(worker_count, topology.partition_hint(&name))?;
      let partitions = expanded.partition_ids().map(<[String]>::len).unwrap_or(0);
      if partitions < worker_count {
        return Err(ConfigurationError::PartitionShortfall {
          schema: name,
          partitions,
          workers: worker_count,
        });
      }

      let per_worker: BTreeMap<String, Vec<String>> = plan
        .workers
        .iter()
        .enumerate()
        .map(|(index, worker)| {
          let local = expanded.retain_for_worker(worker_count, index);
          let ids = local.partition_ids().map(<[String]>::to_vec).unwrap_or_default();
          (worker.clone(), ids)
        })
        .collect();
      debug!(
        schema = %name,
        partitions,
        workers = worker_count,
        "assigned partitions to workers"
      );

      plan.original.insert(name.clone(), schema.clone());
      plan.expanded.insert(name.clone(), expanded);
      plan.assignments.insert(name, per_worker);
    }

    Ok(plan)
  }

  /// Builds a plan from a fixed assignment of already expanded schemas.
  ///
  /// Used to pin an assignment decided elsewhere. No shortfall check is made;
  /// workers missing from an assignment own no partition of that schema.
  pub fn from_assignments(
    topology: &ClusterTopology,
    schemas: Vec<PartitionSchema>,
    assignments: BTreeMap<String, BTreeMap<String, Vec<String>>>,
  ) -> Self {
    let workers: Vec<String> = topology.workers().map(|w| w.name.clone()).collect();
    let mut plan = PartitionPlan {
      workers,
      original: BTreeMap::new(),
      expanded: BTreeMap::new(),
      assignments: BTreeMap::new(),
    };
    for schema in schemas {
      let given = assignments.get(&schema.name);
      let per_worker = plan
        .workers
        .iter()
        .map(|worker| {
          let ids = given
            .and_then(|by_worker| by_worker.get(worker))
            .cloned()
            .unwrap_or_default();
          (worker.clone(), ids)
        })
        .collect();
      plan.original.insert(schema.name.clone(), schema.clone());
      plan.assignments.insert(schema.name.clone(), per_worker);
      plan.expanded.insert(schema.name.clone(), schema);
    }
    plan
  }

  /// Worker names in topology order.
  pub fn workers(&self) -> &[String] {
    &self.workers
  }

  /// Names of the planned schemas, sorted.
  pub fn schema_names(&self) -> impl Iterator<Item = &str> {
    self.expanded.keys().map(String::as_str)
  }

  /// Returns true if `schema` was planned.
  pub fn is_planned(&self, schema: &str) -> bool {
    self.expanded.contains_key(schema)
  }

  /// The expanded form of a planned schema.
  pub fn expanded_schema(&self, schema: &str) -> Option<&PartitionSchema> {
    self.expanded.get(schema)
  }

  /// Partition IDs owned by `worker` for `schema`, in schema order.
  ///
  /// Empty when the schema is not planned or the worker owns nothing.
  pub fn partitions_for(&self, worker: &str, schema: &str) -> &[String] {
    self
      .assignments
      .get(schema)
      .and_then(|by_worker| by_worker.get(worker))
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  /// The schema as seen by one worker: same name, only the IDs it owns.
  pub fn worker_local_schema(&self, worker: &str, schema: &str) -> Option<PartitionSchema> {
    let name = &self.expanded.get(schema)?.name;
    Some(PartitionSchema::explicit(
      name.clone(),
      self.partitions_for(worker, schema).iter().cloned(),
    ))
  }

  /// The full expanded schema under its `" (target)"` name.
  pub fn target_schema(&self, schema: &str) -> Option<PartitionSchema> {
    self
      .expanded
      .get(schema)
      .map(|expanded| expanded.renamed(target_schema_name(&expanded.name)))
  }

  /// Builds the run-wide distribution: copy `n` of a step on a worker serves
  /// the `n`-th partition that worker owns.
  pub fn distribution(&self) -> PartitionDistribution {
    let mut distribution = PartitionDistribution::new();
    for (schema, by_worker) in &self.assignments {
      let all_ids = self
        .expanded
        .get(schema)
        .and_then(PartitionSchema::partition_ids)
        .unwrap_or(&[]);
      for worker in &self.workers {
        let owned = by_worker.get(worker).map(Vec::as_slice).unwrap_or(&[]);
        for (copy, id) in owned.iter().enumerate() {
          let number = all_ids.iter().position(|known| known == id).unwrap_or(copy);
          distribution.add_partition(worker, schema, copy, number, id.clone());
        }
      }
    }
    distribution.set_original_schemas(self.original.values().cloned().collect());
    distribution
  }
}

//! # Pipeline
//!
//! The pipeline description the splitter reads and writes: a directed graph of
//! [`Step`]s connected by [`Hop`]s (primary data edges) and
//! [`ReferenceEdge`]s (secondary lookup edges).
//!
//! A logical pipeline is authored once and annotated with cluster and
//! partition settings. The splitter never mutates it; it clones steps into the
//! coordinator and worker pipelines it produces. Produced pipelines use the
//! same type, tagged with a [`PipelineRole`], with remote endpoints attached to
//! the steps that send or receive rows across processes.
//!
//! Steps, clusters and partition schemas are identified by name.

use crate::channel::RemoteEndpoint;
use crate::cluster::ClusterTopology;
use crate::distribution::PartitionDistribution;
use crate::partitioning::{PartitionSchema, PartitioningConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a step does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
  /// An ordinary processing step provided by a plugin.
  Plugin {
    /// Plugin identifier.
    type_id: String,
  },
  /// No-op that merges several input streams into one.
  Merge,
  /// Sends its input rows to a remote reader.
  SocketWriter(RemoteEndpoint),
  /// Receives rows from a remote writer.
  SocketReader(RemoteEndpoint),
}

/// A named processing node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
  /// Unique name within its pipeline.
  pub name: String,
  /// What the step does.
  pub kind: StepKind,
  /// Number of parallel copies.
  pub copies: usize,
  /// Cluster topology the step runs on; `None` runs it on the coordinator.
  #[serde(default)]
  pub cluster: Option<String>,
  /// How the step's rows are partitioned.
  #[serde(default)]
  pub partitioning: PartitioningConfig,
  /// Scheme of the downstream step the rows are re-partitioned for, if any.
  #[serde(default)]
  pub target_partitioning: Option<PartitioningConfig>,
  /// Channels this step reads rows from.
  #[serde(default)]
  pub remote_inputs: Vec<RemoteEndpoint>,
  /// Channels this step sends rows to.
  #[serde(default)]
  pub remote_outputs: Vec<RemoteEndpoint>,
}

impl Step {
  /// Creates a single-copy, unclustered plugin step.
  pub fn new(name: impl Into<String>, type_id: impl Into<String>) -> Self {
    Self::with_kind(
      name,
      StepKind::Plugin {
        type_id: type_id.into(),
      },
    )
  }

  /// Creates a single-copy, unclustered step of any kind.
  pub fn with_kind(name: impl Into<String>, kind: StepKind) -> Self {
    Self {
      name: name.into(),
      kind,
      copies: 1,
      cluster: None,
      partitioning: PartitioningConfig::none(),
      target_partitioning: None,
      remote_inputs: Vec::new(),
      remote_outputs: Vec::new(),
    }
  }

  /// Sets the number of copies.
  pub fn copies(mut self, copies: usize) -> Self {
    self.copies = copies;
    self
  }

  /// Runs the step on the named cluster.
  pub fn clustered(mut self, cluster: impl Into<String>) -> Self {
    self.cluster = Some(cluster.into());
    self
  }

  /// Sets the partitioning.
  pub fn partitioned(mut self, partitioning: PartitioningConfig) -> Self {
    self.partitioning = partitioning;
    self
  }

  /// Returns true if the step runs on a cluster.
  pub fn is_clustered(&self) -> bool {
    self.cluster.is_some()
  }

  /// Returns true if the step's rows are partitioned.
  pub fn is_partitioned(&self) -> bool {
    self.partitioning.is_partitioned()
  }

  /// Returns the partition schema when partitioned.
  pub fn partition_schema(&self) -> Option<&PartitionSchema> {
    self.partitioning.partition_schema()
  }
}

/// A directed primary data edge.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
  /// Upstream step name.
  pub from: String,
  /// Downstream step name.
  pub to: String,
  /// Disabled hops are kept in the definition but carry no rows.
  #[serde(default = "enabled_by_default")]
  pub enabled: bool,
}

fn enabled_by_default() -> bool {
  true
}

impl Hop {
  /// Creates an enabled hop.
  pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      from: from.into(),
      to: to.into(),
      enabled: true,
    }
  }

  /// Creates a disabled hop.
  pub fn disabled(from: impl Into<String>, to: impl Into<String>) -> Self {
    Self {
      enabled: false,
      ..Self::new(from, to)
    }
  }
}

/// A secondary edge: `consumer` reads lookup data produced by `producer`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceEdge {
  /// Step producing the lookup data.
  pub producer: String,
  /// Step reading it.
  pub consumer: String,
}

impl ReferenceEdge {
  /// Creates a reference edge.
  pub fn new(producer: impl Into<String>, consumer: impl Into<String>) -> Self {
    Self {
      producer: producer.into(),
      consumer: consumer.into(),
    }
  }
}

/// Where a pipeline runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRole {
  /// The authored pipeline, before splitting.
  #[default]
  Logical,
  /// Runs on the coordinator.
  Coordinator,
  /// Runs on the named worker.
  Worker {
    /// Worker server name.
    server: String,
  },
}

/// A directed graph of steps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
  /// Pipeline name.
  pub name: String,
  /// Where the pipeline runs.
  #[serde(default)]
  pub role: PipelineRole,
  /// Steps in insertion order.
  #[serde(default)]
  pub steps: Vec<Step>,
  /// Primary edges.
  #[serde(default)]
  pub hops: Vec<Hop>,
  /// Lookup edges.
  #[serde(default)]
  pub reference_edges: Vec<ReferenceEdge>,
  /// Cluster topologies steps may reference.
  #[serde(default)]
  pub clusters: Vec<ClusterTopology>,
  /// Partition schemas known to the pipeline.
  #[serde(default)]
  pub partition_schemas: Vec<PartitionSchema>,
  /// Run-wide partition assignment; set on split outputs only.
  #[serde(default)]
  pub partition_distribution: Option<Arc<PartitionDistribution>>,
}

impl Pipeline {
  /// Creates an empty logical pipeline.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  /// Adds a step.
  ///
  /// # Errors
  ///
  /// Returns an error if a step with the same name already exists.
  pub fn add_step(&mut self, step: Step) -> Result<(), String> {
    if self.find_step(&step.name).is_some() {
      return Err(format!("Step with name '{}' already exists", step.name));
    }
    self.steps.push(step);
    Ok(())
  }

  /// Adds a hop.
  ///
  /// # Errors
  ///
  /// Returns an error if either end does not exist.
  pub fn add_hop(&mut self, hop: Hop) -> Result<(), String> {
    for name in [&hop.from, &hop.to] {
      if self.find_step(name).is_none() {
        return Err(format!("Step '{}' does not exist", name));
      }
    }
    self.hops.push(hop);
    Ok(())
  }

  /// Adds a reference edge.
  ///
  /// # Errors
  ///
  /// Returns an error if either end does not exist.
  pub fn add_reference_edge(&mut self, edge: ReferenceEdge) -> Result<(), String> {
    for name in [&edge.producer, &edge.consumer] {
      if self.find_step(name).is_none() {
        return Err(format!("Step '{}' does not exist", name));
      }
    }
    self.reference_edges.push(edge);
    Ok(())
  }

  /// Adds a cluster topology steps can reference by name.
  pub fn add_cluster(&mut self, cluster: ClusterTopology) {
    self.clusters.retain(|c| c.name != cluster.name);
    self.clusters.push(cluster);
  }

  /// Finds a step by name.
  pub fn find_step(&self, name: &str) -> Option<&Step> {
    self.steps.iter().find(|s| s.name == name)
  }

  /// Finds a cluster topology by name.
  pub fn find_cluster(&self, name: &str) -> Option<&ClusterTopology> {
    self.clusters.iter().find(|c| c.name == name)
  }

  /// Finds a partition schema by name.
  pub fn find_partition_schema(&self, name: &str) -> Option<&PartitionSchema> {
    self.partition_schemas.iter().find(|s| s.name == name)
  }

  /// Finds the hop between two steps.
  pub fn find_hop(&self, from: &str, to: &str) -> Option<&Hop> {
    self.hops.iter().find(|h| h.from == from && h.to == to)
  }

  /// Steps feeding `name` through enabled hops, in hop order.
  pub fn previous_steps(&self, name: &str) -> Vec<&Step> {
    self
      .hops
      .iter()
      .filter(|h| h.enabled && h.to == name)
      .filter_map(|h| self.find_step(&h.from))
      .collect()
  }

  /// Steps `name` reads lookup data from, in edge order.
  pub fn reference_sources(&self, name: &str) -> Vec<&Step> {
    self
      .reference_edges
      .iter()
      .filter(|e| e.consumer == name)
      .filter_map(|e| self.find_step(&e.producer))
      .collect()
  }

  /// Returns true if the reference edge exists.
  pub fn has_reference_edge(&self, producer: &str, consumer: &str) -> bool {
    self
      .reference_edges
      .iter()
      .any(|e| e.producer == producer && e.consumer == consumer)
  }
}

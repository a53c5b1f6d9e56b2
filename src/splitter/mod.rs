//! # Topology Splitter
//!
//! Turns one logical pipeline annotated with cluster and partition settings
//! into a coordinator pipeline plus one pipeline per worker, wired together
//! with remote endpoints.
//!
//! The split runs in three phases:
//!
//! 1. the cluster configuration is validated ([`crate::validator`]);
//! 2. partitions are assigned to workers ([`crate::planner`]);
//! 3. every enabled hop and every reference edge is classified into an
//!    [`EdgeKind`] and handled once, cloning steps into the produced pipelines
//!    and allocating channels through the injected [`PortReserver`].
//!
//! Any error aborts the whole split. The input pipeline is never mutated.
//!
//! ## Usage
//!
//! ```rust
//! use weave_split::cluster::{ClusterServer, ClusterTopology};
//! use weave_split::config::SplitterConfig;
//! use weave_split::pipeline::{Hop, Pipeline, Step};
//! use weave_split::reservation::InMemoryPortReserver;
//! use weave_split::splitter::TopologySplitter;
//!
//! let mut pipeline = Pipeline::new("orders");
//! pipeline.add_cluster(ClusterTopology::new(
//!   "cluster",
//!   vec![
//!     ClusterServer::coordinator("coord", "10.0.0.1", 8080),
//!     ClusterServer::worker("w1", "10.0.0.2", 8081),
//!     ClusterServer::worker("w2", "10.0.0.3", 8081),
//!   ],
//! ));
//! pipeline.add_step(Step::new("read", "csv_input").clustered("cluster")).unwrap();
//! pipeline.add_step(Step::new("write", "table_output")).unwrap();
//! pipeline.add_hop(Hop::new("read", "write")).unwrap();
//!
//! let result = TopologySplitter::new(&pipeline, SplitterConfig::default())
//!   .with_run_id("run-1")
//!   .split(&InMemoryPortReserver::new())
//!   .unwrap();
//!
//! assert_eq!(result.coordinator.name, "orders (coordinator)");
//! assert_eq!(result.workers.len(), 2);
//! assert_eq!(result.output_endpoints().len(), 2);
//! ```

pub mod edge_kind;
mod hops;
mod reference;

pub use edge_kind::EdgeKind;

use crate::channel::{ChannelAllocator, ChannelKey, ChannelSettings, RemoteEndpoint};
use crate::cluster::{ClusterServer, ClusterTopology};
use crate::config::SplitterConfig;
use crate::distribution::PartitionDistribution;
use crate::error::SplitError;
use crate::partitioning::{PartitionSchema, PartitioningConfig};
use crate::pipeline::{Pipeline, PipelineRole, Step};
use crate::pipeline_builder::PipelineBuilder;
use crate::planner::PartitionPlan;
use crate::reservation::PortReserver;
use crate::validator::{ClusterSettings, validate_cluster_configuration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// The outcome of a split: everything needed to run the pipeline across the cluster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitResult {
  /// Identifier scoping the reservations of this run.
  pub run_id: String,
  /// Pipeline executed by the coordinator.
  pub coordinator: Pipeline,
  /// Pipelines executed by the workers, by worker name.
  pub workers: BTreeMap<String, Pipeline>,
  /// Partition assignment shared by every pipeline.
  pub distribution: Arc<PartitionDistribution>,
  /// When the split was computed.
  pub created_at: DateTime<Utc>,
}

impl SplitResult {
  /// Pipeline of one worker.
  pub fn worker(&self, name: &str) -> Option<&Pipeline> {
    self.workers.get(name)
  }

  /// The coordinator pipeline followed by the worker pipelines.
  pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
    std::iter::once(&self.coordinator).chain(self.workers.values())
  }

  /// Every endpoint some step sends rows to.
  pub fn output_endpoints(&self) -> Vec<&RemoteEndpoint> {
    self
      .pipelines()
      .flat_map(|p| p.steps.iter())
      .flat_map(|s| s.remote_outputs.iter())
      .collect()
  }

  /// Every endpoint some step reads rows from.
  pub fn input_endpoints(&self) -> Vec<&RemoteEndpoint> {
    self
      .pipelines()
      .flat_map(|p| p.steps.iter())
      .flat_map(|s| s.remote_inputs.iter())
      .collect()
  }
}

/// Splits a logical pipeline over its cluster topology.
#[derive(Clone, Debug)]
pub struct TopologySplitter<'a> {
  pipeline: &'a Pipeline,
  config: SplitterConfig,
  run_id: Option<String>,
}

impl<'a> TopologySplitter<'a> {
  /// Creates a splitter for `pipeline`.
  pub fn new(pipeline: &'a Pipeline, config: SplitterConfig) -> Self {
    Self {
      pipeline,
      config,
      run_id: None,
    }
  }

  /// Uses a fixed run identifier instead of a random one.
  pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
    self.run_id = Some(run_id.into());
    self
  }

  /// Splits the pipeline.
  ///
  /// # Errors
  ///
  /// - [`SplitError::Configuration`] if the pipeline cannot be split.
  /// - [`SplitError::Cardinality`] if copy counts conflict across a hop.
  /// - [`SplitError::Allocation`] if a channel port cannot be reserved.
  pub fn split(&self, reserver: &dyn PortReserver) -> Result<SplitResult, SplitError> {
    let settings = validate_cluster_configuration(self.pipeline, &self.config)?;
    let plan = PartitionPlan::build(self.pipeline, settings.topology)?;
    self.split_with(settings, &plan, reserver)
  }

  /// Splits the pipeline with a partition assignment decided elsewhere.
  ///
  /// The cluster configuration is still validated.
  pub fn split_with_plan(
    &self,
    plan: &PartitionPlan,
    reserver: &dyn PortReserver,
  ) -> Result<SplitResult, SplitError> {
    let settings = validate_cluster_configuration(self.pipeline, &self.config)?;
    self.split_with(settings, plan, reserver)
  }

  fn split_with(
    &self,
    settings: ClusterSettings<'_>,
    plan: &PartitionPlan,
    reserver: &dyn PortReserver,
  ) -> Result<SplitResult, SplitError> {
    let run_id = self
      .run_id
      .clone()
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(
      pipeline = %self.pipeline.name,
      cluster = %settings.topology.name,
      run_id = %run_id,
      "splitting pipeline"
    );

    let channel_settings = ChannelSettings {
      run_id: run_id.clone(),
      pipeline_name: self.pipeline.name.clone(),
      base_port: settings.base_port,
      buffer_size: settings.socket_buffer_size,
      compressed: settings.compressed,
    };
    let allocator = ChannelAllocator::new(reserver, channel_settings, self.config.reservation.clone());
    let mut ctx = SplitContext::new(self.pipeline, settings.topology, plan, allocator)?;

    let mut visited: HashSet<(&str, &str)> = HashSet::new();
    for step in &self.pipeline.steps {
      let previous = self.pipeline.previous_steps(&step.name);
      if previous.is_empty() {
        ctx.seed(step)?;
      }
      for upstream in previous {
        if visited.insert((upstream.name.as_str(), step.name.as_str())) {
          let kind = ctx.split_hop(upstream, step)?;
          debug!(from = %upstream.name, to = %step.name, kind = %kind, "split hop");
        }
      }
      for producer in self.pipeline.reference_sources(&step.name) {
        let kind = ctx.split_reference(producer, step)?;
        debug!(producer = %producer.name, consumer = %step.name, kind = %kind, "split reference edge");
      }
    }

    let distribution = Arc::new(plan.distribution());
    for schema in plan.schema_names() {
      let expected = plan
        .expanded_schema(schema)
        .and_then(PartitionSchema::partition_ids)
        .unwrap_or(&[]);
      distribution.validate_coverage(schema, expected)?;
    }

    let channels = ctx.allocator.len();
    let (coordinator, workers) = ctx.finish(self.pipeline, &distribution);
    info!(
      pipeline = %self.pipeline.name,
      workers = workers.len(),
      channels,
      "pipeline split"
    );
    Ok(SplitResult {
      run_id,
      coordinator,
      workers,
      distribution,
      created_at: Utc::now(),
    })
  }
}

/// Mutable state of one split.
pub(crate) struct SplitContext<'a, 'r> {
  pub(crate) coordinator_server: &'a ClusterServer,
  pub(crate) worker_servers: Vec<&'a ClusterServer>,
  pub(crate) plan: &'a PartitionPlan,
  pub(crate) allocator: ChannelAllocator<'r>,
  pub(crate) coordinator: PipelineBuilder,
  pub(crate) workers: BTreeMap<String, PipelineBuilder>,
  /// (upstream, downstream) -> next coordinator copy of the hop.
  coordinator_copies: HashMap<(String, String), usize>,
}

impl<'a, 'r> SplitContext<'a, 'r> {
  pub(crate) fn new(
    pipeline: &Pipeline,
    topology: &'a ClusterTopology,
    plan: &'a PartitionPlan,
    allocator: ChannelAllocator<'r>,
  ) -> Result<Self, SplitError> {
    let coordinator_server = topology.coordinator().ok_or_else(|| {
      SplitError::invariant(format!("cluster '{}' has no coordinator", topology.name))
    })?;
    let worker_servers: Vec<&ClusterServer> = topology.workers().collect();
    let workers = worker_servers
      .iter()
      .map(|server| {
        let builder = PipelineBuilder::new(
          format!("{} ({}:{})", pipeline.name, topology.name, server.name),
          PipelineRole::Worker {
            server: server.name.clone(),
          },
        );
        (server.name.clone(), builder)
      })
      .collect();
    Ok(Self {
      coordinator_server,
      worker_servers,
      plan,
      allocator,
      coordinator: PipelineBuilder::new(
        format!("{} (coordinator)", pipeline.name),
        PipelineRole::Coordinator,
      ),
      workers,
      coordinator_copies: HashMap::new(),
    })
  }

  /// Copies of `step` on `worker`: the partitions it owns there when
  /// clustered and partitioned, the declared count otherwise. Never zero.
  pub(crate) fn effective_copies(&self, worker: &str, step: &Step) -> usize {
    match step.partition_schema() {
      Some(schema) if step.is_clustered() && self.plan.is_planned(&schema.name) => {
        self.plan.partitions_for(worker, &schema.name).len().max(1)
      }
      _ => step.copies,
    }
  }

  /// Copies of a clustered step summed over all workers.
  pub(crate) fn total_copies(&self, step: &Step) -> usize {
    self
      .worker_servers
      .iter()
      .map(|server| self.effective_copies(&server.name, step))
      .sum()
  }

  /// The clone of a clustered step that runs on `worker`.
  pub(crate) fn worker_clone(&self, worker: &str, step: &Step) -> Step {
    let mut clone = step.clone();
    clone.cluster = None;
    if let Some(schema) = step.partition_schema() {
      if let Some(local) = self.plan.worker_local_schema(worker, &schema.name) {
        clone.partitioning = step.partitioning.with_schema(local);
      }
      clone.copies = self.effective_copies(worker, step);
    }
    clone
  }

  pub(crate) fn worker_builder(&mut self, worker: &str) -> Result<&mut PipelineBuilder, SplitError> {
    self
      .workers
      .get_mut(worker)
      .ok_or_else(|| SplitError::invariant(format!("no pipeline for worker '{}'", worker)))
  }

  /// Clones `step` into the worker pipeline unless it is already there.
  pub(crate) fn ensure_worker_step(&mut self, worker: &str, step: &Step) -> Result<(), SplitError> {
    let clone = self.worker_clone(worker, step);
    let local_schema = clone.partition_schema().cloned();
    let builder = self.worker_builder(worker)?;
    builder.ensure_step_with(&step.name, || clone);
    if let Some(schema) = local_schema {
      builder.add_or_replace_partition_schema(schema);
    }
    Ok(())
  }

  /// Clones `step` into the coordinator pipeline unless it is already there.
  pub(crate) fn ensure_coordinator_step(&mut self, step: &Step) {
    self.coordinator.ensure_step(step);
  }

  /// Next coordinator copy for a hop, cycling through `copies`.
  pub(crate) fn next_coordinator_copy(&mut self, upstream: &str, downstream: &str, copies: usize) -> usize {
    let counter = self
      .coordinator_copies
      .entry((upstream.to_string(), downstream.to_string()))
      .or_insert(0);
    let copy = *counter % copies.max(1);
    *counter += 1;
    copy
  }

  /// Returns the endpoint for `key`, reserving a port on the first request.
  pub(crate) fn allocate(
    &mut self,
    key: ChannelKey,
    source: &ClusterServer,
    target: &ClusterServer,
  ) -> Result<RemoteEndpoint, SplitError> {
    Ok(self.allocator.allocate(key, &source.hostname, &target.hostname)?)
  }

  /// The target-partitioning config routing rows into `step`'s full scheme.
  pub(crate) fn target_partitioning(
    &self,
    step: &Step,
  ) -> Result<Option<(PartitioningConfig, PartitionSchema)>, SplitError> {
    let Some(schema) = step.partition_schema() else {
      return Ok(None);
    };
    let target = self.plan.target_schema(&schema.name).ok_or_else(|| {
      SplitError::invariant(format!(
        "partition schema '{}' of step '{}' was not planned",
        schema.name, step.name
      ))
    })?;
    Ok(Some((step.partitioning.with_schema(target.clone()), target)))
  }

  /// Places a step without incoming hops.
  pub(crate) fn seed(&mut self, step: &Step) -> Result<(), SplitError> {
    if step.is_clustered() {
      for server in self.worker_servers.clone() {
        self.ensure_worker_step(&server.name, step)?;
      }
    } else {
      self.ensure_coordinator_step(step);
    }
    Ok(())
  }

  fn finish(
    self,
    original: &Pipeline,
    distribution: &Arc<PartitionDistribution>,
  ) -> (Pipeline, BTreeMap<String, Pipeline>) {
    let mut coordinator = self.coordinator;
    for cluster in &original.clusters {
      coordinator.add_cluster(cluster.clone());
    }
    for schema in &original.partition_schemas {
      coordinator.add_or_replace_partition_schema(schema.clone());
    }
    let used: Vec<PartitionSchema> = coordinator
      .pipeline()
      .steps
      .iter()
      .filter_map(|s| s.partition_schema().cloned())
      .collect();
    for schema in used {
      if coordinator.pipeline().find_partition_schema(&schema.name).is_none() {
        coordinator.add_or_replace_partition_schema(schema);
      }
    }
    coordinator.set_distribution(Arc::clone(distribution));

    let workers = self
      .workers
      .into_iter()
      .map(|(name, mut builder)| {
        for cluster in &original.clusters {
          builder.add_cluster(cluster.clone());
        }
        builder.set_distribution(Arc::clone(distribution));
        (name, builder.build())
      })
      .collect();
    (coordinator.build(), workers)
  }
}

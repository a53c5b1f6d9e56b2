//! # Pipeline Builder
//!
//! Idempotent registry over a pipeline under construction. The splitter
//! visits the same step from several edges, so every operation here is
//! "find or insert": asking twice for the same step, hop, reference edge or
//! endpoint leaves the pipeline exactly as asking once.
//!
//! Once every edge has been processed, [`PipelineBuilder::build`] hands out
//! the finished [`Pipeline`].
//!
//! ## Usage
//!
//! ```rust
//! use weave_split::pipeline::{PipelineRole, Step};
//! use weave_split::pipeline_builder::PipelineBuilder;
//!
//! let mut builder = PipelineBuilder::new("orders (coordinator)", PipelineRole::Coordinator);
//! let read = Step::new("read", "csv_input");
//! let sort = Step::new("sort", "sort_rows");
//! builder.ensure_step(&read);
//! builder.ensure_step(&sort);
//! builder.ensure_step(&read);
//! builder.ensure_hop("read", "sort").unwrap();
//! builder.ensure_hop("read", "sort").unwrap();
//!
//! let pipeline = builder.build();
//! assert_eq!(pipeline.steps.len(), 2);
//! assert_eq!(pipeline.hops.len(), 1);
//! ```

use crate::channel::RemoteEndpoint;
use crate::cluster::ClusterTopology;
use crate::distribution::PartitionDistribution;
use crate::error::SplitError;
use crate::partitioning::PartitionSchema;
use crate::pipeline::{Hop, Pipeline, PipelineRole, ReferenceEdge, Step};
use std::sync::Arc;

/// Builds one produced pipeline.
#[derive(Clone, Debug)]
pub struct PipelineBuilder {
  pipeline: Pipeline,
}

impl PipelineBuilder {
  /// Creates an empty pipeline with the given name and role.
  pub fn new(name: impl Into<String>, role: PipelineRole) -> Self {
    let mut pipeline = Pipeline::new(name);
    pipeline.role = role;
    Self { pipeline }
  }

  /// Finds a step by name.
  pub fn step(&self, name: &str) -> Option<&Step> {
    self.pipeline.find_step(name)
  }

  /// Finds a step by name, mutably.
  pub fn step_mut(&mut self, name: &str) -> Option<&mut Step> {
    self.pipeline.steps.iter_mut().find(|s| s.name == name)
  }

  /// Like [`step_mut`](Self::step_mut) but a miss is an invariant violation.
  pub fn require_step_mut(&mut self, name: &str) -> Result<&mut Step, SplitError> {
    let pipeline = self.pipeline.name.clone();
    self.step_mut(name).ok_or_else(|| {
      SplitError::invariant(format!("step '{}' is missing from pipeline '{}'", name, pipeline))
    })
  }

  /// Returns the step named `name`, inserting `make()` if absent.
  pub fn ensure_step_with(&mut self, name: &str, make: impl FnOnce() -> Step) -> &mut Step {
    let index = match self.pipeline.steps.iter().position(|s| s.name == name) {
      Some(index) => index,
      None => {
        self.pipeline.steps.push(make());
        self.pipeline.steps.len() - 1
      }
    };
    &mut self.pipeline.steps[index]
  }

  /// Returns the step with `template`'s name, inserting a clone of `template` if absent.
  pub fn ensure_step(&mut self, template: &Step) -> &mut Step {
    self.ensure_step_with(&template.name, || template.clone())
  }

  /// Inserts a generated step, renaming it with `fallback_suffix` if its name
  /// is taken by a different step.
  ///
  /// Returns the name the step lives under.
  pub fn insert_generated_step(&mut self, mut step: Step, fallback_suffix: &str) -> String {
    if let Some(existing) = self.step(&step.name) {
      if existing.kind != step.kind {
        step.name = format!("{} ({})", step.name, fallback_suffix);
      }
    }
    let name = step.name.clone();
    self.ensure_step_with(&name, || step);
    name
  }

  /// Registers a cluster topology, replacing one of the same name.
  pub fn add_cluster(&mut self, cluster: ClusterTopology) {
    self.pipeline.add_cluster(cluster);
  }

  /// Adds the enabled hop `from -> to` unless it exists. Returns true if it was added.
  ///
  /// # Errors
  ///
  /// Returns an invariant violation if either step is missing.
  pub fn ensure_hop(&mut self, from: &str, to: &str) -> Result<bool, SplitError> {
    if self.pipeline.find_hop(from, to).is_some() {
      return Ok(false);
    }
    self
      .pipeline
      .add_hop(Hop::new(from, to))
      .map_err(|e| SplitError::invariant(format!("{} in pipeline '{}'", e, self.pipeline.name)))?;
    Ok(true)
  }

  /// Adds the reference edge `producer -> consumer` unless it exists.
  ///
  /// # Errors
  ///
  /// Returns an invariant violation if either step is missing.
  pub fn ensure_reference_edge(&mut self, producer: &str, consumer: &str) -> Result<bool, SplitError> {
    if self.pipeline.has_reference_edge(producer, consumer) {
      return Ok(false);
    }
    self
      .pipeline
      .add_reference_edge(ReferenceEdge::new(producer, consumer))
      .map_err(|e| SplitError::invariant(format!("{} in pipeline '{}'", e, self.pipeline.name)))?;
    Ok(true)
  }

  /// Attaches an endpoint the step sends rows to. Attaching the same endpoint twice is a no-op.
  pub fn attach_remote_output(&mut self, step: &str, endpoint: RemoteEndpoint) -> Result<(), SplitError> {
    let step = self.require_step_mut(step)?;
    if !step.remote_outputs.contains(&endpoint) {
      step.remote_outputs.push(endpoint);
    }
    Ok(())
  }

  /// Attaches an endpoint the step reads rows from. Attaching the same endpoint twice is a no-op.
  pub fn attach_remote_input(&mut self, step: &str, endpoint: RemoteEndpoint) -> Result<(), SplitError> {
    let step = self.require_step_mut(step)?;
    if !step.remote_inputs.contains(&endpoint) {
      step.remote_inputs.push(endpoint);
    }
    Ok(())
  }

  /// Registers a partition schema, replacing one with the same name.
  pub fn add_or_replace_partition_schema(&mut self, schema: PartitionSchema) {
    match self
      .pipeline
      .partition_schemas
      .iter_mut()
      .find(|s| s.name == schema.name)
    {
      Some(existing) => *existing = schema,
      None => self.pipeline.partition_schemas.push(schema),
    }
  }

  /// Attaches the run-wide partition distribution.
  pub fn set_distribution(&mut self, distribution: Arc<PartitionDistribution>) {
    self.pipeline.partition_distribution = Some(distribution);
  }

  /// The pipeline as built so far.
  pub fn pipeline(&self) -> &Pipeline {
    &self.pipeline
  }

  /// Finishes construction.
  pub fn build(self) -> Pipeline {
    self.pipeline
  }
}

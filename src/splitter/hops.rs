//! Handlers for primary hops, one per [`EdgeKind`].

use super::{EdgeKind, SplitContext};
use crate::channel::ChannelKey;
use crate::error::SplitError;
use crate::pipeline::Step;

impl SplitContext<'_, '_> {
  /// Places both ends of `upstream -> downstream` and wires the hop.
  pub(crate) fn split_hop(&mut self, upstream: &Step, downstream: &Step) -> Result<EdgeKind, SplitError> {
    let kind = EdgeKind::classify(upstream, downstream);
    match kind {
      EdgeKind::LocalToLocal => self.local_to_local(upstream, downstream)?,
      EdgeKind::FanIn => self.fan_in(upstream, downstream)?,
      EdgeKind::FanOut => self.fan_out(upstream, downstream)?,
      EdgeKind::WorkerLocal => self.worker_local(upstream, downstream)?,
      EdgeKind::Repartition => self.repartition(upstream, downstream)?,
    }
    Ok(kind)
  }

  fn local_to_local(&mut self, upstream: &Step, downstream: &Step) -> Result<(), SplitError> {
    self.ensure_coordinator_step(upstream);
    self.ensure_coordinator_step(downstream);
    self.coordinator.ensure_hop(&upstream.name, &downstream.name)?;
    Ok(())
  }

  fn fan_in(&mut self, upstream: &Step, downstream: &Step) -> Result<(), SplitError> {
    let upstream_copies = self.total_copies(upstream);
    if downstream.copies != 1 && downstream.copies != upstream_copies {
      return Err(SplitError::Cardinality {
        upstream: upstream.name.clone(),
        downstream: downstream.name.clone(),
        upstream_copies,
        downstream_copies: downstream.copies,
      });
    }

    self.ensure_coordinator_step(downstream);
    if let Some((config, schema)) = self.target_partitioning(upstream)? {
      self.coordinator.require_step_mut(&downstream.name)?.target_partitioning = Some(config);
      self.coordinator.add_or_replace_partition_schema(schema);
    }

    let coordinator = self.coordinator_server;
    for worker in self.worker_servers.clone() {
      self.ensure_worker_step(&worker.name, upstream)?;
      for source_copy in 0..self.effective_copies(&worker.name, upstream) {
        let target_copy = self.next_coordinator_copy(&upstream.name, &downstream.name, downstream.copies);
        let key = ChannelKey::new(
          worker.name.clone(),
          upstream.name.clone(),
          source_copy,
          coordinator.name.clone(),
          downstream.name.clone(),
          target_copy,
        );
        let endpoint = self.allocate(key, worker, coordinator)?;
        self
          .worker_builder(&worker.name)?
          .attach_remote_output(&upstream.name, endpoint.clone())?;
        self.coordinator.attach_remote_input(&downstream.name, endpoint)?;
      }
    }
    Ok(())
  }

  fn fan_out(&mut self, upstream: &Step, downstream: &Step) -> Result<(), SplitError> {
    let downstream_copies = self.total_copies(downstream);
    if upstream.copies != 1 && upstream.copies != downstream_copies {
      return Err(SplitError::Cardinality {
        upstream: upstream.name.clone(),
        downstream: downstream.name.clone(),
        upstream_copies: upstream.copies,
        downstream_copies,
      });
    }

    self.ensure_coordinator_step(upstream);
    if let Some((config, schema)) = self.target_partitioning(downstream)? {
      self.coordinator.require_step_mut(&upstream.name)?.target_partitioning = Some(config);
      self.coordinator.add_or_replace_partition_schema(schema);
    }

    let coordinator = self.coordinator_server;
    for worker in self.worker_servers.clone() {
      self.ensure_worker_step(&worker.name, downstream)?;
      for target_copy in 0..self.effective_copies(&worker.name, downstream) {
        let source_copy = self.next_coordinator_copy(&upstream.name, &downstream.name, upstream.copies);
        let key = ChannelKey::new(
          coordinator.name.clone(),
          upstream.name.clone(),
          source_copy,
          worker.name.clone(),
          downstream.name.clone(),
          target_copy,
        );
        let endpoint = self.allocate(key, coordinator, worker)?;
        self.coordinator.attach_remote_output(&upstream.name, endpoint.clone())?;
        self
          .worker_builder(&worker.name)?
          .attach_remote_input(&downstream.name, endpoint)?;
      }
    }
    Ok(())
  }

  fn worker_local(&mut self, upstream: &Step, downstream: &Step) -> Result<(), SplitError> {
    for worker in self.worker_servers.clone() {
      self.ensure_worker_step(&worker.name, upstream)?;
      self.ensure_worker_step(&worker.name, downstream)?;
      self
        .worker_builder(&worker.name)?
        .ensure_hop(&upstream.name, &downstream.name)?;
    }
    Ok(())
  }

  fn repartition(&mut self, upstream: &Step, downstream: &Step) -> Result<(), SplitError> {
    let target = self.target_partitioning(downstream)?;
    for worker in self.worker_servers.clone() {
      self.ensure_worker_step(&worker.name, upstream)?;
      self.ensure_worker_step(&worker.name, downstream)?;
      let builder = self.worker_builder(&worker.name)?;
      builder.ensure_hop(&upstream.name, &downstream.name)?;
      if let Some((config, schema)) = &target {
        builder.require_step_mut(&upstream.name)?.target_partitioning = Some(config.clone());
        builder.add_or_replace_partition_schema(schema.clone());
      }
    }

    // Rows a copy keeps for its own worker travel over the local hop above;
    // every other worker gets a channel per (source copy, target copy).
    let workers = self.worker_servers.clone();
    for &here in &workers {
      for &other in workers.iter().filter(|w| w.name != here.name) {
        for source_copy in 0..self.effective_copies(&here.name, upstream) {
          for target_copy in 0..self.effective_copies(&other.name, downstream) {
            let key = ChannelKey::new(
              here.name.clone(),
              upstream.name.clone(),
              source_copy,
              other.name.clone(),
              downstream.name.clone(),
              target_copy,
            );
            let endpoint = self.allocate(key, here, other)?;
            self
              .worker_builder(&here.name)?
              .attach_remote_output(&upstream.name, endpoint)?;
          }
        }
        for source_copy in 0..self.effective_copies(&other.name, upstream) {
          for target_copy in 0..self.effective_copies(&here.name, downstream) {
            let key = ChannelKey::new(
              other.name.clone(),
              upstream.name.clone(),
              source_copy,
              here.name.clone(),
              downstream.name.clone(),
              target_copy,
            );
            let endpoint = self.allocate(key, other, here)?;
            self
              .worker_builder(&here.name)?
              .attach_remote_input(&downstream.name, endpoint)?;
          }
        }
      }
    }
    Ok(())
  }
}

//! Handlers for reference (lookup) edges.
//!
//! A consumer reads its lookup data from a producer step. When the two run in
//! different processes the lookup stream is shipped through a generated
//! socket writer / socket reader pair named after the reserved port.

use super::{EdgeKind, SplitContext};
use crate::channel::{ChannelKey, RemoteEndpoint};
use crate::error::SplitError;
use crate::pipeline::{Step, StepKind};

fn writer_step(endpoint: &RemoteEndpoint) -> Step {
  let mut step = Step::with_kind(
    format!("Writer : {}", endpoint.port),
    StepKind::SocketWriter(endpoint.clone()),
  );
  step.remote_outputs.push(endpoint.clone());
  step
}

fn reader_step(endpoint: &RemoteEndpoint) -> Step {
  let mut step = Step::with_kind(
    format!("Reader : {}", endpoint.port),
    StepKind::SocketReader(endpoint.clone()),
  );
  step.remote_inputs.push(endpoint.clone());
  step
}

impl SplitContext<'_, '_> {
  /// Places both ends of the reference edge `producer -> consumer`.
  pub(crate) fn split_reference(&mut self, producer: &Step, consumer: &Step) -> Result<EdgeKind, SplitError> {
    match (producer.is_clustered(), consumer.is_clustered()) {
      (false, false) => {
        self.ensure_coordinator_step(producer);
        self.ensure_coordinator_step(consumer);
        self.coordinator.ensure_reference_edge(&producer.name, &consumer.name)?;
        Ok(EdgeKind::LocalToLocal)
      }
      (true, false) => {
        self.reference_fan_in(producer, consumer)?;
        Ok(EdgeKind::FanIn)
      }
      (false, true) => {
        self.reference_fan_out(producer, consumer)?;
        Ok(EdgeKind::FanOut)
      }
      (true, true) => {
        for worker in self.worker_servers.clone() {
          self.ensure_worker_step(&worker.name, producer)?;
          self.ensure_worker_step(&worker.name, consumer)?;
          self
            .worker_builder(&worker.name)?
            .ensure_reference_edge(&producer.name, &consumer.name)?;
        }
        Ok(EdgeKind::WorkerLocal)
      }
    }
  }

  /// Clustered producer, coordinator consumer: every worker ships its lookup
  /// rows to the coordinator, where a merge step named after the producer
  /// stands in for it.
  fn reference_fan_in(&mut self, producer: &Step, consumer: &Step) -> Result<(), SplitError> {
    self.ensure_coordinator_step(consumer);
    self
      .coordinator
      .ensure_step_with(&producer.name, || Step::with_kind(producer.name.clone(), StepKind::Merge));
    self.coordinator.ensure_reference_edge(&producer.name, &consumer.name)?;

    let coordinator = self.coordinator_server;
    for worker in self.worker_servers.clone() {
      self.ensure_worker_step(&worker.name, producer)?;
      let key = ChannelKey::new(
        worker.name.clone(),
        producer.name.clone(),
        0,
        coordinator.name.clone(),
        consumer.name.clone(),
        0,
      )
      .for_reference();
      let endpoint = self.allocate(key, worker, coordinator)?;

      let builder = self.worker_builder(&worker.name)?;
      let writer = builder.insert_generated_step(writer_step(&endpoint), &worker.name);
      builder.ensure_hop(&producer.name, &writer)?;

      let reader = self
        .coordinator
        .insert_generated_step(reader_step(&endpoint), &worker.name);
      self.coordinator.ensure_hop(&reader, &producer.name)?;
    }
    Ok(())
  }

  /// Coordinator producer, clustered consumer: the coordinator ships the
  /// lookup rows to every worker, where a socket reader replaces the producer.
  fn reference_fan_out(&mut self, producer: &Step, consumer: &Step) -> Result<(), SplitError> {
    self.ensure_coordinator_step(producer);

    let coordinator = self.coordinator_server;
    for worker in self.worker_servers.clone() {
      self.ensure_worker_step(&worker.name, consumer)?;
      let key = ChannelKey::new(
        coordinator.name.clone(),
        producer.name.clone(),
        0,
        worker.name.clone(),
        consumer.name.clone(),
        0,
      )
      .for_reference();
      let endpoint = self.allocate(key, coordinator, worker)?;

      let writer = self
        .coordinator
        .insert_generated_step(writer_step(&endpoint), &worker.name);
      self.coordinator.ensure_hop(&producer.name, &writer)?;

      let builder = self.worker_builder(&worker.name)?;
      let reader = builder.insert_generated_step(reader_step(&endpoint), &coordinator.name);
      builder.ensure_reference_edge(&reader, &consumer.name)?;
    }
    Ok(())
  }
}

//! # Cluster Configuration Validator
//!
//! Pre-flight checks run before any splitting work. A pipeline can be split
//! only if its clustered steps all reference one resolved topology with
//! exactly one coordinator and at least one worker. The checks fail fast on the
//! first problem found; nothing is repaired.
//!
//! On success the run-wide socket settings are resolved against the
//! [`SplitterConfig`] defaults and returned as [`ClusterSettings`].

use crate::cluster::ClusterTopology;
use crate::config::SplitterConfig;
use crate::error::ConfigurationError;
use crate::pipeline::Pipeline;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Settings of the single topology a pipeline is split over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterSettings<'a> {
  /// The topology referenced by every clustered step.
  pub topology: &'a ClusterTopology,
  /// Resolved socket buffer size, always greater than zero.
  pub socket_buffer_size: usize,
  /// Whether remote streams are compressed.
  pub compressed: bool,
  /// Resolved base port for reservations.
  pub base_port: u16,
}

/// Validates the cluster configuration of a logical pipeline.
///
/// # Errors
///
/// Returns the first [`ConfigurationError`] found.
pub fn validate_cluster_configuration<'a>(
  pipeline: &'a Pipeline,
  config: &SplitterConfig,
) -> Result<ClusterSettings<'a>, ConfigurationError> {
  check_graph(pipeline)?;

  // cluster name -> first step referencing it
  let mut referenced: BTreeMap<&str, &str> = BTreeMap::new();
  for step in &pipeline.steps {
    if let Some(cluster) = step.cluster.as_deref() {
      referenced.entry(cluster).or_insert(step.name.as_str());
    }
  }

  if referenced.len() > 1 {
    return Err(ConfigurationError::MultipleClusters {
      names: referenced.keys().map(|name| name.to_string()).collect(),
    });
  }
  let Some((&cluster_name, &first_step)) = referenced.iter().next() else {
    return Err(ConfigurationError::NoClusterInUse {
      pipeline: pipeline.name.clone(),
    });
  };

  let topology =
    pipeline
      .find_cluster(cluster_name)
      .ok_or_else(|| ConfigurationError::UnknownCluster {
        step: first_step.to_string(),
        cluster: cluster_name.to_string(),
      })?;
  check_topology(topology)?;

  let socket_buffer_size = topology
    .socket_buffer_size
    .unwrap_or(config.default_socket_buffer_size);
  if socket_buffer_size == 0 {
    return Err(ConfigurationError::InvalidBufferSize {
      cluster: topology.name.clone(),
    });
  }

  let settings = ClusterSettings {
    topology,
    socket_buffer_size,
    compressed: topology.compressed,
    base_port: topology.base_port.unwrap_or(config.default_base_port),
  };
  debug!(
    cluster = %topology.name,
    workers = topology.worker_count(),
    buffer_size = settings.socket_buffer_size,
    compressed = settings.compressed,
    base_port = settings.base_port,
    "cluster configuration validated"
  );
  Ok(settings)
}

fn check_graph(pipeline: &Pipeline) -> Result<(), ConfigurationError> {
  if let Some(step) = pipeline.steps.iter().find(|s| s.copies == 0) {
    return Err(ConfigurationError::InvalidCopies {
      step: step.name.clone(),
    });
  }
  for hop in &pipeline.hops {
    for name in [&hop.from, &hop.to] {
      if pipeline.find_step(name).is_none() {
        return Err(ConfigurationError::UnknownStep {
          edge: format!("hop '{}' -> '{}'", hop.from, hop.to),
          step: name.clone(),
        });
      }
    }
  }
  for edge in &pipeline.reference_edges {
    for name in [&edge.producer, &edge.consumer] {
      if pipeline.find_step(name).is_none() {
        return Err(ConfigurationError::UnknownStep {
          edge: format!("reference edge '{}' -> '{}'", edge.producer, edge.consumer),
          step: name.clone(),
        });
      }
    }
  }
  Ok(())
}

fn check_topology(topology: &ClusterTopology) -> Result<(), ConfigurationError> {
  if topology.dynamic {
    return Err(ConfigurationError::UnresolvedTopology {
      cluster: topology.name.clone(),
    });
  }

  let mut names = BTreeSet::new();
  for server in &topology.servers {
    if !names.insert(server.name.as_str()) {
      return Err(ConfigurationError::DuplicateServer {
        cluster: topology.name.clone(),
        server: server.name.clone(),
      });
    }
  }

  let coordinators: Vec<String> = topology
    .servers
    .iter()
    .filter(|s| s.coordinator)
    .map(|s| s.name.clone())
    .collect();
  match coordinators.len() {
    0 => {
      return Err(ConfigurationError::MissingCoordinator {
        cluster: topology.name.clone(),
      });
    }
    1 => {}
    _ => {
      return Err(ConfigurationError::MultipleCoordinators {
        cluster: topology.name.clone(),
        servers: coordinators,
      });
    }
  }

  if topology.worker_count() == 0 {
    return Err(ConfigurationError::NoWorkers {
      cluster: topology.name.clone(),
    });
  }
  Ok(())
}

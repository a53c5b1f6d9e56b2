//! Cluster topology: one coordinator plus an ordered list of workers.
//!
//! The coordinator owns cross-worker aggregation points and hands out network
//! ports; workers run the clustered part of a pipeline. Topologies are
//! referenced from steps by name, and server identity is the server name.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One server of a cluster topology.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterServer {
  /// Unique name of the server within its topology.
  pub name: String,
  /// Host the server's sockets are bound on.
  pub hostname: String,
  /// Control port of the server (port reservation requests go here on the coordinator).
  pub port: u16,
  /// True for the coordinator.
  #[serde(default)]
  pub coordinator: bool,
}

impl ClusterServer {
  /// Creates a worker server.
  pub fn worker(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
    Self {
      name: name.into(),
      hostname: hostname.into(),
      port,
      coordinator: false,
    }
  }

  /// Creates the coordinator server.
  pub fn coordinator(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
    Self {
      name: name.into(),
      hostname: hostname.into(),
      port,
      coordinator: true,
    }
  }
}

/// A cluster: the coordinator, the workers, and run-wide socket settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
  /// Topology name, referenced by clustered steps.
  pub name: String,
  /// All servers, coordinator included, in declaration order.
  pub servers: Vec<ClusterServer>,
  /// Socket buffer size for remote channels; `None` uses the configured default.
  #[serde(default)]
  pub socket_buffer_size: Option<usize>,
  /// Whether remote channels compress their streams.
  #[serde(default)]
  pub compressed: bool,
  /// First port tried when reserving channel ports; `None` uses the configured default.
  #[serde(default)]
  pub base_port: Option<u16>,
  /// True while the worker list is still discovered at runtime.
  #[serde(default)]
  pub dynamic: bool,
  /// Partitions-per-worker overrides for dynamic partition schemas, by schema name.
  #[serde(default)]
  pub partition_hints: BTreeMap<String, usize>,
}

impl ClusterTopology {
  /// Creates a resolved topology from its servers.
  pub fn new(name: impl Into<String>, servers: Vec<ClusterServer>) -> Self {
    Self {
      name: name.into(),
      servers,
      socket_buffer_size: None,
      compressed: false,
      base_port: None,
      dynamic: false,
      partition_hints: BTreeMap::new(),
    }
  }

  /// Sets the socket buffer size.
  pub fn with_socket_buffer_size(mut self, size: usize) -> Self {
    self.socket_buffer_size = Some(size);
    self
  }

  /// Enables or disables stream compression.
  pub fn with_compression(mut self, compressed: bool) -> Self {
    self.compressed = compressed;
    self
  }

  /// Sets the base port hint.
  pub fn with_base_port(mut self, port: u16) -> Self {
    self.base_port = Some(port);
    self
  }

  /// Sets the partitions-per-worker hint for a dynamic schema.
  pub fn with_partition_hint(mut self, schema: impl Into<String>, per_worker: usize) -> Self {
    self.partition_hints.insert(schema.into(), per_worker);
    self
  }

  /// Returns the coordinator, if one is declared.
  pub fn coordinator(&self) -> Option<&ClusterServer> {
    self.servers.iter().find(|s| s.coordinator)
  }

  /// Returns the workers in declaration order, skipping the coordinator.
  pub fn workers(&self) -> impl Iterator<Item = &ClusterServer> {
    self.servers.iter().filter(|s| !s.coordinator)
  }

  /// Number of workers.
  pub fn worker_count(&self) -> usize {
    self.workers().count()
  }

  /// Partitions-per-worker hint for a schema.
  pub fn partition_hint(&self, schema: &str) -> Option<usize> {
    self.partition_hints.get(schema).copied()
  }
}

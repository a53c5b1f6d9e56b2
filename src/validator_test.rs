//! # Validator Test Suite
//!
//! One test per pre-flight rejection, plus settings resolution against the
//! configured defaults.

use crate::cluster::{ClusterServer, ClusterTopology};
use crate::config::SplitterConfig;
use crate::error::ConfigurationError;
use crate::pipeline::{Hop, Pipeline, ReferenceEdge, Step};
use crate::test_support::{CLUSTER, pipeline, topology};
use crate::validator::validate_cluster_configuration;

fn clustered(name: &str) -> Step {
  Step::new(name, "plugin").clustered(CLUSTER)
}

fn validate(p: &Pipeline) -> Result<(), ConfigurationError> {
  validate_cluster_configuration(p, &SplitterConfig::default()).map(|_| ())
}

#[test]
fn test_resolves_defaults() {
  let p = pipeline(topology(2), vec![clustered("a")], &[], &[]);
  let settings = validate_cluster_configuration(&p, &SplitterConfig::default()).unwrap();
  assert_eq!(settings.topology.name, CLUSTER);
  assert_eq!(settings.socket_buffer_size, 50_000);
  assert_eq!(settings.base_port, 40_000);
  assert!(!settings.compressed);
}

#[test]
fn test_topology_overrides_defaults() {
  let t = topology(1)
    .with_socket_buffer_size(8_192)
    .with_base_port(41_000)
    .with_compression(true);
  let p = pipeline(t, vec![clustered("a")], &[], &[]);
  let settings = validate_cluster_configuration(&p, &SplitterConfig::default()).unwrap();
  assert_eq!(settings.socket_buffer_size, 8_192);
  assert_eq!(settings.base_port, 41_000);
  assert!(settings.compressed);
}

#[test]
fn test_no_cluster_in_use() {
  let p = pipeline(topology(2), vec![Step::new("a", "plugin")], &[], &[]);
  assert_eq!(
    validate(&p),
    Err(ConfigurationError::NoClusterInUse {
      pipeline: "orders".to_string()
    })
  );
}

#[test]
fn test_two_topologies_are_rejected() {
  let mut p = pipeline(
    topology(2),
    vec![clustered("a"), Step::new("b", "plugin").clustered("other")],
    &[("a", "b")],
    &[],
  );
  p.add_cluster(ClusterTopology::new(
    "other",
    vec![
      ClusterServer::coordinator("coord", "h0", 1),
      ClusterServer::worker("w9", "h9", 1),
    ],
  ));
  assert_eq!(
    validate(&p),
    Err(ConfigurationError::MultipleClusters {
      names: vec![CLUSTER.to_string(), "other".to_string()]
    })
  );
}

#[test]
fn test_unknown_cluster() {
  let p = pipeline(topology(2), vec![Step::new("a", "plugin").clustered("nope")], &[], &[]);
  assert_eq!(
    validate(&p),
    Err(ConfigurationError::UnknownCluster {
      step: "a".to_string(),
      cluster: "nope".to_string()
    })
  );
}

#[test]
fn test_dynamic_topology_must_be_resolved() {
  let mut t = topology(2);
  t.dynamic = true;
  let p = pipeline(t, vec![clustered("a")], &[], &[]);
  assert!(matches!(validate(&p), Err(ConfigurationError::UnresolvedTopology { .. })));
}

#[test]
fn test_missing_coordinator() {
  let t = ClusterTopology::new(CLUSTER, vec![ClusterServer::worker("w1", "h1", 1)]);
  let p = pipeline(t, vec![clustered("a")], &[], &[]);
  assert!(matches!(validate(&p), Err(ConfigurationError::MissingCoordinator { .. })));
}

#[test]
fn test_multiple_coordinators() {
  let mut t = topology(1);
  t.servers.push(ClusterServer::coordinator("coord2", "h", 1));
  let p = pipeline(t, vec![clustered("a")], &[], &[]);
  assert_eq!(
    validate(&p),
    Err(ConfigurationError::MultipleCoordinators {
      cluster: CLUSTER.to_string(),
      servers: vec!["coord".to_string(), "coord2".to_string()]
    })
  );
}

#[test]
fn test_no_workers() {
  let p = pipeline(topology(0), vec![clustered("a")], &[], &[]);
  assert!(matches!(validate(&p), Err(ConfigurationError::NoWorkers { .. })));
}

#[test]
fn test_duplicate_server() {
  let mut t = topology(1);
  t.servers.push(ClusterServer::worker("w1", "h", 1));
  let p = pipeline(t, vec![clustered("a")], &[], &[]);
  assert!(matches!(
    validate(&p),
    Err(ConfigurationError::DuplicateServer { ref server, .. }) if server == "w1"
  ));
}

#[test]
fn test_zero_copies() {
  let p = pipeline(topology(1), vec![clustered("a").copies(0)], &[], &[]);
  assert!(matches!(validate(&p), Err(ConfigurationError::InvalidCopies { .. })));
}

#[test]
fn test_unknown_step_in_edges() {
  let mut p = pipeline(topology(1), vec![clustered("a")], &[], &[]);
  p.hops.push(Hop::new("a", "ghost"));
  assert!(matches!(
    validate(&p),
    Err(ConfigurationError::UnknownStep { ref step, .. }) if step == "ghost"
  ));

  let mut p = pipeline(topology(1), vec![clustered("a")], &[], &[]);
  p.reference_edges.push(ReferenceEdge::new("ghost", "a"));
  assert!(matches!(validate(&p), Err(ConfigurationError::UnknownStep { .. })));
}

#[test]
fn test_zero_buffer_size() {
  let p = pipeline(topology(1).with_socket_buffer_size(0), vec![clustered("a")], &[], &[]);
  assert!(matches!(validate(&p), Err(ConfigurationError::InvalidBufferSize { .. })));
}

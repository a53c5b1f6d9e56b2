//! Tests for the pipeline model.

use crate::cluster::{ClusterServer, ClusterTopology};
use crate::pipeline::{Hop, Pipeline, PipelineRole, ReferenceEdge, Step, StepKind};

fn sample() -> Pipeline {
  let mut p = Pipeline::new("orders");
  p.add_step(Step::new("read", "csv_input")).unwrap();
  p.add_step(Step::new("lookup", "db_lookup")).unwrap();
  p.add_step(Step::new("join", "stream_lookup").copies(2)).unwrap();
  p.add_hop(Hop::new("read", "join")).unwrap();
  p.add_hop(Hop::disabled("lookup", "join")).unwrap();
  p.add_reference_edge(ReferenceEdge::new("lookup", "join")).unwrap();
  p
}

#[test]
fn test_duplicate_step_is_rejected() {
  let mut p = sample();
  assert!(p.add_step(Step::new("read", "other")).is_err());
  assert_eq!(p.steps.len(), 3);
}

#[test]
fn test_edges_need_existing_steps() {
  let mut p = sample();
  assert!(p.add_hop(Hop::new("read", "missing")).is_err());
  assert!(p.add_reference_edge(ReferenceEdge::new("missing", "join")).is_err());
}

#[test]
fn test_previous_steps_skip_disabled_hops() {
  let p = sample();
  let previous: Vec<&str> = p.previous_steps("join").iter().map(|s| s.name.as_str()).collect();
  assert_eq!(previous, ["read"]);
  assert!(p.previous_steps("read").is_empty());
}

#[test]
fn test_reference_sources() {
  let p = sample();
  let sources: Vec<&str> = p.reference_sources("join").iter().map(|s| s.name.as_str()).collect();
  assert_eq!(sources, ["lookup"]);
  assert!(p.has_reference_edge("lookup", "join"));
  assert!(!p.has_reference_edge("join", "lookup"));
}

#[test]
fn test_add_cluster_replaces_by_name() {
  let mut p = Pipeline::new("p");
  p.add_cluster(ClusterTopology::new("c", vec![]));
  p.add_cluster(ClusterTopology::new(
    "c",
    vec![ClusterServer::coordinator("coord", "h", 1)],
  ));
  assert_eq!(p.clusters.len(), 1);
  assert!(p.find_cluster("c").and_then(|c| c.coordinator()).is_some());
}

#[test]
fn test_step_builders() {
  let step = Step::new("s", "plugin").copies(3).clustered("c");
  assert_eq!(step.copies, 3);
  assert!(step.is_clustered());
  assert!(!step.is_partitioned());
  assert_eq!(
    step.kind,
    StepKind::Plugin {
      type_id: "plugin".to_string()
    }
  );
}

#[test]
fn test_json_defaults() {
  let p: Pipeline = serde_json::from_str(
    r#"{
      "name": "orders",
      "steps": [{"name": "read", "kind": {"plugin": {"type_id": "csv_input"}}, "copies": 1}],
      "hops": [{"from": "read", "to": "read"}]
    }"#,
  )
  .unwrap();
  assert_eq!(p.role, PipelineRole::Logical);
  assert!(p.hops[0].enabled);
  assert!(p.steps[0].cluster.is_none());
  assert!(p.partition_distribution.is_none());
}

//! Fixtures shared by the unit test suites.

use crate::cluster::{ClusterServer, ClusterTopology};
use crate::partitioning::{PartitionMethod, PartitionSchema, PartitioningConfig};
use crate::pipeline::{Hop, Pipeline, ReferenceEdge, Step};

pub(crate) const CLUSTER: &str = "cluster";

/// Installs a test-writer subscriber once per test binary.
pub(crate) fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_test_writer()
    .with_max_level(tracing::Level::DEBUG)
    .try_init();
}

/// A topology with coordinator `coord` and workers `w1..=wN`.
pub(crate) fn topology(workers: usize) -> ClusterTopology {
  let mut servers = vec![ClusterServer::coordinator("coord", "10.0.0.1", 8080)];
  for n in 1..=workers {
    servers.push(ClusterServer::worker(
      format!("w{}", n),
      format!("10.0.0.{}", n + 1),
      8081,
    ));
  }
  ClusterTopology::new(CLUSTER, servers)
}

pub(crate) fn modulo(schema: PartitionSchema) -> PartitioningConfig {
  PartitioningConfig::new(PartitionMethod::modulo("id"), schema)
}

pub(crate) fn explicit(name: &str, ids: &[&str]) -> PartitionSchema {
  PartitionSchema::explicit(name, ids.iter().copied())
}

/// Builds a pipeline on `topology` from steps, hops and reference edges.
pub(crate) fn pipeline(
  topology: ClusterTopology,
  steps: Vec<Step>,
  hops: &[(&str, &str)],
  references: &[(&str, &str)],
) -> Pipeline {
  let mut pipeline = Pipeline::new("orders");
  pipeline.add_cluster(topology);
  for step in steps {
    pipeline.add_step(step).unwrap();
  }
  for (from, to) in hops {
    pipeline.add_hop(Hop::new(*from, *to)).unwrap();
  }
  for (producer, consumer) in references {
    pipeline
      .add_reference_edge(ReferenceEdge::new(*producer, *consumer))
      .unwrap();
  }
  pipeline
}

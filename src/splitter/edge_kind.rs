//! Classification of an edge by where its two ends run.

use crate::pipeline::Step;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an edge crosses (or does not cross) process boundaries.
///
/// Computed once per edge from the two steps' cluster and partition settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
  /// Neither end is clustered; both run on the coordinator.
  LocalToLocal,
  /// Clustered upstream feeding a coordinator downstream.
  FanIn,
  /// Coordinator upstream feeding a clustered downstream.
  FanOut,
  /// Both ends clustered and rows stay on the worker that produced them.
  WorkerLocal,
  /// Both ends clustered and rows are routed to the worker owning their partition.
  Repartition,
}

impl EdgeKind {
  /// Classifies the edge `upstream -> downstream`.
  ///
  /// Between two clustered steps rows must be re-partitioned when the
  /// downstream is partitioned and the upstream is not, or partitions
  /// differently. A partitioned upstream feeding an unpartitioned downstream
  /// stays worker-local.
  pub fn classify(upstream: &Step, downstream: &Step) -> Self {
    match (upstream.is_clustered(), downstream.is_clustered()) {
      (false, false) => EdgeKind::LocalToLocal,
      (true, false) => EdgeKind::FanIn,
      (false, true) => EdgeKind::FanOut,
      (true, true) => {
        let repartition = downstream.is_partitioned()
          && (!upstream.is_partitioned() || upstream.partitioning != downstream.partitioning);
        if repartition {
          EdgeKind::Repartition
        } else {
          EdgeKind::WorkerLocal
        }
      }
    }
  }

  /// Returns true if the edge needs remote endpoints.
  pub fn crosses_processes(self) -> bool {
    !matches!(self, EdgeKind::LocalToLocal | EdgeKind::WorkerLocal)
  }
}

impl fmt::Display for EdgeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      EdgeKind::LocalToLocal => "local-to-local",
      EdgeKind::FanIn => "fan-in",
      EdgeKind::FanOut => "fan-out",
      EdgeKind::WorkerLocal => "worker-local",
      EdgeKind::Repartition => "repartition",
    };
    f.write_str(name)
  }
}

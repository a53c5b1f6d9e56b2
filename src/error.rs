//! # Error Handling
//!
//! Error types for the topology split. Every error aborts the whole split:
//! a half-built topology cannot safely execute, so there is no best-effort
//! mode and no partially-valid [`SplitResult`](crate::splitter::SplitResult).
//!
//! ## Error Types
//!
//! - **ConfigurationError**: the cluster or partition setup cannot be split
//!   (no/multiple topologies, missing coordinator, zero workers, partition
//!   shortfall, ...). Fatal, never retried.
//! - **SplitError::Cardinality**: a step's copy count conflicts with the copy
//!   count implied by the other end of a hop.
//! - **AllocationError**: a port reservation failed after all retries.
//! - **SplitError::InternalInvariant**: a plan or distribution lookup missed a
//!   key the planner should have populated. Always a defect.
//!
//! All variants carry the schema, step, worker and copy indices involved so a
//! failed split can be diagnosed from the message alone.

use crate::channel::ChannelKey;
use thiserror::Error;

/// Top-level error returned by [`TopologySplitter::split`](crate::splitter::TopologySplitter::split).
#[derive(Debug, Error)]
pub enum SplitError {
  /// The pipeline or its cluster topology cannot be split.
  #[error("configuration error: {0}")]
  Configuration(#[from] ConfigurationError),

  /// A step's copy count conflicts with the copies on the other side of a hop.
  #[error(
    "step '{downstream}' runs {downstream_copies} copies but is fed by '{upstream}' with {upstream_copies} copies; \
     copy counts must be 1 or equal across the cluster boundary"
  )]
  Cardinality {
    /// Name of the upstream step.
    upstream: String,
    /// Name of the downstream step.
    downstream: String,
    /// Copies of the upstream step (summed across workers when clustered).
    upstream_copies: usize,
    /// Copies of the downstream step (summed across workers when clustered).
    downstream_copies: usize,
  },

  /// A remote channel could not be wired.
  #[error(transparent)]
  Allocation(#[from] AllocationError),

  /// A lookup the planner guarantees missed. Indicates a defect.
  #[error("internal invariant violated: {context}")]
  InternalInvariant {
    /// What was looked up and where.
    context: String,
  },
}

impl SplitError {
  /// Builds an [`SplitError::InternalInvariant`] from any displayable context.
  pub fn invariant(context: impl Into<String>) -> Self {
    SplitError::InternalInvariant {
      context: context.into(),
    }
  }

  /// Returns true if this error came from the configuration pre-flight.
  pub fn is_configuration(&self) -> bool {
    matches!(self, SplitError::Configuration(_))
  }
}

/// Pre-flight failures of the cluster and partition configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
  /// No step of the pipeline is clustered.
  #[error("no clustering is used in pipeline '{pipeline}'; there is nothing to split")]
  NoClusterInUse {
    /// Pipeline name.
    pipeline: String,
  },

  /// Steps reference more than one cluster topology.
  #[error("multiple cluster topologies in one pipeline are not supported: {}", .names.join(", "))]
  MultipleClusters {
    /// The distinct topology names referenced, sorted.
    names: Vec<String>,
  },

  /// A step references a topology the pipeline does not define.
  #[error("step '{step}' references unknown cluster topology '{cluster}'")]
  UnknownCluster {
    /// Referencing step.
    step: String,
    /// Missing topology name.
    cluster: String,
  },

  /// The topology is still dynamic and must be resolved before splitting.
  #[error("cluster topology '{cluster}' is dynamic and has not been resolved to a fixed server list")]
  UnresolvedTopology {
    /// Topology name.
    cluster: String,
  },

  /// The topology has no coordinator server.
  #[error("no coordinator server is defined in cluster topology '{cluster}'")]
  MissingCoordinator {
    /// Topology name.
    cluster: String,
  },

  /// The topology declares more than one coordinator.
  #[error("cluster topology '{cluster}' declares more than one coordinator: {}", .servers.join(", "))]
  MultipleCoordinators {
    /// Topology name.
    cluster: String,
    /// Names of the servers flagged as coordinator.
    servers: Vec<String>,
  },

  /// The topology has no worker besides the coordinator.
  #[error("at least one worker server is required in cluster topology '{cluster}'")]
  NoWorkers {
    /// Topology name.
    cluster: String,
  },

  /// Two servers in the topology share a name.
  #[error("server name '{server}' is used more than once in cluster topology '{cluster}'")]
  DuplicateServer {
    /// Topology name.
    cluster: String,
    /// Duplicated server name.
    server: String,
  },

  /// A hop or reference edge names a step that does not exist.
  #[error("{edge} references unknown step '{step}'")]
  UnknownStep {
    /// Description of the offending edge.
    edge: String,
    /// Missing step name.
    step: String,
  },

  /// A step declares zero copies.
  #[error("step '{step}' must run at least one copy")]
  InvalidCopies {
    /// Step name.
    step: String,
  },

  /// The resolved socket buffer size is zero.
  #[error("socket buffer size for cluster topology '{cluster}' must be greater than zero")]
  InvalidBufferSize {
    /// Topology name.
    cluster: String,
  },

  /// Two different partition schemas share a name.
  #[error("partition schema '{schema}' is defined differently by steps '{first}' and '{second}'")]
  ConflictingSchema {
    /// Schema name.
    schema: String,
    /// First step using the name.
    first: String,
    /// Second step using the name with another definition.
    second: String,
  },

  /// A clustered, partitioned step has fewer partitions than there are workers.
  #[error(
    "partition schema '{schema}' has {partitions} partitions but the cluster has {workers} workers; \
     a partitioned clustered step needs at least one partition per worker"
  )]
  PartitionShortfall {
    /// Schema name.
    schema: String,
    /// Number of partitions after expansion.
    partitions: usize,
    /// Number of workers.
    workers: usize,
  },

  /// Expanding a dynamic schema would overflow the partition count.
  #[error(
    "partition schema '{schema}' cannot expand to {per_worker} partitions per worker over {workers} workers"
  )]
  PartitionCountOverflow {
    /// Schema name.
    schema: String,
    /// Requested partitions per worker.
    per_worker: usize,
    /// Number of workers.
    workers: usize,
  },
}

/// A remote channel could not get a port.
#[derive(Debug, Error)]
#[error("unable to reserve a port for {key} after {attempts} attempt(s): {source}")]
pub struct AllocationError {
  /// The path that could not be wired.
  pub key: ChannelKey,
  /// Number of reservation attempts made.
  pub attempts: u32,
  /// The last reservation failure.
  #[source]
  pub source: ReservationError,
}

/// Failure of a single port reservation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
  /// The coordinator is temporarily unable to serve the request.
  #[error("coordinator unavailable: {0}")]
  Unavailable(String),

  /// The request could not be delivered.
  #[error("transport error: {0}")]
  Transport(String),

  /// The request timed out.
  #[error("reservation timed out after {0} ms")]
  Timeout(u64),

  /// The coordinator refused the request.
  #[error("reservation rejected: {0}")]
  Rejected(String),

  /// The coordinator answered with something that is not a port.
  #[error("invalid reservation response: {0}")]
  InvalidResponse(String),
}

impl ReservationError {
  /// Returns true if the same request may succeed when retried.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      ReservationError::Unavailable(_) | ReservationError::Transport(_) | ReservationError::Timeout(_)
    )
  }
}

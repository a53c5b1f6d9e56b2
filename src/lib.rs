//! # weave-split
//!
//! Splits one logical data pipeline into the pipelines that run it across a
//! cluster: one for the coordinator and one per worker, plus the network
//! wiring and the partition assignment that tie them together.
//!
//! ## Key Features
//!
//! - **Pre-flight validation**: a pipeline is only split over a single,
//!   resolved topology with one coordinator and at least one worker
//! - **Deterministic partition planning**: partitions are dealt to workers
//!   round-robin, so the same input always yields the same assignment
//! - **Edge classification**: every hop is handled as local, fan-in, fan-out,
//!   worker-local or re-partitioning
//! - **Memoized channel allocation**: one reserved port per cross-process path,
//!   with bounded retries of transient reservation failures
//!
//! ## Quick Start
//!
//! ```rust
//! use weave_split::cluster::{ClusterServer, ClusterTopology};
//! use weave_split::config::SplitterConfig;
//! use weave_split::pipeline::{Hop, Pipeline, Step};
//! use weave_split::reservation::InMemoryPortReserver;
//! use weave_split::splitter::TopologySplitter;
//!
//! let mut pipeline = Pipeline::new("daily_load");
//! pipeline.add_cluster(ClusterTopology::new(
//!   "cluster",
//!   vec![
//!     ClusterServer::coordinator("coord", "10.0.0.1", 8080),
//!     ClusterServer::worker("w1", "10.0.0.2", 8081),
//!   ],
//! ));
//! pipeline.add_step(Step::new("read", "csv_input").clustered("cluster"))?;
//! pipeline.add_step(Step::new("store", "table_output"))?;
//! pipeline.add_hop(Hop::new("read", "store"))?;
//!
//! let result = TopologySplitter::new(&pipeline, SplitterConfig::default())
//!   .split(&InMemoryPortReserver::new())
//!   .map_err(|e| e.to_string())?;
//! assert!(result.worker("w1").is_some());
//! # Ok::<(), String>(())
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Remote endpoints and the memoizing channel allocator.
pub mod channel;
/// Cluster topology: coordinator and workers.
pub mod cluster;
/// Splitter configuration.
pub mod config;
/// Run-wide partition distribution.
pub mod distribution;
/// Error types.
pub mod error;
/// Partition schemas and partitioning configs.
pub mod partitioning;
/// Pipeline model: steps, hops and reference edges.
pub mod pipeline;
/// Idempotent construction of produced pipelines.
pub mod pipeline_builder;
/// Partition assignment planner.
pub mod planner;
/// Port reservation collaborators.
pub mod reservation;
/// The topology splitter.
pub mod splitter;
/// Cluster configuration pre-flight checks.
pub mod validator;

pub use error::{AllocationError, ConfigurationError, ReservationError, SplitError};
pub use splitter::{SplitResult, TopologySplitter};

#[cfg(test)]
mod channel_test;
#[cfg(test)]
mod pipeline_test;
#[cfg(test)]
mod reservation_test;
#[cfg(test)]
mod test_support;
#[cfg(test)]
mod validator_test;

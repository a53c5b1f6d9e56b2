//! # Channel Allocation
//!
//! Turns a logical cross-process path into a concrete [`RemoteEndpoint`]:
//! a port reserved on the source host plus the run-wide socket settings.
//!
//! Endpoints are memoized by [`ChannelKey`] for the duration of one split, so
//! revisiting a path (the same hop seen from both ends, or a step shared by
//! several edges) returns the endpoint allocated the first time instead of
//! reserving a second port. The writer and the reader of a path always carry
//! identical copies of the same endpoint.
//!
//! A hop and a reference edge between the same two steps are distinct paths:
//! the [`ChannelKind`] in the key keeps them on separate ports.
//!
//! Transient reservation failures are retried for the failing key only,
//! following the configured [`ReservationPolicy`].

use crate::config::ReservationPolicy;
use crate::error::AllocationError;
use crate::reservation::{PortRequest, PortReserver};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// What a channel carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
  /// Rows of a hop.
  #[default]
  Data,
  /// Lookup rows of a reference edge.
  Reference,
}

impl fmt::Display for ChannelKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ChannelKind::Data => write!(f, "data"),
      ChannelKind::Reference => write!(f, "reference"),
    }
  }
}

/// Identity of one cross-process path between two step copies.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
  /// Server running the sending copy.
  pub source_worker: String,
  /// Sending step.
  pub source_step: String,
  /// Copy number of the sending step.
  pub source_copy: usize,
  /// Server running the receiving copy.
  pub target_worker: String,
  /// Receiving step.
  pub target_step: String,
  /// Copy number of the receiving step.
  pub target_copy: usize,
  /// Hop or reference edge.
  pub kind: ChannelKind,
}

impl ChannelKey {
  /// Creates a data-channel key from its six parts.
  pub fn new(
    source_worker: impl Into<String>,
    source_step: impl Into<String>,
    source_copy: usize,
    target_worker: impl Into<String>,
    target_step: impl Into<String>,
    target_copy: usize,
  ) -> Self {
    Self {
      source_worker: source_worker.into(),
      source_step: source_step.into(),
      source_copy,
      target_worker: target_worker.into(),
      target_step: target_step.into(),
      target_copy,
      kind: ChannelKind::Data,
    }
  }

  /// The same path, carrying a reference edge instead of a hop.
  pub fn for_reference(mut self) -> Self {
    self.kind = ChannelKind::Reference;
    self
  }
}

impl fmt::Display for ChannelKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}/{}.{} -> {}/{}.{}",
      self.source_worker,
      self.source_step,
      self.source_copy,
      self.target_worker,
      self.target_step,
      self.target_copy
    )?;
    if self.kind != ChannelKind::Data {
      write!(f, " [{}]", self.kind)?;
    }
    Ok(())
  }
}

/// Addressing of one remote channel. Immutable once allocated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteEndpoint {
  /// Server running the sending copy.
  pub source_worker: String,
  /// Sending step.
  pub source_step: String,
  /// Copy number of the sending step.
  pub source_copy: usize,
  /// Server running the receiving copy.
  pub target_worker: String,
  /// Receiving step.
  pub target_step: String,
  /// Copy number of the receiving step.
  pub target_copy: usize,
  /// Host the sender listens on.
  pub source_host: String,
  /// Host the receiver runs on.
  pub target_host: String,
  /// Reserved port on the source host.
  pub port: u16,
  /// Socket buffer size.
  pub buffer_size: usize,
  /// Whether the stream is compressed.
  pub compressed: bool,
  /// Hop or reference edge.
  #[serde(default)]
  pub kind: ChannelKind,
}

impl RemoteEndpoint {
  /// The key this endpoint was allocated for.
  pub fn key(&self) -> ChannelKey {
    ChannelKey {
      source_worker: self.source_worker.clone(),
      source_step: self.source_step.clone(),
      source_copy: self.source_copy,
      target_worker: self.target_worker.clone(),
      target_step: self.target_step.clone(),
      target_copy: self.target_copy,
      kind: self.kind,
    }
  }
}

/// Socket settings shared by every channel of a split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSettings {
  /// Run identifier; scopes reservations on the coordinator.
  pub run_id: String,
  /// Name of the logical pipeline being split.
  pub pipeline_name: String,
  /// First port the reserver should try.
  pub base_port: u16,
  /// Socket buffer size.
  pub buffer_size: usize,
  /// Whether streams are compressed.
  pub compressed: bool,
}

/// Memoizing endpoint allocator for one split.
pub struct ChannelAllocator<'r> {
  reserver: &'r dyn PortReserver,
  settings: ChannelSettings,
  policy: ReservationPolicy,
  endpoints: HashMap<ChannelKey, RemoteEndpoint>,
  reservations: usize,
}

impl<'r> ChannelAllocator<'r> {
  /// Creates an allocator with an empty memo.
  pub fn new(
    reserver: &'r dyn PortReserver,
    settings: ChannelSettings,
    policy: ReservationPolicy,
  ) -> Self {
    Self {
      reserver,
      settings,
      policy,
      endpoints: HashMap::new(),
      reservations: 0,
    }
  }

  /// Returns the endpoint for `key`, reserving a port on `source_host` the first time.
  ///
  /// # Errors
  ///
  /// Returns [`AllocationError`] when the reservation fails permanently or
  /// keeps failing transiently for all configured attempts.
  pub fn allocate(
    &mut self,
    key: ChannelKey,
    source_host: &str,
    target_host: &str,
  ) -> Result<RemoteEndpoint, AllocationError> {
    if let Some(endpoint) = self.endpoints.get(&key) {
      debug!(channel = %key, port = endpoint.port, "reusing allocated channel");
      return Ok(endpoint.clone());
    }

    let request = PortRequest {
      run_id: self.settings.run_id.clone(),
      base_port: self.settings.base_port,
      hostname: source_host.to_string(),
      pipeline_name: self.settings.pipeline_name.clone(),
      source_worker: key.source_worker.clone(),
      source_step: key.source_step.clone(),
      source_copy: key.source_copy,
      target_worker: key.target_worker.clone(),
      target_step: key.target_step.clone(),
      target_copy: key.target_copy,
      kind: key.kind,
    };
    let port = self.reserve_with_retry(&key, &request)?;

    let endpoint = RemoteEndpoint {
      source_worker: key.source_worker.clone(),
      source_step: key.source_step.clone(),
      source_copy: key.source_copy,
      target_worker: key.target_worker.clone(),
      target_step: key.target_step.clone(),
      target_copy: key.target_copy,
      source_host: source_host.to_string(),
      target_host: target_host.to_string(),
      port,
      buffer_size: self.settings.buffer_size,
      compressed: self.settings.compressed,
      kind: key.kind,
    };
    debug!(channel = %key, port, "allocated channel");
    self.endpoints.insert(key, endpoint.clone());
    Ok(endpoint)
  }

  fn reserve_with_retry(
    &mut self,
    key: &ChannelKey,
    request: &PortRequest,
  ) -> Result<u16, AllocationError> {
    let max_attempts = self.policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
      attempt += 1;
      self.reservations += 1;
      match self.reserver.reserve(request) {
        Ok(port) => return Ok(port),
        Err(e) if e.is_transient() && attempt < max_attempts => {
          warn!(
            channel = %key,
            attempt,
            max_attempts,
            error = %e,
            "port reservation failed, retrying"
          );
          if self.policy.backoff_ms > 0 {
            std::thread::sleep(self.policy.backoff());
          }
        }
        Err(source) => {
          return Err(AllocationError {
            key: key.clone(),
            attempts: attempt,
            source,
          });
        }
      }
    }
  }

  /// Number of distinct channels allocated so far.
  pub fn len(&self) -> usize {
    self.endpoints.len()
  }

  /// Returns true if nothing was allocated yet.
  pub fn is_empty(&self) -> bool {
    self.endpoints.is_empty()
  }

  /// Number of reservation calls made, retries included.
  pub fn reservation_calls(&self) -> usize {
    self.reservations
  }
}

impl fmt::Debug for ChannelAllocator<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChannelAllocator")
      .field("settings", &self.settings)
      .field("policy", &self.policy)
      .field("channels", &self.endpoints.len())
      .field("reservations", &self.reservations)
      .finish()
  }
}


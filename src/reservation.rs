//! # Port Reservation
//!
//! The coordinator is the authority that hands out network ports for remote
//! channels. The splitter talks to it through the [`PortReserver`] trait so the
//! memo layer in [`channel`](crate::channel) can be exercised without a
//! network.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryPortReserver`]: sequential ports per host, for tests and
//!   single-process setups.
//! - [`HttpPortReserver`]: asks the coordinator's control endpoint
//!   (`GET /cluster/allocate-port`) and reads back `{"port": n}`.
//!
//! Closures `Fn(&PortRequest) -> Result<u16, ReservationError>` implement the
//! trait as well.
//!
//! ## Usage
//!
//! ```rust
//! use weave_split::channel::ChannelKind;
//! use weave_split::reservation::{InMemoryPortReserver, PortRequest, PortReserver};
//!
//! let reserver = InMemoryPortReserver::new();
//! let request = PortRequest {
//!   run_id: "run-1".to_string(),
//!   base_port: 40000,
//!   hostname: "10.0.0.2".to_string(),
//!   pipeline_name: "orders".to_string(),
//!   source_worker: "w1".to_string(),
//!   source_step: "read".to_string(),
//!   source_copy: 0,
//!   target_worker: "coord".to_string(),
//!   target_step: "sort".to_string(),
//!   target_copy: 0,
//!   kind: ChannelKind::Data,
//! };
//! assert_eq!(reserver.reserve(&request).unwrap(), 40000);
//! assert_eq!(reserver.reserve(&request).unwrap(), 40001);
//! ```

use crate::channel::ChannelKind;
use crate::cluster::ClusterServer;
use crate::config::ReservationPolicy;
use crate::error::ReservationError;
use bytes::Bytes;
use http::header::ACCEPT;
use http::{Request, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// One port reservation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRequest {
  /// Run identifier; reservations of different runs never collide.
  pub run_id: String,
  /// First port to try.
  pub base_port: u16,
  /// Host the port is reserved on.
  pub hostname: String,
  /// Logical pipeline name.
  pub pipeline_name: String,
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
  /// Hop or reference edge; both may connect the same two copies.
  #[serde(default)]
  pub kind: ChannelKind,
}

/// Reserves ports for remote channels.
pub trait PortReserver {
  /// Reserves one port for the described channel.
  fn reserve(&self, request: &PortRequest) -> Result<u16, ReservationError>;
}

impl<F> PortReserver for F
where
  F: Fn(&PortRequest) -> Result<u16, ReservationError>,
{
  fn reserve(&self, request: &PortRequest) -> Result<u16, ReservationError> {
    self(request)
  }
}

/// Hands out sequential ports per host, starting at the request's base port.
///
/// Safe to share between concurrent splits.
#[derive(Debug, Default)]
pub struct InMemoryPortReserver {
  next_ports: Mutex<HashMap<String, u16>>,
  calls: AtomicUsize,
}

impl InMemoryPortReserver {
  /// Creates a reserver with no ports handed out.
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of `reserve` calls served, failed ones included.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl PortReserver for InMemoryPortReserver {
  fn reserve(&self, request: &PortRequest) -> Result<u16, ReservationError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let mut next_ports = self
      .next_ports
      .lock()
      .map_err(|_| ReservationError::Unavailable("port table lock poisoned".to_string()))?;
    let next = next_ports
      .entry(request.hostname.clone())
      .or_insert(request.base_port);
    let port = (*next).max(request.base_port);
    *next = port.checked_add(1).ok_or_else(|| {
      ReservationError::Rejected(format!("no ports left on host '{}'", request.hostname))
    })?;
    Ok(port)
  }
}

#[derive(Deserialize)]
struct PortResponse {
  port: u16,
}

/// Reserves ports through the coordinator's HTTP control endpoint.
///
/// Blocks on a private current-thread runtime; do not call it from inside an
/// async context.
pub struct HttpPortReserver {
  base_url: String,
  timeout: Duration,
  client: Client<HttpConnector, Empty<Bytes>>,
  runtime: tokio::runtime::Runtime,
}

impl HttpPortReserver {
  /// Creates a reserver talking to `coordinator` on its control port.
  ///
  /// # Errors
  ///
  /// Returns [`ReservationError::Transport`] if the client runtime cannot be started.
  pub fn new(coordinator: &ClusterServer, timeout: Duration) -> Result<Self, ReservationError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .map_err(|e| ReservationError::Transport(format!("cannot start client runtime: {}", e)))?;
    let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
    Ok(Self {
      base_url: format!("http://{}:{}", coordinator.hostname, coordinator.port),
      timeout,
      client,
      runtime,
    })
  }

  /// Creates a reserver whose request timeout follows `policy`.
  ///
  /// # Errors
  ///
  /// Returns [`ReservationError::Transport`] if the client runtime cannot be started.
  pub fn from_policy(
    coordinator: &ClusterServer,
    policy: &ReservationPolicy,
  ) -> Result<Self, ReservationError> {
    Self::new(coordinator, policy.timeout())
  }

  /// Per-request timeout.
  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// URL of a reservation request.
  pub fn request_url(&self, request: &PortRequest) -> Result<String, ReservationError> {
    let query = serde_urlencoded::to_string(request)
      .map_err(|e| ReservationError::Rejected(format!("cannot encode request: {}", e)))?;
    Ok(format!("{}/cluster/allocate-port?{}", self.base_url, query))
  }

  async fn fetch(&self, uri: Uri) -> Result<u16, ReservationError> {
    let timeout_ms = self.timeout.as_millis() as u64;
    let request = Request::get(uri)
      .header(ACCEPT, "application/json")
      .body(Empty::<Bytes>::new())
      .map_err(|e| ReservationError::Rejected(format!("cannot build request: {}", e)))?;
    let response = tokio::time::timeout(self.timeout, self.client.request(request))
      .await
      .map_err(|_| ReservationError::Timeout(timeout_ms))?
      .map_err(|e| ReservationError::Transport(e.to_string()))?;

    let status = response.status();
    let body = tokio::time::timeout(self.timeout, response.into_body().collect())
      .await
      .map_err(|_| ReservationError::Timeout(timeout_ms))?
      .map_err(|e| ReservationError::Transport(format!("cannot read response: {}", e)))?
      .to_bytes();

    if status.is_server_error() {
      return Err(ReservationError::Unavailable(format!(
        "{}: {}",
        status,
        String::from_utf8_lossy(&body)
      )));
    }
    if !status.is_success() {
      return Err(ReservationError::Rejected(format!(
        "{}: {}",
        status,
        String::from_utf8_lossy(&body)
      )));
    }

    let parsed: PortResponse = serde_json::from_slice(&body)
      .map_err(|e| ReservationError::InvalidResponse(e.to_string()))?;
    Ok(parsed.port)
  }
}

impl PortReserver for HttpPortReserver {
  fn reserve(&self, request: &PortRequest) -> Result<u16, ReservationError> {
    let url = self.request_url(request)?;
    let uri: Uri = url
      .parse()
      .map_err(|e| ReservationError::Rejected(format!("invalid reservation url '{}': {}", url, e)))?;
    debug!(url = %url, "requesting port from coordinator");
    self.runtime.block_on(self.fetch(uri))
  }
}

impl std::fmt::Debug for HttpPortReserver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HttpPortReserver")
      .field("base_url", &self.base_url)
      .field("timeout", &self.timeout)
      .finish()
  }
}

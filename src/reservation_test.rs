//! Tests for the port reservation collaborators.
//!
//! The HTTP reserver is exercised against a one-connection hyper server on
//! its own thread and runtime, since the reserver blocks on a runtime of its own.

use crate::channel::ChannelKind;
use crate::cluster::ClusterServer;
use crate::config::ReservationPolicy;
use crate::error::ReservationError;
use crate::reservation::{HttpPortReserver, InMemoryPortReserver, PortRequest, PortReserver};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;
use tokio::net::TcpListener;

fn request(hostname: &str, base_port: u16) -> PortRequest {
  PortRequest {
    run_id: "run-1".to_string(),
    base_port,
    hostname: hostname.to_string(),
    pipeline_name: "orders".to_string(),
    source_worker: "w1".to_string(),
    source_step: "read".to_string(),
    source_copy: 0,
    target_worker: "coord".to_string(),
    target_step: "sort".to_string(),
    target_copy: 1,
    kind: ChannelKind::Data,
  }
}

/// Serves one connection with a fixed response and hands back the request target.
fn serve_once(status: StatusCode, body: &'static str) -> (u16, thread::JoinHandle<String>) {
  let (port_tx, port_rx) = mpsc::channel();
  let handle = thread::spawn(move || {
    let runtime = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .unwrap();
    runtime.block_on(async move {
      let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
      port_tx.send(listener.local_addr().unwrap().port()).unwrap();
      let (stream, _) = listener.accept().await.unwrap();

      let seen = Arc::new(Mutex::new(String::new()));
      let recorded = Arc::clone(&seen);
      let service = service_fn(move |req: Request<Incoming>| {
        let recorded = Arc::clone(&recorded);
        async move {
          *recorded.lock().unwrap() = format!("{} {}", req.method(), req.uri());
          Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
        }
      });
      http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), service)
        .await
        .unwrap();
      seen.lock().unwrap().clone()
    })
  });
  (port_rx.recv().unwrap(), handle)
}

fn http_reserver(port: u16) -> HttpPortReserver {
  HttpPortReserver::new(
    &ClusterServer::coordinator("coord", "127.0.0.1", port),
    Duration::from_secs(5),
  )
  .unwrap()
}

#[test]
fn test_in_memory_sequential_per_host() {
  let reserver = InMemoryPortReserver::new();
  assert_eq!(reserver.reserve(&request("a", 40_000)), Ok(40_000));
  assert_eq!(reserver.reserve(&request("a", 40_000)), Ok(40_001));
  assert_eq!(reserver.reserve(&request("b", 40_000)), Ok(40_000));
  assert_eq!(reserver.calls(), 3);
}

#[test]
fn test_in_memory_respects_higher_base_port() {
  let reserver = InMemoryPortReserver::new();
  assert_eq!(reserver.reserve(&request("a", 40_000)), Ok(40_000));
  assert_eq!(reserver.reserve(&request("a", 45_000)), Ok(45_000));
  assert_eq!(reserver.reserve(&request("a", 40_000)), Ok(45_001));
}

#[test]
fn test_in_memory_runs_out_of_ports() {
  let reserver = InMemoryPortReserver::new();
  assert_eq!(reserver.reserve(&request("a", u16::MAX)), Err(ReservationError::Rejected(
    "no ports left on host 'a'".to_string()
  )));
}

#[test]
fn test_in_memory_is_shared_across_threads() {
  let reserver = Arc::new(InMemoryPortReserver::new());
  let handles: Vec<_> = (0..4)
    .map(|_| {
      let reserver = Arc::clone(&reserver);
      thread::spawn(move || {
        (0..25)
          .map(|_| reserver.reserve(&request("a", 40_000)).unwrap())
          .collect::<Vec<_>>()
      })
    })
    .collect();
  let mut ports: Vec<u16> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
  ports.sort_unstable();
  ports.dedup();
  assert_eq!(ports.len(), 100);
}

#[test]
fn test_closure_reserver() {
  let reserver = |r: &PortRequest| -> Result<u16, ReservationError> { Ok(r.base_port + 7) };
  let dynamic: &dyn PortReserver = &reserver;
  assert_eq!(dynamic.reserve(&request("a", 40_000)), Ok(40_007));
}

#[test]
fn test_http_request_url() {
  let reserver = http_reserver(9000);
  let url = reserver.request_url(&request("10.0.0.2", 40_000)).unwrap();
  assert!(url.starts_with("http://127.0.0.1:9000/cluster/allocate-port?"));
  assert!(url.contains("run_id=run-1"));
  assert!(url.contains("hostname=10.0.0.2"));
  assert!(url.contains("target_copy=1"));
  assert!(url.contains("kind=data"));

  let mut lookup = request("10.0.0.2", 40_000);
  lookup.kind = ChannelKind::Reference;
  assert!(reserver.request_url(&lookup).unwrap().contains("kind=reference"));
}

#[test]
fn test_http_timeout_follows_policy() {
  let policy = ReservationPolicy {
    timeout_ms: 1_500,
    ..ReservationPolicy::default()
  };
  let reserver =
    HttpPortReserver::from_policy(&ClusterServer::coordinator("coord", "127.0.0.1", 9000), &policy)
      .unwrap();
  assert_eq!(reserver.timeout(), Duration::from_millis(1_500));
}

#[test]
fn test_http_reserves_port() {
  let (port, server) = serve_once(StatusCode::OK, r#"{"port":40100}"#);
  let reserver = http_reserver(port);

  assert_eq!(reserver.reserve(&request("10.0.0.2", 40_000)), Ok(40_100));
  let target = server.join().unwrap();
  assert!(target.starts_with("GET /cluster/allocate-port?"));
  assert!(target.contains("source_step=read"));
}

#[test]
fn test_http_server_error_is_transient() {
  let (port, server) = serve_once(StatusCode::SERVICE_UNAVAILABLE, "starting up");
  let err = http_reserver(port).reserve(&request("h", 40_000)).unwrap_err();
  server.join().unwrap();
  assert!(matches!(err, ReservationError::Unavailable(_)));
  assert!(err.is_transient());
}

#[test]
fn test_http_client_error_is_permanent() {
  let (port, server) = serve_once(StatusCode::NOT_FOUND, "unknown run");
  let err = http_reserver(port).reserve(&request("h", 40_000)).unwrap_err();
  server.join().unwrap();
  assert!(matches!(err, ReservationError::Rejected(_)));
  assert!(!err.is_transient());
}

#[test]
fn test_http_bad_body() {
  let (port, server) = serve_once(StatusCode::OK, r#"{"nope":1}"#);
  let err = http_reserver(port).reserve(&request("h", 40_000)).unwrap_err();
  server.join().unwrap();
  assert!(matches!(err, ReservationError::InvalidResponse(_)));
}

#[test]
fn test_http_connection_refused_is_transient() {
  let port = {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
  };
  let err = http_reserver(port).reserve(&request("h", 40_000)).unwrap_err();
  assert!(matches!(err, ReservationError::Transport(_)));
  assert!(err.is_transient());
}

//! # Channel Allocator Test Suite
//!
//! - memoization: one reservation per key, identical endpoints on repeats
//! - retries of transient failures, bounded by the policy
//! - permanent failures surface immediately with the failing path
//! - run-wide settings flow into every endpoint and request

use crate::channel::{ChannelAllocator, ChannelKey, ChannelKind, ChannelSettings};
use crate::config::ReservationPolicy;
use crate::error::ReservationError;
use crate::reservation::{InMemoryPortReserver, PortRequest};
use std::cell::{Cell, RefCell};

fn settings() -> ChannelSettings {
  ChannelSettings {
    run_id: "run-1".to_string(),
    pipeline_name: "orders".to_string(),
    base_port: 40_000,
    buffer_size: 2_048,
    compressed: true,
  }
}

fn fast_policy(max_attempts: u32) -> ReservationPolicy {
  ReservationPolicy {
    max_attempts,
    backoff_ms: 0,
    timeout_ms: 1_000,
  }
}

fn key(copy: usize) -> ChannelKey {
  ChannelKey::new("w1", "read", copy, "coord", "sort", 0)
}

#[test]
fn test_key_display() {
  assert_eq!(key(2).to_string(), "w1/read.2 -> coord/sort.0");
  assert_eq!(
    key(2).for_reference().to_string(),
    "w1/read.2 -> coord/sort.0 [reference]"
  );
}

#[test]
fn test_reference_path_is_reserved_separately() {
  let seen = RefCell::new(Vec::new());
  let reserver = |request: &PortRequest| -> Result<u16, ReservationError> {
    seen.borrow_mut().push(request.kind);
    Ok(41_000 + seen.borrow().len() as u16)
  };
  let mut allocator = ChannelAllocator::new(&reserver, settings(), fast_policy(1));

  let data = allocator.allocate(key(0), "10.0.0.2", "10.0.0.1").unwrap();
  let lookup = allocator
    .allocate(key(0).for_reference(), "10.0.0.2", "10.0.0.1")
    .unwrap();

  assert_ne!(data.port, lookup.port);
  assert_eq!(lookup.kind, ChannelKind::Reference);
  assert_eq!(lookup.key(), key(0).for_reference());
  assert_eq!(*seen.borrow(), [ChannelKind::Data, ChannelKind::Reference]);
  assert_eq!(allocator.len(), 2);
}

#[test]
fn test_repeat_request_is_memoized() {
  let reserver = InMemoryPortReserver::new();
  let mut allocator = ChannelAllocator::new(&reserver, settings(), fast_policy(3));

  let first = allocator.allocate(key(0), "10.0.0.2", "10.0.0.1").unwrap();
  let again = allocator.allocate(key(0), "10.0.0.2", "10.0.0.1").unwrap();
  let other = allocator.allocate(key(1), "10.0.0.2", "10.0.0.1").unwrap();

  assert_eq!(first, again);
  assert_ne!(first.port, other.port);
  assert_eq!(reserver.calls(), 2);
  assert_eq!(allocator.len(), 2);
  assert_eq!(first.key(), key(0));
}

#[test]
fn test_endpoint_carries_settings() {
  let reserver = InMemoryPortReserver::new();
  let mut allocator = ChannelAllocator::new(&reserver, settings(), fast_policy(1));
  let endpoint = allocator.allocate(key(0), "10.0.0.2", "10.0.0.1").unwrap();

  assert_eq!(endpoint.port, 40_000);
  assert_eq!(endpoint.source_host, "10.0.0.2");
  assert_eq!(endpoint.target_host, "10.0.0.1");
  assert_eq!(endpoint.buffer_size, 2_048);
  assert!(endpoint.compressed);
}

#[test]
fn test_request_describes_path() {
  let seen = RefCell::new(Vec::new());
  let reserver = |request: &PortRequest| -> Result<u16, ReservationError> {
    seen.borrow_mut().push(request.clone());
    Ok(41_000)
  };
  let mut allocator = ChannelAllocator::new(&reserver, settings(), fast_policy(1));
  allocator.allocate(key(3), "10.0.0.2", "10.0.0.1").unwrap();

  let seen = seen.borrow();
  assert_eq!(seen.len(), 1);
  let request = &seen[0];
  assert_eq!(request.run_id, "run-1");
  assert_eq!(request.pipeline_name, "orders");
  assert_eq!(request.hostname, "10.0.0.2");
  assert_eq!(request.base_port, 40_000);
  assert_eq!(request.source_copy, 3);
  assert_eq!(request.target_step, "sort");
}

#[test]
fn test_transient_failure_is_retried() {
  crate::test_support::init_tracing();
  let calls = Cell::new(0);
  let reserver = |_: &PortRequest| -> Result<u16, ReservationError> {
    calls.set(calls.get() + 1);
    if calls.get() < 3 {
      Err(ReservationError::Timeout(10))
    } else {
      Ok(40_123)
    }
  };
  let mut allocator = ChannelAllocator::new(&reserver, settings(), fast_policy(3));

  let endpoint = allocator.allocate(key(0), "h", "h").unwrap();
  assert_eq!(endpoint.port, 40_123);
  assert_eq!(calls.get(), 3);
  assert_eq!(allocator.reservation_calls(), 3);
}

#[test]
fn test_retries_are_bounded() {
  let calls = Cell::new(0);
  let reserver = |_: &PortRequest| -> Result<u16, ReservationError> {
    calls.set(calls.get() + 1);
    Err(ReservationError::Unavailable("busy".to_string()))
  };
  let mut allocator = ChannelAllocator::new(&reserver, settings(), fast_policy(2));

  let err = allocator.allocate(key(0), "h", "h").unwrap_err();
  assert_eq!(calls.get(), 2);
  assert_eq!(err.attempts, 2);
  assert_eq!(err.key, key(0));
  assert!(allocator.is_empty());
  assert!(err.to_string().contains("w1/read.0 -> coord/sort.0"));
}

#[test]
fn test_permanent_failure_is_not_retried() {
  let calls = Cell::new(0);
  let reserver = |_: &PortRequest| -> Result<u16, ReservationError> {
    calls.set(calls.get() + 1);
    Err(ReservationError::Rejected("unknown run".to_string()))
  };
  let mut allocator = ChannelAllocator::new(&reserver, settings(), fast_policy(5));

  let err = allocator.allocate(key(0), "h", "h").unwrap_err();
  assert_eq!(calls.get(), 1);
  assert_eq!(err.attempts, 1);
  assert_eq!(err.source, ReservationError::Rejected("unknown run".to_string()));
}

#[test]
fn test_failure_of_one_key_does_not_poison_others() {
  let reserver = |request: &PortRequest| -> Result<u16, ReservationError> {
    if request.source_copy == 1 {
      Err(ReservationError::Rejected("no".to_string()))
    } else {
      Ok(40_500)
    }
  };
  let mut allocator = ChannelAllocator::new(&reserver, settings(), fast_policy(1));
  assert!(allocator.allocate(key(1), "h", "h").is_err());
  assert_eq!(allocator.allocate(key(0), "h", "h").unwrap().port, 40_500);
}

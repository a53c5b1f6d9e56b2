//! Configuration for the topology splitter.
//!
//! Holds the defaults applied when a cluster topology leaves socket settings
//! unset, and the retry policy for port reservations. Loadable from JSON;
//! every field has a default so partial documents are accepted.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Retry policy for port reservation calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationPolicy {
  /// Total attempts per channel, first call included.
  pub max_attempts: u32,
  /// Delay between attempts, in milliseconds.
  pub backoff_ms: u64,
  /// Timeout of a single reservation call, in milliseconds.
  pub timeout_ms: u64,
}

impl Default for ReservationPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff_ms: 250,
      timeout_ms: 10_000,
    }
  }
}

impl ReservationPolicy {
  /// Delay between attempts.
  pub fn backoff(&self) -> Duration {
    Duration::from_millis(self.backoff_ms)
  }

  /// Timeout of a single call.
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

/// Splitter configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
  /// Socket buffer size used when the topology does not set one.
  pub default_socket_buffer_size: usize,
  /// First port tried when the topology does not set a base port.
  pub default_base_port: u16,
  /// Port reservation retries.
  pub reservation: ReservationPolicy,
}

impl Default for SplitterConfig {
  fn default() -> Self {
    Self {
      default_socket_buffer_size: 50_000,
      default_base_port: 40_000,
      reservation: ReservationPolicy::default(),
    }
  }
}

impl SplitterConfig {
  /// Parses a config from JSON and validates it.
  pub fn from_json_str(json: &str) -> Result<Self, String> {
    let config: SplitterConfig =
      serde_json::from_str(json).map_err(|e| format!("invalid splitter config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  /// Reads a JSON config file and validates it.
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
      .map_err(|e| format!("cannot read splitter config {}: {}", path.display(), e))?;
    Self::from_json_str(&json)
  }

  /// Validates the config: non-zero buffer size and at least one reservation attempt.
  pub fn validate(&self) -> Result<(), String> {
    if self.default_socket_buffer_size == 0 {
      return Err("default_socket_buffer_size must be > 0".to_string());
    }
    if self.reservation.max_attempts == 0 {
      return Err("reservation.max_attempts must be > 0".to_string());
    }
    if self.reservation.timeout_ms == 0 {
      return Err("reservation.timeout_ms must be > 0".to_string());
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::SplitterConfig;
  use std::io::Write;

  #[test]
  fn default_validates() {
    let c = SplitterConfig::default();
    assert!(c.validate().is_ok());
    assert_eq!(c.default_socket_buffer_size, 50_000);
    assert_eq!(c.default_base_port, 40_000);
  }

  #[test]
  fn validate_attempts() {
    let mut c = SplitterConfig::default();
    c.reservation.max_attempts = 0;
    assert!(c.validate().is_err());
  }

  #[test]
  fn partial_json_keeps_defaults() {
    let c = SplitterConfig::from_json_str(r#"{"default_base_port": 41000, "reservation": {"backoff_ms": 0}}"#)
      .unwrap();
    assert_eq!(c.default_base_port, 41_000);
    assert_eq!(c.reservation.backoff_ms, 0);
    assert_eq!(c.reservation.max_attempts, 3);
    assert_eq!(c.default_socket_buffer_size, 50_000);
  }

  #[test]
  fn invalid_json_is_rejected() {
    assert!(SplitterConfig::from_json_str(r#"{"default_socket_buffer_size": 0}"#).is_err());
    assert!(SplitterConfig::from_json_str("not json").is_err());
  }

  #[test]
  fn from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"default_socket_buffer_size": 1024}}"#).unwrap();
    let c = SplitterConfig::from_json_file(file.path()).unwrap();
    assert_eq!(c.default_socket_buffer_size, 1024);
  }
}

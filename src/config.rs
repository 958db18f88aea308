//! Configuration management for the replay pipeline
//!
//! Runtime configuration is loaded from a JSON file so sampling intervals,
//! queue caps and chunk limits can be tuned without recompilation. Missing
//! or malformed files fall back to defaults. A small set of environment
//! variables override the file, most importantly the global enablement flag.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::replay::capture::CaptureOptions;

/// Environment variable that disables the whole pipeline when `0`/`false`
pub const ENV_ENABLED: &str = "REPLAY_ENABLED";
/// Environment variable overriding the periodic flush interval (milliseconds)
pub const ENV_FLUSH_INTERVAL_MS: &str = "REPLAY_FLUSH_INTERVAL_MS";

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Master switch; when false every public entry point is a no-op
    pub enabled: bool,
    pub queue: QueueConfig,
    pub chunk: ChunkConfig,
    pub sampling: SamplingConfig,
    pub routes: RouteConfig,
    pub capture: CaptureOptions,
    pub envelope: EnvelopeConfig,
}

/// Bounded queue parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Hard cap on buffered events; oldest entries are evicted beyond it
    pub max_queue_events: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_events: 1500,
        }
    }
}

/// Chunking and flush scheduling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Maximum events per chunk, also the queue length that triggers an immediate flush
    pub flush_event_count: usize,
    /// Serialized byte budget per chunk
    pub max_chunk_bytes: usize,
    /// Period of the recurring flush timer
    pub flush_interval_ms: u64,
}

impl ChunkConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            flush_event_count: 40,
            max_chunk_bytes: 700_000,
            flush_interval_ms: 5_000,
        }
    }
}

/// Minimum inter-emission interval pair for one throttled bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalPair {
    pub default_ms: u64,
    pub call_active_ms: u64,
}

/// Adaptive sampling gate parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub pointer: IntervalPair,
    pub scroll: IntervalPair,
    /// Paths hosting a live voice call; call-active intervals apply only here
    pub call_pages: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            pointer: IntervalPair {
                default_ms: 110,
                call_active_ms: 250,
            },
            scroll: IntervalPair {
                default_ms: 150,
                call_active_ms: 400,
            },
            call_pages: vec!["/practice".to_string(), "/call".to_string()],
        }
    }
}

/// Trackability filter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Paths excluded by exact match
    pub excluded_paths: Vec<String>,
    /// Paths excluded by prefix
    pub excluded_prefixes: Vec<String>,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            excluded_paths: vec!["/".to_string(), "/consent".to_string()],
            excluded_prefixes: vec!["/researcher".to_string(), "/no-consent".to_string()],
        }
    }
}

/// Metadata stamped into every chunk envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub version: u32,
    pub format: String,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            version: 1,
            format: "rrweb".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    /// Default configuration values (fallback if config file not found)
    fn default() -> Self {
        Self {
            enabled: true,
            queue: QueueConfig::default(),
            chunk: ChunkConfig::default(),
            sampling: SamplingConfig::default(),
            routes: RouteConfig::default(),
            capture: CaptureOptions::default(),
            envelope: EnvelopeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from JSON file
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file is missing or invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load from file, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an environment lookup
    ///
    /// The lookup is injected so tests do not mutate the process environment.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_ENABLED) {
            self.enabled = parse_flag(&raw).unwrap_or_else(|| {
                log::warn!("[Config] Ignoring unparseable {}={}", ENV_ENABLED, raw);
                self.enabled
            });
        }

        if let Some(raw) = lookup(ENV_FLUSH_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.chunk.flush_interval_ms = ms,
                _ => log::warn!("[Config] Ignoring invalid {}={}", ENV_FLUSH_INTERVAL_MS, raw),
            }
        }

        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.enabled);
        assert_eq!(config.queue.max_queue_events, 1500);
        assert_eq!(config.chunk.flush_event_count, 40);
        assert_eq!(config.chunk.max_chunk_bytes, 700_000);
        assert_eq!(config.sampling.pointer.default_ms, 110);
        assert!(config.sampling.pointer.call_active_ms > config.sampling.pointer.default_ms);
        assert!(config.sampling.scroll.call_active_ms > config.sampling.scroll.default_ms);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let parsed: PipelineConfig =
            serde_json::from_str(r#"{"chunk": {"flush_event_count": 10}}"#).unwrap();
        assert_eq!(parsed.chunk.flush_event_count, 10);
        assert_eq!(parsed.chunk.max_chunk_bytes, 700_000);
        assert_eq!(parsed.queue.max_queue_events, 1500);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = PipelineConfig::load_from_file("/nonexistent/replay_config.json");
        assert_eq!(config.chunk.flush_interval_ms, 5_000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ENABLED, "false"),
            (ENV_FLUSH_INTERVAL_MS, "250"),
        ]
        .into_iter()
        .collect();

        let config = PipelineConfig::default()
            .with_env_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert!(!config.enabled);
        assert_eq!(config.chunk.flush_interval_ms, 250);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let config = PipelineConfig::default().with_env_overrides(|key| match key {
            ENV_ENABLED => Some("maybe".to_string()),
            ENV_FLUSH_INTERVAL_MS => Some("0".to_string()),
            _ => None,
        });
        assert!(config.enabled);
        assert_eq!(config.chunk.flush_interval_ms, 5_000);
    }
}

//! Engine-wide configuration (spec.md §6 "Configuration").
//!
//! Tenant configuration itself (rate/burst_cap per tenant) is an
//! external collaborator's responsibility per spec.md §1 and is not
//! loaded here; this only covers the scheduler/engine-wide constants.

use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct EngineConfig {
    pub w_base_ms: u64,
    pub tau: f64,
    pub max_batch: usize,
    pub kv_max: u64,
    pub alpha: f64,
    pub prefill_rate: f64,
    pub decode_base: f64,
    pub entropy_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            w_base_ms: 10,
            tau: 5.0,
            max_batch: 16,
            kv_max: 32_768,
            alpha: 1.0,
            prefill_rate: 1024.0,
            decode_base: 128.0,
            entropy_window: 50,
        }
    }
}

impl EngineConfig {
    /// Loads defaults, then a YAML file named by `ENGINE_CONFIG` if
    /// present, then individual `ENGINE_*` env var overrides — mirrors
    /// the layered precedence of the teacher's `RunnerConfig::load()`.
    pub fn load() -> Self {
        let mut cfg = if let Ok(path) = env::var("ENGINE_CONFIG") {
            std::fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_yaml::from_str::<EngineConfig>(&text).ok())
                .unwrap_or_default()
        } else {
            Self::default()
        };

        if let Some(v) = env_parse("ENGINE_W_BASE_MS") {
            cfg.w_base_ms = v;
        }
        if let Some(v) = env_parse("ENGINE_TAU") {
            cfg.tau = v;
        }
        if let Some(v) = env_parse("ENGINE_MAX_BATCH") {
            cfg.max_batch = v;
        }
        if let Some(v) = env_parse("ENGINE_KV_MAX") {
            cfg.kv_max = v;
        }
        if let Some(v) = env_parse("ENGINE_ALPHA") {
            cfg.alpha = v;
        }
        if let Some(v) = env_parse("ENGINE_PREFILL_RATE") {
            cfg.prefill_rate = v;
        }
        if let Some(v) = env_parse("ENGINE_DECODE_BASE") {
            cfg.decode_base = v;
        }
        if let Some(v) = env_parse("ENGINE_ENTROPY_WINDOW") {
            cfg.entropy_window = v;
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.w_base_ms, 10);
        assert_eq!(cfg.tau, 5.0);
        assert_eq!(cfg.max_batch, 16);
        assert_eq!(cfg.kv_max, 32_768);
        assert_eq!(cfg.alpha, 1.0);
        assert_eq!(cfg.entropy_window, 50);
    }
}

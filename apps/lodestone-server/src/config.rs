use std::path::{Path, PathBuf};

use anyhow::Context;
use lodestone_kernel::Dimension;
use lodestone_stream::StreamConfig;
use serde::{Deserialize, Serialize};

/// Server settings, read from an optional JSON file. Missing keys keep their
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub world_dir: PathBuf,
    pub region_extension: String,
    /// Ticks per second.
    pub tick_rate: u32,
    pub view_distance: i32,
    pub send_budget: usize,
    pub unload_budget: usize,
    pub dimension: Dimension,
    /// Zero disables periodic saves; the world is still saved on shutdown.
    pub save_interval_ticks: u64,
    pub motd: String,
    pub max_players: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            world_dir: PathBuf::from("world"),
            region_extension: "mca".to_owned(),
            tick_rate: 20,
            view_distance: 4,
            send_budget: 8,
            unload_budget: 8,
            dimension: Dimension::Overworld,
            save_interval_ticks: 100,
            motd: "A Lodestone server".to_owned(),
            max_players: 20,
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn stream(&self) -> StreamConfig {
        StreamConfig {
            view_distance: self.view_distance,
            send_budget: self.send_budget,
            unload_budget: self.unload_budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_argument_gives_defaults() {
        let config = ServerConfig::load(None).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.tick_rate, 20);
        assert_eq!(config.region_extension, "mca");
        assert_eq!(config.stream(), StreamConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.json");
        std::fs::write(&path, r#"{ "view_distance": 10, "dimension": "nether" }"#).unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.view_distance, 10);
        assert_eq!(config.dimension, Dimension::Nether);
        assert_eq!(config.save_interval_ticks, 100);
        assert_eq!(config.stream().view_distance, 10);
    }

    #[test]
    fn bad_values_are_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.json");
        std::fs::write(&path, r#"{ "dimension": "moon" }"#).unwrap();
        let err = ServerConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("parsing config"));

        assert!(ServerConfig::load(Some(&tmp.path().join("absent.json"))).is_err());
    }
}

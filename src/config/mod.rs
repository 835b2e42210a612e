use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::cluster::{ClusterOptions, Viewport};
use crate::proxy::Coordinates;
use crate::source::FeedFormat;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub center_lat: f64,
    pub center_lng: f64,
    pub zoom: u8,
    pub width: u32,
    pub height: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center_lat: 20.0,
            center_lng: 0.0,
            zoom: 2,
            width: 1280,
            height: 720,
        }
    }
}

impl MapConfig {
    pub fn viewport(&self) -> anyhow::Result<Viewport> {
        let center = Coordinates::new(self.center_lat, self.center_lng)
            .map_err(|e| anyhow::anyhow!("地图中心无效: {}", e))?;
        Ok(Viewport::new(center, self.zoom, self.width, self.height))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 数据源
    pub endpoint: String,
    pub feed_format: FeedFormat,
    pub timeout: u64,
    pub geoip_db: Option<String>,

    // 地图与聚合
    pub map: MapConfig,
    pub cluster: ClusterOptions,

    // 刷新间隔（秒），0 表示只刷新一次
    pub refresh_interval: u64,

    // 输出
    pub print_progress: bool,
    pub output_format: String,

    // 日志配置
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/proxies".to_string(),
            feed_format: FeedFormat::Flat,
            timeout: 6000,
            geoip_db: None,
            map: MapConfig::default(),
            cluster: ClusterOptions::default(),
            refresh_interval: 0,
            print_progress: true,
            output_format: "text".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn is_watch_mode(&self) -> bool {
        self.refresh_interval > 0
    }

    pub fn is_json_output(&self) -> bool {
        self.output_format.eq_ignore_ascii_case("json")
    }

    pub fn get_refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "endpoint: https://proxylist.geonode.com/api/proxy-list?limit=50&page=1\n\
             feed_format: geonode\n\
             map:\n  zoom: 5\n\
             cluster:\n  max_cluster_radius: 40\n  disable_clustering_at_zoom: 12"
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.feed_format, FeedFormat::Geonode);
        assert_eq!(config.map.zoom, 5);
        assert_eq!(config.map.center_lat, 20.0);
        assert_eq!(config.cluster.max_cluster_radius, 40.0);
        assert_eq!(config.cluster.disable_clustering_at_zoom, 12);
        assert_eq!(config.timeout, 6000);
        assert!(!config.is_watch_mode());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.refresh_interval = 30;
        config.output_format = "JSON".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert!(loaded.is_watch_mode());
        assert!(loaded.is_json_output());
        assert_eq!(loaded.get_refresh_interval().as_secs(), 30);
    }

    #[test]
    fn test_invalid_map_center() {
        let map = MapConfig {
            center_lat: 120.0,
            ..MapConfig::default()
        };
        assert!(map.viewport().is_err());
        assert_eq!(MapConfig::default().viewport().unwrap().zoom, 2);
    }

    #[test]
    fn test_unknown_feed_format_rejected() {
        let result: Result<Config, _> = serde_yaml::from_str("feed_format: xml");
        assert!(result.is_err());
    }
}

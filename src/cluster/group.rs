use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::projection::{MAX_ZOOM, Point, Viewport, project};
use crate::marker::{Severity, StyledMarker};
use crate::proxy::Coordinates;

/// 聚合参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// 聚合半径（像素）
    pub max_cluster_radius: f64,
    /// 达到该缩放级别后不再聚合
    pub disable_clustering_at_zoom: u8,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            max_cluster_radius: 80.0,
            disable_clustering_at_zoom: MAX_ZOOM,
        }
    }
}

/// 聚合点：显示数量，颜色取成员中最差的等级
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub position: Coordinates,
    pub count: usize,
    pub severity: Severity,
    pub endpoints: Vec<String>,
}

impl Cluster {
    pub fn label(&self) -> String {
        format!("{} {} 个节点", self.severity.glyph(), self.count)
    }
}

/// 某个缩放级别下实际绘制的元素
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClusterNode {
    Marker(StyledMarker),
    Cluster(Cluster),
}

impl ClusterNode {
    pub fn position(&self) -> Coordinates {
        match self {
            ClusterNode::Marker(m) => m.position(),
            ClusterNode::Cluster(c) => c.position,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            ClusterNode::Marker(_) => 1,
            ClusterNode::Cluster(c) => c.count,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ClusterNode::Marker(m) => m.label(),
            ClusterNode::Cluster(c) => c.label(),
        }
    }
}

struct Seed {
    origin: Point,
    members: Vec<usize>,
}

/// 聚合图层：一次快照生成后不再修改
#[derive(Debug, Clone)]
pub struct ClusterLayer {
    markers: Vec<StyledMarker>,
    options: ClusterOptions,
}

impl ClusterLayer {
    pub fn new(markers: Vec<StyledMarker>, options: ClusterOptions) -> Self {
        Self { markers, options }
    }

    pub fn markers(&self) -> &[StyledMarker] {
        &self.markers
    }

    pub fn options(&self) -> ClusterOptions {
        self.options
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn severity_counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for marker in &self.markers {
            *counts.entry(marker.severity()).or_insert(0) += 1;
        }
        counts
    }

    /// 按像素距离贪心聚合：每个标记并入半径内最近的种子，否则自成种子
    pub fn clusters_at(&self, zoom: u8) -> Vec<ClusterNode> {
        let radius = self.options.max_cluster_radius;
        if zoom >= self.options.disable_clustering_at_zoom || !(radius > 0.0) {
            return self.markers.iter().cloned().map(ClusterNode::Marker).collect();
        }

        let mut seeds: Vec<Seed> = Vec::new();
        let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();

        for (idx, marker) in self.markers.iter().enumerate() {
            let p = project(marker.position(), zoom);
            let cell = ((p.x / radius).floor() as i64, (p.y / radius).floor() as i64);

            let mut nearest: Option<(usize, f64)> = None;
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let Some(ids) = grid.get(&(cell.0 + dx, cell.1 + dy)) else {
                        continue;
                    };
                    for &seed_idx in ids {
                        let d = seeds[seed_idx].origin.distance(&p);
                        if d <= radius && nearest.is_none_or(|(_, best)| d < best) {
                            nearest = Some((seed_idx, d));
                        }
                    }
                }
            }

            match nearest {
                Some((seed_idx, _)) => seeds[seed_idx].members.push(idx),
                None => {
                    grid.entry(cell).or_default().push(seeds.len());
                    seeds.push(Seed {
                        origin: p,
                        members: vec![idx],
                    });
                }
            }
        }

        seeds
            .into_iter()
            .map(|seed| self.node_for(&seed.members))
            .collect()
    }

    /// 当前视口内可见的元素
    pub fn visible(&self, viewport: &Viewport) -> Vec<ClusterNode> {
        self.clusters_at(viewport.zoom)
            .into_iter()
            .filter(|node| viewport.contains(node.position()))
            .collect()
    }

    fn node_for(&self, members: &[usize]) -> ClusterNode {
        if let [single] = members {
            return ClusterNode::Marker(self.markers[*single].clone());
        }

        let count = members.len() as f64;
        let (lat_sum, lng_sum) = members.iter().fold((0.0, 0.0), |(lat, lng), &i| {
            let p = self.markers[i].position();
            (lat + p.lat(), lng + p.lng())
        });
        let position = Coordinates::new(lat_sum / count, lng_sum / count)
            .unwrap_or_else(|_| self.markers[members[0]].position());

        let severity = members
            .iter()
            .map(|&i| self.markers[i].severity())
            .max()
            .unwrap_or(Severity::High);

        ClusterNode::Cluster(Cluster {
            position,
            count: members.len(),
            severity,
            endpoints: members
                .iter()
                .map(|&i| self.markers[i].record().endpoint())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::MarkerFactory;
    use crate::proxy::{Latency, ProxyRecord};

    fn marker(address: &str, latency: u32, lat: f64, lng: f64) -> StyledMarker {
        let record = ProxyRecord::new(
            address.to_string(),
            8080,
            Latency::Measured(latency),
            "US".to_string(),
        )
        .with_coordinates(Coordinates::new(lat, lng).unwrap());
        MarkerFactory::new().build(record).unwrap()
    }

    fn berlin_pair_and_new_york() -> ClusterLayer {
        ClusterLayer::new(
            vec![
                marker("10.0.0.1", 50, 52.52, 13.40),
                marker("10.0.0.2", 350, 52.53, 13.41),
                marker("10.0.0.3", 150, 40.71, -74.00),
            ],
            ClusterOptions::default(),
        )
    }

    #[test]
    fn test_nearby_markers_cluster_at_low_zoom() {
        let layer = berlin_pair_and_new_york();
        let nodes = layer.clusters_at(3);
        assert_eq!(nodes.len(), 2);

        let cluster = nodes
            .iter()
            .find_map(|n| match n {
                ClusterNode::Cluster(c) => Some(c),
                _ => None,
            })
            .unwrap();
        assert_eq!(cluster.count, 2);
        assert_eq!(cluster.severity, Severity::High);
        assert!((cluster.position.lat() - 52.525).abs() < 1e-9);
        assert_eq!(nodes.iter().map(ClusterNode::count).sum::<usize>(), 3);
    }

    #[test]
    fn test_zooming_in_splits_clusters() {
        let layer = berlin_pair_and_new_york();
        let counts: Vec<usize> = (0..=MAX_ZOOM).map(|z| layer.clusters_at(z).len()).collect();
        // 放大时聚合点只会越来越多
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(counts[MAX_ZOOM as usize], 3);
        assert!(counts[0] < 3);
    }

    #[test]
    fn test_disable_clustering_at_zoom() {
        let mut layer = berlin_pair_and_new_york();
        layer.options.disable_clustering_at_zoom = 2;
        assert_eq!(layer.clusters_at(2).len(), 3);
        assert_eq!(layer.clusters_at(1).len(), 2);
    }

    #[test]
    fn test_clustering_does_not_touch_markers() {
        let layer = berlin_pair_and_new_york();
        let before = layer.markers().to_vec();
        let _ = layer.clusters_at(0);
        let _ = layer.clusters_at(10);
        assert_eq!(layer.markers(), before.as_slice());
    }

    #[test]
    fn test_visible_filters_by_viewport() {
        let layer = berlin_pair_and_new_york();
        let europe = Viewport::new(Coordinates::new(50.0, 10.0).unwrap(), 6, 1280, 800);
        let nodes = layer.visible(&europe);
        assert_eq!(nodes.iter().map(ClusterNode::count).sum::<usize>(), 2);
    }

    #[test]
    fn test_severity_counts() {
        let layer = berlin_pair_and_new_york();
        let counts = layer.severity_counts();
        assert_eq!(counts.get(&Severity::Low), Some(&1));
        assert_eq!(counts.get(&Severity::Medium), Some(&1));
        assert_eq!(counts.get(&Severity::High), Some(&1));
    }
}

//! 地图宿主接口及无界面实现

use std::sync::{Arc, Mutex, PoisonError};

use crate::cluster::{ClusterLayer, ClusterNode, Viewport};
use crate::proxy::Coordinates;

/// 地图上图层的句柄，由宿主分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

/// 地图宿主需要提供的能力：增删图层、报告当前视口
pub trait MapView: Send {
    fn add_layer(&mut self, layer: Arc<ClusterLayer>) -> LayerId;

    /// 图层不存在时返回 false
    fn remove_layer(&mut self, id: LayerId) -> bool;

    /// 用新图层替换旧图层，一次调用内完成，观察者看不到中间状态
    fn replace_layer(&mut self, old: Option<LayerId>, layer: Arc<ClusterLayer>) -> LayerId {
        if let Some(old) = old {
            self.remove_layer(old);
        }
        self.add_layer(layer)
    }

    fn viewport(&self) -> Viewport;
}

/// 宿主通常由外部持有，管理器只拿共享句柄
impl<M: MapView + ?Sized> MapView for Arc<Mutex<M>> {
    fn add_layer(&mut self, layer: Arc<ClusterLayer>) -> LayerId {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_layer(layer)
    }

    fn remove_layer(&mut self, id: LayerId) -> bool {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_layer(id)
    }

    fn replace_layer(&mut self, old: Option<LayerId>, layer: Arc<ClusterLayer>) -> LayerId {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace_layer(old, layer)
    }

    fn viewport(&self) -> Viewport {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .viewport()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerEvent {
    Added(LayerId),
    Removed(LayerId),
}

/// 内存中的地图，记录图层增删，供命令行和测试使用
#[derive(Debug)]
pub struct HeadlessMap {
    viewport: Viewport,
    layers: Vec<(LayerId, Arc<ClusterLayer>)>,
    next_id: u64,
    events: Vec<LayerEvent>,
    peak_layers: usize,
}

impl HeadlessMap {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            layers: Vec::new(),
            next_id: 1,
            events: Vec::new(),
            peak_layers: 0,
        }
    }

    /// 便于多处共享的句柄
    pub fn shared(viewport: Viewport) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(viewport)))
    }

    pub fn set_zoom(&mut self, zoom: u8) {
        self.viewport = self.viewport.with_zoom(zoom);
    }

    pub fn pan_to(&mut self, center: Coordinates) {
        self.viewport = self.viewport.with_center(center);
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> impl Iterator<Item = &Arc<ClusterLayer>> {
        self.layers.iter().map(|(_, layer)| layer)
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|(id, _)| *id).collect()
    }

    pub fn events(&self) -> &[LayerEvent] {
        &self.events
    }

    /// 历史上同时挂载的最大图层数
    pub fn peak_layers(&self) -> usize {
        self.peak_layers
    }

    /// 按当前视口绘制所有图层
    pub fn render(&self) -> Vec<ClusterNode> {
        self.layers
            .iter()
            .flat_map(|(_, layer)| layer.visible(&self.viewport))
            .collect()
    }
}

impl MapView for HeadlessMap {
    fn add_layer(&mut self, layer: Arc<ClusterLayer>) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        self.layers.push((id, layer));
        self.events.push(LayerEvent::Added(id));
        self.peak_layers = self.peak_layers.max(self.layers.len());
        id
    }

    fn remove_layer(&mut self, id: LayerId) -> bool {
        let before = self.layers.len();
        self.layers.retain(|(layer_id, _)| *layer_id != id);
        let removed = self.layers.len() != before;
        if removed {
            self.events.push(LayerEvent::Removed(id));
        }
        removed
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterOptions;

    fn viewport() -> Viewport {
        Viewport::new(Coordinates::new(20.0, 0.0).unwrap(), 2, 1024, 768)
    }

    #[test]
    fn test_add_and_remove_layers() {
        let mut map = HeadlessMap::new(viewport());
        let layer = Arc::new(ClusterLayer::new(vec![], ClusterOptions::default()));

        let id = map.add_layer(layer);
        assert_eq!(map.layer_count(), 1);
        assert!(map.remove_layer(id));
        assert!(!map.remove_layer(id));
        assert_eq!(map.layer_count(), 0);
        assert_eq!(
            map.events(),
            &[LayerEvent::Added(id), LayerEvent::Removed(id)]
        );
    }

    #[test]
    fn test_shared_handle_forwards() {
        let shared = HeadlessMap::shared(viewport());
        let mut handle = shared.clone();
        let id = handle.add_layer(Arc::new(ClusterLayer::new(vec![], ClusterOptions::default())));
        assert_eq!(shared.lock().unwrap().layer_ids(), vec![id]);
        assert_eq!(handle.viewport().zoom, 2);
    }

    #[test]
    fn test_replace_layer_swaps_in_one_call() {
        let shared = HeadlessMap::shared(viewport());
        let mut handle = shared.clone();
        let first = handle.replace_layer(
            None,
            Arc::new(ClusterLayer::new(vec![], ClusterOptions::default())),
        );
        let second = handle.replace_layer(
            Some(first),
            Arc::new(ClusterLayer::new(vec![], ClusterOptions::default())),
        );

        let map = shared.lock().unwrap();
        assert_eq!(map.layer_ids(), vec![second]);
        assert_eq!(map.peak_layers(), 1);
        assert_eq!(
            map.events(),
            &[
                LayerEvent::Added(first),
                LayerEvent::Removed(first),
                LayerEvent::Added(second),
            ]
        );
    }

    #[test]
    fn test_zoom_and_pan() {
        let mut map = HeadlessMap::new(viewport());
        map.set_zoom(9);
        map.pan_to(Coordinates::new(51.0, 10.0).unwrap());
        assert_eq!(map.viewport().zoom, 9);
        assert_eq!(map.viewport().center().lat(), 51.0);
    }
}

//! 聚合图层与地图宿主
//! 对外提供挂载、更新、卸载三个操作

mod manager;
mod view;

pub use manager::{ApplyOutcome, ClusterLayerManager, UpdateTicket};
pub use view::{HeadlessMap, LayerEvent, LayerId, MapView};

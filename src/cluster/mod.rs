//! 标记聚合
//! 根据当前缩放级别把像素距离相近的标记合并为带数量的聚合点

mod group;
pub mod projection;

pub use group::{Cluster, ClusterLayer, ClusterNode, ClusterOptions};
pub use projection::{MAX_ZOOM, Viewport};

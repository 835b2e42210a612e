//! 代理节点地图：拉取代理列表，按延迟着色并在地图上聚合显示

pub mod cluster;
pub mod config;
pub mod geo;
pub mod layer;
pub mod marker;
pub mod proxy;
pub mod refresh;
pub mod source;
pub mod ui;

//! 聚合图层生命周期管理
//! 每个地图实例最多挂载一个聚合图层，更新按版本号决定是否生效

use log::{debug, info};
use std::sync::Arc;

use super::view::{LayerId, MapView};
use crate::cluster::{ClusterLayer, ClusterNode, ClusterOptions};
use crate::marker::MarkerFactory;
use crate::proxy::{ProxyRecord, retain_renderable};

/// 一次更新的版本号，按发起顺序递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UpdateTicket(u64);

impl UpdateTicket {
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

/// 应用一次更新的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 新图层已替换旧图层
    Applied {
        ticket: UpdateTicket,
        markers: usize,
        skipped: usize,
    },
    /// 更新的版本已被更晚发起的更新覆盖，结果丢弃
    Stale { ticket: UpdateTicket },
    /// 地图已卸载，结果丢弃
    Detached { ticket: UpdateTicket },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// 聚合图层管理器
pub struct ClusterLayerManager<V: MapView> {
    view: Option<V>,
    current: Option<(LayerId, Arc<ClusterLayer>)>,
    factory: MarkerFactory,
    options: ClusterOptions,
    /// 最近发出的版本号
    issued: u64,
    /// 最近生效的版本号
    applied: u64,
    /// 不大于该值的版本号在卸载时作废
    detached_at: u64,
}

impl<V: MapView> ClusterLayerManager<V> {
    pub fn new(options: ClusterOptions) -> Self {
        Self {
            view: None,
            current: None,
            factory: MarkerFactory::new(),
            options,
            issued: 0,
            applied: 0,
            detached_at: 0,
        }
    }

    /// 记录目标地图；在数据到达前不绘制任何内容
    pub fn attach(&mut self, view: V) {
        if self.view.is_some() {
            self.detach();
        }
        debug!("聚合图层管理器已挂载到地图");
        self.view = Some(view);
    }

    /// 移除当前图层并释放地图；未挂载时调用不做任何事
    pub fn detach(&mut self) {
        if let Some(view) = self.view.as_mut() {
            if let Some((id, _)) = self.current.take() {
                view.remove_layer(id);
                debug!("已移除聚合图层 {:?}", id);
            }
        }
        self.view = None;
        self.current = None;
        self.detached_at = self.issued;
    }

    /// 发起一次更新，返回版本号；拉取数据期间不持有任何地图状态
    pub fn begin_update(&mut self) -> UpdateTicket {
        self.issued += 1;
        UpdateTicket(self.issued)
    }

    /// 用拉取结果替换当前图层；版本过期或地图已卸载时丢弃
    pub fn apply(&mut self, ticket: UpdateTicket, records: Vec<ProxyRecord>) -> ApplyOutcome {
        if ticket.0 <= self.detached_at {
            debug!("地图已卸载，丢弃更新 #{}", ticket.0);
            return ApplyOutcome::Detached { ticket };
        }
        let Some(view) = self.view.as_mut() else {
            debug!("尚未挂载地图，丢弃更新 #{}", ticket.0);
            return ApplyOutcome::Detached { ticket };
        };
        if ticket.0 <= self.applied {
            debug!("更新 #{} 已过期（当前 #{}），丢弃", ticket.0, self.applied);
            return ApplyOutcome::Stale { ticket };
        }

        let total = records.len();
        let markers = self.factory.build_all(retain_renderable(records));
        let skipped = total - markers.len();
        let layer = Arc::new(ClusterLayer::new(markers, self.options));
        let marker_count = layer.len();

        // 移除旧图层和挂载新图层在宿主的同一次调用内完成
        let old_id = self.current.take().map(|(id, _)| id);
        let id = view.replace_layer(old_id, layer.clone());
        self.current = Some((id, layer));
        self.applied = ticket.0;

        info!(
            "更新 #{} 已生效: {} 个标记，跳过 {} 条",
            ticket.0, marker_count, skipped
        );

        ApplyOutcome::Applied {
            ticket,
            markers: marker_count,
            skipped,
        }
    }

    /// 同步更新：发起并立即应用
    pub fn update(&mut self, records: Vec<ProxyRecord>) -> ApplyOutcome {
        let ticket = self.begin_update();
        self.apply(ticket, records)
    }

    pub fn is_attached(&self) -> bool {
        self.view.is_some()
    }

    pub fn current_layer(&self) -> Option<Arc<ClusterLayer>> {
        self.current.as_ref().map(|(_, layer)| layer.clone())
    }

    pub fn current_layer_id(&self) -> Option<LayerId> {
        self.current.as_ref().map(|(id, _)| *id)
    }

    pub fn view(&self) -> Option<&V> {
        self.view.as_ref()
    }

    /// 当前视口中可见的标记与聚合点
    pub fn visible_clusters(&self) -> Vec<ClusterNode> {
        match (&self.view, &self.current) {
            (Some(view), Some((_, layer))) => layer.visible(&view.viewport()),
            _ => Vec::new(),
        }
    }
}

impl<V: MapView> Drop for ClusterLayerManager<V> {
    fn drop(&mut self) {
        self.detach();
    }
}

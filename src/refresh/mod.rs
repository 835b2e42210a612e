//! 刷新调度
//! 先领取版本号，再拉取数据（不持锁），最后按版本号决定是否替换图层

use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::MissedTickBehavior;

use crate::geo::{Geolocator, fill_missing};
use crate::layer::{ApplyOutcome, ClusterLayerManager, MapView};
use crate::source::{FetchError, ProxyDataSource};

pub type RefreshResult = Result<ApplyOutcome, FetchError>;

pub struct RefreshStats {
    pub attempts: AtomicU64,
    pub applied: AtomicU64,
    pub stale: AtomicU64,
    pub detached: AtomicU64,
    pub failed: AtomicU64,
    pub last_markers: AtomicU64,
}

impl RefreshStats {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            detached: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_markers: AtomicU64::new(0),
        }
    }

    fn record(&self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied { markers, .. } => {
                self.applied.fetch_add(1, Ordering::Relaxed);
                self.last_markers.store(*markers as u64, Ordering::Relaxed);
            }
            ApplyOutcome::Stale { .. } => {
                self.stale.fetch_add(1, Ordering::Relaxed);
            }
            ApplyOutcome::Detached { .. } => {
                self.detached.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn success_rate(&self) -> f64 {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);

        if attempts > 0 {
            ((attempts - failed) as f64 / attempts as f64) * 100.0
        } else {
            0.0
        }
    }
}

impl Default for RefreshStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 把数据源、地理定位和图层管理器串起来
pub struct Refresher<S, V: MapView> {
    source: Arc<S>,
    manager: Arc<Mutex<ClusterLayerManager<V>>>,
    geolocator: Option<Arc<dyn Geolocator>>,
    stats: Arc<RefreshStats>,
}

impl<S, V: MapView> Clone for Refresher<S, V> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            manager: self.manager.clone(),
            geolocator: self.geolocator.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<S, V> Refresher<S, V>
where
    S: ProxyDataSource + 'static,
    V: MapView + 'static,
{
    pub fn new(source: Arc<S>, manager: Arc<Mutex<ClusterLayerManager<V>>>) -> Self {
        Self {
            source,
            manager,
            geolocator: None,
            stats: Arc::new(RefreshStats::new()),
        }
    }

    pub fn with_geolocator(mut self, geolocator: Arc<dyn Geolocator>) -> Self {
        self.geolocator = Some(geolocator);
        self
    }

    pub fn stats(&self) -> Arc<RefreshStats> {
        self.stats.clone()
    }

    pub fn manager(&self) -> Arc<Mutex<ClusterLayerManager<V>>> {
        self.manager.clone()
    }

    /// 刷新一次；拉取失败时保留当前图层并返回错误
    pub async fn refresh(&self) -> RefreshResult {
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);
        let ticket = self.manager.lock().await.begin_update();
        debug!("开始刷新 #{}", ticket.sequence());

        let records = match self.source.fetch_all().await {
            Ok(records) => records,
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("刷新 #{} 失败，保留当前图层: {}", ticket.sequence(), e);
                return Err(e);
            }
        };

        let records = match &self.geolocator {
            Some(geolocator) => {
                let (records, filled) = fill_missing(records, geolocator.as_ref());
                if filled > 0 {
                    debug!("为 {} 个节点补全了坐标", filled);
                }
                records
            }
            None => records,
        };

        let outcome = self.manager.lock().await.apply(ticket, records);
        self.stats.record(&outcome);
        Ok(outcome)
    }

    /// 按固定间隔刷新，直到 shutdown 完成；退出时卸载图层，之后到达的结果全部丢弃
    /// 同一时间最多只有一个拉取在进行，上一次未完成时跳过本次
    pub async fn run<F, C>(&self, interval: Duration, shutdown: F, mut on_result: C)
    where
        F: Future<Output = ()>,
        C: FnMut(&RefreshResult),
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let in_flight = Arc::new(AtomicBool::new(false));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if in_flight.swap(true, Ordering::AcqRel) {
                        debug!("上一次刷新尚未完成，跳过本次");
                    } else {
                        let this = self.clone();
                        let tx = tx.clone();
                        let in_flight = in_flight.clone();
                        tokio::spawn(async move {
                            let result = this.refresh().await;
                            in_flight.store(false, Ordering::Release);
                            let _ = tx.send(result);
                        });
                    }
                }
                Some(result) = rx.recv() => on_result(&result),
            }
        }

        self.manager.lock().await.detach();
        info!("停止刷新，已卸载聚合图层");
    }
}

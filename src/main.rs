use anyhow::{Result, anyhow};
use clap::Parser;
use log::warn;
use std::path::Path;
use std::sync::Arc;

use proxy_map_rust::cluster::{ClusterLayer, ClusterNode};
use proxy_map_rust::config::Config;
use proxy_map_rust::geo::MaxMindGeolocator;
use proxy_map_rust::layer::{ClusterLayerManager, HeadlessMap};
use proxy_map_rust::proxy::Coordinates;
use proxy_map_rust::refresh::{RefreshStats, Refresher};
use proxy_map_rust::source::{FeedFormat, HttpProxySource};
use proxy_map_rust::ui::status::StatusIndicator;

/// 代理节点地图：按延迟着色并聚合显示
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short = 'f', long, default_value = "config/config.yaml")]
    config: String,

    /// 代理列表接口地址
    #[arg(short = 'e', long)]
    endpoint: Option<String>,

    /// 接口数据格式：flat, geonode
    #[arg(long)]
    format: Option<FeedFormat>,

    /// 超时时间（毫秒）
    #[arg(long)]
    timeout: Option<u64>,

    /// 缩放级别
    #[arg(long)]
    zoom: Option<u8>,

    /// 地图中心，格式为 lat,lng
    #[arg(long, allow_hyphen_values = true)]
    center: Option<String>,

    /// 刷新间隔（秒），0 表示只刷新一次
    #[arg(long)]
    interval: Option<u64>,

    /// GeoLite2-City 数据库路径
    #[arg(long)]
    geoip: Option<String>,

    /// 输出格式：text, json
    #[arg(long)]
    output: Option<String>,

    /// 是否显示进度
    #[arg(long)]
    progress: Option<bool>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

fn parse_center(value: &str) -> Result<Coordinates> {
    let (lat, lng) = value
        .split_once(',')
        .ok_or_else(|| anyhow!("地图中心格式应为 lat,lng: {}", value))?;
    let lat: f64 = lat.trim().parse()?;
    let lng: f64 = lng.trim().parse()?;
    Coordinates::new(lat, lng).map_err(|e| anyhow!("地图中心无效: {}", e))
}

fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(format) = args.format {
        config.feed_format = format;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = timeout;
    }
    if let Some(zoom) = args.zoom {
        config.map.zoom = zoom;
    }
    if let Some(center) = &args.center {
        let center = parse_center(center)?;
        config.map.center_lat = center.lat();
        config.map.center_lng = center.lng();
    }
    if let Some(interval) = args.interval {
        config.refresh_interval = interval;
    }
    if let Some(geoip) = &args.geoip {
        config.geoip_db = Some(geoip.clone());
    }
    if let Some(output) = &args.output {
        config.output_format = output.clone();
    }
    if let Some(progress) = args.progress {
        config.print_progress = progress;
    }
    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone();
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }
    Ok(())
}

fn print_map(nodes: &[ClusterNode], layer: Option<&ClusterLayer>) {
    println!("\n🗺️  当前视口:");
    println!("{:=<80}", "");

    if nodes.is_empty() {
        println!("（视口内没有可显示的节点）");
    }

    for (i, node) in nodes.iter().enumerate() {
        let position = node.position();
        println!(
            "{}. {} @ ({:.4}, {:.4})",
            i + 1,
            node.label(),
            position.lat(),
            position.lng()
        );
        match node {
            ClusterNode::Marker(marker) => {
                for line in marker.popup().lines() {
                    println!("   {}", line);
                }
            }
            ClusterNode::Cluster(cluster) => {
                println!("   成员: {}", cluster.endpoints.join(", "));
            }
        }
        println!("{:-<80}", "");
    }

    if let Some(layer) = layer {
        println!("\n延迟分布:");
        for (severity, count) in layer.severity_counts() {
            println!("  {} {}: {}", severity.glyph(), severity.description(), count);
        }
    }
}

fn print_map_json(nodes: &[ClusterNode], layer: Option<&ClusterLayer>) -> Result<()> {
    let summary = serde_json::json!({
        "markers": layer.map(|l| l.len()).unwrap_or(0),
        "severity": layer.map(|l| l.severity_counts()).unwrap_or_default(),
        "visible": nodes,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_summary(stats: &RefreshStats) {
    use std::sync::atomic::Ordering;

    println!("\n刷新摘要:");
    println!("{:=<80}", "");
    println!("刷新次数: {}", stats.attempts.load(Ordering::Relaxed));
    println!("已显示: {}", stats.applied.load(Ordering::Relaxed));
    println!("已过期: {}", stats.stale.load(Ordering::Relaxed));
    println!("已卸载: {}", stats.detached.load(Ordering::Relaxed));
    println!("失败: {}", stats.failed.load(Ordering::Relaxed));
    println!("成功率: {:.1}%", stats.success_rate());
    println!("最近节点数: {}", stats.last_markers.load(Ordering::Relaxed));
}

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    println!("🚀 代理节点地图 v{}", env!("CARGO_PKG_VERSION"));
    println!("{:=<80}", "");

    // 尝试加载配置文件
    let mut config = if Path::new(&args.config).exists() {
        println!("📁 从配置文件加载设置: {}", args.config);
        match Config::load_from_file(&args.config) {
            Ok(config) => {
                println!("✅ 配置文件加载成功");
                config
            }
            Err(e) => {
                println!("⚠️  配置文件加载失败: {}", e);
                println!("📝 使用默认配置");
                Config::default()
            }
        }
    } else {
        println!("📝 使用默认配置 (配置文件不存在: {})", args.config);
        Config::default()
    };

    // 覆盖命令行参数
    apply_overrides(&mut config, &args)?;

    // 设置日志级别，RUST_LOG 优先
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    let viewport = config.map.viewport()?;

    // 打印配置信息
    println!("\n⚙️  当前配置:");
    println!("  接口地址: {}", config.endpoint);
    println!("  数据格式: {}", config.feed_format);
    println!("  超时时间: {}ms", config.timeout);
    println!(
        "  地图中心: ({:.4}, {:.4}) 缩放 {}",
        config.map.center_lat, config.map.center_lng, viewport.zoom
    );
    println!(
        "  聚合半径: {}px，{} 级起不再聚合",
        config.cluster.max_cluster_radius, config.cluster.disable_clustering_at_zoom
    );
    if config.is_watch_mode() {
        println!("  刷新间隔: {}s", config.refresh_interval);
    } else {
        println!("  刷新间隔: 只刷新一次");
    }

    let source = Arc::new(HttpProxySource::new(
        &config.endpoint,
        config.feed_format,
        config.timeout,
    )?);

    let map = HeadlessMap::shared(viewport);
    let mut manager = ClusterLayerManager::new(config.cluster);
    manager.attach(map.clone());
    let manager = Arc::new(tokio::sync::Mutex::new(manager));

    let mut refresher = Refresher::new(source, manager.clone());
    if let Some(path) = &config.geoip_db {
        match MaxMindGeolocator::open(path) {
            Ok(geolocator) => {
                println!("  GeoIP 数据库: {}", path);
                refresher = refresher.with_geolocator(Arc::new(geolocator));
            }
            Err(e) => warn!("GeoIP 数据库不可用，跳过坐标补全: {}", e),
        }
    }

    let status = StatusIndicator::new(&config);

    if config.is_watch_mode() {
        println!("\n🔁 持续刷新中，按 Ctrl+C 退出");
        status.fetching(&config.endpoint);
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("监听 Ctrl+C 失败: {}", e);
            }
        };
        refresher
            .run(config.get_refresh_interval(), shutdown, |result| {
                status.report(result);
                if result.is_err() {
                    status.println(&StatusIndicator::describe(result));
                }
            })
            .await;
        status.finalize();
    } else {
        status.fetching(&config.endpoint);
        let result = refresher.refresh().await;
        status.report(&result);
        status.finalize();
        println!("{}", StatusIndicator::describe(&result));

        let (nodes, layer) = {
            let manager = manager.lock().await;
            (manager.visible_clusters(), manager.current_layer())
        };

        if config.is_json_output() {
            print_map_json(&nodes, layer.as_deref())?;
        } else {
            print_map(&nodes, layer.as_deref());
        }
    }

    // 卸载后地图上不应再有图层
    manager.lock().await.detach();
    let remaining = map.lock().map(|m| m.layer_count()).unwrap_or_default();
    if remaining > 0 {
        warn!("卸载后仍有 {} 个图层", remaining);
    }

    print_summary(&refresher.stats());

    Ok(())
}

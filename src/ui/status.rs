use crate::config::Config;
use crate::layer::ApplyOutcome;
use crate::refresh::RefreshResult;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// 刷新状态指示：拉取中 / 已显示 / 失败 / 丢弃
#[derive(Clone)]
pub struct StatusIndicator {
    spinner: Option<ProgressBar>,
}

impl StatusIndicator {
    pub fn new(config: &Config) -> Self {
        if !config.print_progress {
            return Self { spinner: None };
        }

        let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(120));

        Self {
            spinner: Some(spinner),
        }
    }

    /// 不输出任何内容的指示器
    pub fn hidden() -> Self {
        Self { spinner: None }
    }

    pub fn fetching(&self, endpoint: &str) {
        if let Some(pb) = &self.spinner {
            pb.set_message(format!("📡 正在拉取 {}", endpoint));
        }
    }

    pub fn report(&self, result: &RefreshResult) {
        if let Some(pb) = &self.spinner {
            pb.set_message(Self::describe(result));
        }
    }

    /// 暂停动画输出一行文字，避免和进度条互相覆盖
    pub fn println(&self, line: &str) {
        match &self.spinner {
            Some(pb) => pb.println(line),
            None => println!("{}", line),
        }
    }

    pub fn finalize(&self) {
        if let Some(pb) = &self.spinner {
            pb.finish_and_clear();
        }
    }

    pub fn describe(result: &RefreshResult) -> String {
        match result {
            Ok(ApplyOutcome::Applied {
                ticket,
                markers,
                skipped,
            }) => format!(
                "✅ 刷新 #{} 已显示 {} 个节点（跳过 {} 条）",
                ticket.sequence(),
                markers,
                skipped
            ),
            Ok(ApplyOutcome::Stale { ticket }) => {
                format!("⏭️  刷新 #{} 已过期，结果丢弃", ticket.sequence())
            }
            Ok(ApplyOutcome::Detached { ticket }) => {
                format!("⏹️  刷新 #{} 完成时地图已卸载", ticket.sequence())
            }
            Err(e) => format!("❌ 拉取失败，保留上次结果: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{ClusterLayerManager, HeadlessMap};
    use crate::source::{FetchError, TransportFailure};
    use reqwest::StatusCode;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_describe_outcomes() {
        let mut manager: ClusterLayerManager<Arc<Mutex<HeadlessMap>>> =
            ClusterLayerManager::new(Default::default());
        let config = Config::default();
        manager.attach(HeadlessMap::shared(config.map.viewport().unwrap()));

        let applied = manager.update(vec![]);
        assert!(StatusIndicator::describe(&Ok(applied)).contains("0 个节点"));

        let old = manager.begin_update();
        manager.update(vec![]);
        let stale = manager.apply(old, vec![]);
        assert!(StatusIndicator::describe(&Ok(stale)).contains("过期"));

        let err = FetchError::Transport {
            url: "http://localhost/api/proxies".to_string(),
            failure: TransportFailure::Status(StatusCode::INTERNAL_SERVER_ERROR),
        };
        let text = StatusIndicator::describe(&Err(err));
        assert!(text.contains("500"));
    }

    #[test]
    fn test_hidden_indicator_is_silent() {
        let mut config = Config::default();
        config.print_progress = false;
        let status = StatusIndicator::new(&config);
        status.fetching("http://localhost");
        status.finalize();
        assert!(status.spinner.is_none());
        assert!(StatusIndicator::hidden().spinner.is_none());
    }
}

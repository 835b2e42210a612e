//! 代理列表数据源
//! 每次调用只发一次请求，不做缓存也不做重试

mod types;

pub use types::{FeedFormat, Snapshot, decode_snapshot};

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::proxy::ProxyRecord;

/// 传输层失败的具体原因
#[derive(Debug, Error)]
pub enum TransportFailure {
    #[error("{0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP 状态码 {0}")]
    Status(StatusCode),
}

/// 拉取代理列表失败
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("请求 {url} 失败: {failure}")]
    Transport {
        url: String,
        #[source]
        failure: TransportFailure,
    },
    #[error("解析 {url} 的响应失败: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Transport { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, FetchError::Decode { .. })
    }
}

/// 代理列表来源
#[async_trait]
pub trait ProxyDataSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<ProxyRecord>, FetchError>;
}

/// 基于 HTTP 的代理列表来源
#[derive(Debug, Clone)]
pub struct HttpProxySource {
    client: Client,
    endpoint: Url,
    format: FeedFormat,
}

impl HttpProxySource {
    pub fn new(endpoint: &str, format: FeedFormat, timeout_ms: u64) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| anyhow::anyhow!("解析接口地址失败: {}: {}", endpoint, e))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(concat!("proxy-map-rust/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            format,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn format(&self) -> FeedFormat {
        self.format
    }

    fn transport_error(&self, failure: TransportFailure) -> FetchError {
        FetchError::Transport {
            url: self.endpoint.to_string(),
            failure,
        }
    }
}

#[async_trait]
impl ProxyDataSource for HttpProxySource {
    async fn fetch_all(&self) -> Result<Vec<ProxyRecord>, FetchError> {
        debug!("拉取代理列表: {}", self.endpoint);

        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.transport_error(TransportFailure::Status(status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e.into()))?;

        let snapshot =
            decode_snapshot(&body, self.format).map_err(|source| FetchError::Decode {
                url: self.endpoint.to_string(),
                source,
            })?;

        for reason in &snapshot.rejected {
            debug!("丢弃无效记录: {}", reason);
        }
        if !snapshot.rejected.is_empty() {
            warn!(
                "{} 返回 {} 条有效记录，丢弃 {} 条",
                self.endpoint,
                snapshot.records.len(),
                snapshot.rejected.len()
            );
        }

        Ok(snapshot.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn source_for(server: &MockServer, format: FeedFormat) -> HttpProxySource {
        HttpProxySource::new(&format!("{}/api/proxies", server.uri()), format, 2000).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_all_parses_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"ip":"193.32.1.5","port":3128,"latency":80,"country":"DE",
                     "lat":51.17,"lng":10.45,"type":"http","lastCheck":"2024-05-01T10:00:00Z"},
                    {"ip":"193.32.1.6","port":3128,"latency":80,"country":"DE",
                     "lat":200,"lng":10.45}]"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let source = source_for(&server, FeedFormat::Flat).await;
        let records = source.fetch_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].endpoint(), "193.32.1.5:3128");
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = source_for(&server, FeedFormat::Flat).await;
        let err = source.fetch_all().await.unwrap_err();
        assert!(err.is_transport());
        match err {
            FetchError::Transport {
                failure: TransportFailure::Status(status),
                ..
            } => assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let source = source_for(&server, FeedFormat::Flat).await;
        let err = source.fetch_all().await.unwrap_err();
        assert!(err.is_decode());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // 端口 9 (discard) 在测试环境中通常没有监听
        let source = HttpProxySource::new("http://127.0.0.1:9/proxies", FeedFormat::Flat, 500)
            .unwrap();
        let err = source.fetch_all().await.unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        assert!(HttpProxySource::new("not a url", FeedFormat::Flat, 1000).is_err());
    }
}

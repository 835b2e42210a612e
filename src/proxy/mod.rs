//! 代理节点数据模型
//! 一次拉取得到的快照由若干 ProxyRecord 组成，构造后不再修改

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// 单条记录被丢弃的原因（只记日志，不向调用方报错）
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordRejection {
    #[error("服务器地址不能为空")]
    EmptyAddress,
    #[error("端口号无效: {0}")]
    InvalidPort(String),
    #[error("延迟无效: {0}")]
    InvalidLatency(f64),
    #[error("国家代码无效: {0:?}")]
    InvalidCountry(String),
    #[error("坐标超出范围: lat={lat}, lng={lng}")]
    CoordinatesOutOfRange { lat: f64, lng: f64 },
    #[error("缺少坐标")]
    MissingCoordinates,
    #[error("重复的节点: {0}")]
    Duplicate(String),
    #[error("记录结构无效: {0}")]
    Malformed(String),
}

/// 延迟（毫秒），未测得时为 Unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Latency {
    Measured(u32),
    Unknown,
}

impl Latency {
    /// 从接口给出的浮点数构造；负数和非有限值视为无效
    pub fn from_raw(value: Option<f64>) -> Result<Self, RecordRejection> {
        match value {
            None => Ok(Latency::Unknown),
            Some(v) if !v.is_finite() || v < 0.0 => Err(RecordRejection::InvalidLatency(v)),
            Some(v) => Ok(Latency::Measured(v.round().min(u32::MAX as f64) as u32)),
        }
    }

    pub fn as_millis(&self) -> Option<u32> {
        match self {
            Latency::Measured(ms) => Some(*ms),
            Latency::Unknown => None,
        }
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Latency::Measured(ms) => write!(f, "{}ms", ms),
            Latency::Unknown => write!(f, "未知"),
        }
    }
}

/// 经纬度，构造时校验范围
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    lat: f64,
    lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Result<Self, RecordRejection> {
        let lat_ok = lat.is_finite() && (-90.0..=90.0).contains(&lat);
        let lng_ok = lng.is_finite() && (-180.0..=180.0).contains(&lng);
        if lat_ok && lng_ok {
            Ok(Self { lat, lng })
        } else {
            Err(RecordRejection::CoordinatesOutOfRange { lat, lng })
        }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }
}

/// 代理节点记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyRecord {
    pub address: String,
    pub port: u16,
    pub latency: Latency,
    pub country_code: String,
    pub city: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub kind: String,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    pub fn new(address: String, port: u16, latency: Latency, country_code: String) -> Self {
        Self {
            address,
            port,
            latency,
            country_code,
            city: None,
            coordinates: None,
            kind: "http".to_string(),
            last_checked_at: None,
        }
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn with_city(mut self, city: String) -> Self {
        self.city = Some(city);
        self
    }

    pub fn with_kind(mut self, kind: String) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_last_checked_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_checked_at = Some(at);
        self
    }

    /// 快照内唯一键（address:port）
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn ip_address(&self) -> Option<IpAddr> {
        self.address.parse().ok()
    }

    pub fn is_renderable(&self) -> bool {
        self.coordinates.is_some()
    }
}

pub fn validate_address(address: &str) -> Result<String, RecordRejection> {
    let address = address.trim();
    if address.is_empty() {
        return Err(RecordRejection::EmptyAddress);
    }
    Ok(address.to_string())
}

pub fn validate_port(port: i64) -> Result<u16, RecordRejection> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(RecordRejection::InvalidPort(port.to_string())),
    }
}

/// 国家代码：2~3 位 ASCII 字母，统一转大写
pub fn validate_country(country: &str) -> Result<String, RecordRejection> {
    let code = country.trim();
    let ok = (2..=3).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphabetic());
    if !ok {
        return Err(RecordRejection::InvalidCountry(country.to_string()));
    }
    Ok(code.to_ascii_uppercase())
}

/// 协议类型统一小写，缺省为 http
pub fn normalize_kind(kind: Option<&str>) -> String {
    match kind.map(str::trim) {
        Some(k) if !k.is_empty() => k.to_ascii_lowercase(),
        _ => "http".to_string(),
    }
}

/// 去掉同一快照内重复的 address:port，保留首次出现的记录
pub fn dedup_endpoints(records: Vec<ProxyRecord>) -> (Vec<ProxyRecord>, Vec<RecordRejection>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for record in records {
        let key = record.endpoint();
        if seen.insert(key.clone()) {
            kept.push(record);
        } else {
            rejected.push(RecordRejection::Duplicate(key));
        }
    }

    (kept, rejected)
}

/// 过滤出可以上图的记录（有坐标且不重复），重复调用结果不变
pub fn retain_renderable(records: Vec<ProxyRecord>) -> Vec<ProxyRecord> {
    let (unique, _) = dedup_endpoints(records);
    unique.into_iter().filter(ProxyRecord::is_renderable).collect()
}

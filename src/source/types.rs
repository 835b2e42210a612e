//! 代理列表接口的报文结构及逐条校验

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::proxy::{
    Coordinates, Latency, ProxyRecord, RecordRejection, dedup_endpoints, normalize_kind,
    validate_address, validate_country, validate_port,
};

/// 接口报文格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    /// 顶层即为数组：[{ip, port, latency, country, city, lat, lng, type, lastCheck}]
    #[default]
    Flat,
    /// geonode 风格：{"data": [{ip, port, latency, country, city, protocols, lastChecked, geo}]}
    Geonode,
}

impl FromStr for FeedFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(FeedFormat::Flat),
            "geonode" => Ok(FeedFormat::Geonode),
            other => Err(anyhow::anyhow!("不支持的报文格式: {}", other)),
        }
    }
}

impl fmt::Display for FeedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedFormat::Flat => write!(f, "flat"),
            FeedFormat::Geonode => write!(f, "geonode"),
        }
    }
}

/// 端口可能是数字也可能是字符串
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl PortValue {
    fn resolve(&self) -> Result<u16, RecordRejection> {
        match self {
            PortValue::Integer(n) => validate_port(*n),
            PortValue::Float(f) if f.fract() == 0.0 && f.is_finite() => validate_port(*f as i64),
            PortValue::Float(f) => Err(RecordRejection::InvalidPort(f.to_string())),
            PortValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| RecordRejection::InvalidPort(s.clone()))
                .and_then(validate_port),
        }
    }
}

/// 时间戳：ISO-8601 字符串或 Unix 秒（可带小数）；其他形状一律当作无法解析
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimestampValue {
    Unix(i64),
    Fractional(f64),
    Text(String),
    Other(serde_json::Value),
}

impl TimestampValue {
    /// 无法解析时返回 None，不影响整条记录
    fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            TimestampValue::Unix(secs) => Utc.timestamp_opt(*secs, 0).single(),
            TimestampValue::Fractional(secs) if secs.is_finite() => {
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
                Utc.timestamp_opt(whole as i64, nanos).single()
            }
            TimestampValue::Fractional(_) | TimestampValue::Other(_) => None,
            TimestampValue::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    ip: Option<String>,
    port: Option<PortValue>,
    latency: Option<f64>,
    country: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "lastCheck")]
    last_check: Option<TimestampValue>,
}

#[derive(Debug, Deserialize)]
struct GeonodeGeo {
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GeonodeEntry {
    ip: Option<String>,
    port: Option<PortValue>,
    latency: Option<f64>,
    country: Option<String>,
    city: Option<String>,
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(rename = "lastChecked")]
    last_checked: Option<TimestampValue>,
    geo: Option<GeonodeGeo>,
}

#[derive(Debug, Deserialize)]
struct GeonodeEnvelope {
    data: Vec<serde_json::Value>,
}

/// 两种报文统一后的中间结构
struct RawProxy {
    ip: Option<String>,
    port: Option<PortValue>,
    latency: Option<f64>,
    country: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    kind: Option<String>,
    last_check: Option<TimestampValue>,
}

impl From<FlatEntry> for RawProxy {
    fn from(e: FlatEntry) -> Self {
        Self {
            ip: e.ip,
            port: e.port,
            latency: e.latency,
            country: e.country,
            city: e.city,
            lat: e.lat,
            lng: e.lng,
            kind: e.kind,
            last_check: e.last_check,
        }
    }
}

impl From<GeonodeEntry> for RawProxy {
    fn from(e: GeonodeEntry) -> Self {
        let (lat, lng) = match e.geo {
            Some(geo) => (geo.lat, geo.lon),
            None => (None, None),
        };
        Self {
            ip: e.ip,
            port: e.port,
            latency: e.latency,
            country: e.country,
            city: e.city,
            lat,
            lng,
            kind: e.protocols.into_iter().next(),
            last_check: e.last_checked,
        }
    }
}

impl RawProxy {
    fn validate(self) -> Result<ProxyRecord, RecordRejection> {
        let address = validate_address(self.ip.as_deref().unwrap_or(""))?;
        let port = match &self.port {
            Some(p) => p.resolve()?,
            None => return Err(RecordRejection::InvalidPort("缺失".to_string())),
        };
        let latency = Latency::from_raw(self.latency)?;
        let country_code = validate_country(self.country.as_deref().unwrap_or(""))?;

        // 只给出经纬度其中之一视为缺失，交给后续地理定位补全
        let coordinates = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)?),
            _ => None,
        };

        let mut record = ProxyRecord::new(address, port, latency, country_code)
            .with_kind(normalize_kind(self.kind.as_deref()));
        record.coordinates = coordinates;
        record.city = self
            .city
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        record.last_checked_at = self.last_check.as_ref().and_then(TimestampValue::resolve);

        Ok(record)
    }
}

/// 一次解析得到的快照
#[derive(Debug, Default)]
pub struct Snapshot {
    pub records: Vec<ProxyRecord>,
    pub rejected: Vec<RecordRejection>,
}

/// 解析响应体；只有顶层结构不对时才报错，单条记录无效则丢弃
pub fn decode_snapshot(body: &str, format: FeedFormat) -> Result<Snapshot, serde_json::Error> {
    let items: Vec<serde_json::Value> = match format {
        FeedFormat::Flat => serde_json::from_str(body)?,
        FeedFormat::Geonode => serde_json::from_str::<GeonodeEnvelope>(body)?.data,
    };

    let mut records = Vec::with_capacity(items.len());
    let mut rejected = Vec::new();

    for item in items {
        let raw: Result<RawProxy, serde_json::Error> = match format {
            FeedFormat::Flat => serde_json::from_value::<FlatEntry>(item).map(RawProxy::from),
            FeedFormat::Geonode => {
                serde_json::from_value::<GeonodeEntry>(item).map(RawProxy::from)
            }
        };

        match raw
            .map_err(|e| RecordRejection::Malformed(e.to_string()))
            .and_then(RawProxy::validate)
        {
            Ok(record) => records.push(record),
            Err(reason) => rejected.push(reason),
        }
    }

    let (records, duplicates) = dedup_endpoints(records);
    rejected.extend(duplicates);

    Ok(Snapshot { records, rejected })
}

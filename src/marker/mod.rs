//! 根据延迟为代理节点生成地图标记
//! 纯函数，不依赖地图视图

use serde::Serialize;
use std::fmt;

use crate::proxy::{Coordinates, Latency, ProxyRecord, RecordRejection};

/// 低延迟上限（不含）
pub const LOW_LATENCY_LIMIT_MS: u32 = 100;
/// 中等延迟上限（不含）
pub const MEDIUM_LATENCY_LIMIT_MS: u32 = 300;

/// 标记图标边长（像素）
pub const ICON_SIZE_PX: u32 = 24;

/// 延迟等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// 未知延迟按 High 处理
    pub fn from_latency(latency: Latency) -> Self {
        match latency {
            Latency::Measured(ms) if ms < LOW_LATENCY_LIMIT_MS => Severity::Low,
            Latency::Measured(ms) if ms < MEDIUM_LATENCY_LIMIT_MS => Severity::Medium,
            Latency::Measured(_) | Latency::Unknown => Severity::High,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Severity::Low => "green",
            Severity::Medium => "orange",
            Severity::High => "red",
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟠",
            Severity::High => "🔴",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Severity::Low => "快速",
            Severity::Medium => "一般",
            Severity::High => "较慢",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.glyph(), self.description())
    }
}

/// 圆形图标描述：边长、锚点、颜色和中间显示的延迟数字
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerIcon {
    pub size: u32,
    pub anchor: (u32, u32),
    pub color: &'static str,
    pub text: String,
}

/// 带样式的地图标记；等级每次从记录的延迟计算
#[derive(Debug, Clone, PartialEq)]
pub struct StyledMarker {
    record: ProxyRecord,
    position: Coordinates,
}

impl StyledMarker {
    pub fn record(&self) -> &ProxyRecord {
        &self.record
    }

    pub fn position(&self) -> Coordinates {
        self.position
    }

    pub fn severity(&self) -> Severity {
        Severity::from_latency(self.record.latency)
    }

    pub fn color(&self) -> &'static str {
        self.severity().color()
    }

    /// 单行标签：地址、端口、国家、延迟
    pub fn label(&self) -> String {
        format!(
            "{} {} [{}] {}",
            self.severity().glyph(),
            self.record.endpoint(),
            self.record.country_code,
            self.record.latency
        )
    }

    /// 点击后弹出的详情
    pub fn popup(&self) -> String {
        let mut lines = vec![
            self.record.endpoint(),
            format!("Country: {}", self.record.country_code),
        ];
        if let Some(city) = &self.record.city {
            lines.push(format!("City: {}", city));
        }
        lines.push(format!("Latency: {}", self.record.latency));
        lines.push(format!("Type: {}", self.record.kind));
        if let Some(at) = self.record.last_checked_at {
            lines.push(format!("Checked: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        lines.join("\n")
    }

    pub fn icon(&self) -> MarkerIcon {
        MarkerIcon {
            size: ICON_SIZE_PX,
            anchor: (ICON_SIZE_PX / 2, ICON_SIZE_PX / 2),
            color: self.color(),
            text: self
                .record
                .latency
                .as_millis()
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "?".to_string()),
        }
    }
}

impl Serialize for StyledMarker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("StyledMarker", 6)?;
        state.serialize_field("endpoint", &self.record.endpoint())?;
        state.serialize_field("position", &self.position)?;
        state.serialize_field("severity", &self.severity())?;
        state.serialize_field("color", self.color())?;
        state.serialize_field("label", &self.label())?;
        state.serialize_field("icon", &self.icon())?;
        state.end()
    }
}

/// 标记工厂
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerFactory;

impl MarkerFactory {
    pub fn new() -> Self {
        Self
    }

    /// 没有坐标的记录无法上图
    pub fn build(&self, record: ProxyRecord) -> Result<StyledMarker, RecordRejection> {
        let position = record
            .coordinates
            .ok_or(RecordRejection::MissingCoordinates)?;
        Ok(StyledMarker { record, position })
    }

    /// 批量生成，跳过无法上图的记录
    pub fn build_all(&self, records: Vec<ProxyRecord>) -> Vec<StyledMarker> {
        records
            .into_iter()
            .filter_map(|record| self.build(record).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_latency(latency: Latency) -> ProxyRecord {
        ProxyRecord::new("192.168.1.1".to_string(), 8080, latency, "US".to_string())
            .with_coordinates(Coordinates::new(37.09, -95.71).unwrap())
    }

    #[test]
    fn test_severity_thresholds() {
        let cases = [
            (Latency::Measured(0), Severity::Low),
            (Latency::Measured(99), Severity::Low),
            (Latency::Measured(100), Severity::Medium),
            (Latency::Measured(299), Severity::Medium),
            (Latency::Measured(300), Severity::High),
            (Latency::Measured(5000), Severity::High),
            (Latency::Unknown, Severity::High),
        ];
        for (latency, expected) in cases {
            assert_eq!(Severity::from_latency(latency), expected, "{latency:?}");
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let factory = MarkerFactory::new();
        let a = factory.build(record_with_latency(Latency::Measured(120))).unwrap();
        let b = factory.build(record_with_latency(Latency::Measured(120))).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.severity(), Severity::Medium);
        assert_eq!(a.color(), "orange");
        assert_eq!(a.position().lat(), 37.09);
    }

    #[test]
    fn test_build_requires_coordinates() {
        let factory = MarkerFactory::new();
        let record = ProxyRecord::new(
            "10.0.0.1".to_string(),
            80,
            Latency::Measured(10),
            "US".to_string(),
        );
        assert_eq!(
            factory.build(record).unwrap_err(),
            RecordRejection::MissingCoordinates
        );
    }

    #[test]
    fn test_label_and_popup() {
        let marker = MarkerFactory::new()
            .build(record_with_latency(Latency::Measured(120)).with_city("Wichita".to_string()))
            .unwrap();
        let label = marker.label();
        assert!(label.contains("192.168.1.1:8080"));
        assert!(label.contains("US"));
        assert!(label.contains("120ms"));

        let popup = marker.popup();
        assert!(popup.starts_with("192.168.1.1:8080\n"));
        assert!(popup.contains("Country: US"));
        assert!(popup.contains("City: Wichita"));
        assert!(popup.contains("Latency: 120ms"));
    }

    #[test]
    fn test_icon_for_unknown_latency() {
        let marker = MarkerFactory::new()
            .build(record_with_latency(Latency::Unknown))
            .unwrap();
        let icon = marker.icon();
        assert_eq!(icon.text, "?");
        assert_eq!(icon.color, "red");
        assert_eq!(icon.size, 24);
        assert_eq!(icon.anchor, (12, 12));
    }
}

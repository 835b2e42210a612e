//! 为缺少坐标的节点补全地理位置（GeoLite2-City 数据库）

use log::debug;
use maxminddb::{MaxMindDBError, Reader, geoip2::City};
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;

use crate::proxy::{Coordinates, ProxyRecord};

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("打开 GeoIP 数据库 {path} 失败: {source}")]
    Open {
        path: String,
        #[source]
        source: MaxMindDBError,
    },
}

/// 一次定位结果
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFix {
    pub coordinates: Coordinates,
    pub city: Option<String>,
}

/// 地址到地理位置的查询
pub trait Geolocator: Send + Sync {
    fn locate(&self, ip: IpAddr) -> Option<GeoFix>;
}

/// 基于 MaxMind 数据库的定位
pub struct MaxMindGeolocator {
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeolocator {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GeoError> {
        let reader = Reader::open_readfile(path.as_ref()).map_err(|source| GeoError::Open {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Ok(Self { reader })
    }
}

impl Geolocator for MaxMindGeolocator {
    fn locate(&self, ip: IpAddr) -> Option<GeoFix> {
        let city: City = self.reader.lookup(ip).ok()?;

        let location = city.location?;
        let coordinates = Coordinates::new(location.latitude?, location.longitude?).ok()?;
        let city_name = city
            .city
            .and_then(|c| c.names)
            .and_then(|names| names.get("en").map(|name| name.to_string()));
        Some(GeoFix {
            coordinates,
            city: city_name,
        })
    }
}

/// 返回新的快照：只给缺少坐标的记录补全位置，已有坐标的保持不变
pub fn fill_missing<G: Geolocator + ?Sized>(
    records: Vec<ProxyRecord>,
    geolocator: &G,
) -> (Vec<ProxyRecord>, usize) {
    let mut filled = 0;
    let records = records
        .into_iter()
        .map(|record| {
            if record.coordinates.is_some() {
                return record;
            }
            let Some(ip) = record.ip_address() else {
                debug!("{} 不是 IP 地址，跳过定位", record.endpoint());
                return record;
            };
            match geolocator.locate(ip) {
                Some(fix) => {
                    filled += 1;
                    let city = record.city.clone().or(fix.city);
                    let mut located = record.with_coordinates(fix.coordinates);
                    located.city = city;
                    located
                }
                None => {
                    debug!("无法定位 {}", record.endpoint());
                    record
                }
            }
        })
        .collect();
    (records, filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Latency;
    use std::collections::HashMap;

    struct FixedGeolocator(HashMap<IpAddr, GeoFix>);

    impl Geolocator for FixedGeolocator {
        fn locate(&self, ip: IpAddr) -> Option<GeoFix> {
            self.0.get(&ip).cloned()
        }
    }

    fn bare(address: &str) -> ProxyRecord {
        ProxyRecord::new(
            address.to_string(),
            3128,
            Latency::Measured(40),
            "DE".to_string(),
        )
    }

    #[test]
    fn test_fill_missing_only_touches_unlocated_records() {
        let fix = GeoFix {
            coordinates: Coordinates::new(51.17, 10.45).unwrap(),
            city: Some("Berlin".to_string()),
        };
        let geolocator = FixedGeolocator(HashMap::from([
            ("193.32.1.5".parse().unwrap(), fix.clone()),
            ("193.32.1.6".parse().unwrap(), fix),
        ]));

        let already = bare("193.32.1.6").with_coordinates(Coordinates::new(1.0, 2.0).unwrap());
        let records = vec![
            bare("193.32.1.5"),
            already.clone(),
            bare("8.8.8.8"),
            bare("proxy.example.com"),
        ];

        let (records, filled) = fill_missing(records, &geolocator);
        assert_eq!(filled, 1);
        assert_eq!(records[0].coordinates.unwrap().lat(), 51.17);
        assert_eq!(records[0].city.as_deref(), Some("Berlin"));
        assert_eq!(records[1], already);
        assert!(records[2].coordinates.is_none());
        assert!(records[3].coordinates.is_none());
    }

    #[test]
    fn test_open_missing_database_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = MaxMindGeolocator::open(dir.path().join("GeoLite2-City.mmdb")).err();
        assert!(matches!(err, Some(GeoError::Open { .. })));
    }

    #[test]
    fn test_open_garbage_database_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not a maxmind database").unwrap();
        assert!(MaxMindGeolocator::open(file.path()).is_err());
    }
}

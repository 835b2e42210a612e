//! Web Mercator 投影与视口计算（256 像素瓦片）

use serde::Serialize;
use std::f64::consts::PI;

use crate::proxy::Coordinates;

pub const TILE_SIZE: f64 = 256.0;
/// Web Mercator 可表示的最大纬度
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;
pub const MAX_ZOOM: u8 = 18;

/// 世界像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

pub fn world_size(zoom: u8) -> f64 {
    TILE_SIZE * 2f64.powi(zoom as i32)
}

pub fn project(coords: Coordinates, zoom: u8) -> Point {
    let size = world_size(zoom);
    let lat = coords.lat().clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (coords.lng() + 180.0) / 360.0 * size;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * size;
    Point { x, y }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelBounds {
    pub min: Point,
    pub max: Point,
}

impl PixelBounds {
    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// 地图视口：中心、缩放级别、像素尺寸
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    center: Coordinates,
    pub zoom: u8,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(center: Coordinates, zoom: u8, width: u32, height: u32) -> Self {
        Self {
            center,
            zoom: zoom.min(MAX_ZOOM),
            width,
            height,
        }
    }

    pub fn center(&self) -> Coordinates {
        self.center
    }

    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom.min(MAX_ZOOM);
        self
    }

    pub fn with_center(mut self, center: Coordinates) -> Self {
        self.center = center;
        self
    }

    pub fn pixel_bounds(&self) -> PixelBounds {
        let c = project(self.center(), self.zoom);
        let half_w = self.width as f64 / 2.0;
        let half_h = self.height as f64 / 2.0;
        PixelBounds {
            min: Point {
                x: c.x - half_w,
                y: c.y - half_h,
            },
            max: Point {
                x: c.x + half_w,
                y: c.y + half_h,
            },
        }
    }

    pub fn contains(&self, coords: Coordinates) -> bool {
        self.pixel_bounds().contains(&project(coords, self.zoom))
    }
}

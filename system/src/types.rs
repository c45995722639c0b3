use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ConnectionId = u16;
pub type CommandId = u16;
pub type TransactionId = uuid::Uuid;
pub type SessionId = uuid::Uuid;
pub type StrokeId = uuid::Uuid;
pub type LearnerId = String;
pub type RoomId = String;
pub type Timestamp = DateTime<Utc>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
    };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl std::default::Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Logical (CSS) pixels: the coordinate space strokes are captured in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LogicalPixel;

/// Pixels of the backing raster.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DevicePixel;

pub type LogicalPoint = euclid::Point2D<f32, LogicalPixel>;
pub type LogicalSize = euclid::Size2D<f32, LogicalPixel>;
pub type DevicePoint = euclid::Point2D<f32, DevicePixel>;
pub type DeviceScale = euclid::Scale<f32, LogicalPixel, DevicePixel>;

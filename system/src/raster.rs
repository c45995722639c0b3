use crate::types::{Color, DevicePixel, DevicePoint};
use euclid::{Box2D, Point2D};

type DeviceBox = Box2D<i64, DevicePixel>;

/// An RGB pixel buffer. Pixel `(x, y)` covers the unit square whose center is
/// at `(x + 0.5, y + 0.5)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterCanvas {
    width: u32,
    height: u32,
    pixels: Vec<Color>,
}

impl RasterCanvas {
    pub fn new(width: u32, height: u32, fill: Color) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x < self.width && y < self.height {
            Some(self.pixels[self.index(x, y)])
        } else {
            None
        }
    }

    pub fn clear(&mut self, color: Color) {
        for pixel in self.pixels.iter_mut() {
            *pixel = color;
        }
    }

    pub fn fill_disc(&mut self, center: DevicePoint, radius: f32, color: Color) {
        self.draw_segment(center, center, radius, color);
    }

    /// Paints every pixel whose center lies within `radius` of the segment,
    /// i.e. a line with round caps.
    pub fn draw_segment(&mut self, from: DevicePoint, to: DevicePoint, radius: f32, color: Color) {
        let radius = radius.max(0.5);
        let bounds = match self.clip(from, to, radius) {
            Some(bounds) => bounds,
            None => return,
        };

        let direction = to - from;
        let length_sq = direction.square_length();
        let radius_sq = radius * radius;

        for y in bounds.min.y..bounds.max.y {
            for x in bounds.min.x..bounds.max.x {
                let center = Point2D::new(x as f32 + 0.5, y as f32 + 0.5);
                let t = if length_sq > 0.0 {
                    ((center - from).dot(direction) / length_sq).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let nearest = from + direction * t;
                if (center - nearest).square_length() <= radius_sq {
                    let index = self.index(x as u32, y as u32);
                    self.pixels[index] = color;
                }
            }
        }
    }

    fn clip(&self, from: DevicePoint, to: DevicePoint, radius: f32) -> Option<DeviceBox> {
        if !(from.x.is_finite() && from.y.is_finite() && to.x.is_finite() && to.y.is_finite()) {
            log::warn!("Skip segment with non-finite coordinates");
            return None;
        }
        let min_x = (from.x.min(to.x) - radius).floor().max(0.0) as i64;
        let min_y = (from.y.min(to.y) - radius).floor().max(0.0) as i64;
        let max_x = ((from.x.max(to.x) + radius).ceil() as i64).min(self.width as i64);
        let max_y = ((from.y.max(to.y) + radius).ceil() as i64).min(self.height as i64);
        let bounds = Box2D::new(Point2D::new(min_x, min_y), Point2D::new(max_x, max_y));
        if bounds.is_empty() {
            None
        } else {
            Some(bounds)
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

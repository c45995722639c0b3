use crate::raster::RasterCanvas;
use crate::types::{Color, DeviceScale, LogicalPoint, StrokeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Pen,
    Eraser,
}

/// One committed freehand gesture. Points are in logical pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub id: StrokeId,
    pub points: Vec<LogicalPoint>,
    pub color: Color,
    pub stroke_width: f32,
    pub tool: Tool,
}

impl Stroke {
    pub fn is_valid(&self) -> bool {
        !self.points.is_empty()
            && self.stroke_width.is_finite()
            && self.stroke_width > 0.0
            && self.points.iter().all(|p| p.x.is_finite() && p.y.is_finite())
    }

    pub fn paint(&self, canvas: &mut RasterCanvas, scale: DeviceScale) {
        paint_points(canvas, scale, &self.points, self.stroke_width, self.color);
    }
}

/// Draws a polyline with round joins and caps. A single point becomes a dot.
pub(crate) fn paint_points(
    canvas: &mut RasterCanvas,
    scale: DeviceScale,
    points: &[LogicalPoint],
    stroke_width: f32,
    color: Color,
) {
    let radius = stroke_width * scale.get() / 2.0;
    match points {
        [] => {}
        [only] => canvas.fill_disc(*only * scale, radius, color),
        _ => {
            for pair in points.windows(2) {
                canvas.draw_segment(pair[0] * scale, pair[1] * scale, radius, color);
            }
        }
    }
}

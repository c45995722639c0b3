use crate::raster::RasterCanvas;
use crate::stroke::{paint_points, Stroke, Tool};
use crate::types::{Color, DeviceScale, LogicalPoint, LogicalSize};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenSettings {
    pub tool: Tool,
    pub color: Color,
    pub stroke_width: f32,
}

impl Default for PenSettings {
    fn default() -> Self {
        Self {
            tool: Tool::Pen,
            color: Color::BLACK,
            stroke_width: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
struct StrokeInProgress {
    points: Vec<LogicalPoint>,
    color: Color,
    stroke_width: f32,
    tool: Tool,
}

/// Captures pointer gestures into strokes and renders them onto a raster
/// backing store sized `logical_size * device_pixel_ratio`.
///
/// Committed strokes are not kept here: the owning collection (a board) is
/// the source of truth and is passed to `render_all` whenever it changes.
#[derive(Debug, Clone)]
pub struct DrawingSurface {
    canvas: RasterCanvas,
    logical_size: LogicalSize,
    scale: DeviceScale,
    background: Color,
    pen: PenSettings,
    in_progress: Option<StrokeInProgress>,
}

fn backing_canvas(logical_size: LogicalSize, scale: DeviceScale, background: Color) -> RasterCanvas {
    let device_size = logical_size * scale;
    RasterCanvas::new(
        device_size.width.max(0.0).ceil() as u32,
        device_size.height.max(0.0).ceil() as u32,
        background,
    )
}

impl DrawingSurface {
    pub fn new(logical_size: LogicalSize, device_pixel_ratio: f32, background: Color) -> Self {
        let scale = DeviceScale::new(device_pixel_ratio);
        Self {
            canvas: backing_canvas(logical_size, scale, background),
            logical_size,
            scale,
            background,
            pen: PenSettings::default(),
            in_progress: None,
        }
    }

    pub fn canvas(&self) -> &RasterCanvas {
        &self.canvas
    }

    pub fn logical_size(&self) -> LogicalSize {
        self.logical_size
    }

    pub fn background(&self) -> Color {
        self.background
    }

    pub fn pen(&self) -> PenSettings {
        self.pen
    }

    /// Takes effect from the next `begin_stroke`.
    pub fn set_pen(&mut self, pen: PenSettings) {
        self.pen = pen;
    }

    pub fn is_drawing(&self) -> bool {
        self.in_progress.is_some()
    }

    pub fn begin_stroke(&mut self, point: LogicalPoint) -> bool {
        if self.in_progress.is_some() {
            return false;
        }
        let color = match self.pen.tool {
            Tool::Pen => self.pen.color,
            Tool::Eraser => self.background,
        };
        let stroke = StrokeInProgress {
            points: vec![point],
            color,
            stroke_width: self.pen.stroke_width,
            tool: self.pen.tool,
        };
        paint_points(
            &mut self.canvas,
            self.scale,
            &stroke.points,
            stroke.stroke_width,
            stroke.color,
        );
        self.in_progress = Some(stroke);
        true
    }

    /// Appends `point` and paints only the segment that ends at it.
    pub fn extend_stroke(&mut self, point: LogicalPoint) -> bool {
        let stroke = match self.in_progress.as_mut() {
            Some(stroke) => stroke,
            None => return false,
        };
        let last = match stroke.points.last() {
            Some(last) => *last,
            None => return false,
        };
        stroke.points.push(point);
        paint_points(
            &mut self.canvas,
            self.scale,
            &[last, point],
            stroke.stroke_width,
            stroke.color,
        );
        true
    }

    pub fn commit_stroke(&mut self) -> Option<Stroke> {
        let stroke = self.in_progress.take()?;
        log::debug!("Commit stroke of {} points", stroke.points.len());
        Some(Stroke {
            id: uuid::Uuid::new_v4(),
            points: stroke.points,
            color: stroke.color,
            stroke_width: stroke.stroke_width,
            tool: stroke.tool,
        })
    }

    /// Drops the gesture and repaints `strokes` to erase its live pixels.
    pub fn cancel_stroke(&mut self, strokes: &[Stroke]) {
        if self.in_progress.take().is_some() {
            self.render_all(strokes);
        }
    }

    /// Clears to the background and replays `strokes` in order. A gesture in
    /// progress is painted on top so remote updates do not wipe it.
    pub fn render_all(&mut self, strokes: &[Stroke]) {
        self.canvas.clear(self.background);
        for stroke in strokes {
            stroke.paint(&mut self.canvas, self.scale);
        }
        if let Some(stroke) = &self.in_progress {
            paint_points(
                &mut self.canvas,
                self.scale,
                &stroke.points,
                stroke.stroke_width,
                stroke.color,
            );
        }
    }

    /// Reallocates the backing store and redraws from `strokes`; raster
    /// content is never rescaled.
    pub fn resize(&mut self, logical_size: LogicalSize, device_pixel_ratio: f32, strokes: &[Stroke]) {
        self.logical_size = logical_size;
        self.scale = DeviceScale::new(device_pixel_ratio);
        self.canvas = backing_canvas(logical_size, self.scale, self.background);
        self.render_all(strokes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::new(200, 30, 30);
    const BLUE: Color = Color::new(30, 30, 200);

    fn surface() -> DrawingSurface {
        DrawingSurface::new(LogicalSize::new(40.0, 30.0), 1.0, Color::WHITE)
    }

    fn draw(surface: &mut DrawingSurface, points: &[(f32, f32)]) -> Stroke {
        let mut iter = points.iter();
        let (x, y) = iter.next().unwrap();
        assert!(surface.begin_stroke(LogicalPoint::new(*x, *y)));
        for (x, y) in iter {
            assert!(surface.extend_stroke(LogicalPoint::new(*x, *y)));
        }
        surface.commit_stroke().unwrap()
    }

    #[test]
    fn it_ignores_begin_while_drawing() {
        let mut surface = surface();
        assert!(surface.begin_stroke(LogicalPoint::new(1.0, 1.0)));
        assert!(!surface.begin_stroke(LogicalPoint::new(5.0, 5.0)));
        let stroke = surface.commit_stroke().unwrap();
        assert_eq!(stroke.points, vec![LogicalPoint::new(1.0, 1.0)]);
    }

    #[test]
    fn it_does_nothing_without_gesture() {
        let mut surface = surface();
        assert!(!surface.extend_stroke(LogicalPoint::new(1.0, 1.0)));
        assert!(surface.commit_stroke().is_none());
        assert!(surface.canvas().pixels().iter().all(|p| *p == Color::WHITE));
    }

    #[test]
    fn it_paints_eraser_with_background() {
        let mut surface = surface();
        surface.set_pen(PenSettings {
            tool: Tool::Eraser,
            color: RED,
            stroke_width: 4.0,
        });
        let stroke = draw(&mut surface, &[(2.0, 2.0), (10.0, 2.0)]);
        assert_eq!(stroke.tool, Tool::Eraser);
        assert_eq!(stroke.color, Color::WHITE);
    }

    #[test]
    fn it_matches_replay_after_live_drawing() {
        let mut surface = surface();
        surface.set_pen(PenSettings {
            tool: Tool::Pen,
            color: RED,
            stroke_width: 3.0,
        });
        let first = draw(&mut surface, &[(2.0, 2.0), (20.0, 8.0), (30.0, 25.0)]);
        surface.set_pen(PenSettings {
            tool: Tool::Pen,
            color: BLUE,
            stroke_width: 2.0,
        });
        let second = draw(&mut surface, &[(35.0, 3.0)]);
        let live = surface.canvas().clone();

        surface.render_all(&[first, second]);
        assert_eq!(surface.canvas(), &live);
    }

    #[test]
    fn it_cancels_gesture() {
        let mut surface = surface();
        let committed = draw(&mut surface, &[(2.0, 2.0), (8.0, 2.0)]);
        let before = surface.canvas().clone();

        surface.begin_stroke(LogicalPoint::new(20.0, 20.0));
        surface.extend_stroke(LogicalPoint::new(30.0, 20.0));
        surface.cancel_stroke(&[committed]);

        assert!(!surface.is_drawing());
        assert_eq!(surface.canvas(), &before);
    }

    #[test]
    fn it_keeps_gesture_on_remote_update() {
        let mut surface = surface();
        surface.set_pen(PenSettings {
            tool: Tool::Pen,
            color: RED,
            stroke_width: 2.0,
        });
        surface.begin_stroke(LogicalPoint::new(20.0, 20.0));
        surface.extend_stroke(LogicalPoint::new(30.0, 20.0));

        surface.render_all(&[]);
        assert_eq!(surface.canvas().pixel(25, 20), Some(RED));
    }

    #[test]
    fn it_redraws_from_model_on_resize() {
        let mut surface = surface();
        surface.set_pen(PenSettings {
            tool: Tool::Pen,
            color: RED,
            stroke_width: 2.0,
        });
        let strokes = vec![draw(&mut surface, &[(5.0, 5.0), (35.0, 25.0)])];

        surface.resize(LogicalSize::new(40.0, 30.0), 2.0, &strokes);
        assert_eq!(surface.canvas().width(), 80);
        assert_eq!(surface.canvas().height(), 60);

        let mut fresh = DrawingSurface::new(LogicalSize::new(40.0, 30.0), 2.0, Color::WHITE);
        fresh.render_all(&strokes);
        assert_eq!(surface.canvas(), fresh.canvas());
        // Logical (20, 15) lies on the stroke and maps to device (40, 30).
        assert_eq!(surface.canvas().pixel(40, 30), Some(RED));
    }
}

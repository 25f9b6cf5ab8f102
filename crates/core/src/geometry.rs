//! Coordinate transform from game space to overlay pixels
//!
//! The game reports positions in its own base resolution (e.g. 640x480). The
//! overlay maps them into the window's client area, which may be larger,
//! smaller or of a different aspect ratio (letterboxed). Everything here is
//! computed lazily once per swap-chain configuration and dropped on resize.

use serde::{Deserialize, Serialize};

/// A point in either game or overlay space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatPoint {
    pub x: f32,
    pub y: f32,
}

impl FloatPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn scale(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }
}

/// Width and height of a client area or back buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Per-game description of the game's coordinate system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Height of the game's native resolution
    pub base_height: f32,
    /// Offset added in game space, e.g. the playfield origin
    pub base_offset: FloatPoint,
    /// Native aspect ratio as (width, height)
    pub aspect_ratio: FloatPoint,
}

/// Cached mapping from game space to client pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Game units per client pixel
    pub pixel_rate: f32,
    /// Client-space offset added after scaling
    pub pixel_offset: FloatPoint,
    /// Top-left corner of the letterboxed content area
    pub origin: FloatPoint,
    /// Size of the letterboxed content area
    pub content: FloatPoint,
}

impl Measurement {
    /// Map a raw game position into client pixels
    pub fn to_screen_pixels(&self, raw: FloatPoint) -> FloatPoint {
        FloatPoint::new(
            raw.x / self.pixel_rate + self.pixel_offset.x,
            raw.y / self.pixel_rate + self.pixel_offset.y,
        )
    }
}

/// Cached cursor sprite scaling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorState {
    /// Sprite scale so the cursor keeps its size relative to the back buffer
    pub sprite_scale: f32,
    /// Client width / back buffer width
    pub window_scale: f32,
}

impl CursorState {
    /// Convert an OS pointer position (client pixels) into back buffer pixels
    pub fn pointer_to_backbuffer(&self, pointer: FloatPoint) -> FloatPoint {
        if self.window_scale == 0.0 || self.window_scale == 1.0 {
            pointer
        } else {
            pointer.scale(self.window_scale)
        }
    }
}

/// Lazily computed screen geometry for the current swap chain
#[derive(Debug, Clone, Default)]
pub struct ScreenGeometry {
    measurement: Option<Measurement>,
    cursor: Option<CursorState>,
}

impl ScreenGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the measurement unless it is already cached.
    ///
    /// Returns `None` while the client area is empty (minimized window) or the
    /// calibration is degenerate; the next frame tries again.
    pub fn prepare_measurement(
        &mut self,
        calibration: &Calibration,
        client: SurfaceSize,
    ) -> Option<Measurement> {
        if self.measurement.is_none() {
            self.measurement = measure(calibration, client);
            if let Some(m) = &self.measurement {
                tracing::debug!(
                    "Measurement for {}x{}: rate {:.3}, offset ({:.1}, {:.1})",
                    client.width,
                    client.height,
                    m.pixel_rate,
                    m.pixel_offset.x,
                    m.pixel_offset.y
                );
            }
        }
        self.measurement
    }

    /// Compute sprite and window scaling unless already cached
    pub fn prepare_cursor_state(
        &mut self,
        backbuffer: SurfaceSize,
        client: SurfaceSize,
        texture_base_height: f32,
    ) -> Option<CursorState> {
        if self.cursor.is_none() && !backbuffer.is_empty() && texture_base_height > 0.0 {
            self.cursor = Some(CursorState {
                sprite_scale: backbuffer.height as f32 / texture_base_height,
                window_scale: client.width as f32 / backbuffer.width as f32,
            });
        }
        self.cursor
    }

    pub fn measurement(&self) -> Option<Measurement> {
        self.measurement
    }

    pub fn cursor_state(&self) -> Option<CursorState> {
        self.cursor
    }

    /// Drop cached values after a resize or device loss
    pub fn invalidate(&mut self) {
        self.measurement = None;
        self.cursor = None;
    }
}

/// Fit the native aspect ratio into `client` and derive the rate and offset.
///
/// `pixel_rate` divides by the letterboxed content height, not the client
/// height. The two agree for windows wider than the native ratio; for
/// narrower (portrait) windows this keeps the position inside the centered
/// content area, which is deliberate.
fn measure(calibration: &Calibration, client: SurfaceSize) -> Option<Measurement> {
    let ratio = calibration.aspect_ratio;
    if client.is_empty() || calibration.base_height <= 0.0 || ratio.x <= 0.0 || ratio.y <= 0.0 {
        return None;
    }

    let client_w = client.width as f32;
    let client_h = client.height as f32;

    // Largest rectangle of the native ratio that fits, centered
    let content_h = client_h.min(client_w * ratio.y / ratio.x);
    let content_w = content_h * ratio.x / ratio.y;
    let origin = FloatPoint::new((client_w - content_w) / 2.0, (client_h - content_h) / 2.0);

    let pixel_rate = calibration.base_height / content_h;
    let pixel_offset = FloatPoint::new(
        calibration.base_offset.x / pixel_rate + origin.x,
        calibration.base_offset.y / pixel_rate + origin.y,
    );

    Some(Measurement {
        pixel_rate,
        pixel_offset,
        origin,
        content: FloatPoint::new(content_w, content_h),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration(base_height: f32, offset: (f32, f32)) -> Calibration {
        Calibration {
            base_height,
            base_offset: FloatPoint::new(offset.0, offset.1),
            aspect_ratio: FloatPoint::new(4.0, 3.0),
        }
    }

    #[test]
    fn test_half_height_client_doubles_rate() {
        let mut geometry = ScreenGeometry::new();
        let m = geometry
            .prepare_measurement(&calibration(1000.0, (4.0, -4.0)), SurfaceSize::new(1000, 500))
            .unwrap();

        assert_eq!(m.pixel_rate, 2.0);
        // Content is 666.67 wide, centered in 1000
        let bar = (1000.0 - 500.0 * 4.0 / 3.0) / 2.0;
        assert!((m.origin.x - bar).abs() < 1e-3);
        assert_eq!(m.origin.y, 0.0);
        assert!((m.pixel_offset.x - (2.0 + bar)).abs() < 1e-3);
        assert_eq!(m.pixel_offset.y, -2.0);
    }

    #[test]
    fn test_offset_contribution_halves_when_rate_doubles() {
        let client = SurfaceSize::new(640, 480);
        let offset_only = |base_height: f32| {
            let with = measure(&calibration(base_height, (32.0, 16.0)), client).unwrap();
            let without = measure(&calibration(base_height, (0.0, 0.0)), client).unwrap();
            (with.pixel_offset.x - without.pixel_offset.x, with.pixel_offset.y - without.pixel_offset.y)
        };

        let at_rate_1 = offset_only(480.0);
        let at_rate_2 = offset_only(960.0);
        assert_eq!(at_rate_1, (32.0, 16.0));
        assert_eq!(at_rate_2, (16.0, 8.0));
    }

    #[test]
    fn test_to_screen_pixels() {
        let m = measure(&calibration(480.0, (32.0, 16.0)), SurfaceSize::new(1280, 960)).unwrap();
        assert_eq!(m.pixel_rate, 0.5);
        let p = m.to_screen_pixels(FloatPoint::new(192.0, 400.0));
        assert_eq!(p, FloatPoint::new(192.0 * 2.0 + 64.0, 400.0 * 2.0 + 32.0));
    }

    #[test]
    fn test_pillarbox_and_letterbox() {
        // Wide window: bars left and right
        let wide = measure(&calibration(480.0, (0.0, 0.0)), SurfaceSize::new(1920, 1080)).unwrap();
        assert_eq!(wide.content, FloatPoint::new(1440.0, 1080.0));
        assert_eq!(wide.origin, FloatPoint::new(240.0, 0.0));

        // Tall window: bars top and bottom
        let tall = measure(&calibration(480.0, (0.0, 0.0)), SurfaceSize::new(800, 1000)).unwrap();
        assert_eq!(tall.content, FloatPoint::new(800.0, 600.0));
        assert_eq!(tall.origin, FloatPoint::new(0.0, 200.0));
        assert_eq!(tall.pixel_rate, 0.8);
    }

    #[test]
    fn test_measurement_is_cached_until_invalidated() {
        let mut geometry = ScreenGeometry::new();
        let cal = calibration(480.0, (0.0, 0.0));
        let first = geometry.prepare_measurement(&cal, SurfaceSize::new(640, 480)).unwrap();
        let cached = geometry.prepare_measurement(&cal, SurfaceSize::new(1280, 960)).unwrap();
        assert_eq!(first, cached);

        geometry.invalidate();
        let resized = geometry.prepare_measurement(&cal, SurfaceSize::new(1280, 960)).unwrap();
        assert_eq!(resized.pixel_rate, 0.5);
    }

    #[test]
    fn test_empty_client_is_retried() {
        let mut geometry = ScreenGeometry::new();
        let cal = calibration(480.0, (0.0, 0.0));
        assert!(geometry.prepare_measurement(&cal, SurfaceSize::new(0, 0)).is_none());
        assert!(geometry.prepare_measurement(&cal, SurfaceSize::new(640, 480)).is_some());
    }

    #[test]
    fn test_cursor_state() {
        let mut geometry = ScreenGeometry::new();
        let state = geometry
            .prepare_cursor_state(SurfaceSize::new(640, 480), SurfaceSize::new(1280, 960), 960.0)
            .unwrap();
        assert_eq!(state.sprite_scale, 0.5);
        assert_eq!(state.window_scale, 2.0);
        assert_eq!(
            state.pointer_to_backbuffer(FloatPoint::new(10.0, 20.0)),
            FloatPoint::new(20.0, 40.0)
        );

        let unscaled = CursorState {
            sprite_scale: 1.0,
            window_scale: 1.0,
        };
        assert_eq!(
            unscaled.pointer_to_backbuffer(FloatPoint::new(10.0, 20.0)),
            FloatPoint::new(10.0, 20.0)
        );
    }
}

//! Preview-to-view geometry.
//!
//! The display transform stretches the preview onto the view so it looks
//! right on screen. Decoding only cares about the part of the preview that is
//! actually visible, so the region of interest is recovered by mapping the view
//! back through the inverse transform.

use crate::error::{Result, ScanError};
use crate::frame::{Rectangle, Resolution};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Sensor mount orientation of modules installed upside down
const REVERSE_MOUNT_ORIENTATION: u32 = 270;

/// Everything the geometry depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryInput {
    /// Raw preview buffer size, in sensor (landscape) orientation
    pub preview: Resolution,
    /// Size of the view the preview is rendered into
    pub view: Resolution,
    pub xdpi: f32,
    pub ydpi: f32,
    pub is_portrait: bool,
    /// Camera sensor mount orientation in degrees
    pub sensor_orientation: u32,
}

/// Axis-aligned scale about the origin applied to the rendered preview
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayTransform {
    pub scale_x: f64,
    pub scale_y: f64,
}

impl DisplayTransform {
    pub const IDENTITY: DisplayTransform = DisplayTransform {
        scale_x: 1.0,
        scale_y: 1.0,
    };

    pub fn scale(scale_x: f64, scale_y: f64) -> Self {
        Self { scale_x, scale_y }
    }

    /// Inverse transform, if the scale is invertible
    pub fn invert(&self) -> Option<Self> {
        let valid = |s: f64| s.is_finite() && s.abs() > f64::EPSILON;
        if valid(self.scale_x) && valid(self.scale_y) {
            Some(Self::scale(1.0 / self.scale_x, 1.0 / self.scale_y))
        } else {
            None
        }
    }

    fn map_rect(&self, rect: RectF) -> RectF {
        RectF::sorted(
            rect.left * self.scale_x,
            rect.top * self.scale_y,
            rect.right * self.scale_x,
            rect.bottom * self.scale_y,
        )
    }
}

impl fmt::Display for DisplayTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scale({:.4}, {:.4})", self.scale_x, self.scale_y)
    }
}

/// Float rectangle used while mapping through transforms
#[derive(Debug, Clone, Copy, PartialEq)]
struct RectF {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl RectF {
    fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    fn sorted(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self::new(
            left.min(right),
            top.min(bottom),
            left.max(right),
            top.max(bottom),
        )
    }

    fn width(&self) -> f64 {
        self.right - self.left
    }

    fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// Exchange the x and y axes
    fn flip(&mut self) {
        std::mem::swap(&mut self.left, &mut self.top);
        std::mem::swap(&mut self.right, &mut self.bottom);
    }

    /// Clip to `other`, leaving `self` untouched when they do not overlap
    fn intersect(&mut self, other: &RectF) -> bool {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);
        if left < right && top < bottom {
            *self = Self::new(left, top, right, bottom);
            true
        } else {
            false
        }
    }

    fn offset(&mut self, dx: f64, dy: f64) {
        self.left += dx;
        self.right += dx;
        self.top += dy;
        self.bottom += dy;
    }

    fn offset_to(&mut self, left: f64, top: f64) {
        self.offset(left - self.left, top - self.top);
    }

    /// Round to whole pixels and clamp into `bounds`
    fn to_rectangle(&self, bounds: Resolution) -> Rectangle {
        let clamp_x = |v: f64| v.round().clamp(0.0, bounds.width as f64) as u32;
        let clamp_y = |v: f64| v.round().clamp(0.0, bounds.height as f64) as u32;

        let left = clamp_x(self.left);
        let top = clamp_y(self.top);
        let right = clamp_x(self.right).max(left);
        let bottom = clamp_y(self.bottom).max(top);

        Rectangle::new(left, top, right - left, bottom - top)
    }
}

/// Geometry derived for one surface size
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SurfaceGeometry {
    pub preview: Resolution,
    pub view: Resolution,
    pub is_portrait: bool,
    /// Combined pixel-density and preview aspect correction
    pub aspect_ratio: f64,
    /// Transform presented on the view
    pub transform: DisplayTransform,
    /// Visible part of the preview buffer, in raw buffer coordinates
    pub region: Rectangle,
}

impl SurfaceGeometry {
    /// Dimensions of the luminance data handed to the decoder
    pub fn decode_size(&self) -> Resolution {
        if self.is_portrait {
            self.region.size().swapped()
        } else {
            self.region.size()
        }
    }
}

/// Pure geometry computations
pub struct FrameGeometry;

impl FrameGeometry {
    /// Compute both the display transform and the region of interest
    pub fn compute(input: &GeometryInput) -> Result<SurfaceGeometry> {
        let (aspect_ratio, transform) = Self::display_transform(input)?;
        let region = Self::region_of_interest(input, &transform)?;

        debug!(
            "Geometry for preview {} in view {} (portrait: {}): aspect {:.4}, transform {}, region {}",
            input.preview, input.view, input.is_portrait, aspect_ratio, transform, region
        );

        Ok(SurfaceGeometry {
            preview: input.preview,
            view: input.view,
            is_portrait: input.is_portrait,
            aspect_ratio,
            transform,
            region,
        })
    }

    /// Aspect correction and the transform compensating for non-square
    /// pixels and preview/view aspect mismatch, locked to the view width
    pub fn display_transform(input: &GeometryInput) -> Result<(f64, DisplayTransform)> {
        Self::validate(input)?;

        let mut aspect_ratio = input.xdpi as f64 / input.ydpi as f64;
        aspect_ratio *= input.preview.height as f64 / input.preview.width as f64;
        if input.is_portrait {
            aspect_ratio = 1.0 / aspect_ratio;
        }

        let scale_y = aspect_ratio * input.view.width as f64 / input.view.height as f64;
        Ok((aspect_ratio, DisplayTransform::scale(1.0, scale_y)))
    }

    /// Sub-rectangle of the preview buffer that is visible through `transform`
    pub fn region_of_interest(
        input: &GeometryInput,
        transform: &DisplayTransform,
    ) -> Result<Rectangle> {
        Self::validate(input)?;

        let inverse = transform.invert().ok_or_else(|| {
            ScanError::system(format!("Display transform {} is not invertible", transform))
        })?;

        let preview = input.preview;
        let max = RectF::new(0.0, 0.0, preview.width as f64, preview.height as f64);
        let mut area = max;

        // The transform is defined in landscape preview coordinates
        let flip = input.is_portrait;
        if flip {
            area.flip();
        }
        area = inverse.map_rect(area);
        if flip {
            area.flip();
        }

        // The stream does not always fill the view
        if !area.intersect(&max) {
            return Ok(Rectangle::empty());
        }

        if input.sensor_orientation == REVERSE_MOUNT_ORIENTATION {
            if flip {
                area.offset_to(preview.width as f64 - area.right, 0.0);
            } else {
                area.offset(0.0, preview.height as f64 - area.bottom);
            }
        }

        debug_assert!(area.width() >= 0.0 && area.height() >= 0.0);
        Ok(area.to_rectangle(preview))
    }

    fn validate(input: &GeometryInput) -> Result<()> {
        if !input.preview.is_valid() || !input.view.is_valid() {
            return Err(ScanError::system(format!(
                "Geometry needs non-empty sizes (preview {}, view {})",
                input.preview, input.view
            )));
        }
        let dpi_ok = |d: f32| d.is_finite() && d > 0.0;
        if !dpi_ok(input.xdpi) || !dpi_ok(input.ydpi) {
            return Err(ScanError::system(format!(
                "Invalid display density {}x{}",
                input.xdpi, input.ydpi
            )));
        }
        Ok(())
    }
}

/// Latest geometry, written by the control context and read per frame
#[derive(Debug, Default)]
pub struct GeometryCache {
    current: RwLock<Option<Arc<SurfaceGeometry>>>,
}

impl GeometryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, geometry: SurfaceGeometry) {
        *self.current.write() = Some(Arc::new(geometry));
    }

    pub fn current(&self) -> Option<Arc<SurfaceGeometry>> {
        self.current.read().clone()
    }

    /// Region of interest, empty until geometry has been computed
    pub fn region(&self) -> Rectangle {
        self.current
            .read()
            .as_ref()
            .map(|g| g.region)
            .unwrap_or_else(Rectangle::empty)
    }

    pub fn reset(&self) {
        *self.current.write() = None;
    }
}

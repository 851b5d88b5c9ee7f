//! Device orientation tracking.
//!
//! Raw sensor angles are snapped to quarter turns and debounced twice: once on
//! the snapped angle and once on the display rotation the system reports.

use crate::camera::{CameraInfo, Facing};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Rotation of the display from its natural orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SurfaceRotation {
    #[default]
    #[serde(rename = "0")]
    Rotation0,
    #[serde(rename = "90")]
    Rotation90,
    #[serde(rename = "180")]
    Rotation180,
    #[serde(rename = "270")]
    Rotation270,
}

impl SurfaceRotation {
    pub fn degrees(&self) -> u32 {
        match self {
            SurfaceRotation::Rotation0 => 0,
            SurfaceRotation::Rotation90 => 90,
            SurfaceRotation::Rotation180 => 180,
            SurfaceRotation::Rotation270 => 270,
        }
    }

    /// Rotation for a multiple of 90 degrees, modulo a full turn
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(SurfaceRotation::Rotation0),
            90 => Some(SurfaceRotation::Rotation90),
            180 => Some(SurfaceRotation::Rotation180),
            270 => Some(SurfaceRotation::Rotation270),
            _ => None,
        }
    }

    /// Natural device orientation is portrait, so the unrotated and upside
    /// down rotations present a portrait view
    pub fn is_portrait(&self) -> bool {
        matches!(
            self,
            SurfaceRotation::Rotation0 | SurfaceRotation::Rotation180
        )
    }
}

impl fmt::Display for SurfaceRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Pixel density of the display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetrics {
    pub xdpi: f32,
    pub ydpi: f32,
}

impl Default for DisplayMetrics {
    fn default() -> Self {
        Self {
            xdpi: 160.0,
            ydpi: 160.0,
        }
    }
}

/// Source of the current display state
pub trait DisplayInfo: Send + Sync {
    fn rotation(&self) -> SurfaceRotation;
    fn metrics(&self) -> DisplayMetrics;
}

/// Display whose state is set by the host
#[derive(Debug, Default)]
pub struct StaticDisplay {
    rotation: RwLock<SurfaceRotation>,
    metrics: RwLock<DisplayMetrics>,
}

impl StaticDisplay {
    pub fn new(rotation: SurfaceRotation, metrics: DisplayMetrics) -> Self {
        Self {
            rotation: RwLock::new(rotation),
            metrics: RwLock::new(metrics),
        }
    }

    pub fn set_rotation(&self, rotation: SurfaceRotation) {
        *self.rotation.write() = rotation;
    }

    pub fn set_metrics(&self, metrics: DisplayMetrics) {
        *self.metrics.write() = metrics;
    }
}

impl DisplayInfo for StaticDisplay {
    fn rotation(&self) -> SurfaceRotation {
        *self.rotation.read()
    }

    fn metrics(&self) -> DisplayMetrics {
        *self.metrics.read()
    }
}

/// Snap a sensor angle to the nearest quarter turn
pub fn snap(degrees: u32) -> u32 {
    (degrees % 360 + 45) % 360 / 90 * 90
}

/// Debounces orientation sensor callbacks into display rotation changes
#[derive(Debug, Default)]
pub struct OrientationTracker {
    last_snap: Option<u32>,
    last_rotation: Option<SurfaceRotation>,
}

impl OrientationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the rotation the preview was last laid out for
    pub fn seed(&mut self, rotation: SurfaceRotation) {
        self.last_rotation = Some(rotation);
    }

    pub fn last_rotation(&self) -> Option<SurfaceRotation> {
        self.last_rotation
    }

    /// Handle a raw sensor angle.
    ///
    /// Returns the new display rotation when both the snapped angle and the
    /// display rotation changed. The snapped angle is only remembered when the
    /// change is acted on.
    pub fn on_orientation_changed(
        &mut self,
        degrees: u32,
        display: &dyn DisplayInfo,
    ) -> Option<SurfaceRotation> {
        let snapped = snap(degrees);
        if self.last_snap == Some(snapped) {
            return None;
        }

        let rotation = display.rotation();
        if self.last_rotation == Some(rotation) {
            trace!(
                "Orientation snapped to {}° but display still at {}",
                snapped,
                rotation
            );
            return None;
        }

        debug!(
            "Display rotation changed to {} (sensor {}°, snapped {}°)",
            rotation, degrees, snapped
        );
        self.last_snap = Some(snapped);
        self.last_rotation = Some(rotation);
        Some(rotation)
    }

    pub fn reset(&mut self) {
        self.last_snap = None;
        self.last_rotation = None;
    }
}

/// Rotation to apply to the camera output so the preview is upright
pub fn camera_display_orientation(rotation: SurfaceRotation, camera: &CameraInfo) -> u32 {
    let degrees = rotation.degrees();
    let sensor = camera.orientation % 360;
    match camera.facing {
        // Front cameras are mirrored
        Facing::Front => (360 - (sensor + degrees) % 360) % 360,
        Facing::Back => (sensor + 360 - degrees) % 360,
    }
}

use super::interface::{CameraCapabilities, CameraInfo, CaptureSettings, Facing, FocusMode};
use crate::config::CameraConfig;
use crate::error::{Result, ScanError};
use crate::frame::{PixelFormat, Resolution};
use tracing::{debug, warn};

/// Focus modes in order of preference for scanning
pub const PREFERRED_FOCUS_MODES: [FocusMode; 3] =
    [FocusMode::ContinuousVideo, FocusMode::Auto, FocusMode::Fixed];

/// First entry of `preferred` that `supported` contains
pub fn first_supported<T: PartialEq + Copy>(supported: &[T], preferred: &[T]) -> Option<T> {
    preferred.iter().copied().find(|p| supported.contains(p))
}

/// Camera facing the requested side, falling back to the last one enumerated
pub fn select_camera(cameras: &[CameraInfo], facing: Facing) -> Option<CameraInfo> {
    cameras
        .iter()
        .find(|c| c.facing == facing)
        .or_else(|| cameras.last())
        .copied()
}

/// Preview size to request.
///
/// The preferred size wins when offered. Otherwise the narrowest offered size
/// within the configured bounds is used, and `None` leaves the device default.
pub fn select_resolution(supported: &[Resolution], config: &CameraConfig) -> Option<Resolution> {
    if let Some(preferred) = config.preferred_resolution() {
        if supported.contains(&preferred) {
            return Some(preferred);
        }
        debug!("Preferred resolution {} not offered by device", preferred);
    }

    let mut sizes = supported.to_vec();
    sizes.sort_by_key(|r| r.width);
    sizes.into_iter().find(|r| {
        (config.min_width..=config.max_width).contains(&r.width)
            && (config.min_height..=config.max_height).contains(&r.height)
    })
}

/// Reduces device capabilities to concrete capture settings
pub struct CaptureSettingsBuilder<'a> {
    capabilities: Option<&'a CameraCapabilities>,
    config: Option<&'a CameraConfig>,
    format: PixelFormat,
}

impl<'a> CaptureSettingsBuilder<'a> {
    pub fn new() -> Self {
        Self {
            capabilities: None,
            config: None,
            format: PixelFormat::Nv21,
        }
    }

    pub fn capabilities(mut self, capabilities: &'a CameraCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn config(mut self, config: &'a CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn build(self) -> Result<CaptureSettings> {
        let capabilities = self
            .capabilities
            .ok_or_else(|| ScanError::system("Camera capabilities must be specified"))?;
        let config = self
            .config
            .ok_or_else(|| ScanError::system("Camera configuration must be specified"))?;

        if !capabilities.preview_formats.is_empty()
            && !capabilities.preview_formats.contains(&self.format)
        {
            return Err(ScanError::device_unavailable(format!(
                "Preview format {:?} not supported",
                self.format
            )));
        }

        let focus_mode = first_supported(&capabilities.focus_modes, &PREFERRED_FOCUS_MODES);
        if focus_mode.is_none() {
            warn!("Device offers none of the preferred focus modes");
        }

        let resolution = select_resolution(&capabilities.preview_sizes, config);
        if resolution.is_none() {
            debug!(
                "No preview size within {}..={} x {}..={}, keeping device default",
                config.min_width, config.max_width, config.min_height, config.max_height
            );
        }

        Ok(CaptureSettings {
            resolution,
            focus_mode,
            format: self.format,
        })
    }
}

impl Default for CaptureSettingsBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

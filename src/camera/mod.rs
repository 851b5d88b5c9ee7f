//! Capture collaborator seams and capture configuration.

mod builder;
mod interface;
pub mod mock;
#[cfg(test)]
mod tests;

pub use builder::{
    first_supported, select_camera, select_resolution, CaptureSettingsBuilder,
    PREFERRED_FOCUS_MODES,
};
pub use interface::{
    AppliedConfig, AutofocusCallback, CameraCapabilities, CameraInfo, CameraProvider,
    CaptureDevice, CaptureSettings, Facing, FlashMode, FocusMode, PreviewSurface,
};
pub use mock::{MockCamera, MockCameraProvider, MockSurface};

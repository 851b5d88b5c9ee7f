use crate::error::Result;
use crate::frame::{FrameBuffer, FrameLease, PixelFormat, Resolution};
use crate::geometry::DisplayTransform;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which side of the device a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Back,
    Front,
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Back => write!(f, "back"),
            Facing::Front => write!(f, "front"),
        }
    }
}

/// Static description of an enumerated camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: u32,
    pub facing: Facing,
    /// Sensor mount orientation in degrees
    pub orientation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusMode {
    ContinuousVideo,
    ContinuousPicture,
    Auto,
    Fixed,
    Infinity,
    Macro,
}

impl FocusMode {
    /// Modes in which the device refocuses on its own
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            FocusMode::ContinuousVideo | FocusMode::ContinuousPicture
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashMode {
    Off,
    On,
    Auto,
    Torch,
}

/// What a device can be configured with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraCapabilities {
    pub preview_sizes: Vec<Resolution>,
    pub default_preview_size: Option<Resolution>,
    pub focus_modes: Vec<FocusMode>,
    pub flash_modes: Vec<FlashMode>,
    pub preview_formats: Vec<PixelFormat>,
}

/// Requested capture configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub resolution: Option<Resolution>,
    pub focus_mode: Option<FocusMode>,
    pub format: PixelFormat,
}

/// Configuration the device actually applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedConfig {
    pub resolution: Resolution,
    pub focus_mode: Option<FocusMode>,
    pub format: PixelFormat,
}

impl AppliedConfig {
    pub fn continuous_focus(&self) -> bool {
        self.focus_mode.map(|m| m.is_continuous()).unwrap_or(false)
    }
}

/// Render target of the camera preview
pub trait PreviewSurface: Send + Sync {
    /// Current size of the view
    fn size(&self) -> Resolution;

    /// Present a transform on the rendered preview. Fails once the surface
    /// has been disposed.
    fn set_transform(&self, transform: DisplayTransform) -> Result<()>;
}

/// Invoked once with whether the autofocus cycle achieved focus
pub type AutofocusCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// An opened capture device.
///
/// Calls are made from the scanner's control context only, except for frame
/// delivery which the device drives on its own.
pub trait CaptureDevice: Send + Sync {
    fn info(&self) -> CameraInfo;

    fn capabilities(&self) -> CameraCapabilities;

    fn configure(&self, settings: &CaptureSettings) -> Result<AppliedConfig>;

    fn set_flash_mode(&self, mode: FlashMode) -> Result<()>;

    fn start_preview(&self, surface: Arc<dyn PreviewSurface>) -> Result<()>;

    fn stop_preview(&self) -> Result<()>;

    /// Make a buffer available for filling with the next frame
    fn add_frame_buffer(&self, buffer: FrameBuffer);

    /// Where filled buffers are delivered; `None` stops delivery
    fn set_frame_sink(&self, sink: Option<mpsc::Sender<FrameLease>>);

    fn request_autofocus(&self, callback: AutofocusCallback) -> Result<()>;

    fn cancel_autofocus(&self);

    fn set_display_orientation(&self, degrees: u32) -> Result<()>;

    fn release(&self);
}

/// Enumerates and opens cameras, and answers capability queries
pub trait CameraProvider: Send + Sync {
    fn cameras(&self) -> Vec<CameraInfo>;

    fn open(&self, id: u32) -> Result<Arc<dyn CaptureDevice>>;

    fn check_camera_permission(&self) -> Result<()>;

    fn check_torch_permission(&self) -> Result<()>;

    /// Whether the hardware has a flash at all
    fn has_flash(&self) -> bool;
}

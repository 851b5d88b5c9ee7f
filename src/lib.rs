pub mod camera;
pub mod config;
pub mod control;
pub mod decoder;
pub mod error;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod history;
pub mod orientation;
pub mod ring_buffer;
pub mod rotation;
pub mod scanner;

pub use camera::{
    CameraCapabilities, CameraInfo, CameraProvider, CaptureDevice, Facing, FlashMode, FocusMode,
    MockCamera, MockCameraProvider, MockSurface, PreviewSurface,
};
pub use config::ScannerConfig;
pub use control::{ControlContext, PostStatus};
pub use decoder::{BarcodeFormat, DecodeResult, Decoder, DecoderFactory, DecoderOptions};
pub use error::{Result, ScanError};
pub use events::{EventBus, EventFilter, EventReceiver, ScanEvent};
pub use frame::{FrameBuffer, FrameLease, LuminanceView, PixelFormat, Rectangle, Resolution};
pub use geometry::{DisplayTransform, FrameGeometry, GeometryInput, SurfaceGeometry};
pub use history::{Admission, ResultHistory};
pub use orientation::{DisplayInfo, DisplayMetrics, OrientationTracker, StaticDisplay, SurfaceRotation};
pub use ring_buffer::RingHistory;
pub use rotation::FrameRotator;
pub use scanner::{ResultCallback, ScanOptions, ScanStatsSnapshot, Scanner, ScannerBuilder};

#[cfg(feature = "qr")]
pub use decoder::QrDecoder;

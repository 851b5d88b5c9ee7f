use crate::camera::{
    AppliedConfig, CameraInfo, CameraProvider, CaptureDevice, Facing, PreviewSurface,
};
use crate::config::{CameraConfig, ScanConfig, ScannerConfig};
use crate::decoder::{DecodeResult, DecoderOptions};
use crate::error::Result;
use crate::events::EventBus;
use crate::frame::Resolution;
use crate::geometry::GeometryCache;
use crate::orientation::{DisplayInfo, OrientationTracker};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::stats::ScanStats;

/// Receives each result that passes duplicate suppression
pub type ResultCallback = Arc<dyn Fn(DecodeResult) + Send + Sync>;

/// Options bundle for one scanning session
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    pub camera: CameraConfig,
    pub scan: ScanConfig,
    pub decoder: DecoderOptions,
}

impl ScanOptions {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            camera: config.camera.clone(),
            scan: config.scan.clone(),
            decoder: config.decoder.clone(),
        }
    }

    /// Prefer the front camera when one is available
    pub fn use_front_camera(mut self, front: bool) -> Self {
        self.camera.facing = if front { Facing::Front } else { Facing::Back };
        self
    }

    pub fn with_preferred_resolution(mut self, resolution: Resolution) -> Self {
        self.camera.preferred_resolution = Some((resolution.width, resolution.height));
        self
    }

    /// Delay between continuous scans of the same payload
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.scan.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    pub fn with_decoder_options(mut self, decoder: DecoderOptions) -> Self {
        self.decoder = decoder;
        self
    }

    /// Reject settings a session cannot run with
    pub fn validate(&self) -> Result<()> {
        self.camera.validate()?;
        self.scan.validate()?;
        Ok(())
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from_config(&ScannerConfig::default())
    }
}

/// The open camera, owned by the control context
#[derive(Default)]
pub(crate) struct CameraState {
    pub device: Option<Arc<dyn CaptureDevice>>,
    pub info: Option<CameraInfo>,
    pub applied: Option<AppliedConfig>,
    pub surface: Option<Arc<dyn PreviewSurface>>,
}

/// State shared between the scanner handle, the control context and the
/// frame delivery task.
///
/// Only the control context changes the camera, geometry and focus flags.
/// The delivery task reads them.
pub(crate) struct ScannerShared {
    pub provider: Arc<dyn CameraProvider>,
    pub display: Arc<dyn DisplayInfo>,
    pub events: EventBus,
    pub stats: ScanStats,
    pub geometry: GeometryCache,
    pub camera: Mutex<CameraState>,
    pub tracker: Mutex<OrientationTracker>,
    pub surface: watch::Sender<Option<Arc<dyn PreviewSurface>>>,
    pub analyzing: AtomicBool,
    pub torch_on: AtomicBool,
    pub torch_supported: AtomicBool,
    pub autofocus_running: AtomicBool,
    pub continuous_focus: AtomicBool,
    autofocus_retry_ms: AtomicU64,
}

impl ScannerShared {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        display: Arc<dyn DisplayInfo>,
        events: EventBus,
    ) -> Self {
        let (surface, _) = watch::channel(None);
        Self {
            provider,
            display,
            events,
            stats: ScanStats::default(),
            geometry: GeometryCache::new(),
            camera: Mutex::new(CameraState::default()),
            tracker: Mutex::new(OrientationTracker::new()),
            surface,
            analyzing: AtomicBool::new(false),
            torch_on: AtomicBool::new(false),
            torch_supported: AtomicBool::new(false),
            autofocus_running: AtomicBool::new(false),
            continuous_focus: AtomicBool::new(false),
            autofocus_retry_ms: AtomicU64::new(1000),
        }
    }

    pub fn device(&self) -> Option<Arc<dyn CaptureDevice>> {
        self.camera.lock().device.clone()
    }

    pub fn has_device(&self) -> bool {
        self.camera.lock().device.is_some()
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing.load(Ordering::SeqCst)
    }

    pub fn autofocus_retry(&self) -> Duration {
        Duration::from_millis(self.autofocus_retry_ms.load(Ordering::Relaxed))
    }

    pub fn set_autofocus_retry(&self, retry: Duration) {
        self.autofocus_retry_ms
            .store(retry.as_millis() as u64, Ordering::Relaxed);
    }
}

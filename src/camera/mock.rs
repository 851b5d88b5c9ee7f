use super::interface::{
    AppliedConfig, AutofocusCallback, CameraCapabilities, CameraInfo, CameraProvider,
    CaptureDevice, CaptureSettings, Facing, FlashMode, FocusMode, PreviewSurface,
};
use crate::error::{Result, ScanError};
use crate::frame::{FrameBuffer, FrameLease, FrameRecycler, PixelFormat, Resolution};
use crate::geometry::DisplayTransform;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

/// Free buffers waiting to be filled
#[derive(Debug, Default)]
struct BufferPool {
    free: Mutex<VecDeque<FrameBuffer>>,
    recycled: AtomicU64,
}

impl FrameRecycler for BufferPool {
    fn recycle(&self, buffer: FrameBuffer) {
        self.recycled.fetch_add(1, Ordering::Relaxed);
        self.free.lock().push_back(buffer);
    }
}

#[derive(Default)]
struct MockCameraState {
    applied: Option<AppliedConfig>,
    flash_modes: Vec<FlashMode>,
    orientations: Vec<u32>,
    surface: Option<Arc<dyn PreviewSurface>>,
    sink: Option<mpsc::Sender<FrameLease>>,
    pending_autofocus: Option<AutofocusCallback>,
}

/// In-memory capture device driven by the test or replay harness
pub struct MockCamera {
    info: CameraInfo,
    capabilities: CameraCapabilities,
    applied_override: Option<Resolution>,
    state: Mutex<MockCameraState>,
    pool: Arc<BufferPool>,
    previewing: AtomicBool,
    released: AtomicBool,
    frame_counter: AtomicU64,
    dropped_frames: AtomicU64,
    autofocus_requests: AtomicU64,
}

impl MockCamera {
    fn new(
        info: CameraInfo,
        capabilities: CameraCapabilities,
        applied_override: Option<Resolution>,
    ) -> Self {
        Self {
            info,
            capabilities,
            applied_override,
            state: Mutex::new(MockCameraState::default()),
            pool: Arc::new(BufferPool::default()),
            previewing: AtomicBool::new(false),
            released: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            autofocus_requests: AtomicU64::new(0),
        }
    }

    /// Fill a free buffer with `luminance` and deliver it.
    ///
    /// Returns false when the frame was dropped: not previewing, no sink, no
    /// free buffer, or the sink is full.
    pub fn deliver_frame(&self, luminance: &[u8]) -> bool {
        if !self.previewing.load(Ordering::Relaxed) || self.released.load(Ordering::Relaxed) {
            return false;
        }

        let Some(sink) = self.state.lock().sink.clone() else {
            return false;
        };

        let Some(mut buffer) = self.pool.free.lock().pop_front() else {
            trace!("No free buffer, dropping frame");
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let luma_len = buffer.resolution().area().min(buffer.data.len());
        let copied = luminance.len().min(luma_len);
        buffer.data[..copied].copy_from_slice(&luminance[..copied]);
        buffer.data[luma_len..].fill(128);
        buffer.sequence = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;

        let lease = FrameLease::new(buffer, self.pool.clone());
        match sink.try_send(lease) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                // The lease recycles itself as it drops
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Finish the outstanding autofocus cycle. Returns false if none is pending.
    pub fn complete_autofocus(&self, focused: bool) -> bool {
        let callback = self.state.lock().pending_autofocus.take();
        match callback {
            Some(callback) => {
                callback(focused);
                true
            }
            None => false,
        }
    }

    pub fn has_pending_autofocus(&self) -> bool {
        self.state.lock().pending_autofocus.is_some()
    }

    pub fn autofocus_requests(&self) -> u64 {
        self.autofocus_requests.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn free_buffers(&self) -> usize {
        self.pool.free.lock().len()
    }

    pub fn recycled_buffers(&self) -> u64 {
        self.pool.recycled.load(Ordering::Relaxed)
    }

    pub fn applied_config(&self) -> Option<AppliedConfig> {
        self.state.lock().applied
    }

    pub fn flash_modes(&self) -> Vec<FlashMode> {
        self.state.lock().flash_modes.clone()
    }

    pub fn display_orientations(&self) -> Vec<u32> {
        self.state.lock().orientations.clone()
    }

    pub fn is_previewing(&self) -> bool {
        self.previewing.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.released.load(Ordering::Relaxed) {
            Err(ScanError::teardown(format!(
                "Camera {} already released",
                self.info.id
            )))
        } else {
            Ok(())
        }
    }
}

impl CaptureDevice for MockCamera {
    fn info(&self) -> CameraInfo {
        self.info
    }

    fn capabilities(&self) -> CameraCapabilities {
        self.capabilities.clone()
    }

    fn configure(&self, settings: &CaptureSettings) -> Result<AppliedConfig> {
        self.ensure_open()?;

        let resolution = self
            .applied_override
            .or(settings.resolution)
            .or(self.capabilities.default_preview_size)
            .ok_or_else(|| ScanError::device_unavailable("No preview size available"))?;

        let applied = AppliedConfig {
            resolution,
            focus_mode: settings.focus_mode,
            format: settings.format,
        };
        debug!("Mock camera {} configured: {:?}", self.info.id, applied);
        self.state.lock().applied = Some(applied);
        Ok(applied)
    }

    fn set_flash_mode(&self, mode: FlashMode) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().flash_modes.push(mode);
        Ok(())
    }

    fn start_preview(&self, surface: Arc<dyn PreviewSurface>) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().surface = Some(surface);
        self.previewing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop_preview(&self) -> Result<()> {
        self.previewing.store(false, Ordering::Relaxed);
        self.state.lock().surface = None;
        Ok(())
    }

    fn add_frame_buffer(&self, buffer: FrameBuffer) {
        self.pool.free.lock().push_back(buffer);
    }

    fn set_frame_sink(&self, sink: Option<mpsc::Sender<FrameLease>>) {
        self.state.lock().sink = sink;
    }

    fn request_autofocus(&self, callback: AutofocusCallback) -> Result<()> {
        self.ensure_open()?;
        self.autofocus_requests.fetch_add(1, Ordering::Relaxed);
        self.state.lock().pending_autofocus = Some(callback);
        Ok(())
    }

    fn cancel_autofocus(&self) {
        self.state.lock().pending_autofocus = None;
    }

    fn set_display_orientation(&self, degrees: u32) -> Result<()> {
        self.ensure_open()?;
        self.state.lock().orientations.push(degrees);
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::Relaxed);
        self.previewing.store(false, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.sink = None;
        state.surface = None;
        state.pending_autofocus = None;
    }
}

/// Camera provider backed by [`MockCamera`]s
pub struct MockCameraProvider {
    cameras: Vec<CameraInfo>,
    capabilities: CameraCapabilities,
    applied_override: Option<Resolution>,
    has_flash: bool,
    camera_permission: AtomicBool,
    torch_permission: AtomicBool,
    opened: Mutex<Vec<Arc<MockCamera>>>,
}

impl MockCameraProvider {
    /// One back camera mounted at 90 degrees offering common preview sizes
    pub fn new() -> Self {
        Self {
            cameras: vec![CameraInfo {
                id: 0,
                facing: Facing::Back,
                orientation: 90,
            }],
            capabilities: Self::default_capabilities(),
            applied_override: None,
            has_flash: true,
            camera_permission: AtomicBool::new(true),
            torch_permission: AtomicBool::new(true),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn default_capabilities() -> CameraCapabilities {
        CameraCapabilities {
            preview_sizes: vec![
                Resolution::new(1920, 1080),
                Resolution::new(1280, 720),
                Resolution::new(960, 720),
                Resolution::new(640, 480),
                Resolution::new(320, 240),
            ],
            default_preview_size: Some(Resolution::new(640, 480)),
            focus_modes: vec![FocusMode::Auto, FocusMode::ContinuousVideo, FocusMode::Fixed],
            flash_modes: vec![FlashMode::Off, FlashMode::On, FlashMode::Torch],
            preview_formats: vec![PixelFormat::Nv21],
        }
    }

    pub fn with_cameras(mut self, cameras: Vec<CameraInfo>) -> Self {
        self.cameras = cameras;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CameraCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Report `resolution` as applied regardless of what was requested
    pub fn with_applied_resolution(mut self, resolution: Resolution) -> Self {
        self.applied_override = Some(resolution);
        self
    }

    pub fn without_flash(mut self) -> Self {
        self.has_flash = false;
        self
    }

    pub fn set_camera_permission(&self, granted: bool) {
        self.camera_permission.store(granted, Ordering::Relaxed);
    }

    pub fn set_torch_permission(&self, granted: bool) {
        self.torch_permission.store(granted, Ordering::Relaxed);
    }

    /// Most recently opened camera
    pub fn last_opened(&self) -> Option<Arc<MockCamera>> {
        self.opened.lock().last().cloned()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }
}

impl Default for MockCameraProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraProvider for MockCameraProvider {
    fn cameras(&self) -> Vec<CameraInfo> {
        self.cameras.clone()
    }

    fn open(&self, id: u32) -> Result<Arc<dyn CaptureDevice>> {
        let info = self
            .cameras
            .iter()
            .find(|c| c.id == id)
            .copied()
            .ok_or_else(|| ScanError::device_unavailable(format!("No camera with id {}", id)))?;

        let camera = Arc::new(MockCamera::new(
            info,
            self.capabilities.clone(),
            self.applied_override,
        ));
        self.opened.lock().push(camera.clone());
        debug!("Opened mock camera {} ({})", info.id, info.facing);
        Ok(camera)
    }

    fn check_camera_permission(&self) -> Result<()> {
        if self.camera_permission.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(ScanError::permission_denied("camera"))
        }
    }

    fn check_torch_permission(&self) -> Result<()> {
        if self.torch_permission.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(ScanError::permission_denied("flashlight"))
        }
    }

    fn has_flash(&self) -> bool {
        self.has_flash
    }
}

/// Preview surface that records presented transforms
pub struct MockSurface {
    size: RwLock<Resolution>,
    transforms: Mutex<Vec<DisplayTransform>>,
    disposed: AtomicBool,
}

impl MockSurface {
    pub fn new(size: Resolution) -> Self {
        Self {
            size: RwLock::new(size),
            transforms: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn resize(&self, size: Resolution) {
        *self.size.write() = size;
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Relaxed);
    }

    pub fn transforms(&self) -> Vec<DisplayTransform> {
        self.transforms.lock().clone()
    }
}

impl PreviewSurface for MockSurface {
    fn size(&self) -> Resolution {
        *self.size.read()
    }

    fn set_transform(&self, transform: DisplayTransform) -> Result<()> {
        if self.disposed.load(Ordering::Relaxed) {
            return Err(ScanError::teardown("Preview surface disposed"));
        }
        self.transforms.lock().push(transform);
        Ok(())
    }
}

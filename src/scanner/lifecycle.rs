//! Camera control operations.
//!
//! Everything here runs as an operation on the control context, so device
//! calls never race each other.

use super::types::{ScanOptions, ScannerShared};
use crate::camera::{
    first_supported, select_camera, AppliedConfig, CameraCapabilities, CaptureDevice,
    CaptureSettingsBuilder, FlashMode, PreviewSurface,
};
use crate::control::{ControlContext, PostStatus};
use crate::error::{Result, ScanError};
use crate::events::ScanEvent;
use crate::frame::{FrameBuffer, FrameLease, Resolution};
use crate::geometry::{FrameGeometry, GeometryInput};
use crate::orientation::camera_display_orientation;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

const TORCH_ON_MODES: [FlashMode; 2] = [FlashMode::Torch, FlashMode::On];
const TORCH_OFF_MODES: [FlashMode; 1] = [FlashMode::Off];

#[derive(Clone)]
pub(crate) struct CameraLifecycle {
    shared: Arc<ScannerShared>,
    control: ControlContext,
}

impl CameraLifecycle {
    pub fn new(shared: Arc<ScannerShared>, control: ControlContext) -> Self {
        Self { shared, control }
    }

    /// Open and configure the camera, and register the capture buffers.
    ///
    /// A camera that is already open is kept as is.
    pub fn open_and_configure(
        &self,
        options: &ScanOptions,
        frames: mpsc::Sender<FrameLease>,
    ) -> Result<AppliedConfig> {
        {
            let camera = self.shared.camera.lock();
            if let (Some(device), Some(applied)) = (&camera.device, camera.applied) {
                debug!("Camera already open, redirecting frames");
                device.set_frame_sink(Some(frames));
                return Ok(applied);
            }
        }

        let provider = &self.shared.provider;
        provider.check_camera_permission()?;

        let cameras = provider.cameras();
        debug!("Found {} cameras", cameras.len());
        let info = select_camera(&cameras, options.camera.facing)
            .ok_or_else(|| ScanError::device_unavailable("No camera available"))?;
        if info.facing != options.camera.facing {
            warn!(
                "No {} facing camera, falling back to camera {} ({})",
                options.camera.facing, info.id, info.facing
            );
        }

        info!("Opening {} facing camera {}", info.facing, info.id);
        let device = provider.open(info.id)?;

        match self.configure(device.as_ref(), options, frames) {
            Ok((applied, capabilities)) => {
                let torch_supported =
                    first_supported(&capabilities.flash_modes, &TORCH_ON_MODES).is_some();
                self.shared
                    .torch_supported
                    .store(torch_supported, Ordering::SeqCst);
                self.shared
                    .continuous_focus
                    .store(applied.continuous_focus(), Ordering::SeqCst);
                self.shared.autofocus_running.store(false, Ordering::SeqCst);

                let mut camera = self.shared.camera.lock();
                camera.device = Some(device);
                camera.info = Some(info);
                camera.applied = Some(applied);
                Ok(applied)
            }
            Err(e) => {
                device.release();
                Err(e)
            }
        }
    }

    fn configure(
        &self,
        device: &dyn CaptureDevice,
        options: &ScanOptions,
        frames: mpsc::Sender<FrameLease>,
    ) -> Result<(AppliedConfig, CameraCapabilities)> {
        let capabilities = device.capabilities();
        let settings = CaptureSettingsBuilder::new()
            .capabilities(&capabilities)
            .config(&options.camera)
            .build()?;

        let applied = device.configure(&settings)?;
        Self::setup_torch(
            device,
            &capabilities,
            self.shared.torch_on.load(Ordering::SeqCst),
        )?;

        info!(
            "Preview size {} with {} bits per pixel, focus {:?}",
            applied.resolution,
            applied.format.bits_per_pixel(),
            applied.focus_mode
        );

        for _ in 0..options.camera.buffer_count.max(1) {
            device.add_frame_buffer(FrameBuffer::allocate(applied.resolution, applied.format));
        }
        device.set_frame_sink(Some(frames));

        Ok((applied, capabilities))
    }

    /// Start the preview once the surface is available
    pub fn start_preview(&self, surface: Arc<dyn PreviewSurface>) -> Result<()> {
        let (device, info) = {
            let mut camera = self.shared.camera.lock();
            let same_surface = camera
                .surface
                .as_ref()
                .is_some_and(|s| Arc::as_ptr(s) as *const () == Arc::as_ptr(&surface) as *const ());
            match (camera.device.clone(), camera.info) {
                (Some(_), Some(_)) if same_surface => {
                    drop(camera);
                    debug!("Preview already running on this surface");
                    return self.update_geometry(surface.size());
                }
                (Some(device), Some(info)) => {
                    camera.surface = Some(surface.clone());
                    (device, info)
                }
                _ => {
                    return Err(ScanError::teardown(
                        "Camera shut down before the surface became available",
                    ))
                }
            }
        };

        self.update_geometry(surface.size())?;

        let rotation = self.shared.display.rotation();
        device.set_display_orientation(camera_display_orientation(rotation, &info))?;
        self.shared.tracker.lock().seed(rotation);

        device.start_preview(surface)?;
        info!("Preview started");

        self.shared.autofocus_running.store(false, Ordering::SeqCst);
        if !self.shared.continuous_focus.load(Ordering::SeqCst) {
            self.autofocus()?;
        }
        Ok(())
    }

    /// Recompute the geometry for a view of `view` size and present the
    /// display transform
    pub fn update_geometry(&self, view: Resolution) -> Result<()> {
        let (applied, info, surface) = {
            let camera = self.shared.camera.lock();
            (camera.applied, camera.info, camera.surface.clone())
        };
        let (Some(applied), Some(info)) = (applied, info) else {
            trace!("Camera not ready, geometry update deferred");
            return Ok(());
        };

        let metrics = self.shared.display.metrics();
        let input = GeometryInput {
            preview: applied.resolution,
            view,
            xdpi: metrics.xdpi,
            ydpi: metrics.ydpi,
            is_portrait: self.shared.display.rotation().is_portrait(),
            sensor_orientation: info.orientation,
        };
        let geometry = FrameGeometry::compute(&input)?;
        self.shared.geometry.update(geometry);

        if let Some(surface) = surface {
            if let Err(e) = surface.set_transform(geometry.transform) {
                if !e.is_transient() {
                    return Err(e);
                }
                debug!("Transform not presented: {}", e);
            }
        }

        self.shared.events.publish(ScanEvent::GeometryUpdated {
            region: geometry.region,
            portrait: geometry.is_portrait,
        });
        Ok(())
    }

    /// Apply the current display rotation to the camera output
    pub fn reorient(&self) -> Result<()> {
        let (device, info) = {
            let camera = self.shared.camera.lock();
            (camera.device.clone(), camera.info)
        };
        let (Some(device), Some(info)) = (device, info) else {
            return Ok(());
        };

        let rotation = self.shared.display.rotation();
        let degrees = camera_display_orientation(rotation, &info);
        device.set_display_orientation(degrees)?;

        debug!("Camera display orientation set to {}", degrees);
        self.shared
            .events
            .publish(ScanEvent::CameraReoriented { rotation, degrees });
        Ok(())
    }

    /// Start a one-shot autofocus cycle unless one is running or focus is
    /// continuous
    pub fn autofocus(&self) -> Result<()> {
        let Some(device) = self.shared.device() else {
            return Ok(());
        };
        if self.shared.continuous_focus.load(Ordering::SeqCst)
            || self.shared.autofocus_running.swap(true, Ordering::SeqCst)
        {
            trace!("Autofocus already running or not needed");
            return Ok(());
        }

        self.shared.stats.record_autofocus();
        self.shared.events.publish(ScanEvent::AutofocusRequested {
            timestamp: SystemTime::now(),
        });

        let lifecycle = self.clone();
        device
            .request_autofocus(Box::new(move |focused| lifecycle.on_autofocus(focused)))
            .map_err(|e| {
                self.shared.autofocus_running.store(false, Ordering::SeqCst);
                e
            })
    }

    /// Completion of a one-shot autofocus cycle, called from the device
    fn on_autofocus(&self, focused: bool) {
        self.shared.autofocus_running.store(false, Ordering::SeqCst);
        self.shared
            .events
            .publish(ScanEvent::AutofocusCompleted { focused });

        if focused || self.shared.continuous_focus.load(Ordering::SeqCst) {
            return;
        }

        let retry = self.shared.autofocus_retry();
        trace!("Autofocus did not focus, retrying in {:?}", retry);
        let lifecycle = self.clone();
        self.control
            .post_delayed("autofocus_retry", retry, async move { lifecycle.autofocus() });
    }

    /// Post an autofocus cycle onto the control context
    pub fn request_autofocus(&self) -> PostStatus {
        let lifecycle = self.clone();
        self.control
            .post("autofocus", async move { lifecycle.autofocus() })
    }

    /// Apply the torch flag to the open camera
    pub fn apply_torch(&self, on: bool) -> Result<()> {
        let Some(device) = self.shared.device() else {
            return Ok(());
        };
        Self::setup_torch(device.as_ref(), &device.capabilities(), on)
    }

    fn setup_torch(
        device: &dyn CaptureDevice,
        capabilities: &CameraCapabilities,
        on: bool,
    ) -> Result<()> {
        let preferred: &[FlashMode] = if on {
            &TORCH_ON_MODES
        } else {
            &TORCH_OFF_MODES
        };

        match first_supported(&capabilities.flash_modes, preferred) {
            Some(mode) => device.set_flash_mode(mode),
            None => {
                debug!("No flash mode available for torch {}", on);
                Ok(())
            }
        }
    }

    /// Stop the preview and release the camera
    pub fn shutdown(&self) -> Result<()> {
        let device = {
            let mut camera = self.shared.camera.lock();
            camera.info = None;
            camera.applied = None;
            camera.surface = None;
            camera.device.take()
        };
        let Some(device) = device else {
            return Ok(());
        };

        info!("Shutting down camera {}", device.info().id);
        device.cancel_autofocus();
        device.set_frame_sink(None);
        let stopped = device.stop_preview();
        device.release();

        self.shared.autofocus_running.store(false, Ordering::SeqCst);
        self.shared.torch_supported.store(false, Ordering::SeqCst);
        self.shared.geometry.reset();
        self.shared.tracker.lock().reset();

        stopped
    }
}

//! Public scanning API.
//!
//! A [`Scanner`] owns one control context and at most one active session.
//! Each session runs its own frame delivery task; camera control calls are
//! posted onto the control context so they never race each other.

mod lifecycle;
mod pipeline;
mod stats;
mod types;

pub use pipeline::FrameOutcome;
pub use stats::{ScanStats, ScanStatsSnapshot};
pub use types::{ResultCallback, ScanOptions};

use crate::camera::{CameraProvider, PreviewSurface};
use crate::config::ScannerConfig;
use crate::control::{ControlContext, ControlStatsSnapshot, PostStatus};
use crate::decoder::{DecodeResult, DecoderFactory};
use crate::error::{Result, ScanError};
use crate::events::{EventBus, EventFilter, EventReceiver, ScanEvent};
use crate::frame::{FrameLease, Resolution};
use crate::geometry::SurfaceGeometry;
use crate::history::ResultHistory;
use crate::orientation::{DisplayInfo, StaticDisplay};
use lifecycle::CameraLifecycle;
use parking_lot::Mutex;
use pipeline::ScanPipeline;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use types::ScannerShared;
use uuid::Uuid;

struct ActiveSession {
    id: Uuid,
    cancellation_token: CancellationToken,
    delivery: JoinHandle<()>,
    surface_waiter: JoinHandle<()>,
}

impl ActiveSession {
    fn cancel(self) {
        self.cancellation_token.cancel();
        // Delivery finishes its in-flight frame and exits on the token
        self.surface_waiter.abort();
        drop(self.delivery);
    }
}

/// Live camera barcode scanner
pub struct Scanner {
    shared: Arc<ScannerShared>,
    lifecycle: CameraLifecycle,
    control: ControlContext,
    control_task: Mutex<Option<JoinHandle<()>>>,
    decoder_factory: Arc<dyn DecoderFactory>,
    config: ScannerConfig,
    session: Mutex<Option<ActiveSession>>,
}

impl Scanner {
    pub fn builder() -> ScannerBuilder {
        ScannerBuilder::new()
    }

    /// Start a scanning session delivering each admitted result to `on_result`.
    ///
    /// Resolves once the camera is open and configured. The preview itself
    /// starts when a surface becomes available. Any running session is ended
    /// first; an already open camera is reused.
    pub async fn start<F>(&self, on_result: F, options: ScanOptions) -> Result<Uuid>
    where
        F: Fn(DecodeResult) + Send + Sync + 'static,
    {
        options.validate()?;

        self.shared.analyzing.store(false, Ordering::SeqCst);
        self.end_session();

        let decoder = self.decoder_factory.create(&options.decoder)?;
        let cancellation_token = CancellationToken::new();
        let (frames_tx, frames_rx) =
            mpsc::channel::<FrameLease>(options.camera.buffer_count.max(1));
        let history =
            ResultHistory::try_new(options.scan.history_capacity, options.scan.cooldown())?;

        self.shared
            .set_autofocus_retry(options.scan.autofocus_retry());
        self.shared.stats.reset();

        let (setup_tx, setup_rx) = oneshot::channel();
        let lifecycle = self.lifecycle.clone();
        let setup_options = options.clone();
        self.control
            .post("setup_camera", async move {
                let _ = setup_tx.send(lifecycle.open_and_configure(&setup_options, frames_tx));
                Ok(())
            })
            .into_result()?;

        let applied = match setup_rx.await {
            Ok(Ok(applied)) => applied,
            Ok(Err(e)) => {
                error!("Camera setup failed: {}", e);
                self.shared.events.publish(ScanEvent::SystemError {
                    component: "camera".to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
            Err(_) => return Err(ScanError::Discarded),
        };

        let pipeline = ScanPipeline::new(
            Arc::clone(&self.shared),
            self.lifecycle.clone(),
            decoder,
            history,
            Arc::new(on_result),
            options.scan.decode_timeout(),
            cancellation_token.clone(),
        );
        let delivery = tokio::spawn(pipeline.run(frames_rx));
        let surface_waiter = self.spawn_surface_waiter(cancellation_token.clone());

        let id = Uuid::new_v4();
        let camera_id = self
            .shared
            .camera
            .lock()
            .info
            .map(|info| info.id)
            .unwrap_or_default();

        self.shared.analyzing.store(true, Ordering::SeqCst);
        info!(
            "Scan session {} started on camera {} at {}",
            id, camera_id, applied.resolution
        );
        self.shared.events.publish(ScanEvent::SessionStarted {
            session_id: id.to_string(),
            camera_id,
            resolution: applied.resolution,
            timestamp: SystemTime::now(),
        });

        let session = ActiveSession {
            id,
            cancellation_token,
            delivery,
            surface_waiter,
        };
        if let Some(previous) = self.session.lock().replace(session) {
            warn!("Concurrent start replaced session {}", previous.id);
            previous.cancel();
        }
        Ok(id)
    }

    /// Wait for a preview surface, then start the preview on it
    fn spawn_surface_waiter(&self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let mut surfaces = self.shared.surface.subscribe();
        let lifecycle = self.lifecycle.clone();
        let control = self.control.clone();

        tokio::spawn(async move {
            let surface = tokio::select! {
                _ = cancellation_token.cancelled() => None,
                surface = surfaces.wait_for(|s| s.is_some()) => match surface {
                    Ok(surface) => surface.clone(),
                    Err(_) => None,
                },
            };

            if let Some(surface) = surface {
                debug!("Preview surface available");
                control.post("start_preview", async move { lifecycle.start_preview(surface) });
            }
        })
    }

    fn end_session(&self) -> Option<Uuid> {
        let session = self.session.lock().take()?;
        let id = session.id;
        session.cancel();
        Some(id)
    }

    /// Stop analyzing and release the camera
    pub fn stop(&self) -> PostStatus {
        self.shared.analyzing.store(false, Ordering::SeqCst);

        if let Some(id) = self.end_session() {
            info!("Scan session {} stopped", id);
            self.shared.events.publish(ScanEvent::SessionStopped {
                session_id: id.to_string(),
                timestamp: SystemTime::now(),
            });
        }

        let lifecycle = self.lifecycle.clone();
        self.control
            .post("shutdown_camera", async move { lifecycle.shutdown() })
    }

    /// Keep the camera running but skip decoding
    pub fn pause(&self) {
        if self.shared.analyzing.swap(false, Ordering::SeqCst) {
            debug!("Scanning paused");
        }
    }

    pub fn resume(&self) {
        if self.session.lock().is_none() {
            debug!("No active session to resume");
            return;
        }
        if !self.shared.analyzing.swap(true, Ordering::SeqCst) {
            debug!("Scanning resumed");
        }
    }

    pub fn is_analyzing(&self) -> bool {
        self.shared.is_analyzing()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.lock().as_ref().map(|s| s.id)
    }

    /// Switch the torch on or off.
    ///
    /// Without a flash this logs and does nothing. Missing torch permission is
    /// an error.
    pub fn set_torch(&self, on: bool) -> Result<()> {
        if !self.shared.provider.has_flash() {
            info!("No flash available, torch request ignored");
            return Ok(());
        }
        self.shared.provider.check_torch_permission()?;

        self.shared.torch_on.store(on, Ordering::SeqCst);
        if self.shared.has_device() {
            let lifecycle = self.lifecycle.clone();
            self.control
                .post("apply_torch", async move { lifecycle.apply_torch(on) });
        }

        self.shared.events.publish(ScanEvent::TorchChanged { on });
        Ok(())
    }

    pub fn toggle_torch(&self) -> Result<()> {
        self.set_torch(!self.is_torch_on())
    }

    pub fn is_torch_on(&self) -> bool {
        self.shared.torch_on.load(Ordering::SeqCst)
    }

    /// Whether the open camera offers a torch mode and may use it
    pub fn has_torch(&self) -> bool {
        self.shared.provider.has_flash()
            && self.shared.torch_supported.load(Ordering::SeqCst)
            && self.shared.provider.check_torch_permission().is_ok()
    }

    pub fn request_autofocus(&self) -> PostStatus {
        self.lifecycle.request_autofocus()
    }

    /// Same as [`Scanner::request_autofocus`]; the point is not mapped to
    /// sensor coordinates.
    pub fn request_autofocus_at(&self, x: f32, y: f32) -> PostStatus {
        debug!("Autofocus at ({}, {}) requested, focusing whole frame", x, y);
        self.request_autofocus()
    }

    /// Feed a raw orientation sensor angle
    pub fn on_orientation_changed(&self, degrees: u32) {
        if !self.shared.has_device() {
            return;
        }

        let changed = self
            .shared
            .tracker
            .lock()
            .on_orientation_changed(degrees, self.shared.display.as_ref());
        if changed.is_some() {
            let lifecycle = self.lifecycle.clone();
            self.control
                .post("reorient", async move { lifecycle.reorient() });
        }
    }

    /// A preview surface became available
    pub fn on_surface_available(&self, surface: Arc<dyn PreviewSurface>) {
        debug!("Surface available at {}", surface.size());
        self.shared.surface.send_replace(Some(surface));
    }

    /// The preview surface was resized
    pub fn on_surface_size_changed(&self, width: u32, height: u32) -> PostStatus {
        let view = Resolution::new(width, height);
        let lifecycle = self.lifecycle.clone();
        self.control
            .post("update_geometry", async move { lifecycle.update_geometry(view) })
    }

    /// The preview surface is gone; the camera is shut down and the next
    /// session waits for a new surface
    pub fn on_surface_destroyed(&self) -> PostStatus {
        debug!("Surface destroyed");
        self.shared.surface.send_replace(None);
        let lifecycle = self.lifecycle.clone();
        self.control
            .post("shutdown_camera", async move { lifecycle.shutdown() })
    }

    pub fn stats(&self) -> ScanStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn control_stats(&self) -> ControlStatsSnapshot {
        self.control.stats()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn subscribe(&self, filter: EventFilter, name: &str) -> EventReceiver {
        self.shared.events.subscribe_filtered(filter, name)
    }

    /// Geometry the decoder currently crops with
    pub fn geometry(&self) -> Option<Arc<SurfaceGeometry>> {
        self.shared.geometry.current()
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Stop scanning, release the camera and stop the control context
    pub async fn shutdown(&self) {
        self.shared.analyzing.store(false, Ordering::SeqCst);
        self.end_session();

        let (done_tx, done_rx) = oneshot::channel();
        let lifecycle = self.lifecycle.clone();
        let status = self.control.post("shutdown_camera", async move {
            let result = lifecycle.shutdown();
            let _ = done_tx.send(());
            result
        });
        if status.is_queued() {
            let _ = done_rx.await;
        }

        self.control.shutdown();
        let task = self.control_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Control task ended abnormally: {}", e);
            }
        }
        info!("Scanner shut down");
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        self.shared.analyzing.store(false, Ordering::SeqCst);
        self.end_session();
        self.control.shutdown();

        if self.shared.has_device() {
            if let Err(e) = self.lifecycle.shutdown() {
                debug!("Camera shutdown on drop: {}", e);
            }
        }
    }
}

/// Builder for [`Scanner`]
pub struct ScannerBuilder {
    provider: Option<Arc<dyn CameraProvider>>,
    display: Option<Arc<dyn DisplayInfo>>,
    decoder_factory: Option<Arc<dyn DecoderFactory>>,
    config: Option<ScannerConfig>,
    events: Option<EventBus>,
}

impl ScannerBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            display: None,
            decoder_factory: None,
            config: None,
            events: None,
        }
    }

    /// Camera collaborator (required)
    pub fn provider(mut self, provider: Arc<dyn CameraProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Display collaborator; defaults to the configured static display
    pub fn display(mut self, display: Arc<dyn DisplayInfo>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn decoder_factory(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoder_factory = Some(factory);
        self
    }

    pub fn config(mut self, config: ScannerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share an existing event bus
    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the scanner and spawn its control context.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Scanner> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ScanError::system("Scanner must be built inside a Tokio runtime"))?;

        let provider = self
            .provider
            .ok_or_else(|| ScanError::system("Camera provider must be specified"))?;

        let config = self.config.unwrap_or_default();
        config.validate()?;

        let display = self.display.unwrap_or_else(|| {
            Arc::new(StaticDisplay::new(
                config.display.rotation,
                config.display.metrics(),
            ))
        });

        let decoder_factory = match self.decoder_factory {
            Some(factory) => factory,
            None => default_decoder_factory()?,
        };

        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(config.system.event_bus_capacity));

        let shared = Arc::new(ScannerShared::new(provider, display, events));
        let (control, control_task) =
            ControlContext::spawn_on(runtime, config.system.control_queue_capacity);
        let lifecycle = CameraLifecycle::new(Arc::clone(&shared), control.clone());

        debug!("Scanner built");
        Ok(Scanner {
            shared,
            lifecycle,
            control,
            control_task: Mutex::new(Some(control_task)),
            decoder_factory,
            config,
            session: Mutex::new(None),
        })
    }
}

impl Default for ScannerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "qr")]
fn default_decoder_factory() -> Result<Arc<dyn DecoderFactory>> {
    Ok(Arc::new(crate::decoder::QrDecoder::factory()))
}

#[cfg(not(feature = "qr"))]
fn default_decoder_factory() -> Result<Arc<dyn DecoderFactory>> {
    Err(ScanError::system(
        "Decoder factory must be specified when built without a decoder backend",
    ))
}

//! Per-frame scan protocol.
//!
//! Frames arrive one at a time on the delivery task. Cropping, rotation and
//! decoding run on a blocking worker which owns the frame lease, so the buffer
//! goes back to the camera on every exit path of the worker.

use super::lifecycle::CameraLifecycle;
use super::types::{ResultCallback, ScannerShared};
use crate::decoder::{DecodeResult, Decoder};
use crate::error::{Result, ScanError};
use crate::events::ScanEvent;
use crate::frame::{FrameLease, LuminanceView};
use crate::geometry::SurfaceGeometry;
use crate::history::ResultHistory;
use crate::rotation::FrameRotator;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// What happened to one delivered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Not analyzing; returned without decoding
    Skipped,
    /// Decoded and delivered to the callback
    Emitted,
    /// Decoded but suppressed within the cooldown
    Duplicate,
    /// Decoder found nothing
    NoResult,
    /// Processing failed; the frame was dropped
    Dropped,
}

/// Scratch buffers for the portrait path, reused across frames
#[derive(Debug, Default)]
struct PortraitBuffers {
    matrix: Vec<u8>,
    rotator: FrameRotator,
}

pub(crate) struct ScanPipeline {
    shared: Arc<ScannerShared>,
    lifecycle: CameraLifecycle,
    decoder: Arc<dyn Decoder>,
    history: ResultHistory,
    portrait: Arc<Mutex<PortraitBuffers>>,
    on_result: ResultCallback,
    decode_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl ScanPipeline {
    pub fn new(
        shared: Arc<ScannerShared>,
        lifecycle: CameraLifecycle,
        decoder: Arc<dyn Decoder>,
        history: ResultHistory,
        on_result: ResultCallback,
        decode_timeout: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            shared,
            lifecycle,
            decoder,
            history,
            portrait: Arc::new(Mutex::new(PortraitBuffers::default())),
            on_result,
            decode_timeout,
            cancellation_token,
        }
    }

    /// Process frames until the session is cancelled or the camera hangs up
    pub async fn run(mut self, mut frames: mpsc::Receiver<FrameLease>) {
        debug!("Frame delivery started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(lease) => {
                        self.process(lease).await;
                    }
                    None => break,
                },
            }
        }

        // Queued leases recycle themselves as the receiver drops
        frames.close();
        let snapshot = self.shared.stats.snapshot();
        info!(
            "Frame delivery stopped: {} frames, {} results, {} duplicates, {} errors",
            snapshot.frames_received,
            snapshot.results_emitted,
            snapshot.duplicates_suppressed,
            snapshot.frame_errors
        );
    }

    /// Run the scan protocol for one frame
    pub async fn process(&mut self, lease: FrameLease) -> FrameOutcome {
        self.shared.stats.record_frame();
        let sequence = lease.sequence();

        if !self.is_live() {
            trace!("Frame {} skipped, not analyzing", sequence);
            self.shared.stats.record_skipped();
            lease.release();
            return FrameOutcome::Skipped;
        }

        match self.decode(lease).await {
            Ok(Some(result)) => {
                self.shared.stats.record_decode(true);
                self.deliver(result)
            }
            Ok(None) => {
                self.shared.stats.record_decode(false);
                if !self.shared.continuous_focus.load(Ordering::SeqCst)
                    && !self.shared.autofocus_running.load(Ordering::SeqCst)
                {
                    self.lifecycle.request_autofocus();
                }
                FrameOutcome::NoResult
            }
            Err(e) => {
                self.shared.stats.record_frame_error();
                warn!("Dropping frame {}: {}", sequence, e);
                self.shared.events.publish(ScanEvent::FrameDropped {
                    sequence,
                    reason: e.to_string(),
                });
                FrameOutcome::Dropped
            }
        }
    }

    fn is_live(&self) -> bool {
        self.shared.is_analyzing() && !self.cancellation_token.is_cancelled()
    }

    /// Decode on a blocking worker, bounded by the decode timeout
    async fn decode(&self, lease: FrameLease) -> Result<Option<DecodeResult>> {
        let geometry = self.shared.geometry.current();
        let decoder = Arc::clone(&self.decoder);
        let portrait = Arc::clone(&self.portrait);

        let worker = tokio::task::spawn_blocking(move || {
            decode_frame(lease, geometry.as_deref(), decoder.as_ref(), &portrait)
        });

        match tokio::time::timeout(self.decode_timeout, worker).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_panic() => Err(ScanError::frame("Decoder panicked")),
            Ok(Err(e)) => Err(ScanError::frame(format!("Decode worker failed: {}", e))),
            // The worker keeps the lease until it finishes
            Err(_) => Err(ScanError::frame(format!(
                "Decode exceeded {:?}",
                self.decode_timeout
            ))),
        }
    }

    /// Gate a decoded result through the history and emit it
    fn deliver(&mut self, result: DecodeResult) -> FrameOutcome {
        if !self.is_live() {
            debug!("Session ended during decode, discarding '{}'", result.text);
            return FrameOutcome::Skipped;
        }

        let admission = self.history.admit(&result, Instant::now());
        if !admission.should_emit() {
            self.shared.stats.record_duplicate();
            self.shared.events.publish(ScanEvent::DuplicateSuppressed {
                text: result.text,
                timestamp: SystemTime::now(),
            });
            return FrameOutcome::Duplicate;
        }

        self.shared.stats.record_emitted();
        self.shared.events.publish(ScanEvent::ResultDecoded {
            text: result.text.clone(),
            format: result.format,
            timestamp: SystemTime::now(),
        });

        let on_result = Arc::clone(&self.on_result);
        if catch_unwind(AssertUnwindSafe(move || on_result(result))).is_err() {
            error!("Result callback panicked");
        }
        FrameOutcome::Emitted
    }
}

/// Crop, optionally rotate, and decode one frame, then recycle it
fn decode_frame(
    lease: FrameLease,
    geometry: Option<&SurfaceGeometry>,
    decoder: &dyn Decoder,
    portrait: &Mutex<PortraitBuffers>,
) -> Result<Option<DecodeResult>> {
    let result = {
        let buffer = lease
            .buffer()
            .ok_or_else(|| ScanError::frame("Lease no longer holds a buffer"))?;
        if !buffer.validate_size() {
            return Err(ScanError::frame(format!(
                "Buffer of {} bytes too small for {}",
                buffer.data.len(),
                buffer.resolution()
            )));
        }

        let luminance = buffer.luminance();
        match geometry {
            None => {
                let view = LuminanceView::full(luminance, buffer.width, buffer.height)?;
                decoder.decode(&view)
            }
            Some(geometry) => {
                if geometry.preview != buffer.resolution() {
                    return Err(ScanError::frame(format!(
                        "Stale geometry for {}, frame is {}",
                        geometry.preview,
                        buffer.resolution()
                    )));
                }

                let view =
                    LuminanceView::new(luminance, buffer.width, buffer.height, geometry.region)?;
                if geometry.is_portrait {
                    let mut scratch = portrait.lock();
                    let PortraitBuffers { matrix, rotator } = &mut *scratch;
                    view.copy_matrix(matrix);
                    let rotated = rotator.rotate_ccw_90(
                        matrix.as_slice(),
                        view.width() as usize,
                        view.height() as usize,
                    );
                    let rotated_view = LuminanceView::full(rotated, view.height(), view.width())?;
                    decoder.decode(&rotated_view)
                } else {
                    decoder.decode(&view)
                }
            }
        }
    };

    lease.release();
    Ok(result)
}

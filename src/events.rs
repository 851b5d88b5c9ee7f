use crate::decoder::BarcodeFormat;
use crate::error::{Result, ScanError};
use crate::frame::{Rectangle, Resolution};
use crate::orientation::SurfaceRotation;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events published by a scanner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Camera opened and configured for a new session
    SessionStarted {
        session_id: String,
        camera_id: u32,
        resolution: Resolution,
        timestamp: SystemTime,
    },
    /// Session stopped and camera shutdown requested
    SessionStopped {
        session_id: String,
        timestamp: SystemTime,
    },
    /// A result passed duplicate suppression and was delivered
    ResultDecoded {
        text: String,
        format: BarcodeFormat,
        timestamp: SystemTime,
    },
    /// A result was dropped as a duplicate within its cooldown
    DuplicateSuppressed { text: String, timestamp: SystemTime },
    /// A frame was skipped without producing a decode
    FrameDropped { sequence: u64, reason: String },
    /// A one-shot autofocus cycle was started
    AutofocusRequested { timestamp: SystemTime },
    /// A one-shot autofocus cycle finished
    AutofocusCompleted { focused: bool },
    /// Camera output orientation changed
    CameraReoriented {
        rotation: SurfaceRotation,
        degrees: u32,
    },
    /// Region of interest recomputed for a new surface size
    GeometryUpdated { region: Rectangle, portrait: bool },
    /// Torch switched on or off
    TorchChanged { on: bool },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
}

impl ScanEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ScanEvent::SessionStarted {
                camera_id,
                resolution,
                ..
            } => format!("Session started on camera {} at {}", camera_id, resolution),
            ScanEvent::SessionStopped { session_id, .. } => {
                format!("Session {} stopped", session_id)
            }
            ScanEvent::ResultDecoded { text, format, .. } => {
                format!("Decoded {:?}: {}", format, text)
            }
            ScanEvent::DuplicateSuppressed { text, .. } => {
                format!("Duplicate suppressed: {}", text)
            }
            ScanEvent::FrameDropped { sequence, reason } => {
                format!("Frame {} dropped: {}", sequence, reason)
            }
            ScanEvent::AutofocusRequested { .. } => "Autofocus requested".to_string(),
            ScanEvent::AutofocusCompleted { focused } => {
                format!(
                    "Autofocus {}",
                    if *focused { "focused" } else { "not focused" }
                )
            }
            ScanEvent::CameraReoriented { rotation, degrees } => {
                format!("Camera reoriented to {} for display {}", degrees, rotation)
            }
            ScanEvent::GeometryUpdated { region, portrait } => {
                format!("Region of interest {} (portrait: {})", region, portrait)
            }
            ScanEvent::TorchChanged { on } => {
                format!("Torch {}", if *on { "on" } else { "off" })
            }
            ScanEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ScanEvent::SessionStarted { .. } => "session_started",
            ScanEvent::SessionStopped { .. } => "session_stopped",
            ScanEvent::ResultDecoded { .. } => "result_decoded",
            ScanEvent::DuplicateSuppressed { .. } => "duplicate_suppressed",
            ScanEvent::FrameDropped { .. } => "frame_dropped",
            ScanEvent::AutofocusRequested { .. } => "autofocus_requested",
            ScanEvent::AutofocusCompleted { .. } => "autofocus_completed",
            ScanEvent::CameraReoriented { .. } => "camera_reoriented",
            ScanEvent::GeometryUpdated { .. } => "geometry_updated",
            ScanEvent::TorchChanged { .. } => "torch_changed",
            ScanEvent::SystemError { .. } => "system_error",
        }
    }
}

/// Event bus for scanner observers using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ScanEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let mut bus = Self::new(capacity);
        bus.debug_logging = true;
        bus
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers reached; having none is not an error.
    pub fn publish(&self, event: ScanEvent) -> usize {
        match &event {
            ScanEvent::SessionStarted { .. } | ScanEvent::SessionStopped { .. } => {
                info!("{}", event.description());
            }
            ScanEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept errors from specific components
    Components(Vec<String>),
    /// Custom filter function
    Custom(fn(&ScanEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &ScanEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Components(components) => {
                if let ScanEvent::SystemError { component, .. } = event {
                    components.contains(component)
                } else {
                    false
                }
            }
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<ScanEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<ScanEvent>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<ScanEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(ScanError::EventBus {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(ScanError::EventBus {
                        details: "Event bus closed".to_string(),
                    });
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<ScanEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(ScanError::EventBus {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(ScanError::EventBus {
                        details: "Event bus closed".to_string(),
                    });
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn decoded(text: &str) -> ScanEvent {
        ScanEvent::ResultDecoded {
            text: text.to_string(),
            format: BarcodeFormat::QrCode,
            timestamp: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        assert_eq!(event_bus.publish(decoded("hello")), 1);

        match receiver.recv().await.unwrap() {
            ScanEvent::ResultDecoded { text, .. } => assert_eq!(text, "hello"),
            _ => panic!("Unexpected event type"),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let event_bus = EventBus::new(10);
        assert!(!event_bus.has_subscribers());
        assert_eq!(event_bus.publish(ScanEvent::TorchChanged { on: true }), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(ScanEvent::AutofocusRequested {
            timestamp: SystemTime::now(),
        });

        timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::EventTypes(vec!["result_decoded", "duplicate_suppressed"]);

        assert!(filter.matches(&decoded("x")));
        assert!(!filter.matches(&ScanEvent::TorchChanged { on: false }));

        let components = EventFilter::Components(vec!["camera".to_string()]);
        assert!(components.matches(&ScanEvent::SystemError {
            component: "camera".to_string(),
            error: "busy".to_string(),
        }));
        assert!(!components.matches(&decoded("x")));

        let custom = EventFilter::Custom(|e| matches!(e, ScanEvent::FrameDropped { .. }));
        assert!(custom.matches(&ScanEvent::FrameDropped {
            sequence: 3,
            reason: "paused".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut receiver =
            event_bus.subscribe_filtered(EventFilter::EventTypes(vec!["result_decoded"]), "test");

        event_bus.publish(ScanEvent::TorchChanged { on: true });
        event_bus.publish(decoded("payload"));

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "result_decoded");
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_error() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe_filtered(EventFilter::All, "slow");

        for i in 0..5 {
            event_bus.publish(ScanEvent::FrameDropped {
                sequence: i,
                reason: "test".to_string(),
            });
        }

        assert!(matches!(
            receiver.recv().await,
            Err(ScanError::EventBus { .. })
        ));
    }

    #[test]
    fn test_event_descriptions() {
        let event = ScanEvent::CameraReoriented {
            rotation: SurfaceRotation::Rotation90,
            degrees: 0,
        };
        assert_eq!(event.event_type(), "camera_reoriented");
        assert!(event.description().contains("90°"));

        let json = serde_json::to_string(&ScanEvent::GeometryUpdated {
            region: Rectangle::new(0, 0, 1280, 720),
            portrait: true,
        })
        .unwrap();
        assert!(json.contains("GeometryUpdated"));
    }
}

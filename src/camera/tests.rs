use super::*;
use crate::config::ScannerConfig;
use crate::frame::{FrameBuffer, PixelFormat, Resolution};
use crate::geometry::DisplayTransform;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

fn create_test_camera_config() -> crate::config::CameraConfig {
    ScannerConfig::default().camera
}

#[test]
fn test_first_supported_respects_preference_order() {
    let supported = [FocusMode::Fixed, FocusMode::Auto];
    assert_eq!(
        first_supported(&supported, &PREFERRED_FOCUS_MODES),
        Some(FocusMode::Auto)
    );

    assert_eq!(
        first_supported(&[FlashMode::Off], &[FlashMode::Torch, FlashMode::On]),
        None
    );
}

#[test]
fn test_select_camera_by_facing() {
    let cameras = [
        CameraInfo {
            id: 0,
            facing: Facing::Back,
            orientation: 90,
        },
        CameraInfo {
            id: 1,
            facing: Facing::Front,
            orientation: 270,
        },
    ];

    assert_eq!(select_camera(&cameras, Facing::Back).map(|c| c.id), Some(0));
    assert_eq!(select_camera(&cameras, Facing::Front).map(|c| c.id), Some(1));
}

#[test]
fn test_select_camera_falls_back_to_last() {
    let cameras = [
        CameraInfo {
            id: 3,
            facing: Facing::Back,
            orientation: 90,
        },
        CameraInfo {
            id: 7,
            facing: Facing::Back,
            orientation: 270,
        },
    ];

    assert_eq!(select_camera(&cameras, Facing::Front).map(|c| c.id), Some(7));
    assert_eq!(select_camera(&[], Facing::Back), None);
}

#[test]
fn test_select_resolution_prefers_requested() {
    let mut config = create_test_camera_config();
    config.preferred_resolution = Some((1920, 1080));

    let supported = MockCameraProvider::default_capabilities().preview_sizes;
    assert_eq!(
        select_resolution(&supported, &config),
        Some(Resolution::new(1920, 1080))
    );
}

#[test]
fn test_select_resolution_fallback_bounds() {
    let config = create_test_camera_config();

    // 640x480 is too short, 960x720 is the narrowest within bounds
    let supported = MockCameraProvider::default_capabilities().preview_sizes;
    assert_eq!(
        select_resolution(&supported, &config),
        Some(Resolution::new(960, 720))
    );

    let nothing_fits = [Resolution::new(320, 240), Resolution::new(1920, 1080)];
    assert_eq!(select_resolution(&nothing_fits, &config), None);
}

#[test]
fn test_capture_settings_builder() {
    let capabilities = MockCameraProvider::default_capabilities();
    let config = create_test_camera_config();

    let settings = CaptureSettingsBuilder::new()
        .capabilities(&capabilities)
        .config(&config)
        .build()
        .unwrap();

    assert_eq!(settings.focus_mode, Some(FocusMode::ContinuousVideo));
    assert_eq!(settings.format, PixelFormat::Nv21);
    assert_eq!(settings.resolution, Some(Resolution::new(960, 720)));
}

#[test]
fn test_capture_settings_builder_validation() {
    let config = create_test_camera_config();
    assert!(CaptureSettingsBuilder::new().config(&config).build().is_err());

    let capabilities = CameraCapabilities {
        preview_formats: vec![PixelFormat::Gray8],
        ..MockCameraProvider::default_capabilities()
    };
    let result = CaptureSettingsBuilder::new()
        .capabilities(&capabilities)
        .config(&config)
        .build();
    assert!(matches!(
        result,
        Err(crate::error::ScanError::DeviceUnavailable { .. })
    ));
}

#[test]
fn test_mock_provider_permissions() {
    let provider = MockCameraProvider::new();
    assert!(provider.check_camera_permission().is_ok());

    provider.set_camera_permission(false);
    assert!(matches!(
        provider.check_camera_permission(),
        Err(crate::error::ScanError::PermissionDenied { .. })
    ));

    provider.set_torch_permission(false);
    assert!(provider.check_torch_permission().is_err());
    assert!(provider.open(42).is_err());
}

#[tokio::test]
async fn test_mock_camera_frame_delivery_and_recycling() {
    let provider = MockCameraProvider::new();
    let device = provider.open(0).unwrap();
    let camera = provider.last_opened().unwrap();

    let resolution = Resolution::new(4, 2);
    device.add_frame_buffer(FrameBuffer::allocate(resolution, PixelFormat::Nv21));

    let (tx, mut rx) = mpsc::channel(4);
    device.set_frame_sink(Some(tx));

    // Not previewing yet
    assert!(!camera.deliver_frame(&[1; 8]));

    device
        .start_preview(Arc::new(MockSurface::new(Resolution::new(2, 4))))
        .unwrap();
    assert!(camera.deliver_frame(&[1, 2, 3, 4, 5, 6, 7, 8]));

    // Single buffer is out on loan
    assert!(!camera.deliver_frame(&[9; 8]));
    assert_eq!(camera.dropped_frames(), 1);

    let lease = rx.recv().await.unwrap();
    let buffer = lease.buffer().unwrap();
    assert_eq!(buffer.luminance(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(buffer.sequence, 1);
    assert_eq!(buffer.data.len(), 12);

    drop(lease);
    assert_eq!(camera.free_buffers(), 1);
    assert_eq!(camera.recycled_buffers(), 1);
    assert!(camera.deliver_frame(&[0; 8]));
}

#[test]
fn test_mock_camera_autofocus() {
    let provider = MockCameraProvider::new();
    let device = provider.open(0).unwrap();
    let camera = provider.last_opened().unwrap();

    let focused = Arc::new(AtomicBool::new(false));
    let flag = focused.clone();
    device
        .request_autofocus(Box::new(move |ok| flag.store(ok, Ordering::SeqCst)))
        .unwrap();

    assert_eq!(camera.autofocus_requests(), 1);
    assert!(camera.has_pending_autofocus());
    assert!(camera.complete_autofocus(true));
    assert!(focused.load(Ordering::SeqCst));
    assert!(!camera.complete_autofocus(true));
}

#[test]
fn test_mock_camera_release() {
    let provider = MockCameraProvider::new().with_applied_resolution(Resolution::new(1280, 720));
    let device = provider.open(0).unwrap();

    let applied = device
        .configure(&CaptureSettings {
            resolution: Some(Resolution::new(640, 480)),
            focus_mode: Some(FocusMode::Auto),
            format: PixelFormat::Nv21,
        })
        .unwrap();
    assert_eq!(applied.resolution, Resolution::new(1280, 720));
    assert!(!applied.continuous_focus());

    device.release();
    assert!(matches!(
        device.set_display_orientation(90),
        Err(crate::error::ScanError::Teardown { .. })
    ));
}

#[test]
fn test_disposed_surface_rejects_transform() {
    let surface = MockSurface::new(Resolution::new(720, 1280));
    assert!(surface.set_transform(DisplayTransform::IDENTITY).is_ok());

    surface.dispose();
    let err = surface.set_transform(DisplayTransform::IDENTITY).unwrap_err();
    assert!(err.is_transient());
    assert_eq!(surface.transforms().len(), 1);
}

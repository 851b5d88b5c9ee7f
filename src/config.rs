use crate::camera::Facing;
use crate::decoder::DecoderOptions;
use crate::frame::Resolution;
use crate::orientation::{DisplayMetrics, SurfaceRotation};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScannerConfig {
    pub camera: CameraConfig,
    pub scan: ScanConfig,
    #[serde(default)]
    pub decoder: DecoderOptions,
    pub display: DisplayConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Which camera to prefer (back or front)
    #[serde(default = "default_camera_facing")]
    pub facing: Facing,

    /// Preview size to use when the device offers it
    #[serde(default)]
    pub preferred_resolution: Option<(u32, u32)>,

    /// Fallback preview width range
    #[serde(default = "default_min_width")]
    pub min_width: u32,
    #[serde(default = "default_max_width")]
    pub max_width: u32,

    /// Fallback preview height range
    #[serde(default = "default_min_height")]
    pub min_height: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,

    /// Capture buffers registered with the device
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// Frame rate of the mock frame source
    #[serde(default = "default_camera_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScanConfig {
    /// Delay between continuous scans of the same payload
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Distinct payloads remembered for duplicate suppression
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Delay before retrying an autofocus cycle that did not focus
    #[serde(default = "default_autofocus_retry_ms")]
    pub autofocus_retry_ms: u64,

    /// Decodes running longer than this count as dropped frames
    #[serde(default = "default_decode_timeout_ms")]
    pub decode_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_dpi")]
    pub xdpi: f32,

    #[serde(default = "default_dpi")]
    pub ydpi: f32,

    /// Size of the view the preview is rendered into
    #[serde(default = "default_view_resolution")]
    pub view_resolution: (u32, u32),

    /// Display rotation reported to the scanner
    #[serde(default)]
    pub rotation: SurfaceRotation,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Pending operations allowed on the control context
    #[serde(default = "default_control_queue_capacity")]
    pub control_queue_capacity: usize,
}

impl CameraConfig {
    pub fn preferred_resolution(&self) -> Option<Resolution> {
        self.preferred_resolution.map(Resolution::from)
    }

    /// Check the capture settings a session is opened with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some((width, height)) = self.preferred_resolution {
            if width == 0 || height == 0 {
                return Err(ConfigError::Message(
                    "Preferred resolution must be greater than 0".to_string(),
                ));
            }
        }

        if self.min_width == 0 || self.min_height == 0 {
            return Err(ConfigError::Message(
                "Minimum preview size must be greater than 0".to_string(),
            ));
        }

        if self.min_width > self.max_width || self.min_height > self.max_height {
            return Err(ConfigError::Message(format!(
                "Preview size bounds are empty: width {}..={}, height {}..={}",
                self.min_width, self.max_width, self.min_height, self.max_height
            )));
        }

        if self.buffer_count == 0 {
            return Err(ConfigError::Message(
                "Camera buffer_count must be greater than 0".to_string(),
            ));
        }

        if self.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl ScanConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn autofocus_retry(&self) -> Duration {
        Duration::from_millis(self.autofocus_retry_ms)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }

    /// Check the history and decode settings a session runs with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Message(
                "History capacity must be greater than 0".to_string(),
            ));
        }

        if self.decode_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Decode timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl DisplayConfig {
    pub fn metrics(&self) -> DisplayMetrics {
        DisplayMetrics {
            xdpi: self.xdpi,
            ydpi: self.ydpi,
        }
    }

    pub fn view_resolution(&self) -> Resolution {
        Resolution::from(self.view_resolution)
    }
}

impl ScannerConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("codescan.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("camera.facing", "back")?
            .set_default("camera.min_width", default_min_width())?
            .set_default("camera.max_width", default_max_width())?
            .set_default("camera.min_height", default_min_height())?
            .set_default("camera.max_height", default_max_height())?
            .set_default("camera.buffer_count", default_buffer_count() as i64)?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("scan.cooldown_ms", default_cooldown_ms())?
            .set_default("scan.history_capacity", default_history_capacity() as i64)?
            .set_default("scan.autofocus_retry_ms", default_autofocus_retry_ms())?
            .set_default("scan.decode_timeout_ms", default_decode_timeout_ms())?
            .set_default("display.xdpi", default_dpi() as f64)?
            .set_default("display.ydpi", default_dpi() as f64)?
            .set_default(
                "display.view_resolution",
                vec![default_view_resolution().0, default_view_resolution().1],
            )?
            .set_default("display.rotation", "0")?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.control_queue_capacity",
                default_control_queue_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with CODESCAN_ prefix
            .add_source(Environment::with_prefix("CODESCAN").separator("_"))
            .build()?;

        let config: ScannerConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.camera.validate()?;
        self.scan.validate()?;

        let dpi_valid = |d: f32| d.is_finite() && d > 0.0;
        if !dpi_valid(self.display.xdpi) || !dpi_valid(self.display.ydpi) {
            return Err(ConfigError::Message(
                "Display dpi must be greater than 0".to_string(),
            ));
        }

        if self.display.view_resolution.0 == 0 || self.display.view_resolution.1 == 0 {
            return Err(ConfigError::Message(
                "View resolution must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.control_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Control queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                facing: default_camera_facing(),
                preferred_resolution: None,
                min_width: default_min_width(),
                max_width: default_max_width(),
                min_height: default_min_height(),
                max_height: default_max_height(),
                buffer_count: default_buffer_count(),
                fps: default_camera_fps(),
            },
            scan: ScanConfig {
                cooldown_ms: default_cooldown_ms(),
                history_capacity: default_history_capacity(),
                autofocus_retry_ms: default_autofocus_retry_ms(),
                decode_timeout_ms: default_decode_timeout_ms(),
            },
            decoder: DecoderOptions::default(),
            display: DisplayConfig {
                xdpi: default_dpi(),
                ydpi: default_dpi(),
                view_resolution: default_view_resolution(),
                rotation: SurfaceRotation::default(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                control_queue_capacity: default_control_queue_capacity(),
            },
        }
    }
}

// Default value functions
fn default_camera_facing() -> Facing {
    Facing::Back
}
fn default_min_width() -> u32 {
    640
}
fn default_max_width() -> u32 {
    1280
}
fn default_min_height() -> u32 {
    640
}
fn default_max_height() -> u32 {
    960
}
fn default_buffer_count() -> usize {
    1
}
fn default_camera_fps() -> u32 {
    30
}

fn default_cooldown_ms() -> u64 {
    1000
}
fn default_history_capacity() -> usize {
    crate::history::DEFAULT_HISTORY_CAPACITY
}
fn default_autofocus_retry_ms() -> u64 {
    1000
}
fn default_decode_timeout_ms() -> u64 {
    2000
}

fn default_dpi() -> f32 {
    160.0
}
fn default_view_resolution() -> (u32, u32) {
    (720, 1280)
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_control_queue_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::BarcodeFormat;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ScannerConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.camera.facing, Facing::Back);
        assert_eq!(config.camera.buffer_count, 1);
        assert_eq!(config.scan.cooldown(), Duration::from_secs(1));
        assert_eq!(config.scan.history_capacity, 10);
        assert_eq!(config.display.rotation, SurfaceRotation::Rotation0);
    }

    #[test]
    fn test_load_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let config = ScannerConfig::load_from_file(&path).unwrap();
        let defaults = ScannerConfig::default();
        assert_eq!(config.scan, defaults.scan);
        assert_eq!(config.display, defaults.display);
        assert_eq!(config.system, defaults.system);
        assert_eq!(config.camera.min_height, 640);
        assert_eq!(config.camera.max_height, 960);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
facing = "front"
preferred_resolution = [1920, 1080]

[scan]
cooldown_ms = 500

[decoder]
try_harder = true
possible_formats = ["qr_code"]

[display]
rotation = "90"
view_resolution = [1280, 720]
"#
        )
        .unwrap();

        let config = ScannerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.facing, Facing::Front);
        assert_eq!(
            config.camera.preferred_resolution(),
            Some(Resolution::new(1920, 1080))
        );
        assert_eq!(config.camera.min_width, 640);
        assert_eq!(config.scan.cooldown(), Duration::from_millis(500));
        assert_eq!(config.scan.history_capacity, 10);
        assert_eq!(config.decoder.try_harder, Some(true));
        assert_eq!(config.decoder.possible_formats, vec![BarcodeFormat::QrCode]);
        assert_eq!(config.display.rotation, SurfaceRotation::Rotation90);
        assert_eq!(config.display.view_resolution(), Resolution::new(1280, 720));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_variable_override() {
        env::set_var("CODESCAN_CAMERA_FACING", "front");

        let dir = tempfile::tempdir().unwrap();
        let config = ScannerConfig::load_from_file(dir.path().join("none.toml")).unwrap();
        assert_eq!(config.camera.facing, Facing::Front);

        env::remove_var("CODESCAN_CAMERA_FACING");
    }

    #[test]
    fn test_config_validation() {
        let mut config = ScannerConfig::default();

        config.camera.min_width = 2000;
        assert!(config.validate().is_err());
        config.camera.min_width = 640;

        config.scan.history_capacity = 0;
        assert!(config.validate().is_err());
        config.scan.history_capacity = 10;

        config.display.ydpi = 0.0;
        assert!(config.validate().is_err());
        config.display.ydpi = 160.0;

        config.camera.preferred_resolution = Some((0, 720));
        assert!(config.validate().is_err());
        config.camera.preferred_resolution = Some((1280, 720));

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ScannerConfig::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[scan]"));
        assert!(rendered.contains("cooldown_ms = 1000"));

        let parsed: ScannerConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}

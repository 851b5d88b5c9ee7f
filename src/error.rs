use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Permission denied: {capability}")]
    PermissionDenied { capability: String },

    #[error("Camera device unavailable: {details}")]
    DeviceUnavailable { details: String },

    #[error("Frame processing failed: {details}")]
    Frame { details: String },

    #[error("Surface or device already torn down: {details}")]
    Teardown { details: String },

    #[error("Control context is shut down, action discarded")]
    Discarded,

    #[error("Decoder error: {details}")]
    Decoder { details: String },

    #[error("Event bus error: {details}")]
    EventBus { details: String },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl ScanError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied<S: Into<String>>(capability: S) -> Self {
        Self::PermissionDenied {
            capability: capability.into(),
        }
    }

    pub fn device_unavailable<S: Into<String>>(details: S) -> Self {
        Self::DeviceUnavailable {
            details: details.into(),
        }
    }

    pub fn frame<S: Into<String>>(details: S) -> Self {
        Self::Frame {
            details: details.into(),
        }
    }

    pub fn teardown<S: Into<String>>(details: S) -> Self {
        Self::Teardown {
            details: details.into(),
        }
    }

    /// Errors the session logs and swallows instead of surfacing to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScanError::Frame { .. } | ScanError::Teardown { .. } | ScanError::Discarded
        )
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ScanError::frame("short buffer").is_transient());
        assert!(ScanError::teardown("surface disposed").is_transient());
        assert!(ScanError::Discarded.is_transient());

        assert!(!ScanError::permission_denied("camera").is_transient());
        assert!(!ScanError::device_unavailable("no back camera").is_transient());
        assert!(!ScanError::system("boom").is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = ScanError::permission_denied("flashlight");
        assert_eq!(err.to_string(), "Permission denied: flashlight");

        let err = ScanError::component("scanner", "not started");
        assert_eq!(err.to_string(), "Component error in scanner: not started");
    }
}

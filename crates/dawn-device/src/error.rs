use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The radio is switched off or absent.
    #[error("Device capability unavailable")]
    Unavailable,

    /// The process lacks permission to use the radio.
    #[error("Not authorized to use the device capability")]
    Unauthorized,

    #[error("Connection timed out after {ms} ms")]
    ConnectionTimeout { ms: u64 },

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Discovery error: {0}")]
    Discovery(String),
}

impl DeviceError {
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::Unavailable => "DEVICE_UNAVAILABLE",
            DeviceError::Unauthorized => "DEVICE_UNAUTHORIZED",
            DeviceError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            DeviceError::ConnectFailed(_) => "CONNECT_FAILED",
            DeviceError::Discovery(_) => "DISCOVERY_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

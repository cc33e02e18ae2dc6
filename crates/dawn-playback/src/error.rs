use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The platform would not grant the exclusive audio-output resource.
    #[error("Audio focus denied")]
    FocusDenied,

    /// Neither the chosen source nor the default sound could be resolved.
    #[error("Audio source resolution failed: {0}")]
    SourceResolution(String),

    #[error("Audio output error: {0}")]
    Output(String),
}

impl PlaybackError {
    pub fn code(&self) -> &'static str {
        match self {
            PlaybackError::FocusDenied => "FOCUS_DENIED",
            PlaybackError::SourceResolution(_) => "SOURCE_RESOLUTION",
            PlaybackError::Output(_) => "OUTPUT_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;

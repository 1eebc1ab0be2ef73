use thiserror::Error;

/// Errors raised by authored timeline and project mutations.
///
/// These never originate from the render loop; callers get them synchronously.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineError {
    #[error("sequence '{0}' could not be found")]
    SequenceNotFound(String),

    #[error("track with id '{track_id}' could not be found in sequence '{sequence_id}'")]
    TrackNotFound { sequence_id: String, track_id: String },

    #[error("event with id '{event_id}' could not be found in track '{track_id}'")]
    EventNotFound { track_id: String, event_id: String },

    #[error("playlist '{0}' could not be found")]
    PlaylistNotFound(String),

    #[error("string device '{0}' could not be found")]
    DeviceNotFound(String),

    #[error("new track name for track '{0}' is empty after trimming")]
    EmptyTrackName(String),

    #[error("event range [{start}, {end}) is empty")]
    InvalidEventRange { start: u32, end: u32 },
}

/// Errors from the WLED / smart plug HTTP control channel.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("device answered with status {0}")]
    Status(u16),
}

/// Errors from the DDP pixel transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("payload of {0} bytes does not fit in a single DDP packet")]
    PayloadTooLarge(usize),

    #[error("control channel: {0}")]
    Control(#[from] ControlError),
}

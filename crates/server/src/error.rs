use thiserror::Error;

/// Errors crossing component boundaries. Each variant is distinguishable so
/// callers can react (fatal at startup, 500 in steady state, close a socket).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration: {0}")]
    Config(String),

    #[error("no monitors detected")]
    NoMonitors,

    #[cfg_attr(windows, allow(dead_code))]
    #[error("monitor enumeration is not supported on this platform")]
    MonitorsUnsupported,

    #[error("monitor {0} not found")]
    MonitorNotFound(i32),

    #[error("encoder failed to start: {0}")]
    EncoderStart(String),

    #[error("rtp bind failed: {0}")]
    RtpBind(#[source] std::io::Error),

    #[error("rtp port allocation failed: {0}")]
    PortAlloc(#[source] std::io::Error),

    #[error("pipeline: {0}")]
    Pipeline(String),

    #[error("signaling protocol: {0}")]
    Protocol(String),

    #[error("{0} rect not calibrated")]
    CalibrationMissing(&'static str),

    #[error("input injection is not supported on this platform")]
    InputUnsupported,

    #[cfg_attr(not(windows), allow(dead_code))]
    #[error("input injection failed: {0}")]
    Injection(String),

    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

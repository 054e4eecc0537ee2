use serde::{Deserialize, Serialize};

use crate::geometry::{Mode, Rect, VideoMode};

/// WebRTC signaling payloads exchanged over `/ws/signal`.
///
/// The browser offers, the server answers with a self-contained SDP (ICE
/// gathering completes before the answer is sent), and `restart` tells the
/// viewer to re-offer after the media pipeline was rebuilt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Ice {
        #[serde(default)]
        candidate: Option<IceCandidate>,
    },
    Restart,
}

/// An ICE candidate in the browser's `RTCIceCandidateInit` JSON shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Input and state-control payloads exchanged over `/ws/control`.
///
/// Pointer coordinates are normalized to `[0,1]²` and are monitor-relative in
/// presetup mode, plugin-relative in run mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "camelCase")]
pub enum ControlMessage {
    Down {
        #[serde(default)]
        id: i32,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    Move {
        #[serde(default)]
        id: i32,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    Up {
        #[serde(default)]
        id: i32,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    /// Click at the current cursor position (caged in run mode).
    Click,
    RelMove {
        #[serde(default)]
        dx: i32,
        #[serde(default)]
        dy: i32,
    },
    #[serde(rename_all = "camelCase")]
    Wheel {
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default)]
        wheel_x: i32,
        #[serde(default)]
        wheel_y: i32,
    },
    Type {
        #[serde(default)]
        text: String,
    },
    Enter,
    ClearChat,
    SetMode {
        #[serde(default)]
        mode: String,
    },
    SetMonitor {
        #[serde(default)]
        idx: i32,
    },
    RestartPresetup,
    SetVideo {
        #[serde(default)]
        video: String,
    },
    InputEnabled {
        enabled: bool,
    },
    CalibRect {
        step: String,
        rect: Rect,
    },
}

/// `POST /login` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: String,
}

/// Generic `{"ok":true}` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Which calibration rectangles currently have positive area.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CalibStatus {
    pub plugin: bool,
    pub chat: bool,
    pub scroll: bool,
}

/// `GET /api/state` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub mode: Mode,
    #[serde(rename = "monitor")]
    pub monitor_index: i32,
    pub input_enabled: bool,
    pub video_mode: VideoMode,
    pub calib: CalibStatus,
    pub authenticated: bool,
}

/// `POST /api/config` body: runtime MJPEG tuning.
///
/// `reset` restores the values captured from the environment at startup;
/// otherwise only the provided fields change, after validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigUpdate {
    pub mjpeg_interval_ms: Option<u64>,
    pub mjpeg_quality: Option<u32>,
    pub reset: bool,
}

/// `POST /api/config` response: the effective runtime values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub applied: bool,
    pub mjpeg_interval_ms: u64,
    pub mjpeg_quality: u32,
}

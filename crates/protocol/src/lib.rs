//! Shared data model and JSON wire messages for DeskSlice.
//!
//! The server captures a slice of a host display, streams it to a single
//! browser viewer over WebRTC, and accepts pointer/keyboard input back.
//! Everything that crosses a serialization boundary lives here: the geometry
//! model (rectangles, monitors, calibration), the signaling and control
//! WebSocket messages, and the HTTP request/response bodies.

pub mod geometry;
pub mod messages;

pub use geometry::{Calibration, Mode, Monitor, Rect, VideoMode};
pub use messages::{
    CalibStatus, ConfigResponse, ConfigUpdate, ControlMessage, IceCandidate, LoginRequest,
    OkResponse, SignalMessage, StateResponse,
};

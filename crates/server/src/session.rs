use std::sync::RwLock;

use deskslice_protocol::{Calibration, Mode, VideoMode};

/// A consistent copy of the session state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub authenticated: bool,
    pub input_enabled: bool,
    pub mode: Mode,
    pub monitor_index: i32,
    pub video_mode: VideoMode,
    pub calib: Calibration,
}

#[derive(Debug)]
struct State {
    authenticated: bool,
    input_enabled: bool,
    mode: Mode,
    monitor_index: i32,
    video_mode: VideoMode,
    calib: Calibration,
}

/// Runtime state for the single viewer, guarded by one reader-preferring
/// lock. Getters copy; the lock is never held across an await point.
#[derive(Debug)]
pub struct Session {
    password: String,
    state: RwLock<State>,
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

impl Session {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            state: RwLock::new(State {
                authenticated: false,
                input_enabled: true,
                mode: Mode::Presetup,
                monitor_index: 0,
                video_mode: VideoMode::Mjpeg,
                calib: Calibration::default(),
            }),
        }
    }

    /// Validate the password and set the auth flag accordingly.
    /// An empty password never authenticates.
    pub fn authenticate(&self, password: &str) -> bool {
        let ok = !password.is_empty()
            && constant_time_eq(password.as_bytes(), self.password.as_bytes());
        self.write().authenticated = ok;
        ok
    }

    pub fn logout(&self) {
        self.write().authenticated = false;
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().authenticated
    }

    pub fn set_input_enabled(&self, enabled: bool) {
        self.write().input_enabled = enabled;
    }

    pub fn input_enabled(&self) -> bool {
        self.read().input_enabled
    }

    pub fn set_mode(&self, mode: Mode) {
        self.write().mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.read().mode
    }

    pub fn set_monitor(&self, index: i32) {
        self.write().monitor_index = index;
    }

    pub fn monitor_index(&self) -> i32 {
        self.read().monitor_index
    }

    /// Unknown values normalize to webrtc.
    pub fn set_video_mode(&self, raw: &str) {
        self.write().video_mode = VideoMode::parse(raw);
    }

    pub fn set_calib(&self, calib: Calibration) {
        self.write().calib = calib;
    }

    pub fn calib(&self) -> Calibration {
        self.read().calib
    }

    /// Copy every field under one lock acquisition.
    pub fn snapshot(&self) -> Snapshot {
        let s = self.read();
        Snapshot {
            authenticated: s.authenticated,
            input_enabled: s.input_enabled,
            mode: s.mode,
            monitor_index: s.monitor_index,
            video_mode: s.video_mode,
            calib: s.calib,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskslice_protocol::Rect;

    #[test]
    fn authenticate_success_sets_flag() {
        let s = Session::new("secret");
        assert!(s.authenticate("secret"));
        assert!(s.is_authenticated());
    }

    #[test]
    fn authenticate_failure_clears_flag() {
        let s = Session::new("secret");
        assert!(s.authenticate("secret"));
        assert!(!s.authenticate("nope"));
        assert!(!s.is_authenticated());
    }

    #[test]
    fn empty_passwords_never_authenticate() {
        let s = Session::new("");
        assert!(!s.authenticate(""));
        assert!(!s.authenticate("anything"));
        let s = Session::new("secret");
        assert!(!s.authenticate(""));
    }

    #[test]
    fn logout_clears_auth() {
        let s = Session::new("secret");
        s.authenticate("secret");
        s.logout();
        assert!(!s.is_authenticated());
    }

    #[test]
    fn input_enabled_toggles() {
        let s = Session::new("secret");
        assert!(s.input_enabled());
        s.set_input_enabled(false);
        assert!(!s.input_enabled());
    }

    #[test]
    fn video_mode_normalizes_unknown_values() {
        let s = Session::new("secret");
        assert_eq!(s.snapshot().video_mode, VideoMode::Mjpeg);
        s.set_video_mode("h265");
        assert_eq!(s.snapshot().video_mode, VideoMode::Webrtc);
        s.set_video_mode("mjpeg");
        assert_eq!(s.snapshot().video_mode, VideoMode::Mjpeg);
    }

    #[test]
    fn snapshot_copies_all_fields() {
        let s = Session::new("secret");
        s.authenticate("secret");
        s.set_input_enabled(false);
        s.set_mode(Mode::Run);
        s.set_monitor(2);
        s.set_calib(Calibration {
            monitor_index: 2,
            plugin_abs: Rect::new(1, 2, 3, 4),
            ..Default::default()
        });
        let snap = s.snapshot();
        assert!(snap.authenticated);
        assert!(!snap.input_enabled);
        assert_eq!(snap.mode, Mode::Run);
        assert_eq!(snap.monitor_index, 2);
        assert_eq!(snap.calib.plugin_abs, Rect::new(1, 2, 3, 4));
    }
}

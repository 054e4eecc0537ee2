use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use deskslice_protocol::{Calibration, ControlMessage, Mode, Monitor, Rect};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calib;
use crate::error::{Result, ServerError};
use crate::gestures::{self, Action, GestureState};
use crate::mapper;
use crate::pipeline::PipelineController;
use crate::session::Session;
use crate::wininput::Injector;

/// The input control plane behind `/ws/control`: maps normalized pointer
/// events to absolute host coordinates, enforces the run-mode cage, tracks
/// drag gestures, and applies calibration/state changes.
///
/// One control connection is active at a time; a second upgrade is refused.
pub struct ControlServer {
    session: Arc<Session>,
    injector: Arc<dyn Injector>,
    monitors: Vec<Monitor>,
    pipeline: Arc<PipelineController>,
    calib_path: PathBuf,
    scroll_max_delta: i32,
    gestures: tokio::sync::Mutex<GestureState>,
    active: Mutex<Option<Uuid>>,
}

impl ControlServer {
    pub fn new(
        session: Arc<Session>,
        injector: Arc<dyn Injector>,
        monitors: Vec<Monitor>,
        pipeline: Arc<PipelineController>,
        calib_path: PathBuf,
        scroll_max_delta: i32,
    ) -> Self {
        Self {
            session,
            injector,
            monitors,
            pipeline,
            calib_path,
            scroll_max_delta,
            gestures: tokio::sync::Mutex::new(GestureState::new()),
            active: Mutex::new(None),
        }
    }

    /// Drive one control connection. Injection or protocol errors close the
    /// connection; the server itself keeps running.
    pub async fn handle_socket(self: Arc<Self>, mut socket: WebSocket) {
        let id = Uuid::new_v4();
        let already_active = {
            let mut active = self.lock_active();
            if active.is_some() {
                true
            } else {
                *active = Some(id);
                false
            }
        };
        if already_active {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "control connection already active".into(),
                })))
                .await;
            return;
        }
        info!(%id, "control connected");

        while let Some(received) = socket.recv().await {
            let Ok(msg) = received else { break };
            match msg {
                Message::Text(text) => {
                    if let Err(e) = self.handle_text(text.as_str()).await {
                        warn!(%id, "control: {e}");
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        let mut active = self.lock_active();
        if *active == Some(id) {
            *active = None;
        }
        drop(active);
        info!(%id, "control disconnected");
    }

    async fn handle_text(&self, text: &str) -> Result<()> {
        let msg: ControlMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                if serde_json::from_str::<serde_json::Value>(text).is_ok() {
                    debug!("ignoring unknown control message");
                    return Ok(());
                }
                return Err(ServerError::Protocol(format!("malformed message: {e}")));
            }
        };
        self.dispatch(msg).await
    }

    async fn dispatch(&self, msg: ControlMessage) -> Result<()> {
        match msg {
            ControlMessage::Down { id, x, y } => self.pointer_down(id, x, y).await,
            ControlMessage::Move { id, x, y } => self.pointer_move(id, x, y).await,
            ControlMessage::Up { id, .. } => self.pointer_up(id).await,
            ControlMessage::Click => self.click_at_cursor(),
            ControlMessage::RelMove { dx, dy } => self.relative_move(dx, dy),
            ControlMessage::Wheel { wheel_x, wheel_y, .. } => self.wheel(wheel_x, wheel_y),
            ControlMessage::Type { text } => self.type_text(&text),
            ControlMessage::Enter => self.press_enter(),
            ControlMessage::ClearChat => self.clear_chat(),
            ControlMessage::SetMode { mode } => {
                self.session.set_mode(Mode::parse(&mode));
                self.restart_pipeline("mode").await;
                Ok(())
            }
            ControlMessage::SetMonitor { idx } => {
                self.session.set_monitor(idx);
                self.restart_pipeline("monitor").await;
                Ok(())
            }
            ControlMessage::RestartPresetup => {
                self.session.set_mode(Mode::Presetup);
                self.restart_pipeline("restart_presetup").await;
                Ok(())
            }
            ControlMessage::SetVideo { video } => {
                self.session.set_video_mode(&video);
                self.restart_pipeline("video").await;
                Ok(())
            }
            ControlMessage::InputEnabled { enabled } => {
                self.session.set_input_enabled(enabled);
                Ok(())
            }
            ControlMessage::CalibRect { step, rect } => self.update_calibration(&step, rect).await,
        }
    }

    async fn pointer_down(&self, pointer: i32, xn: f64, yn: f64) -> Result<()> {
        let calibration = self.session.calib();
        if self.session.mode() == Mode::Run {
            let plugin = self.plugin_abs_virtual(&calibration)?;
            let (x, y) = mapper::norm_to_abs_run(xn, yn, plugin);
            let actions = self.gestures.lock().await.handle_down(
                self.session.input_enabled(),
                pointer,
                x,
                y,
                plugin,
                calibration.scroll_rel,
                Instant::now(),
            );
            return self.apply_actions(&actions);
        }

        if !self.session.input_enabled() {
            return Ok(());
        }
        let monitor = self.current_monitor()?;
        let (x, y) = mapper::norm_to_abs_presetup(xn, yn, &monitor);
        self.apply_actions(&[Action::Click { x, y }])
    }

    async fn pointer_move(&self, pointer: i32, xn: f64, yn: f64) -> Result<()> {
        let calibration = self.session.calib();
        if self.session.mode() == Mode::Run {
            let plugin = self.plugin_abs_virtual(&calibration)?;
            let (x, y) = mapper::norm_to_abs_run(xn, yn, plugin);
            let actions = self.gestures.lock().await.handle_move(
                self.session.input_enabled(),
                pointer,
                x,
                y,
                Instant::now(),
            );
            return self.apply_actions(&actions);
        }

        if !self.session.input_enabled() {
            return Ok(());
        }
        let monitor = self.current_monitor()?;
        let (x, y) = mapper::norm_to_abs_presetup(xn, yn, &monitor);
        self.apply_actions(&[Action::Move { x, y }])
    }

    async fn pointer_up(&self, pointer: i32) -> Result<()> {
        if self.session.mode() == Mode::Run {
            let actions = self
                .gestures
                .lock()
                .await
                .handle_up(self.session.input_enabled(), pointer);
            return self.apply_actions(&actions);
        }
        // Presetup downs are full clicks; the matching up carries nothing.
        Ok(())
    }

    /// Click at the current cursor. In run mode the press happens inside the
    /// cage: a cursor outside it is first recentered on the plugin rect.
    fn click_at_cursor(&self) -> Result<()> {
        if !self.session.input_enabled() {
            return Ok(());
        }
        if self.session.mode() == Mode::Run {
            let calibration = self.session.calib();
            let cage = self.plugin_abs_virtual(&calibration)?;
            if self.cursor_inside(cage).is_none() {
                let (cx, cy) = mapper::rect_center(cage);
                self.injector.move_abs(cx, cy)?;
            }
        }
        self.injector.left_down()?;
        self.injector.left_up()
    }

    /// Relative motion. Run mode starts from the caged cursor (or the plugin
    /// center when the cursor is unknown or outside) and clamps the target;
    /// presetup clamps to the selected monitor.
    fn relative_move(&self, dx: i32, dy: i32) -> Result<()> {
        if !self.session.input_enabled() {
            return Ok(());
        }

        if self.session.mode() == Mode::Run {
            let calibration = self.session.calib();
            let cage = self.plugin_abs_virtual(&calibration)?;
            let (sx, sy) = match self.cursor_inside(cage) {
                Some(pos) => pos,
                None => {
                    let center = mapper::rect_center(cage);
                    self.injector.move_abs(center.0, center.1)?;
                    center
                }
            };
            let (tx, ty) = mapper::clamp_point_to_rect(cage, sx + dx, sy + dy);
            return self.injector.move_abs(tx, ty);
        }

        let Some((cx, cy)) = self.injector.cursor_pos() else {
            // No cage to supply a fallback origin in presetup.
            return Ok(());
        };
        let monitor = self.current_monitor()?;
        let bounds = Rect::new(monitor.x, monitor.y, monitor.w, monitor.h);
        let (tx, ty) = mapper::clamp_point_to_rect(bounds, cx + dx, cy + dy);
        self.injector.move_abs(tx, ty)
    }

    /// Wheel deltas clamped to the configured maximum. The cage does not
    /// apply to scrolling.
    fn wheel(&self, wheel_x: i32, wheel_y: i32) -> Result<()> {
        if !self.session.input_enabled() {
            return Ok(());
        }
        let max = self.scroll_max_delta;
        let dy = wheel_y.clamp(-max, max);
        if dy != 0 {
            self.injector.wheel(dy)?;
        }
        let dx = wheel_x.clamp(-max, max);
        if dx != 0 {
            self.injector.hwheel(dx)?;
        }
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<()> {
        let calibration = self.session.calib();
        let chat_abs = self.chat_rect(&calibration)?;
        let actions = gestures::actions_for_type(self.session.input_enabled(), text, chat_abs);
        self.apply_actions(&actions)
    }

    fn press_enter(&self) -> Result<()> {
        let calibration = self.session.calib();
        let chat_abs = self.chat_rect(&calibration)?;
        let actions = gestures::actions_for_enter(self.session.input_enabled(), chat_abs);
        self.apply_actions(&actions)
    }

    /// Focus the chat input and clear its contents. Requires a calibrated
    /// chat rectangle.
    fn clear_chat(&self) -> Result<()> {
        if !self.session.input_enabled() {
            return Ok(());
        }
        let calibration = self.session.calib();
        if !calibration.chat_rel.has_area() {
            return Err(ServerError::CalibrationMissing("chat"));
        }
        let chat_abs = self.chat_rect(&calibration)?;
        let (x, y) = mapper::rect_center(chat_abs);
        self.injector.click_at(x, y)?;
        self.injector.select_all()?;
        self.injector.delete()
    }

    async fn update_calibration(&self, step: &str, rect: Rect) -> Result<()> {
        let mut calibration = self.session.calib();
        match step {
            "plugin" => {
                calibration.plugin_abs = rect;
                calibration.monitor_index = self.session.monitor_index();
            }
            "chat" => calibration.chat_rel = rect,
            "scroll" => calibration.scroll_rel = rect,
            _ => return Ok(()),
        }

        self.session.set_calib(calibration);
        calib::save(&self.calib_path, &calibration)
            .map_err(|e| ServerError::Config(format!("saving calibration: {e}")))?;
        if step == "plugin" {
            self.restart_pipeline("plugin_rect").await;
        }
        Ok(())
    }

    fn apply_actions(&self, actions: &[Action]) -> Result<()> {
        for action in actions {
            match action {
                Action::Move { x, y } => self.injector.move_abs(*x, *y)?,
                Action::LeftDown { x, y } => {
                    // Press where the gesture landed; the cage already
                    // clamped the point.
                    self.injector.move_abs(*x, *y)?;
                    self.injector.left_down()?;
                }
                Action::LeftUp => self.injector.left_up()?,
                Action::Click { x, y } => self.injector.click_at(*x, *y)?,
                Action::Type(text) => self.injector.type_unicode(text)?,
                Action::Enter => self.injector.enter()?,
            }
        }
        Ok(())
    }

    /// The cursor position when it is known and inside the cage.
    fn cursor_inside(&self, cage: Rect) -> Option<(i32, i32)> {
        let (x, y) = self.injector.cursor_pos()?;
        let clamped = mapper::clamp_point_to_rect(cage, x, y);
        if clamped == (x, y) {
            Some((x, y))
        } else {
            None
        }
    }

    fn chat_rect(&self, calibration: &Calibration) -> Result<Rect> {
        let plugin = self.plugin_abs_virtual(calibration)?;
        Ok(mapper::chat_rect_abs(plugin, calibration.chat_rel))
    }

    fn plugin_abs_virtual(&self, calibration: &Calibration) -> Result<Rect> {
        mapper::plugin_abs_virtual(calibration, &self.monitors, self.session.monitor_index())
    }

    fn current_monitor(&self) -> Result<Monitor> {
        let index = self.session.monitor_index();
        Monitor::by_index(&self.monitors, index).ok_or(ServerError::MonitorNotFound(index))
    }

    /// Pipeline restarts triggered from the control plane are logged, not
    /// surfaced: the browser cannot act on them, and the next state change
    /// re-runs the transaction from the top.
    async fn restart_pipeline(&self, reason: &str) {
        if let Err(e) = self.pipeline.restart(reason).await {
            warn!(reason, "pipeline restart failed: {e}");
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<Uuid>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::encoder::EncoderRunner;
    use crate::publisher::Publisher;
    use crate::signaling::{SignalingServer, ViewerPolicy};
    use deskslice_protocol::Calibration;
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        MoveAbs(i32, i32),
        LeftDown,
        LeftUp,
        ClickAt(i32, i32),
        Type(String),
        Enter,
        SelectAll,
        Delete,
        Wheel(i32),
        HWheel(i32),
    }

    /// Records injector calls; reports a fixed cursor position.
    struct FakeInjector {
        calls: Mutex<Vec<Call>>,
        cursor: Option<(i32, i32)>,
    }

    impl FakeInjector {
        fn new(cursor: Option<(i32, i32)>) -> Arc<Self> {
            Arc::new(Self { calls: Mutex::new(Vec::new()), cursor })
        }

        fn push(&self, call: Call) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Injector for FakeInjector {
        fn move_abs(&self, x: i32, y: i32) -> Result<()> {
            self.push(Call::MoveAbs(x, y))
        }
        fn left_down(&self) -> Result<()> {
            self.push(Call::LeftDown)
        }
        fn left_up(&self) -> Result<()> {
            self.push(Call::LeftUp)
        }
        fn type_unicode(&self, text: &str) -> Result<()> {
            self.push(Call::Type(text.to_string()))
        }
        fn enter(&self) -> Result<()> {
            self.push(Call::Enter)
        }
        fn select_all(&self) -> Result<()> {
            self.push(Call::SelectAll)
        }
        fn delete(&self) -> Result<()> {
            self.push(Call::Delete)
        }
        fn wheel(&self, delta: i32) -> Result<()> {
            self.push(Call::Wheel(delta))
        }
        fn hwheel(&self, delta: i32) -> Result<()> {
            self.push(Call::HWheel(delta))
        }
        fn cursor_pos(&self) -> Option<(i32, i32)> {
            self.cursor
        }
        fn click_at(&self, x: i32, y: i32) -> Result<()> {
            self.push(Call::ClickAt(x, y))
        }
    }

    fn monitors() -> Vec<Monitor> {
        vec![Monitor { index: 1, x: 0, y: 0, w: 1920, h: 1080, primary: true }]
    }

    fn run_mode_session() -> Arc<Session> {
        let session = Arc::new(Session::new("pw"));
        session.set_mode(Mode::Run);
        session.set_monitor(1);
        session.set_calib(Calibration {
            monitor_index: 1,
            plugin_abs: Rect::new(100, 200, 300, 400),
            chat_rel: Rect::new(10, 350, 280, 40),
            scroll_rel: Rect::new(260, 10, 30, 330),
        });
        session
    }

    fn server(session: Arc<Session>, injector: Arc<dyn Injector>) -> ControlServer {
        let mut vars = HashMap::new();
        vars.insert("UI_PASSWORD".to_string(), "pw".to_string());
        vars.insert("FFMPEG_PATH".to_string(), "/nonexistent/deskslice-ffmpeg".to_string());
        let cfg = Config::from_vars(&vars).unwrap();

        let publisher = Arc::new(Publisher::new().unwrap());
        let signaling =
            Arc::new(SignalingServer::new(Arc::clone(&publisher), ViewerPolicy::Replace));
        let pipeline = Arc::new(PipelineController::new(
            cfg,
            Arc::clone(&session),
            monitors(),
            Arc::new(EncoderRunner::new()),
            publisher,
            None,
            signaling,
        ));
        let calib_path = std::env::temp_dir()
            .join(format!("deskslice-control-{}-{}", std::process::id(), Uuid::new_v4()))
            .join("calib.json");
        ControlServer::new(session, injector, monitors(), pipeline, calib_path, 240)
    }

    #[tokio::test]
    async fn caged_click_recenters_an_outside_cursor() {
        // Cursor far outside the plugin rect.
        let injector = FakeInjector::new(Some((1, 2)));
        let srv = server(run_mode_session(), injector.clone());
        srv.dispatch(ControlMessage::Click).await.unwrap();
        assert_eq!(
            injector.calls(),
            vec![Call::MoveAbs(250, 400), Call::LeftDown, Call::LeftUp]
        );
    }

    #[tokio::test]
    async fn caged_click_keeps_an_inside_cursor() {
        let injector = FakeInjector::new(Some((150, 250)));
        let srv = server(run_mode_session(), injector.clone());
        srv.dispatch(ControlMessage::Click).await.unwrap();
        assert_eq!(injector.calls(), vec![Call::LeftDown, Call::LeftUp]);
    }

    #[tokio::test]
    async fn rel_move_is_caged() {
        let injector = FakeInjector::new(Some((1, 2)));
        let srv = server(run_mode_session(), injector.clone());
        srv.dispatch(ControlMessage::RelMove { dx: 5000, dy: 0 }).await.unwrap();
        // Recenter first, then clamp the target to the cage's right edge.
        assert_eq!(
            injector.calls(),
            vec![Call::MoveAbs(250, 400), Call::MoveAbs(399, 400)]
        );
    }

    #[tokio::test]
    async fn rel_move_from_inside_skips_the_recenter() {
        let injector = FakeInjector::new(Some((150, 250)));
        let srv = server(run_mode_session(), injector.clone());
        srv.dispatch(ControlMessage::RelMove { dx: 10, dy: -10 }).await.unwrap();
        assert_eq!(injector.calls(), vec![Call::MoveAbs(160, 240)]);
    }

    #[tokio::test]
    async fn pointer_down_outside_scroll_clicks_inside_the_cage() {
        let injector = FakeInjector::new(None);
        let srv = server(run_mode_session(), injector.clone());
        srv.dispatch(ControlMessage::Down { id: 1, x: 0.5, y: 0.5 }).await.unwrap();
        // Plugin rect {100,200,300,400}: center maps to (250, 400).
        assert_eq!(injector.calls(), vec![Call::ClickAt(250, 400)]);
    }

    #[tokio::test]
    async fn drag_in_scroll_region_presses_moves_releases() {
        let injector = FakeInjector::new(None);
        let srv = server(run_mode_session(), injector.clone());
        // scroll_rel {260,10,30,330} relative to plugin {100,200,300,400}:
        // normalized (0.92, 0.3) lands at abs (375, 320) → rel (275, 120).
        srv.dispatch(ControlMessage::Down { id: 1, x: 0.92, y: 0.3 }).await.unwrap();
        srv.dispatch(ControlMessage::Up { id: 1, x: 0.92, y: 0.3 }).await.unwrap();
        assert_eq!(
            injector.calls(),
            vec![Call::MoveAbs(375, 320), Call::LeftDown, Call::LeftUp]
        );
    }

    #[tokio::test]
    async fn wheel_clamps_to_the_configured_max() {
        let injector = FakeInjector::new(None);
        let srv = server(run_mode_session(), injector.clone());
        srv.dispatch(ControlMessage::Wheel { x: 0.0, y: 0.0, wheel_x: -999, wheel_y: 999 })
            .await
            .unwrap();
        assert_eq!(injector.calls(), vec![Call::Wheel(240), Call::HWheel(-240)]);
    }

    #[tokio::test]
    async fn type_targets_the_chat_center() {
        let injector = FakeInjector::new(None);
        let srv = server(run_mode_session(), injector.clone());
        srv.dispatch(ControlMessage::Type { text: "hola".to_string() }).await.unwrap();
        // chat_rel {10,350,280,40} on plugin {100,200,300,400} → abs
        // {110,550,280,40}, center (250, 570).
        assert_eq!(
            injector.calls(),
            vec![Call::ClickAt(250, 570), Call::Type("hola".to_string())]
        );
    }

    #[tokio::test]
    async fn clear_chat_requires_calibration() {
        let session = run_mode_session();
        let mut calibration = session.calib();
        calibration.chat_rel = Rect::default();
        session.set_calib(calibration);

        let injector = FakeInjector::new(None);
        let srv = server(session, injector.clone());
        let err = srv.dispatch(ControlMessage::ClearChat).await.unwrap_err();
        assert!(matches!(err, ServerError::CalibrationMissing("chat")));
        assert!(injector.calls().is_empty());
    }

    #[tokio::test]
    async fn clear_chat_clicks_selects_and_deletes() {
        let injector = FakeInjector::new(None);
        let srv = server(run_mode_session(), injector.clone());
        srv.dispatch(ControlMessage::ClearChat).await.unwrap();
        assert_eq!(
            injector.calls(),
            vec![Call::ClickAt(250, 570), Call::SelectAll, Call::Delete]
        );
    }

    #[tokio::test]
    async fn kill_switch_drops_every_input() {
        let session = run_mode_session();
        session.set_input_enabled(false);
        let injector = FakeInjector::new(Some((1, 2)));
        let srv = server(session, injector.clone());

        srv.dispatch(ControlMessage::Down { id: 1, x: 0.5, y: 0.5 }).await.unwrap();
        srv.dispatch(ControlMessage::Move { id: 1, x: 0.6, y: 0.6 }).await.unwrap();
        srv.dispatch(ControlMessage::Up { id: 1, x: 0.6, y: 0.6 }).await.unwrap();
        srv.dispatch(ControlMessage::Click).await.unwrap();
        srv.dispatch(ControlMessage::RelMove { dx: 5, dy: 5 }).await.unwrap();
        srv.dispatch(ControlMessage::Wheel { x: 0.0, y: 0.0, wheel_x: 10, wheel_y: 10 })
            .await
            .unwrap();
        srv.dispatch(ControlMessage::Type { text: "x".to_string() }).await.unwrap();
        srv.dispatch(ControlMessage::Enter).await.unwrap();
        srv.dispatch(ControlMessage::ClearChat).await.unwrap();
        assert!(injector.calls().is_empty());
    }

    #[tokio::test]
    async fn presetup_pointer_events_map_onto_the_monitor() {
        let session = Arc::new(Session::new("pw"));
        session.set_monitor(1);
        let injector = FakeInjector::new(None);
        let srv = server(session, injector.clone());

        srv.dispatch(ControlMessage::Down { id: 1, x: 0.5, y: 0.5 }).await.unwrap();
        srv.dispatch(ControlMessage::Move { id: 1, x: 0.0, y: 0.0 }).await.unwrap();
        srv.dispatch(ControlMessage::Up { id: 1, x: 0.0, y: 0.0 }).await.unwrap();
        assert_eq!(
            injector.calls(),
            vec![Call::ClickAt(960, 540), Call::MoveAbs(0, 0)]
        );
    }

    #[tokio::test]
    async fn calibration_updates_persist_and_record_the_monitor() {
        let session = run_mode_session();
        session.set_monitor(1);
        let injector = FakeInjector::new(None);
        let srv = server(Arc::clone(&session), injector);

        srv.dispatch(ControlMessage::CalibRect {
            step: "chat".to_string(),
            rect: Rect::new(5, 6, 70, 8),
        })
        .await
        .unwrap();
        assert_eq!(session.calib().chat_rel, Rect::new(5, 6, 70, 8));
        assert_eq!(calib::load(&srv.calib_path).unwrap().chat_rel, Rect::new(5, 6, 70, 8));

        // Unknown steps are ignored.
        srv.dispatch(ControlMessage::CalibRect {
            step: "bogus".to_string(),
            rect: Rect::new(1, 1, 1, 1),
        })
        .await
        .unwrap();
        assert_eq!(session.calib().chat_rel, Rect::new(5, 6, 70, 8));

        let _ = std::fs::remove_dir_all(srv.calib_path.parent().unwrap());
    }

    #[tokio::test]
    async fn unknown_messages_are_ignored_and_garbage_closes() {
        let session = run_mode_session();
        let injector = FakeInjector::new(None);
        let srv = server(session, injector);
        srv.handle_text(r#"{"t":"futureFeature","payload":1}"#).await.unwrap();
        assert!(srv.handle_text("not json").await.is_err());
    }
}

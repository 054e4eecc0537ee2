use std::sync::Arc;

use deskslice_protocol::Monitor;
#[cfg(test)]
use deskslice_protocol::Mode;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::encoder::{self, EncoderRunner};
use crate::error::{Result, ServerError};
use crate::presets::EncoderOptions;
use crate::preview::Preview;
use crate::publisher::Publisher;
use crate::session::Session;
use crate::signaling::SignalingServer;

/// Owns the "restart pipeline" transaction. Every mode/monitor/calibration
/// change funnels through [`PipelineController::restart`], which is totally
/// ordered by the controller lock.
pub struct PipelineController {
    lock: Mutex<()>,
    cfg: Config,
    session: Arc<Session>,
    monitors: Vec<Monitor>,
    runner: Arc<EncoderRunner>,
    publisher: Arc<Publisher>,
    preview: Option<Arc<Preview>>,
    signaling: Arc<SignalingServer>,
}

impl PipelineController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        session: Arc<Session>,
        monitors: Vec<Monitor>,
        runner: Arc<EncoderRunner>,
        publisher: Arc<Publisher>,
        preview: Option<Arc<Preview>>,
        signaling: Arc<SignalingServer>,
    ) -> Self {
        Self { lock: Mutex::new(()), cfg, session, monitors, runner, publisher, preview, signaling }
    }

    /// Tear down and rebuild the capture/encode/forward chain on a fresh
    /// RTP port, then tell the viewer to re-offer.
    ///
    /// Failures are returned without rolling back earlier steps: the next
    /// invocation starts from the top anyway, and the viewer is only
    /// notified after a fully successful rebuild.
    pub async fn restart(&self, reason: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        info!(reason, "restarting pipeline");

        self.publisher.stop_forwarding().await;
        self.runner.stop().await;

        let index = self.session.monitor_index();
        let monitor = Monitor::by_index(&self.monitors, index)
            .ok_or(ServerError::MonitorNotFound(index))?;

        let opts = self.encoder_options();
        let mode = self.session.mode();
        let plugin = self.session.calib().plugin_abs;

        let port = encoder::allocate_rtp_port()?;
        self.runner.start_on_port(mode, &monitor, plugin, &opts, port).await?;
        self.publisher.attach_rtp(port).await?;
        self.publisher.start_forwarding().await?;

        if let Some(preview) = &self.preview {
            if let Err(e) = Arc::clone(preview).restart(mode, &monitor, plugin, &opts).await {
                // The preview is a fallback surface; the RTP pipeline stands
                // on its own.
                warn!("preview restart failed: {e}");
            }
        }

        self.signaling.notify_restart();
        Ok(())
    }

    /// Ordered teardown for process shutdown.
    pub async fn shutdown(&self) {
        let _guard = self.lock.lock().await;
        self.publisher.stop_forwarding().await;
        self.publisher.close_peer().await;
        if let Some(preview) = &self.preview {
            preview.stop().await;
        }
        self.runner.stop().await;
    }

    fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            ffmpeg_path: self.cfg.ffmpeg_path.clone(),
            fps: self.cfg.fps,
            bitrate_kbps: self.cfg.bitrate_kbps,
            capture_driver: self.cfg.capture_driver.clone(),
        }
    }
}

/// Decide the startup monitor: a calibrated monitor wins over the
/// configured default.
pub fn startup_monitor_index(cfg: &Config, calibrated: i32) -> i32 {
    if calibrated > 0 {
        calibrated
    } else {
        cfg.monitor_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::ViewerPolicy;
    use deskslice_protocol::Calibration;
    use std::collections::HashMap;

    fn test_config() -> Config {
        let mut vars = HashMap::new();
        vars.insert("UI_PASSWORD".to_string(), "pw".to_string());
        vars.insert("FFMPEG_PATH".to_string(), "/nonexistent/deskslice-ffmpeg".to_string());
        Config::from_vars(&vars).unwrap()
    }

    fn controller(monitors: Vec<Monitor>, session: Arc<Session>) -> PipelineController {
        let publisher = Arc::new(Publisher::new().unwrap());
        let signaling =
            Arc::new(SignalingServer::new(Arc::clone(&publisher), ViewerPolicy::Replace));
        PipelineController::new(
            test_config(),
            session,
            monitors,
            Arc::new(EncoderRunner::new()),
            publisher,
            None,
            signaling,
        )
    }

    #[test]
    fn calibrated_monitor_wins_over_config() {
        let cfg = test_config();
        assert_eq!(startup_monitor_index(&cfg, 0), 1);
        assert_eq!(startup_monitor_index(&cfg, 2), 2);
    }

    #[tokio::test]
    async fn restart_fails_on_a_missing_monitor() {
        let session = Arc::new(Session::new("pw"));
        session.set_monitor(7);
        let ctl = controller(
            vec![Monitor { index: 1, x: 0, y: 0, w: 800, h: 600, primary: true }],
            session,
        );
        let err = ctl.restart("test").await.unwrap_err();
        assert!(matches!(err, ServerError::MonitorNotFound(7)));
    }

    #[tokio::test]
    async fn restart_surfaces_encoder_failures() {
        let session = Arc::new(Session::new("pw"));
        session.set_monitor(1);
        session.set_mode(Mode::Run);
        session.set_calib(Calibration {
            monitor_index: 1,
            plugin_abs: deskslice_protocol::Rect::new(0, 0, 320, 240),
            ..Default::default()
        });
        let ctl = controller(
            vec![Monitor { index: 1, x: 0, y: 0, w: 800, h: 600, primary: true }],
            session,
        );
        let err = ctl.restart("test").await.unwrap_err();
        assert!(matches!(err, ServerError::EncoderStart(_)));
        ctl.shutdown().await;
    }
}

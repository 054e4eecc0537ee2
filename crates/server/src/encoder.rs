use std::process::Stdio;

use deskslice_protocol::{Mode, Monitor, Rect};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};

use crate::error::{Result, ServerError};
use crate::presets::{self, EncoderOptions};

/// How long a freshly spawned encoder must survive before it counts as
/// started. Capture-driver failures (missing d3d11, protected content) show
/// up as an immediate exit.
const EARLY_EXIT_WINDOW: Duration = Duration::from_millis(700);
const START_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// The generic capture driver every Windows build of ffmpeg ships with.
pub const FALLBACK_DRIVER: &str = "gdigrab";

/// Supervises the external ffmpeg encoder process. At most one encoder is
/// alive at a time; the pipeline controller owns the handle.
#[derive(Debug, Default)]
pub struct EncoderRunner {
    child: Mutex<Option<Child>>,
}

impl EncoderRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch the encoder targeting an RTP port, replacing any running one.
    ///
    /// Returns once the process has survived the observation window. On an
    /// early exit the supervisor retries with the fallback capture driver,
    /// and the whole sequence retries up to three times with exponential
    /// backoff starting at 500 ms.
    pub async fn start_on_port(
        &self,
        mode: Mode,
        monitor: &Monitor,
        plugin: Rect,
        opts: &EncoderOptions,
        port: u16,
    ) -> Result<()> {
        let primary = presets::build_rtp_args(mode, monitor, plugin, opts, port, &opts.capture_driver);
        let fallback = presets::build_rtp_args(mode, monitor, plugin, opts, port, FALLBACK_DRIVER);
        info!(
            mode = mode.as_str(),
            port,
            command = %format!("{} {}", opts.ffmpeg_path, primary.join(" ")),
            "starting encoder"
        );

        let mut guard = self.child.lock().await;
        stop_child(&mut guard).await;

        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = ServerError::EncoderStart("no start attempt made".to_string());
        for attempt in 1..=START_ATTEMPTS {
            match start_with_fallback(&opts.ffmpeg_path, &primary, &fallback).await {
                Ok(child) => {
                    *guard = Some(child);
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, "encoder start failed: {e}");
                    last_err = e;
                    if attempt < START_ATTEMPTS {
                        sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        Err(last_err)
    }

    /// Kill the encoder and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let mut guard = self.child.lock().await;
        stop_child(&mut guard).await;
    }
}

async fn stop_child(slot: &mut Option<Child>) {
    if let Some(mut child) = slot.take() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Spawn with the primary arguments; if the process dies inside the
/// observation window, try once more with the fallback capture driver.
async fn start_with_fallback(path: &str, primary: &[String], fallback: &[String]) -> Result<Child> {
    if let Some(child) = observe(spawn_encoder(path, primary)?).await? {
        return Ok(child);
    }
    warn!(
        command = %format!("{} {}", path, fallback.join(" ")),
        "encoder exited early, retrying with fallback capture driver"
    );
    match observe(spawn_encoder(path, fallback)?).await? {
        Some(child) => Ok(child),
        None => Err(ServerError::EncoderStart(
            "ffmpeg exited during the observation window".to_string(),
        )),
    }
}

fn spawn_encoder(path: &str, args: &[String]) -> Result<Child> {
    Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ServerError::EncoderStart(format!("spawning {path}: {e}")))
}

/// Watch a fresh child for the observation window. `Some(child)` means it is
/// still running; `None` means it exited early.
async fn observe(mut child: Child) -> Result<Option<Child>> {
    match timeout(EARLY_EXIT_WINDOW, child.wait()).await {
        Err(_elapsed) => Ok(Some(child)),
        Ok(Ok(status)) => {
            warn!(%status, "ffmpeg exited early");
            Ok(None)
        }
        Ok(Err(e)) => Err(ServerError::EncoderStart(format!("waiting on ffmpeg: {e}"))),
    }
}

/// Reserve a loopback UDP port by binding to port 0 and releasing it.
pub fn allocate_rtp_port() -> Result<u16> {
    let socket = std::net::UdpSocket::bind(("127.0.0.1", 0)).map_err(ServerError::PortAlloc)?;
    let port = socket.local_addr().map_err(ServerError::PortAlloc)?.port();
    drop(socket);
    Ok(port)
}

mod calib;
mod config;
mod control;
mod encoder;
mod error;
mod gestures;
mod mapper;
mod mjpeg;
mod monitor;
mod pipeline;
mod presets;
mod preview;
mod publisher;
mod rtp;
mod session;
mod signaling;
mod web;
mod wininput;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use deskslice_protocol::Mode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::control::ControlServer;
use crate::encoder::EncoderRunner;
use crate::mjpeg::{MjpegTuning, Stream};
use crate::pipeline::PipelineController;
use crate::preview::Preview;
use crate::publisher::Publisher;
use crate::session::Session;
use crate::signaling::{SignalingServer, ViewerPolicy};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const STATIC_DIR: &str = "web/static";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cfg = Config::load().context("loading configuration")?;
    let debug = std::env::args().any(|a| a == "--debug" || a == "-debug");
    rtp::set_debug_logging(debug);
    log_startup(&cfg);

    let monitors = monitor::list_monitors().context("enumerating monitors")?;
    for m in &monitors {
        info!(
            index = m.index,
            size = %format!("{}x{}", m.w, m.h),
            origin = %format!("{},{}", m.x, m.y),
            primary = m.primary,
            "monitor"
        );
    }

    let session = Arc::new(Session::new(&cfg.ui_password));
    let calibration = calib::load(&cfg.calib_path).context("loading calibration")?;
    let monitor_index = pipeline::startup_monitor_index(&cfg, calibration.monitor_index);
    session.set_calib(calibration);
    session.set_monitor(monitor_index);
    session.set_mode(Mode::Presetup);

    let injector = wininput::new_injector();
    let publisher = Arc::new(Publisher::new().context("building webrtc publisher")?);
    let runner = Arc::new(EncoderRunner::new());
    let tuning = Arc::new(MjpegTuning::new(cfg.mjpeg_interval_ms, cfg.mjpeg_quality));

    let (preview_stream, preview) = if cfg.mjpeg_enabled {
        let stream = Arc::new(Stream::new(Arc::clone(&tuning)));
        let preview = Arc::new(Preview::new(Arc::clone(&stream), Arc::clone(&tuning)));
        (Some(stream), Some(preview))
    } else {
        (None, None)
    };

    let policy = if cfg.viewer_policy == "reject" {
        ViewerPolicy::Reject
    } else {
        ViewerPolicy::Replace
    };
    let signaling = Arc::new(SignalingServer::new(Arc::clone(&publisher), policy));
    let pipeline = Arc::new(PipelineController::new(
        cfg.clone(),
        Arc::clone(&session),
        monitors.clone(),
        Arc::clone(&runner),
        Arc::clone(&publisher),
        preview,
        Arc::clone(&signaling),
    ));
    let control = Arc::new(ControlServer::new(
        Arc::clone(&session),
        injector,
        monitors.clone(),
        Arc::clone(&pipeline),
        cfg.calib_path.clone(),
        cfg.scroll_max_delta,
    ));

    pipeline.restart("startup").await.context("starting media pipeline")?;

    let state = Arc::new(web::AppState {
        session,
        monitors,
        signaling,
        control,
        preview_stream,
        tuning,
        static_dir: STATIC_DIR.into(),
    });
    let router = web::build_router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    info!(addr = %cfg.listen_addr, "listening");

    // Graceful shutdown: stop accepting on ctrl-c, give in-flight
    // connections a bounded grace period, then tear the pipeline down.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut serve_rx = shutdown_rx.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = serve_rx.changed().await;
            })
            .await
    });

    let mut main_rx = shutdown_rx;
    tokio::select! {
        joined = &mut server => {
            joined.context("server task")?.context("serving http")?;
        }
        _ = main_rx.changed() => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(joined) => {
                    joined.context("server task")?.context("serving http")?;
                }
                Err(_) => {
                    warn!("graceful shutdown timed out, aborting open connections");
                    server.abort();
                }
            }
        }
    }

    pipeline.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

fn log_startup(cfg: &Config) {
    info!("deskslice starting");

    let env_path = cfg.data_dir.join(".env");
    if env_path.is_file() {
        info!(path = %env_path.display(), "env check: ok");
    } else {
        info!(path = %env_path.display(), "env check: missing");
    }

    match resolve_ffmpeg(&cfg.ffmpeg_path) {
        Some(resolved) => info!(path = %resolved, "ffmpeg check: ok"),
        None => warn!(path = %cfg.ffmpeg_path, "ffmpeg check: missing"),
    }
    info!(driver = %cfg.capture_driver, "capture driver");
    info!(
        hold_ms = cfg.scroll_hold_ms,
        tick_ms = cfg.scroll_tick_ms,
        max_delta = cfg.scroll_max_delta,
        "scroll overlay hints"
    );

    if let Some((host, port)) = cfg.listen_addr.rsplit_once(':') {
        let host = match host {
            "" | "0.0.0.0" | "::" => "localhost",
            other => other,
        };
        info!("local url: http://{host}:{port}");
    }
}

/// Resolve the ffmpeg binary: absolute paths are checked directly, bare
/// names are searched on PATH.
fn resolve_ffmpeg(path: &str) -> Option<String> {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.is_file().then(|| path.to_string());
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(path);
        if candidate.is_file() {
            return Some(candidate.display().to_string());
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{path}.exe"));
            if exe.is_file() {
                return Some(exe.display().to_string());
            }
        }
    }
    None
}

use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use deskslice_protocol::{Mode, Monitor, Rect};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::error::{Result, ServerError};
use crate::mjpeg::{self, MjpegTuning, Stream};
use crate::presets::{self, EncoderOptions};

/// Pause before relaunching ffmpeg after its output pipe breaks.
const RESTART_BACKOFF: Duration = Duration::from_secs(2);

struct Inner {
    child: Option<Child>,
    /// Bumped on every restart/stop so stale reader tasks retire themselves.
    generation: u64,
    closed: bool,
}

/// Supervises an ffmpeg process emitting raw rgb24 frames on stdout and
/// publishes them as JPEG to the MJPEG stream.
pub struct Preview {
    stream: Arc<Stream>,
    tuning: Arc<MjpegTuning>,
    inner: Mutex<Inner>,
}

impl Preview {
    pub fn new(stream: Arc<Stream>, tuning: Arc<MjpegTuning>) -> Self {
        Self {
            stream,
            tuning,
            inner: Mutex::new(Inner { child: None, generation: 0, closed: false }),
        }
    }

    /// Relaunch the preview for the given capture geometry, replacing any
    /// running instance.
    pub async fn restart(
        self: Arc<Self>,
        mode: Mode,
        monitor: &Monitor,
        plugin: Rect,
        opts: &EncoderOptions,
    ) -> Result<()> {
        let (args, width, height) = presets::build_preview_args(mode, monitor, plugin, opts);
        info!(
            mode = mode.as_str(),
            width,
            height,
            command = %format!("{} {}", opts.ffmpeg_path, args.join(" ")),
            "starting preview"
        );

        let mut inner = self.inner.lock().await;
        inner.closed = false;
        inner.generation += 1;
        let generation = inner.generation;
        stop_child(&mut inner).await;

        let (child, stdout) = spawn_preview(&opts.ffmpeg_path, &args)?;
        inner.child = Some(child);
        drop(inner);

        tokio::spawn(read_loop(
            Arc::clone(&self),
            stdout,
            width as u32,
            height as u32,
            generation,
            opts.ffmpeg_path.clone(),
            args,
        ));
        Ok(())
    }

    /// Terminate the preview process and retire its reader. Idempotent.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.generation += 1;
        stop_child(&mut inner).await;
    }
}

async fn stop_child(inner: &mut Inner) {
    if let Some(mut child) = inner.child.take() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

fn spawn_preview(path: &str, args: &[String]) -> Result<(Child, ChildStdout)> {
    let mut child = Command::new(path)
        .args(["-hide_banner", "-loglevel", "error"])
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ServerError::EncoderStart(format!("spawning preview {path}: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ServerError::EncoderStart("preview stdout unavailable".to_string()))?;
    Ok((child, stdout))
}

async fn read_loop(
    preview: Arc<Preview>,
    mut stdout: ChildStdout,
    width: u32,
    height: u32,
    generation: u64,
    ffmpeg_path: String,
    args: Vec<String>,
) {
    let frame_len = (width * height * 3) as usize;
    if frame_len == 0 {
        return;
    }
    let mut raw = vec![0u8; frame_len];

    loop {
        match stdout.read_exact(&mut raw).await {
            Ok(_) => {
                let quality = preview.tuning.quality();
                let jpg = mjpeg::encode_rgb_to_jpeg(&raw, width, height, quality);
                if !jpg.is_empty() {
                    preview.stream.publish(Bytes::from(jpg));
                }
            }
            Err(e) => {
                {
                    let inner = preview.inner.lock().await;
                    if inner.closed || inner.generation != generation {
                        return;
                    }
                }
                warn!("preview read error: {e} (restarting in {RESTART_BACKOFF:?})");
                tokio::time::sleep(RESTART_BACKOFF).await;

                let mut inner = preview.inner.lock().await;
                if inner.closed || inner.generation != generation {
                    return;
                }
                stop_child(&mut inner).await;
                match spawn_preview(&ffmpeg_path, &args) {
                    Ok((child, new_stdout)) => {
                        inner.child = Some(child);
                        stdout = new_stdout;
                    }
                    Err(e) => {
                        warn!("preview restart failed: {e}");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let tuning = Arc::new(MjpegTuning::new(120, 60));
        let preview = Preview::new(Arc::new(Stream::new(Arc::clone(&tuning))), tuning);
        preview.stop().await;
        preview.stop().await;
    }

    #[tokio::test]
    async fn restart_with_missing_binary_fails_cleanly() {
        let tuning = Arc::new(MjpegTuning::new(120, 60));
        let preview =
            Arc::new(Preview::new(Arc::new(Stream::new(Arc::clone(&tuning))), tuning));
        let monitor = Monitor { index: 1, x: 0, y: 0, w: 640, h: 480, primary: true };
        let opts = EncoderOptions {
            ffmpeg_path: "/nonexistent/deskslice-ffmpeg".to_string(),
            fps: 30,
            bitrate_kbps: 1000,
            capture_driver: "gdigrab".to_string(),
        };
        let err = Arc::clone(&preview)
            .restart(Mode::Presetup, &monitor, Rect::default(), &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::EncoderStart(_)));
        preview.stop().await;
    }
}

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::header::{self, HeaderValue};
use axum::response::Response;
use bytes::{BufMut, Bytes, BytesMut};
use futures::SinkExt;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tracing::warn;

const BOUNDARY: &str = "frame";

/// MJPEG knobs adjustable at runtime through `/api/config`, read lock-free
/// by the stream and the preview encoder.
#[derive(Debug)]
pub struct MjpegTuning {
    interval_ms: AtomicU64,
    quality: AtomicU32,
    default_interval_ms: u64,
    default_quality: u32,
}

impl MjpegTuning {
    pub fn new(interval_ms: u64, quality: u32) -> Self {
        Self {
            interval_ms: AtomicU64::new(interval_ms),
            quality: AtomicU32::new(quality),
            default_interval_ms: interval_ms,
            default_quality: quality,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    pub fn quality(&self) -> u32 {
        self.quality.load(Ordering::Relaxed)
    }

    pub fn set(&self, interval_ms: Option<u64>, quality: Option<u32>) {
        if let Some(i) = interval_ms {
            self.interval_ms.store(i, Ordering::Relaxed);
        }
        if let Some(q) = quality {
            self.quality.store(q, Ordering::Relaxed);
        }
    }

    /// Restore the values captured from the environment at startup.
    pub fn reset(&self) {
        self.interval_ms.store(self.default_interval_ms, Ordering::Relaxed);
        self.quality.store(self.default_quality, Ordering::Relaxed);
    }
}

struct StreamState {
    last: Option<Bytes>,
    last_push: Option<Instant>,
}

/// Broadcasts JPEG frames to any number of HTTP subscribers.
///
/// Publishes are throttled to the tuned minimum interval: a throttled frame
/// replaces `last` (so keepalives and new subscribers see it) but is not
/// broadcast. Delivery never blocks the publisher; a slow subscriber drops
/// old frames instead.
pub struct Stream {
    tx: broadcast::Sender<Bytes>,
    state: Mutex<StreamState>,
    tuning: Arc<MjpegTuning>,
}

impl Stream {
    pub fn new(tuning: Arc<MjpegTuning>) -> Self {
        let (tx, _) = broadcast::channel(4);
        Self {
            tx,
            state: Mutex::new(StreamState { last: None, last_push: None }),
            tuning,
        }
    }

    pub fn publish(&self, frame: Bytes) {
        self.publish_at(frame, Instant::now());
    }

    fn publish_at(&self, frame: Bytes, now: Instant) {
        let min_interval = Duration::from_millis(self.tuning.interval_ms());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if !min_interval.is_zero() {
            if let Some(last_push) = state.last_push {
                if now.duration_since(last_push) < min_interval {
                    state.last = Some(frame);
                    return;
                }
            }
        }

        state.last = Some(frame.clone());
        state.last_push = Some(now);
        drop(state);
        let _ = self.tx.send(frame);
    }

    fn last_frame(&self) -> Option<Bytes> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).last.clone()
    }

    /// Serve `multipart/x-mixed-replace` to one HTTP client. The last frame
    /// is replayed immediately, then live frames as they are broadcast, with
    /// a 1 s keepalive re-sending the last frame during quiet periods.
    pub fn serve(self: Arc<Self>) -> Response {
        let stream = self;
        let mut rx = stream.tx.subscribe();
        let (mut body_tx, body_rx) =
            futures::channel::mpsc::channel::<std::result::Result<Bytes, std::convert::Infallible>>(4);

        tokio::spawn(async move {
            if let Some(frame) = stream.last_frame() {
                if body_tx.send(Ok(encode_part(&frame))).await.is_err() {
                    return;
                }
            }
            let mut keepalive = tokio::time::interval(Duration::from_secs(1));
            keepalive.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(frame) => {
                            if body_tx.send(Ok(encode_part(&frame))).await.is_err() {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                    _ = keepalive.tick() => {
                        if let Some(frame) = stream.last_frame() {
                            if body_tx.send(Ok(encode_part(&frame))).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        let mut response = Response::new(Body::from_stream(body_rx));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/x-mixed-replace; boundary=frame"),
        );
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        response
    }
}

fn encode_part(jpg: &Bytes) -> Bytes {
    let mut part = BytesMut::with_capacity(jpg.len() + 96);
    part.put_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
    part.put_slice(b"Content-Type: image/jpeg\r\n");
    part.put_slice(format!("Content-Length: {}\r\n\r\n", jpg.len()).as_bytes());
    part.put_slice(jpg);
    part.freeze()
}

/// Encode a packed RGB24 buffer as JPEG at the given quality (1-100; out of
/// range falls back to 60).
pub fn encode_rgb_to_jpeg(rgb: &[u8], width: u32, height: u32, quality: u32) -> Vec<u8> {
    let quality = if quality == 0 || quality > 100 { 60 } else { quality } as u8;
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    if let Err(e) = encoder.encode(rgb, width, height, image::ColorType::Rgb8) {
        warn!("jpeg encode failed: {e}");
        return Vec::new();
    }
    out
}

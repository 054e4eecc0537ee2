use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use webrtc::rtp::packet::Packet;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::util::Unmarshal;

use crate::error::{Result, ServerError};

/// Process-wide toggle for per-stream ingest logging, set once at startup
/// and read lock-free from the reader loop.
static RTP_DEBUG: AtomicBool = AtomicBool::new(false);

pub fn set_debug_logging(enabled: bool) {
    RTP_DEBUG.store(enabled, Ordering::Relaxed);
}

fn debug_logging() -> bool {
    RTP_DEBUG.load(Ordering::Relaxed)
}

/// Receive buffer large enough to absorb bursty H.264 keyframes on loopback.
#[cfg(unix)]
const RECV_BUFFER_BYTES: usize = 4 << 20;

/// RTP header fields expected by the active WebRTC sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpWriteParams {
    pub payload_type: u8,
}

/// Shared handle the publisher refreshes after each SDP negotiation.
pub type SharedWriteParams = Arc<RwLock<RtpWriteParams>>;

/// Rewrites incoming RTP headers so the viewer sees one continuous stream
/// even when the encoder restarts and resets its sequence/timestamp space.
///
/// Single producer (the reader loop), single consumer (the track writer);
/// the state survives stop/start cycles of the same listener.
#[derive(Debug, Default)]
pub struct RtpRewriter {
    initialized: bool,
    out_seq: u16,
    out_ts: u32,
    last_in_ts: u32,
    last_delta: u32,
}

impl RtpRewriter {
    /// One second at the 90 kHz video clock. Any larger delta is treated as
    /// an encoder restart, not a real frame gap.
    const MAX_DELTA: u32 = 90_000;
    /// ~33 ms at 90 kHz, used when no believable delta has been seen yet.
    const FALLBACK_DELTA: u32 = 3_000;

    pub fn apply(&mut self, pkt: &mut Packet, params: RtpWriteParams) {
        if params.payload_type != 0 {
            pkt.header.payload_type = params.payload_type;
        }

        // Always resequence; the receiver must never observe the encoder's
        // own sequence space resetting.
        if !self.initialized {
            self.initialized = true;
            self.out_seq = pkt.header.sequence_number;
            self.last_in_ts = pkt.header.timestamp;
            self.out_ts = 0;
            self.last_delta = 0;
        } else {
            self.out_seq = self.out_seq.wrapping_add(1);
        }
        pkt.header.sequence_number = self.out_seq;

        // Packets sharing an input timestamp belong to one frame and must
        // share the output timestamp.
        if pkt.header.timestamp == self.last_in_ts {
            pkt.header.timestamp = self.out_ts;
            return;
        }

        let in_ts = pkt.header.timestamp;
        let mut delta = in_ts.wrapping_sub(self.last_in_ts);
        if delta > Self::MAX_DELTA {
            // Restart jump: substitute the last believable frame gap.
            delta = if self.last_delta > 0 && self.last_delta <= Self::MAX_DELTA {
                self.last_delta
            } else {
                Self::FALLBACK_DELTA
            };
        } else {
            self.last_delta = delta;
        }

        self.last_in_ts = in_ts;
        self.out_ts = self.out_ts.wrapping_add(delta);
        pkt.header.timestamp = self.out_ts;
    }
}

struct ListenerState {
    socket: Option<Arc<UdpSocket>>,
    /// Present while the reader loop is running.
    stop: Option<Arc<Notify>>,
}

/// Binds a loopback UDP port and forwards rewritten RTP into a track.
///
/// `stop` cancels the reader but keeps the socket (and rewriter state) for a
/// later `start`; `close` releases the socket.
pub struct RtpListener {
    state: Mutex<ListenerState>,
    rewriter: Arc<Mutex<RtpRewriter>>,
    port: u16,
}

impl RtpListener {
    /// Bind `127.0.0.1:<port>` with an enlarged receive buffer.
    /// Must be called from within the tokio runtime.
    pub fn bind(port: u16) -> Result<Self> {
        let socket = std::net::UdpSocket::bind(("127.0.0.1", port)).map_err(ServerError::RtpBind)?;
        enlarge_recv_buffer(&socket);
        socket.set_nonblocking(true).map_err(ServerError::RtpBind)?;
        let local_port = socket.local_addr().map_err(ServerError::RtpBind)?.port();
        let socket = UdpSocket::from_std(socket).map_err(ServerError::RtpBind)?;
        Ok(Self {
            state: Mutex::new(ListenerState { socket: Some(Arc::new(socket)), stop: None }),
            rewriter: Arc::new(Mutex::new(RtpRewriter::default())),
            port: local_port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Spawn the reader loop forwarding into `track`. Idempotent while
    /// already running.
    pub fn start(&self, track: Arc<TrackLocalStaticRTP>, params: SharedWriteParams) -> Result<()> {
        let mut state = self.lock_state();
        if state.stop.is_some() {
            return Ok(());
        }
        let socket = state
            .socket
            .clone()
            .ok_or_else(|| ServerError::Pipeline("rtp listener is closed".to_string()))?;
        let stop = Arc::new(Notify::new());
        state.stop = Some(Arc::clone(&stop));
        tokio::spawn(reader_loop(socket, track, params, Arc::clone(&self.rewriter), stop));
        Ok(())
    }

    /// Cancel the reader loop, keeping the socket open for a later start.
    pub fn stop(&self) {
        if let Some(stop) = self.lock_state().stop.take() {
            stop.notify_one();
        }
    }

    /// Stop forwarding and release the socket.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if let Some(stop) = state.stop.take() {
            stop.notify_one();
        }
        state.socket = None;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn reader_loop(
    socket: Arc<UdpSocket>,
    track: Arc<TrackLocalStaticRTP>,
    params: SharedWriteParams,
    rewriter: Arc<Mutex<RtpRewriter>>,
    stop: Arc<Notify>,
) {
    let mut buf = vec![0u8; 1600];
    let mut packet_count: u64 = 0;
    let mut first_logged = false;
    let mut write_err_logged = false;
    let mut last_count_log = Instant::now();

    loop {
        let n = tokio::select! {
            _ = stop.notified() => return,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, _)) => n,
                Err(e) => {
                    debug!("rtp recv ended: {e}");
                    return;
                }
            },
        };

        let mut raw = &buf[..n];
        let mut pkt = match Packet::unmarshal(&mut raw) {
            Ok(pkt) => pkt,
            // Malformed datagrams are silently dropped.
            Err(_) => continue,
        };

        packet_count += 1;
        if !first_logged {
            info!(
                ssrc = pkt.header.ssrc,
                payload_type = pkt.header.payload_type,
                seq = pkt.header.sequence_number,
                ts = pkt.header.timestamp,
                "first rtp packet"
            );
            first_logged = true;
        }
        if debug_logging() && last_count_log.elapsed() > Duration::from_secs(5) {
            debug!(packets = packet_count, "rtp ingest");
            last_count_log = Instant::now();
        }

        let write_params = *params.read().unwrap_or_else(|e| e.into_inner());
        rewriter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .apply(&mut pkt, write_params);

        if let Err(e) = track.write_rtp(&pkt).await {
            if !write_err_logged {
                warn!("rtp write failed: {e}");
                write_err_logged = true;
            }
        }
    }
}

#[cfg(unix)]
fn enlarge_recv_buffer(socket: &std::net::UdpSocket) {
    use nix::sys::socket::{setsockopt, sockopt::RcvBuf};
    if let Err(e) = setsockopt(socket, RcvBuf, &RECV_BUFFER_BYTES) {
        debug!("SO_RCVBUF not applied: {e}");
    }
}

#[cfg(not(unix))]
fn enlarge_recv_buffer(_socket: &std::net::UdpSocket) {}

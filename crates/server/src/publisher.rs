use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use crate::error::{Result, ServerError};
use crate::rtp::{RtpListener, RtpWriteParams, SharedWriteParams};

const TRACK_ID: &str = "video";
const STREAM_ID: &str = "deskslice";

#[derive(Default)]
struct Inner {
    peer: Option<Arc<RTCPeerConnection>>,
    track: Option<Arc<TrackLocalStaticRTP>>,
    listener: Option<Arc<RtpListener>>,
}

/// Owns the media engine, the single shared H.264 track, the current peer
/// connection, and the RTP ingest listener.
///
/// The track outlives peers: swapping viewers must not recreate the track or
/// the rewriter's timeline, otherwise the stream re-keys.
pub struct Publisher {
    api: API,
    inner: Mutex<Inner>,
    write_params: SharedWriteParams,
}

impl Publisher {
    /// Build the WebRTC API with default codecs and interceptors.
    pub fn new() -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self {
            api,
            inner: Mutex::new(Inner::default()),
            write_params: Arc::new(RwLock::new(RtpWriteParams::default())),
        })
    }

    /// Create a peer connection with the track attached, closing any prior
    /// peer first. At no point do two peers hold the track.
    pub async fn new_peer(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut inner = self.inner.lock().await;
        if let Some(prev) = inner.peer.take() {
            let _ = prev.close().await;
        }

        let peer = Arc::new(self.api.new_peer_connection(RTCConfiguration::default()).await?);
        let track = ensure_track(&mut inner);
        let sender = peer
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Drain RTCP from the sender; contents are discarded and the loop
        // ends when the sender is torn down.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut buf).await {}
        });

        inner.peer = Some(Arc::clone(&peer));
        info!("peer connection created");
        Ok(peer)
    }

    /// Close the current peer connection. Idempotent.
    pub async fn close_peer(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(peer) = inner.peer.take() {
            let _ = peer.close().await;
            info!("peer connection closed");
        }
    }

    /// Bind a fresh RTP ingest listener, replacing (and closing) any prior
    /// one. The rewriter state starts over with the new listener.
    pub async fn attach_rtp(&self, port: u16) -> Result<()> {
        let listener = Arc::new(RtpListener::bind(port)?);
        debug!(port = listener.port(), "rtp listener attached");
        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.listener.take() {
            old.close();
        }
        inner.listener = Some(listener);
        Ok(())
    }

    /// Start forwarding RTP from the listener into the shared track.
    pub async fn start_forwarding(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let track = ensure_track(&mut inner);
        let listener = inner
            .listener
            .clone()
            .ok_or_else(|| ServerError::Pipeline("rtp listener not attached".to_string()))?;
        listener.start(track, Arc::clone(&self.write_params))
    }

    /// Stop forwarding without releasing the listener socket. Idempotent.
    pub async fn stop_forwarding(&self) {
        if let Some(listener) = &self.inner.lock().await.listener {
            listener.stop();
        }
    }

    /// Record the H.264 payload type the active peer negotiated so the
    /// rewriter can stamp outgoing packets to match the SDP answer.
    pub async fn update_write_params_from_peer(&self, peer: &RTCPeerConnection) {
        let mut payload_type: u8 = 0;
        for sender in peer.get_senders().await {
            let Some(track) = sender.track().await else { continue };
            if track.kind() != RTPCodecType::Video {
                continue;
            }
            let params = sender.get_parameters().await;
            for codec in &params.rtp_parameters.codecs {
                if codec.capability.mime_type.eq_ignore_ascii_case(MIME_TYPE_H264)
                    && codec.payload_type != 0
                {
                    payload_type = codec.payload_type;
                    break;
                }
            }
            if payload_type != 0 {
                break;
            }
        }
        debug!(payload_type, "negotiated rtp write params");
        *self.write_params.write().unwrap_or_else(|e| e.into_inner()) =
            RtpWriteParams { payload_type };
    }
}

fn ensure_track(inner: &mut Inner) -> Arc<TrackLocalStaticRTP> {
    inner
        .track
        .get_or_insert_with(|| {
            Arc::new(TrackLocalStaticRTP::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_string(),
                    ..Default::default()
                },
                TRACK_ID.to_string(),
                STREAM_ID.to_string(),
            ))
        })
        .clone()
}

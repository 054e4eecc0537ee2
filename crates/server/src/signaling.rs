use std::sync::{Arc, Mutex};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use deskslice_protocol::{IceCandidate, SignalMessage};

use crate::error::{Result, ServerError};
use crate::publisher::Publisher;

/// What happens to a new viewer when one is already connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPolicy {
    /// Refuse the newcomer with a policy-violation close.
    Reject,
    /// Kick the current viewer and admit the newcomer.
    Replace,
}

/// Handle to an admitted viewer: an outbound message channel (serializing
/// all writes onto its socket) and a kick signal.
struct ViewerHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<SignalMessage>,
    kick: Arc<Notify>,
}

enum Admission {
    Admitted,
    Rejected,
    Replaced(ViewerHandle),
}

/// The single-viewer admission slot, kept as an explicit state machine
/// rather than emerging from lock ordering.
#[derive(Default)]
struct ViewerSlot {
    active: Option<ViewerHandle>,
}

impl ViewerSlot {
    fn admit(&mut self, policy: ViewerPolicy, handle: ViewerHandle) -> Admission {
        if self.active.is_none() {
            self.active = Some(handle);
            return Admission::Admitted;
        }
        match policy {
            ViewerPolicy::Reject => Admission::Rejected,
            ViewerPolicy::Replace => match self.active.replace(handle) {
                Some(prior) => Admission::Replaced(prior),
                None => Admission::Admitted,
            },
        }
    }

    /// Clear the slot if `id` still owns it. Returns whether it did.
    fn release(&mut self, id: Uuid) -> bool {
        if self.active.as_ref().is_some_and(|h| h.id == id) {
            self.active = None;
            true
        } else {
            false
        }
    }
}

/// WebRTC signaling over `/ws/signal`: offer/answer/ICE exchange with
/// single-viewer admission.
pub struct SignalingServer {
    publisher: Arc<Publisher>,
    policy: ViewerPolicy,
    slot: Mutex<ViewerSlot>,
}

impl SignalingServer {
    pub fn new(publisher: Arc<Publisher>, policy: ViewerPolicy) -> Self {
        Self { publisher, policy, slot: Mutex::new(ViewerSlot::default()) }
    }

    /// Tell the active viewer the pipeline restarted so the browser
    /// re-offers. No-op without a viewer.
    pub fn notify_restart(&self) {
        let slot = self.lock_slot();
        if let Some(active) = &slot.active {
            let _ = active.tx.send(SignalMessage::Restart);
        }
    }

    /// Drive one viewer connection to completion.
    pub async fn handle_socket(self: Arc<Self>, mut socket: WebSocket) {
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<SignalMessage>();
        let kick = Arc::new(Notify::new());

        let admission = self.lock_slot().admit(
            self.policy,
            ViewerHandle { id, tx: tx.clone(), kick: Arc::clone(&kick) },
        );
        match admission {
            Admission::Admitted => {}
            Admission::Rejected => {
                info!(%id, "viewer rejected: another viewer is active");
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: "viewer already connected".into(),
                    })))
                    .await;
                return;
            }
            Admission::Replaced(prior) => {
                info!(%id, prior = %prior.id, "replacing active viewer");
                prior.kick.notify_one();
            }
        }

        // The new peer releases the prior viewer's peer as a side effect.
        let peer = match self.publisher.new_peer().await {
            Ok(peer) => peer,
            Err(e) => {
                warn!("peer creation failed: {e}");
                self.cleanup(id).await;
                return;
            }
        };

        // Forward local host candidates; the nil gathering terminator is
        // dropped.
        let ice_tx = tx.clone();
        peer.on_ice_candidate(Box::new(move |candidate| {
            let ice_tx = ice_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = ice_tx.send(SignalMessage::Ice {
                            candidate: Some(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            }),
                        });
                    }
                    Err(e) => warn!("serializing ice candidate: {e}"),
                }
            })
        }));

        info!(%id, "viewer connected");
        loop {
            tokio::select! {
                _ = kick.notified() => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: "replaced".into(),
                        })))
                        .await;
                    break;
                }
                outbound = rx.recv() => {
                    let Some(msg) = outbound else { break };
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("encoding signal message: {e}");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                incoming = socket.recv() => {
                    let Some(Ok(msg)) = incoming else { break };
                    match msg {
                        Message::Text(text) => {
                            if let Err(e) = self.handle_message(text.as_str(), &peer, &tx).await {
                                debug!(%id, "signaling ended: {e}");
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }

        self.cleanup(id).await;
        info!(%id, "viewer disconnected");
    }

    async fn handle_message(
        &self,
        text: &str,
        peer: &Arc<RTCPeerConnection>,
        tx: &mpsc::UnboundedSender<SignalMessage>,
    ) -> Result<()> {
        let msg: SignalMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                // Unknown tags are ignored; anything unparseable as JSON
                // ends the connection.
                if serde_json::from_str::<serde_json::Value>(text).is_ok() {
                    debug!("ignoring unknown signaling message");
                    return Ok(());
                }
                return Err(ServerError::Protocol(format!("malformed message: {e}")));
            }
        };

        match msg {
            SignalMessage::Offer { sdp } => self.handle_offer(&sdp, peer, tx).await,
            SignalMessage::Ice { candidate } => {
                let Some(candidate) = candidate else { return Ok(()) };
                peer.add_ice_candidate(RTCIceCandidateInit {
                    candidate: candidate.candidate,
                    sdp_mid: candidate.sdp_mid,
                    sdp_mline_index: candidate.sdp_mline_index,
                    ..Default::default()
                })
                .await
                .map_err(|e| ServerError::Protocol(format!("bad ice candidate: {e}")))
            }
            SignalMessage::Answer { .. } | SignalMessage::Restart => Ok(()),
        }
    }

    /// Answer an SDP offer. ICE gathering completes before the answer is
    /// sent, replacing trickle with a self-contained answer.
    async fn handle_offer(
        &self,
        sdp: &str,
        peer: &Arc<RTCPeerConnection>,
        tx: &mpsc::UnboundedSender<SignalMessage>,
    ) -> Result<()> {
        if sdp.is_empty() {
            return Err(ServerError::Protocol("empty offer".to_string()));
        }
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| ServerError::Protocol(format!("unparseable offer: {e}")))?;
        peer.set_remote_description(offer).await?;

        let answer = peer.create_answer(None).await?;
        let mut gather_complete = peer.gathering_complete_promise().await;
        peer.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        // The sender's codec parameters are final now; let the RTP rewriter
        // stamp the negotiated payload type.
        self.publisher.update_write_params_from_peer(peer).await;

        let local = peer
            .local_description()
            .await
            .ok_or_else(|| ServerError::Protocol("missing local description".to_string()))?;
        let _ = tx.send(SignalMessage::Answer { sdp: local.sdp });
        Ok(())
    }

    async fn cleanup(&self, id: Uuid) {
        let released = self.lock_slot().release(id);
        if released {
            self.publisher.close_peer().await;
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, ViewerSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

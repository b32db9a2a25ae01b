//! Peer connection lifecycle and offer/answer signaling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::RtcError;

struct Peer {
    id: u64,
    connection: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
}

/// Active peer set. One video track per peer, all fed the same bitstream.
#[derive(Default)]
pub struct PeerManager {
    peers: Mutex<Vec<Peer>>,
    next_id: AtomicU64,
}

impl PeerManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Accept an SDP offer, create a fresh peer connection with one H.264
    /// track, and return the answer.
    pub async fn handle_offer(
        self: &Arc<Self>,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription, RtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let connection = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "skylock".to_owned(),
        ));

        let rtp_sender = connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        // Drain incoming RTCP so the interceptors keep working.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let manager = Arc::downgrade(self);
        connection.on_peer_connection_state_change(Box::new(move |state| {
            debug!(peer = id, ?state, "peer connection state");
            let manager = manager.clone();
            Box::pin(async move {
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed
                        | RTCPeerConnectionState::Disconnected
                ) {
                    if let Some(manager) = manager.upgrade() {
                        manager.evict(id).await;
                    }
                }
            })
        }));

        connection.set_remote_description(offer).await?;
        let answer = connection.create_answer(None).await?;
        let mut gather_complete = connection.gathering_complete_promise().await;
        connection.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        let local = connection
            .local_description()
            .await
            .ok_or(RtcError::NoLocalDescription)?;

        self.peers.lock().await.push(Peer {
            id,
            connection,
            track,
        });
        info!(peer = id, total = self.peer_count().await, "peer connected");
        Ok(local)
    }

    async fn evict(&self, id: u64) {
        let mut peers = self.peers.lock().await;
        if let Some(index) = peers.iter().position(|p| p.id == id) {
            let peer = peers.remove(index);
            drop(peers);
            let _ = peer.connection.close().await;
            info!(peer = id, "peer evicted");
        }
    }

    /// Fan one encoded frame to every peer, best-effort within `budget`.
    pub async fn write_to_all(&self, data: &[u8], duration: Duration, budget: Duration) {
        let tracks: Vec<(u64, Arc<TrackLocalStaticSample>)> = {
            let peers = self.peers.lock().await;
            peers.iter().map(|p| (p.id, p.track.clone())).collect()
        };

        for (id, track) in tracks {
            let sample = Sample {
                data: Bytes::copy_from_slice(data),
                duration,
                ..Default::default()
            };
            match tokio::time::timeout(budget, track.write_sample(&sample)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(peer = id, error = %e, "sample write failed"),
                Err(_) => debug!(peer = id, "send budget exceeded, frame dropped"),
            }
        }
    }

    /// Close every peer (shutdown path).
    pub async fn close_all(&self) {
        let peers: Vec<Peer> = {
            let mut guard = self.peers.lock().await;
            guard.drain(..).collect()
        };
        for peer in peers {
            let _ = peer.connection.close().await;
        }
        info!("all peers closed");
    }
}

use crate::connection::{PeerTransport, PeerTransportFactory, TransportEvent, TransportState};
use crate::media::{AudioFrame, AudioSource, CaptureHandle};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use voicemesh_core::{IceCandidate, NegotiationError, ParticipantId, SessionDescription};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

const RTP_READ_BUFFER: usize = 1500;
const OPUS_FRAME: Duration = Duration::from_millis(20);

/// ICE configuration shared by every connection the factory creates.
#[derive(Clone)]
pub struct RtcConfig {
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
        }
    }
}

/// Builds `webrtc`-backed peer transports carrying one Opus track each way.
pub struct RtcTransportFactory {
    config: RtcConfig,
}

impl RtcTransportFactory {
    pub fn new(config: RtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerTransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        peer: &ParticipantId,
        local_audio: CaptureHandle,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn PeerTransport>, NegotiationError> {
        let transport = RtcTransport::connect(peer.clone(), &self.config, local_audio, events)
            .await
            .map_err(|e| NegotiationError::new(peer.clone(), e.to_string()))?;
        Ok(Box::new(transport))
    }
}

pub struct RtcTransport {
    peer: ParticipantId,
    connection: Arc<RTCPeerConnection>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RtcTransport {
    async fn connect(
        peer: ParticipantId,
        config: &RtcConfig,
        local_audio: CaptureHandle,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, webrtc::Error> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        let state_tx = events.clone();
        connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let tx = state_tx.clone();
                Box::pin(async move {
                    let mapped = match state {
                        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
                        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
                        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
                        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
                        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
                        _ => None,
                    };
                    if let Some(mapped) = mapped {
                        let _ = tx.send(TransportEvent::StateChanged(mapped)).await;
                    }
                })
            },
        ));

        let ice_tx = events.clone();
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let candidate = IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                };
                let _ = tx.send(TransportEvent::CandidateGenerated(candidate)).await;
            })
        }));

        // Must return fast: hand the remote track to the session and let it
        // drive the read loop at its own pace.
        let track_tx = events.clone();
        connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            Box::pin(async move {
                debug!(ssrc = track.ssrc(), "remote track received");
                let source: Box<dyn AudioSource> = Box::new(RemoteTrackSource::new(track));
                let _ = tx.send(TransportEvent::TrackReceived(source)).await;
            })
        }));

        let outbound = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "voicemesh".to_owned(),
        ));
        let sender = connection
            .add_track(Arc::clone(&outbound) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // The sender's RTCP stream must be drained for the interceptors to
        // keep working.
        let rtcp_drain = tokio::spawn(async move {
            let mut buf = vec![0u8; RTP_READ_BUFFER];
            while let Ok((_, _)) = sender.read(&mut buf).await {}
        });

        let pump_peer = peer.clone();
        let pump = tokio::spawn(async move {
            let mut source = local_audio.open_source();
            while let Some(frame) = source.next_frame().await {
                let sample = Sample {
                    data: frame.data,
                    duration: frame.duration,
                    ..Default::default()
                };
                if let Err(e) = outbound.write_sample(&sample).await {
                    warn!(participant = %pump_peer, error = %e, "stopping outbound audio");
                    break;
                }
            }
        });

        Ok(Self {
            peer,
            connection,
            tasks: Mutex::new(vec![rtcp_drain, pump]),
        })
    }

    fn map_err(&self, e: webrtc::Error) -> NegotiationError {
        NegotiationError::new(self.peer.clone(), e.to_string())
    }
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| self.map_err(e))?;
        self.connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn apply_remote_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        let remote = RTCSessionDescription::offer(offer.sdp).map_err(|e| self.map_err(e))?;
        self.connection
            .set_remote_description(remote)
            .await
            .map_err(|e| self.map_err(e))?;
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|e| self.map_err(e))?;
        self.connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn apply_remote_answer(
        &self,
        answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        // Answers replayed from the signaling channel arrive after the
        // exchange already settled; applying them again would wedge the
        // connection.
        if self.connection.signaling_state() == RTCSignalingState::Stable {
            debug!(participant = %self.peer, "answer for settled exchange ignored");
            return Ok(());
        }
        let remote = RTCSessionDescription::answer(answer.sdp).map_err(|e| self.map_err(e))?;
        self.connection
            .set_remote_description(remote)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: None,
        };
        self.connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| self.map_err(e))
    }

    async fn restart_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let options = RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        };
        let offer = self
            .connection
            .create_offer(Some(options))
            .await
            .map_err(|e| self.map_err(e))?;
        self.connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn close(&self) {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        if let Err(e) = self.connection.close().await {
            debug!(participant = %self.peer, error = %e, "error while closing connection");
        }
    }
}

/// Adapts a remote RTP track into the session's audio source shape. Each RTP
/// packet's Opus payload becomes one frame.
struct RemoteTrackSource {
    track: Arc<TrackRemote>,
    buf: Vec<u8>,
}

impl RemoteTrackSource {
    fn new(track: Arc<TrackRemote>) -> Self {
        Self {
            track,
            buf: vec![0u8; RTP_READ_BUFFER],
        }
    }
}

#[async_trait]
impl AudioSource for RemoteTrackSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        loop {
            match self.track.read(&mut self.buf).await {
                Ok((packet, _)) => {
                    if packet.payload.is_empty() {
                        continue;
                    }
                    return Some(AudioFrame::new(packet.payload, OPUS_FRAME));
                }
                Err(_) => return None,
            }
        }
    }
}

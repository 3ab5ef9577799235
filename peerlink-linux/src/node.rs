//! The node: binds every socket, owns the shared state and runs the listener tasks.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use peerlink_core::{
    CallRole, CallSession, CallStatus, Collaborator, MediaDevices, PeerRecord, PeerSet, Result,
};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery;
use crate::media::{MediaManager, MediaPorts};
use crate::signal::{stop_pair, StopHandle};
use crate::signaling::Signaling;
use crate::text::{ChatLog, TextMailbox};
use crate::voice::VoiceMailbox;

/// Local addresses actually bound (ports resolved when configured as 0).
#[derive(Debug, Clone, Copy)]
pub struct Bound {
    pub discovery: SocketAddr,
    pub control: SocketAddr,
    pub text: SocketAddr,
    pub video: SocketAddr,
    pub return_video: SocketAddr,
    pub voice: SocketAddr,
}

pub struct Node {
    display_name: String,
    bound: Bound,
    peers: Arc<PeerSet>,
    signaling: Arc<Signaling>,
    voice: Arc<VoiceMailbox>,
    text: Arc<TextMailbox>,
    stop: StopHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Bind all sockets and start the lifetime listeners.
    pub async fn start(
        config: &Config,
        collaborator: Arc<dyn Collaborator>,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<Node> {
        let ip = config.bind_addr;
        let presence = Arc::new(discovery::bind(ip, config.discovery_port).await?);
        let control = Arc::new(UdpSocket::bind((ip, config.control_port)).await?);
        let text_socket = Arc::new(UdpSocket::bind((ip, config.text_port)).await?);
        let video = TcpListener::bind((ip, config.video_port)).await?;
        let return_video = TcpListener::bind((ip, config.return_video_port())).await?;
        let voice_listener = TcpListener::bind((ip, config.voice_port)).await?;
        let bound = Bound {
            discovery: presence.local_addr()?,
            control: control.local_addr()?,
            text: text_socket.local_addr()?,
            video: video.local_addr()?,
            return_video: return_video.local_addr()?,
            voice: voice_listener.local_addr()?,
        };

        let peers = Arc::new(PeerSet::new());
        let media = Arc::new(MediaManager::new(
            devices.clone(),
            collaborator.clone(),
            MediaPorts {
                forward: config.video_port,
                back: config.return_video_port(),
            },
        ));
        let broadcast = SocketAddr::new(config.broadcast_addr, config.discovery_port);
        let local_ip = discovery::detect_local_ip(broadcast);
        let signaling = Arc::new(Signaling::new(
            control,
            local_ip,
            config.control_port,
            media.clone(),
            collaborator.clone(),
        ));
        let voice = Arc::new(VoiceMailbox::new(
            devices,
            collaborator.clone(),
            config.voice_port,
            config.voice_send_timeout(),
        ));
        let text = Arc::new(TextMailbox::new(
            text_socket,
            config.text_port,
            config.display_name.clone(),
            ChatLog::new(config.chat_log.clone()),
            collaborator,
        ));

        let local_addrs: Vec<IpAddr> = local_ip.into_iter().collect();
        let (stop, signal) = stop_pair();
        let display_name = config.display_name.clone();
        let interval = config.announce_interval();
        let tasks = vec![
            tokio::spawn({
                let (socket, name, stop) = (presence.clone(), display_name.clone(), signal.clone());
                async move {
                    if let Err(e) = discovery::announce_loop(socket, name, broadcast, interval, stop).await {
                        warn!(error = %e, "presence announcements stopped");
                    }
                }
            }),
            tokio::spawn(discovery::discover_loop(
                presence,
                peers.clone(),
                local_addrs,
                signal.clone(),
            )),
            tokio::spawn(signaling.clone().run(signal.clone())),
            tokio::spawn(media.clone().run_listener(video, CallRole::Callee, signal.clone())),
            tokio::spawn(media.clone().run_listener(return_video, CallRole::Caller, signal.clone())),
            tokio::spawn(voice.clone().run_listener(voice_listener, signal.clone())),
            tokio::spawn(text.clone().run(signal)),
        ];
        info!(
            name = %display_name,
            discovery = %bound.discovery,
            control = %bound.control,
            text = %bound.text,
            video = %bound.video,
            voice = %bound.voice,
            "node started"
        );

        Ok(Node {
            display_name,
            bound,
            peers,
            signaling,
            voice,
            text,
            stop,
            tasks,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn bound(&self) -> &Bound {
        &self.bound
    }

    /// Known peers, sorted by address.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.peers.snapshot()
    }

    pub async fn start_call(&self, peer: IpAddr) -> Result<()> {
        self.signaling.start_call(peer).await
    }

    pub async fn accept_call(&self, peer: IpAddr) -> Result<()> {
        self.signaling.accept_call(peer).await
    }

    pub async fn decline_call(&self, peer: IpAddr) -> Result<()> {
        self.signaling.decline_call(peer).await
    }

    pub async fn end_call(&self, peer: IpAddr) -> Result<()> {
        self.signaling.end_call(peer).await
    }

    pub fn call_status(&self, peer: IpAddr) -> CallStatus {
        self.signaling.media().calls().status(peer)
    }

    pub fn calls(&self) -> Vec<CallSession> {
        self.signaling.media().calls().sessions()
    }

    pub async fn send_text(&self, peer: IpAddr, message: &str) -> Result<()> {
        self.text.send(peer, message).await
    }

    pub fn open_window(&self, peer: IpAddr) -> Vec<String> {
        self.text.open_window(peer)
    }

    pub fn close_window(&self, peer: IpAddr) -> bool {
        self.text.close_window(peer)
    }

    pub fn unread(&self, peer: IpAddr) -> Vec<String> {
        self.text.unread(peer)
    }

    pub fn start_recording(&self) -> Result<()> {
        self.voice.start_recording()
    }

    pub fn stop_recording(&self) -> Result<usize> {
        self.voice.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.voice.is_recording()
    }

    pub async fn send_voice_recording(&self, peer: IpAddr) -> Result<usize> {
        self.voice.send_recording(peer).await
    }

    /// Sender of the voice message awaiting play/reject.
    pub fn pending_voice(&self) -> Option<IpAddr> {
        self.voice.pending_sender()
    }

    pub async fn play_voice_message(&self) -> Result<Option<(IpAddr, usize)>> {
        self.voice.accept().await
    }

    pub fn reject_voice_message(&self) -> Option<IpAddr> {
        self.voice.reject()
    }

    /// Stop every listener and end every call. Returns once the listeners have exited.
    pub async fn shutdown(self) {
        self.stop.stop();
        let ended = self.signaling.media().end_all();
        if self.voice.is_recording() {
            let _ = self.voice.stop_recording();
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "listener task failed");
            }
        }
        info!(calls_ended = ended, "node stopped");
    }
}

//! Call signaling over UDP control datagrams.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use peerlink_core::wire::{decode_message, encode_message};
use peerlink_core::{CallDecision, CallStatus, Collaborator, Error, Message, Result};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::media::MediaManager;
use crate::signal::StopSignal;

const RECV_BUFFER: usize = 4096;

pub struct Signaling {
    socket: Arc<UdpSocket>,
    /// Our LAN address, used to settle crossed call requests.
    local_ip: Option<IpAddr>,
    remote_port: u16,
    media: Arc<MediaManager>,
    collaborator: Arc<dyn Collaborator>,
}

impl Signaling {
    pub fn new(
        socket: Arc<UdpSocket>,
        local_ip: Option<IpAddr>,
        remote_port: u16,
        media: Arc<MediaManager>,
        collaborator: Arc<dyn Collaborator>,
    ) -> Self {
        Self {
            socket,
            local_ip,
            remote_port,
            media,
            collaborator,
        }
    }

    pub fn media(&self) -> &Arc<MediaManager> {
        &self.media
    }

    async fn send(&self, message: &Message, peer: IpAddr) -> Result<()> {
        let datagram = encode_message(message)?;
        let dest = SocketAddr::new(peer, self.remote_port);
        self.socket
            .send_to(&datagram, dest)
            .await
            .map_err(|e| Error::Unreachable(format!("{}: {}", dest, e)))?;
        debug!(%peer, kind = message.kind(), "control message sent");
        Ok(())
    }

    /// Ask `peer` for a call. The session waits in `Requesting` for their answer.
    pub async fn start_call(&self, peer: IpAddr) -> Result<()> {
        self.media.request(peer)?;
        if let Err(e) = self.send(&Message::CallRequest, peer).await {
            self.media.end(peer);
            return Err(e);
        }
        info!(%peer, "call requested");
        Ok(())
    }

    /// Accept `peer`'s call and start streaming.
    pub async fn accept_call(&self, peer: IpAddr) -> Result<()> {
        self.media.ring(peer)?;
        if let Err(e) = self.send(&Message::CallAccept, peer).await {
            self.media.end(peer);
            return Err(e);
        }
        self.media.activate(peer)
    }

    pub async fn decline_call(&self, peer: IpAddr) -> Result<()> {
        self.send(&Message::CallDecline, peer).await?;
        info!(%peer, "call declined");
        Ok(())
    }

    /// Hang up locally and tell the peer. Fire-and-forget: no acknowledgment is awaited.
    pub async fn end_call(&self, peer: IpAddr) -> Result<()> {
        if self.media.end(peer) {
            info!(%peer, "call ended locally");
            self.collaborator.call_ended(peer);
        }
        self.send(&Message::CallEnd, peer).await
    }

    /// Receive control datagrams until stopped.
    pub async fn run(self: Arc<Self>, mut stop: StopSignal) {
        let mut buf = vec![0u8; RECV_BUFFER];
        loop {
            let received = match stop.guard(self.socket.recv_from(&mut buf)).await {
                None => return,
                Some(r) => r,
            };
            match received {
                Ok((n, from)) => match decode_message(&buf[..n]) {
                    Ok(message) => self.handle(message, from.ip()),
                    Err(e) => debug!(%from, error = %e, "dropping control datagram"),
                },
                Err(e) => warn!(error = %e, "control receive failed"),
            }
        }
    }

    /// Both sides requested a call at once. The lower address stays the caller; the higher
    /// one drops its request and treats the peer's as incoming.
    fn keeps_own_request(&self, peer: IpAddr) -> bool {
        self.media.calls().status(peer) == CallStatus::Requesting
            && self.local_ip.map_or(false, |me| me < peer)
    }

    /// Apply one control message from `from`.
    pub fn handle(self: &Arc<Self>, message: Message, from: IpAddr) {
        debug!(peer = %from, kind = message.kind(), "control message received");
        match message {
            Message::CallRequest => {
                if self.keeps_own_request(from) {
                    debug!(peer = %from, "crossed call request, keeping ours");
                    return;
                }
                info!(peer = %from, "incoming call");
                match self.collaborator.incoming_call(from) {
                    CallDecision::Accept => {
                        let me = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = me.accept_call(from).await {
                                warn!(peer = %from, error = %e, "accepting call failed");
                            }
                        });
                    }
                    CallDecision::Decline => {
                        let me = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = me.decline_call(from).await {
                                warn!(peer = %from, error = %e, "declining call failed");
                            }
                        });
                    }
                    CallDecision::Defer => {}
                }
            }
            Message::CallAccept => {
                if self.media.calls().status(from) != CallStatus::Requesting {
                    debug!(peer = %from, "ignoring accept with no outstanding request");
                    return;
                }
                info!(peer = %from, "call accepted by peer");
                if let Err(e) = self.media.activate(from) {
                    warn!(peer = %from, error = %e, "could not start call");
                }
            }
            Message::CallDecline => {
                if self.media.declined(from) {
                    info!(peer = %from, "call declined by peer");
                }
            }
            Message::CallEnd => {
                if self.media.end(from) {
                    info!(peer = %from, "call ended by peer");
                    self.collaborator.call_ended(from);
                }
            }
            Message::Announce { .. } => {
                debug!(peer = %from, "ignoring announce on control port");
            }
        }
    }
}

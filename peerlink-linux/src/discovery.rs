//! LAN presence: periodic broadcast announcement, listen for announcements, maintain peer set.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::wire::{decode_message, encode_message};
use peerlink_core::{Discovery, Error, Message, PeerSet, Result};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::signal::StopSignal;

const RECV_BUFFER: usize = 4096;

/// Bind the discovery socket with broadcast enabled.
pub async fn bind(bind_addr: IpAddr, port: u16) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((bind_addr, port)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Best-effort guess of this host's LAN address: the source address the OS would use to reach
/// the broadcast destination. No packet is sent.
pub fn detect_local_ip(broadcast: SocketAddr) -> Option<IpAddr> {
    let route = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    route.set_broadcast(true).ok()?;
    route.connect(broadcast).ok()?;
    let ip = route.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Announce `display_name` to `dest` every `interval` until stopped. Send failures are logged
/// and retried on the next tick.
pub async fn announce_loop(
    socket: Arc<UdpSocket>,
    display_name: String,
    dest: SocketAddr,
    interval: Duration,
    mut stop: StopSignal,
) -> Result<()> {
    let datagram = encode_message(&Message::Announce { display_name })?;
    loop {
        if let Err(e) = socket.send_to(&datagram, dest).await {
            warn!(%dest, error = %e, "presence announce failed");
        }
        if stop
            .guard(tokio::time::sleep(interval))
            .await
            .is_none()
        {
            return Ok(());
        }
    }
}

/// Receive announcements until stopped. Datagrams from `local_addrs` are our own broadcasts.
pub async fn discover_loop(
    socket: Arc<UdpSocket>,
    peers: Arc<PeerSet>,
    local_addrs: Vec<IpAddr>,
    mut stop: StopSignal,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let received = match stop.guard(socket.recv_from(&mut buf)).await {
            None => return,
            Some(r) => r,
        };
        match received {
            Ok((n, from)) => {
                if let Err(e) = handle_datagram(&peers, &local_addrs, &buf[..n], from.ip()) {
                    debug!(%from, error = %e, "dropping presence datagram");
                }
            }
            Err(e) => warn!(error = %e, "presence receive failed"),
        }
    }
}

/// Apply one presence datagram to the peer set. Ok(None) means it was ignored (our own, or not an announcement).
pub fn handle_datagram(
    peers: &PeerSet,
    local_addrs: &[IpAddr],
    bytes: &[u8],
    from: IpAddr,
) -> Result<Option<Discovery>> {
    if local_addrs.contains(&from) {
        return Ok(None);
    }
    match decode_message(bytes)? {
        Message::Announce { display_name } => {
            let outcome = peers.observe(from, &display_name);
            match outcome {
                Discovery::New => info!(peer = %from, name = %display_name, "discovered peer"),
                Discovery::Renamed => info!(peer = %from, name = %display_name, "peer renamed"),
                Discovery::Unchanged => {}
            }
            Ok(Some(outcome))
        }
        other => Err(Error::MalformedMessage(format!(
            "unexpected {} on discovery port",
            other.kind()
        ))),
    }
}

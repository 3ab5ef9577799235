//! Text messages: one UTF-8 datagram each, delivered to an open window or queued per peer,
//! and appended to the chat log either way.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use peerlink_core::{compose_text, Collaborator, Error, Result, Routed, TextInbox};
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::signal::StopSignal;

/// Largest composed text, in bytes. A text travels as exactly one datagram of at most this size.
pub const MAX_TEXT_LEN: usize = 4096;

/// Append-only chat log. Writers are serialized so lines never interleave.
#[derive(Debug)]
pub struct ChatLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ChatLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, sender: &str, message: &str) -> Result<()> {
        let _held = self.lock.lock().await;
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}: {}\n", sender, message).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }
}

pub struct TextMailbox {
    socket: Arc<UdpSocket>,
    remote_port: u16,
    display_name: String,
    inbox: TextInbox,
    log: ChatLog,
    collaborator: Arc<dyn Collaborator>,
}

impl TextMailbox {
    pub fn new(
        socket: Arc<UdpSocket>,
        remote_port: u16,
        display_name: String,
        log: ChatLog,
        collaborator: Arc<dyn Collaborator>,
    ) -> Self {
        Self {
            socket,
            remote_port,
            display_name,
            inbox: TextInbox::new(),
            log,
            collaborator,
        }
    }

    pub async fn send(&self, peer: IpAddr, message: &str) -> Result<()> {
        self.send_to(SocketAddr::new(peer, self.remote_port), message)
            .await
    }

    /// Send one text. Our own copy goes into the peer's backlog while their window is closed.
    pub async fn send_to(&self, addr: SocketAddr, message: &str) -> Result<()> {
        let composed = compose_text(&self.display_name, message);
        if composed.len() > MAX_TEXT_LEN {
            return Err(Error::MalformedMessage(format!(
                "text is {} bytes, limit is {}",
                composed.len(),
                MAX_TEXT_LEN
            )));
        }
        self.socket
            .send_to(composed.as_bytes(), addr)
            .await
            .map_err(|e| Error::Unreachable(format!("{}: {}", addr, e)))?;
        debug!(%addr, bytes = composed.len(), "text sent");
        self.record(&self.display_name, message).await;
        if !self.inbox.is_open(addr.ip()) {
            self.inbox.enqueue(addr.ip(), composed);
        }
        Ok(())
    }

    /// Receive texts until stopped.
    pub async fn run(self: Arc<Self>, mut stop: StopSignal) {
        let mut buf = vec![0u8; MAX_TEXT_LEN];
        loop {
            let received = match stop.guard(self.socket.recv_from(&mut buf)).await {
                None => return,
                Some(r) => r,
            };
            match received {
                Ok((n, from)) => {
                    if let Err(e) = self.handle(&buf[..n], from.ip()).await {
                        debug!(%from, error = %e, "dropping text datagram");
                    }
                }
                Err(e) => warn!(error = %e, "text receive failed"),
            }
        }
    }

    /// Route one received text and log it.
    pub async fn handle(&self, bytes: &[u8], from: IpAddr) -> Result<Routed> {
        let message = std::str::from_utf8(bytes)
            .map_err(|e| Error::MalformedMessage(format!("text is not UTF-8: {}", e)))?;
        let routed = self.inbox.route(from, message, |m| {
            self.collaborator.text_message(m, from)
        });
        match routed {
            Routed::Delivered => debug!(peer = %from, "text delivered"),
            Routed::Queued => info!(peer = %from, pending = self.inbox.pending(from), "text queued"),
        }
        self.record(&from.to_string(), message).await;
        Ok(routed)
    }

    /// Open `peer`'s window: the backlog is delivered in receipt order and returned.
    pub fn open_window(&self, peer: IpAddr) -> Vec<String> {
        let mut backlog = Vec::new();
        self.inbox.open_window(peer, |m| {
            self.collaborator.text_message(m, peer);
            backlog.push(m.to_string());
        });
        backlog
    }

    pub fn close_window(&self, peer: IpAddr) -> bool {
        self.inbox.close_window(peer)
    }

    /// Drain `peer`'s backlog without opening the window.
    pub fn unread(&self, peer: IpAddr) -> Vec<String> {
        self.inbox.unread(peer)
    }

    async fn record(&self, sender: &str, message: &str) {
        if let Err(e) = self.log.append(sender, message).await {
            warn!(path = %self.log.path().display(), error = %e, "chat log append failed");
        }
    }
}

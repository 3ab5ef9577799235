//! Voice mailbox: hold inbound voice messages for a play/reject decision, record and send our own.
//! Voice connections carry raw PCM with no framing; the sender's close marks the end.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peerlink_core::{
    Collaborator, Error, MediaDevices, Result, VoiceDecision, VoiceMailboxSlot, VoiceRecorder,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::signal::{stop_pair, StopHandle, StopSignal};

/// Playback read size.
const PLAY_CHUNK: usize = 4096;

pub struct VoiceMailbox {
    pending: VoiceMailboxSlot<TcpStream>,
    recorder: Arc<VoiceRecorder>,
    /// Stops the capture task of the current recording.
    capture: Mutex<Option<StopHandle>>,
    devices: Arc<dyn MediaDevices>,
    collaborator: Arc<dyn Collaborator>,
    remote_port: u16,
    send_timeout: Duration,
}

impl VoiceMailbox {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        collaborator: Arc<dyn Collaborator>,
        remote_port: u16,
        send_timeout: Duration,
    ) -> Self {
        Self {
            pending: VoiceMailboxSlot::new(),
            recorder: Arc::new(VoiceRecorder::new()),
            capture: Mutex::new(None),
            devices,
            collaborator,
            remote_port,
            send_timeout,
        }
    }

    /// Sender of the message awaiting a decision.
    pub fn pending_sender(&self) -> Option<IpAddr> {
        self.pending.sender()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Accept loop: each connection becomes the pending message and the collaborator decides.
    pub async fn run_listener(self: Arc<Self>, listener: TcpListener, mut stop: StopSignal) {
        loop {
            let accepted = match stop.guard(listener.accept()).await {
                None => return,
                Some(a) => a,
            };
            match accepted {
                Ok((stream, from)) => self.on_inbound(stream, from.ip()),
                Err(e) => warn!(error = %e, "voice accept failed"),
            }
        }
    }

    fn on_inbound(self: &Arc<Self>, stream: TcpStream, sender: IpAddr) {
        info!(peer = %sender, "voice message arriving");
        if let Some(displaced) = self.pending.hold(sender, stream) {
            warn!(peer = %displaced.sender, "undecided voice message replaced by a newer one");
        }
        match self.collaborator.incoming_voice_message(sender) {
            VoiceDecision::Play => {
                let me = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = me.accept().await {
                        warn!(peer = %sender, error = %e, "voice playback failed");
                    }
                });
            }
            VoiceDecision::Reject => {
                self.reject();
            }
            VoiceDecision::Defer => {}
        }
    }

    /// Play the pending message as it streams in. Returns the sender and the bytes played,
    /// or None if nothing was pending.
    pub async fn accept(&self) -> Result<Option<(IpAddr, usize)>> {
        let pending = match self.pending.take() {
            Some(p) => p,
            None => return Ok(None),
        };
        let played = play(pending.conn, self.devices.as_ref()).await?;
        info!(peer = %pending.sender, bytes = played, "voice message played");
        Ok(Some((pending.sender, played)))
    }

    /// Close the pending message unread. Returns its sender.
    pub fn reject(&self) -> Option<IpAddr> {
        let pending = self.pending.take()?;
        info!(peer = %pending.sender, "voice message rejected");
        drop(pending.conn);
        Some(pending.sender)
    }

    /// Start capturing microphone chunks into the recording buffer until `stop_recording`.
    /// The previous recording survives a microphone that fails to open.
    pub fn start_recording(&self) -> Result<()> {
        if self.recorder.is_recording() {
            return Err(Error::AlreadyRecording);
        }
        let mut mic = self.devices.open_microphone()?;
        // Dropping `mic` unstarted releases it if another start won the race.
        let generation = self.recorder.start()?;
        let (stop, mut signal) = stop_pair();
        if let Some(previous) = self.capture_slot().replace(stop) {
            previous.stop();
        }
        let recorder = self.recorder.clone();
        tokio::spawn(async move {
            loop {
                let chunk = match signal.guard(mic.read_chunk()).await {
                    None => break,
                    Some(c) => c,
                };
                match chunk {
                    Ok(chunk) => {
                        if !recorder.push(generation, chunk) {
                            break;
                        }
                    }
                    Err(e) => {
                        if recorder.abort(generation) {
                            warn!(error = %e, "recording stopped by microphone failure");
                        }
                        break;
                    }
                }
            }
            mic.stop().await;
            debug!(generation, "capture finished");
        });
        Ok(())
    }

    /// Stop capturing. Returns the number of chunks recorded.
    pub fn stop_recording(&self) -> Result<usize> {
        self.recorder.stop()?;
        if let Some(capture) = self.capture_slot().take() {
            capture.stop();
        }
        Ok(self.recorder.chunk_count())
    }

    fn capture_slot(&self) -> std::sync::MutexGuard<'_, Option<StopHandle>> {
        self.capture.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send the last recording to `peer`'s mailbox port.
    pub async fn send_recording(&self, peer: IpAddr) -> Result<usize> {
        self.send_recording_to(SocketAddr::new(peer, self.remote_port)).await
    }

    /// Connect, write every chunk back to back, close. Connect and write share one deadline.
    pub async fn send_recording_to(&self, addr: SocketAddr) -> Result<usize> {
        let chunks = self.recorder.chunks();
        if chunks.is_empty() {
            return Err(Error::EmptyRecording);
        }
        let send = async {
            let mut conn = TcpStream::connect(addr)
                .await
                .map_err(|e| Error::Unreachable(format!("{}: {}", addr, e)))?;
            let mut sent = 0;
            for chunk in &chunks {
                conn.write_all(chunk).await?;
                sent += chunk.len();
            }
            conn.shutdown().await?;
            Ok::<_, Error>(sent)
        };
        let sent = tokio::time::timeout(self.send_timeout, send)
            .await
            .map_err(|_| Error::Timeout)??;
        info!(%addr, bytes = sent, "voice message sent");
        Ok(sent)
    }
}

/// Stream raw audio from `conn` to a speaker until the sender closes.
async fn play(mut conn: TcpStream, devices: &dyn MediaDevices) -> Result<usize> {
    let mut speaker = devices.open_speaker()?;
    let mut buf = vec![0u8; PLAY_CHUNK];
    let mut played = 0;
    let result: Result<()> = async {
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            speaker.play(&buf[..n]).await?;
            played += n;
        }
    }
    .await;
    speaker.stop().await;
    result.map(|()| played)
}

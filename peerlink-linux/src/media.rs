//! Media session manager: call lifecycle plus the per-call send and receive loops.
//!
//! Each active call has two TCP connections. The caller streams to the callee's `video_port`,
//! the callee streams back to the caller's `video_port + 1`. Every connection carries
//! `[len][video frame][len][audio chunk]` pairs; payload type is positional, there is no tag.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use peerlink_core::{
    CallRole, CallStatus, CallTable, Collaborator, Error, MediaDevices, Result,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::framing::{read_frame, write_frame};
use crate::signal::{stop_pair, StopHandle, StopSignal};

/// Ports peers listen on for media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaPorts {
    /// Caller -> callee stream.
    pub forward: u16,
    /// Callee -> caller stream.
    pub back: u16,
}

impl MediaPorts {
    /// Remote port this side sends to.
    fn send_port(&self, role: CallRole) -> u16 {
        match role {
            CallRole::Caller => self.forward,
            CallRole::Callee => self.back,
        }
    }
}

/// Per-call I/O bookkeeping, kept beside the session in the call table.
struct CallHandle {
    id: u64,
    stop: StopHandle,
    /// Slot for the peer's inbound stream. The listener takes the sender, establishment the receiver.
    inbound_tx: Option<oneshot::Sender<TcpStream>>,
    inbound_rx: Option<oneshot::Receiver<TcpStream>>,
}

pub struct MediaManager {
    calls: CallTable,
    handles: Mutex<HashMap<IpAddr, CallHandle>>,
    next_id: AtomicU64,
    devices: Arc<dyn MediaDevices>,
    collaborator: Arc<dyn Collaborator>,
    remote: MediaPorts,
}

impl MediaManager {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        collaborator: Arc<dyn Collaborator>,
        remote: MediaPorts,
    ) -> Self {
        Self {
            calls: CallTable::new(),
            handles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            devices,
            collaborator,
            remote,
        }
    }

    pub fn calls(&self) -> &CallTable {
        &self.calls
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<IpAddr, CallHandle>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_handle(&self) -> CallHandle {
        let (stop, _) = stop_pair();
        let (tx, rx) = oneshot::channel();
        CallHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            stop,
            inbound_tx: Some(tx),
            inbound_rx: Some(rx),
        }
    }

    /// Outgoing request sent: session enters `Requesting`.
    pub fn request(&self, peer: IpAddr) -> Result<()> {
        let mut handles = self.handles();
        self.calls.request(peer)?;
        handles.insert(peer, self.new_handle());
        Ok(())
    }

    /// Local accept in flight: session enters `Ringing`.
    pub fn ring(&self, peer: IpAddr) -> Result<()> {
        let mut handles = self.handles();
        self.calls.ring(peer)?;
        if let Some(replaced) = handles.insert(peer, self.new_handle()) {
            replaced.stop.stop();
        }
        Ok(())
    }

    /// Session becomes `Active`; open the send connection and wait for the receive connection.
    pub fn activate(self: &Arc<Self>, peer: IpAddr) -> Result<()> {
        let (role, id, stop, inbound) = {
            let mut handles = self.handles();
            let role = self.calls.activate(peer)?;
            let handle = handles
                .get_mut(&peer)
                .ok_or_else(|| Error::InvalidState(format!("no media handle for {}", peer)))?;
            (role, handle.id, handle.stop.subscribe(), handle.inbound_rx.take())
        };
        info!(%peer, ?role, "call active");

        let send_to = SocketAddr::new(peer, self.remote.send_port(role));
        let me = self.clone();
        let send_stop = stop.clone();
        tokio::spawn(async move {
            let result = me.run_send(send_to, send_stop).await;
            me.finish(peer, id, "send", result);
        });

        let me = self.clone();
        tokio::spawn(async move {
            let result = match inbound {
                Some(rx) => me.run_receive(rx, stop).await,
                None => Err(Error::InvalidState("receive slot already used".into())),
            };
            me.finish(peer, id, "receive", result);
        });
        Ok(())
    }

    /// Peer declined our request. Returns true if a pending request was dropped.
    pub fn declined(&self, peer: IpAddr) -> bool {
        let mut handles = self.handles();
        if self.calls.decline(peer).is_some() {
            handles.remove(&peer);
            true
        } else {
            false
        }
    }

    /// End the call with `peer` and stop both loops. Returns true if a session existed.
    pub fn end(&self, peer: IpAddr) -> bool {
        let mut handles = self.handles();
        Self::end_locked(&self.calls, &mut handles, peer)
    }

    /// Session and handle change together under the handle lock, so a concurrent
    /// `request` for the same peer never sees one without the other.
    fn end_locked(calls: &CallTable, handles: &mut HashMap<IpAddr, CallHandle>, peer: IpAddr) -> bool {
        let ended = calls.end(peer).is_some();
        if let Some(handle) = handles.remove(&peer) {
            handle.stop.stop();
        }
        ended
    }

    /// End every call (node shutdown).
    pub fn end_all(&self) -> usize {
        let mut handles = self.handles();
        let ended = self.calls.end_all();
        for (_, handle) in handles.drain() {
            handle.stop.stop();
        }
        ended.len()
    }

    /// A loop exited. If the call it belonged to is still current, end it and tell the collaborator.
    fn finish(&self, peer: IpAddr, id: u64, side: &str, result: Result<()>) {
        match &result {
            Ok(()) => debug!(%peer, side, "media loop stopped"),
            Err(e) if e.is_disconnect() => info!(%peer, side, "peer closed media stream"),
            Err(e) => warn!(%peer, side, error = %e, "media loop failed"),
        }
        let ended = {
            let mut handles = self.handles();
            let current = handles.get(&peer).map(|h| h.id) == Some(id);
            current && Self::end_locked(&self.calls, &mut handles, peer)
        };
        if ended {
            info!(%peer, "call ended");
            self.collaborator.call_ended(peer);
        }
    }

    /// Hand an inbound media connection to the matching session. The connection is kept only if
    /// `peer` has a live session with the role this listener serves and no stream has arrived yet.
    pub fn attach_inbound(&self, peer: IpAddr, role: CallRole, stream: TcpStream) -> bool {
        let mut handles = self.handles();
        let session = match self.calls.get(peer) {
            Some(s) => s,
            None => return false,
        };
        if session.role != role
            || !matches!(
                session.status,
                CallStatus::Requesting | CallStatus::Ringing | CallStatus::Active
            )
        {
            return false;
        }
        let tx = match handles.get_mut(&peer).and_then(|h| h.inbound_tx.take()) {
            Some(tx) => tx,
            None => return false,
        };
        tx.send(stream).is_ok()
    }

    /// Accept loop for one media port. `role` is the local role of sessions whose streams arrive here.
    pub async fn run_listener(self: Arc<Self>, listener: TcpListener, role: CallRole, mut stop: StopSignal) {
        loop {
            let accepted = match stop.guard(listener.accept()).await {
                None => return,
                Some(a) => a,
            };
            match accepted {
                Ok((stream, from)) => {
                    if self.attach_inbound(from.ip(), role, stream) {
                        debug!(peer = %from, ?role, "media stream attached");
                    } else {
                        debug!(peer = %from, ?role, "closing unsolicited media connection");
                    }
                }
                Err(e) => warn!(error = %e, "media accept failed"),
            }
        }
    }

    async fn run_send(&self, addr: SocketAddr, mut stop: StopSignal) -> Result<()> {
        let conn = match stop.guard(TcpStream::connect(addr)).await {
            None => return Ok(()),
            Some(Ok(c)) => c,
            Some(Err(e)) => return Err(Error::Unreachable(format!("{}: {}", addr, e))),
        };
        let _ = conn.set_nodelay(true);
        send_loop(conn, self.devices.as_ref(), stop).await
    }

    async fn run_receive(&self, inbound: oneshot::Receiver<TcpStream>, mut stop: StopSignal) -> Result<()> {
        let conn = match stop.guard(inbound).await {
            None => return Ok(()),
            Some(Ok(c)) => c,
            // Slot dropped: the session was torn down before the peer connected.
            Some(Err(_)) => return Ok(()),
        };
        receive_loop(conn, self.devices.as_ref(), stop).await
    }
}

/// Capture one video frame then one audio chunk per iteration, writing each as a frame.
/// Devices and connection are released on every exit path.
pub async fn send_loop(mut conn: TcpStream, devices: &dyn MediaDevices, mut stop: StopSignal) -> Result<()> {
    let mut camera = devices.open_camera()?;
    let mut mic = match devices.open_microphone() {
        Ok(m) => m,
        Err(e) => {
            camera.release().await;
            return Err(e);
        }
    };

    let result: Result<()> = async {
        loop {
            if stop.is_stopped() {
                return Ok(());
            }
            let Some(frame) = stop.guard(camera.capture()).await else {
                return Ok(());
            };
            let frame = frame?;
            if stop.guard(write_frame(&mut conn, &frame)).await.transpose()?.is_none() {
                return Ok(());
            }
            let Some(chunk) = stop.guard(mic.read_chunk()).await else {
                return Ok(());
            };
            let chunk = chunk?;
            if stop.guard(write_frame(&mut conn, &chunk)).await.transpose()?.is_none() {
                return Ok(());
            }
            if stop.guard(conn.flush()).await.transpose()?.is_none() {
                return Ok(());
            }
        }
    }
    .await;

    camera.release().await;
    mic.stop().await;
    let _ = conn.shutdown().await;
    result
}

/// Read a video frame then an audio chunk per iteration, rendering and playing them.
/// Ends on `ConnectionClosed`, on stop, or on a playback failure.
pub async fn receive_loop(mut conn: TcpStream, devices: &dyn MediaDevices, mut stop: StopSignal) -> Result<()> {
    let mut display = devices.open_display()?;
    let mut speaker = match devices.open_speaker() {
        Ok(s) => s,
        Err(e) => {
            display.close().await;
            return Err(e);
        }
    };

    let result: Result<()> = async {
        loop {
            if stop.is_stopped() {
                return Ok(());
            }
            let Some(frame) = stop.guard(read_frame(&mut conn)).await else {
                return Ok(());
            };
            let frame = frame?;
            // An undecodable frame is skipped; the stream stays in step.
            if let Err(e) = display.render(&frame).await {
                debug!(error = %e, "dropping video frame");
            }
            let Some(chunk) = stop.guard(read_frame(&mut conn)).await else {
                return Ok(());
            };
            speaker.play(&chunk?).await?;
        }
    }
    .await;

    display.close().await;
    speaker.stop().await;
    let _ = conn.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testing::RecordingDevices;
    use peerlink_core::CallDecision;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    struct EndLog(std::sync::Mutex<Vec<IpAddr>>);

    impl Collaborator for EndLog {
        fn incoming_call(&self, _peer: IpAddr) -> CallDecision {
            CallDecision::Defer
        }
        fn call_ended(&self, peer: IpAddr) {
            self.0.lock().unwrap().push(peer);
        }
    }

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    async fn listen() -> (TcpListener, u16) {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = l.local_addr().unwrap().port();
        (l, port)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn frames_alternate_video_then_audio() {
        let (listener, port) = listen().await;
        let devices = RecordingDevices::new();
        let (stop, signal) = stop_pair();
        let conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        let dev = devices.clone();
        let task = tokio::spawn(async move { send_loop(conn, &dev, signal).await });

        for i in 1..=3 {
            assert_eq!(read_frame(&mut peer).await.unwrap(), format!("frame-{i}").into_bytes());
            assert_eq!(read_frame(&mut peer).await.unwrap(), format!("chunk-{i}").into_bytes());
        }
        stop.stop();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        devices.snapshot(|l| {
            assert_eq!(l.camera_released, 1);
            assert_eq!(l.mic_stopped, 1);
        });
    }

    #[tokio::test]
    async fn receive_loop_routes_by_position_and_ends_on_close() {
        let (listener, port) = listen().await;
        let devices = RecordingDevices::new();
        let (_stop, signal) = stop_pair();
        let mut remote = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (conn, _) = listener.accept().await.unwrap();
        let dev = devices.clone();
        let task = tokio::spawn(async move { receive_loop(conn, &dev, signal).await });

        write_frame(&mut remote, b"jpeg-1").await.unwrap();
        write_frame(&mut remote, b"pcm-1").await.unwrap();
        write_frame(&mut remote, b"jpeg-2").await.unwrap();
        // Length prefix only, then close: must not be taken as an empty chunk.
        remote.write_all(&8u32.to_be_bytes()).await.unwrap();
        drop(remote);

        let result = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        devices.snapshot(|l| {
            assert_eq!(l.rendered, vec![b"jpeg-1".to_vec(), b"jpeg-2".to_vec()]);
            assert_eq!(l.played, vec![b"pcm-1".to_vec()]);
            assert_eq!(l.display_closed, 1);
            assert_eq!(l.speaker_stopped, 1);
        });
    }

    #[tokio::test]
    async fn full_call_between_two_managers_then_remote_end() {
        // A calls B. Both run on loopback, so each sees the other as 127.0.0.1.
        let pair = Pair::new().await;
        pair.a.request(localhost()).unwrap();
        pair.b.ring(localhost()).unwrap();
        pair.b.activate(localhost()).unwrap();
        pair.a.activate(localhost()).unwrap();

        wait_for(|| pair.a_dev.snapshot(|l| l.played.len() >= 2 && l.rendered.len() >= 2)).await;
        wait_for(|| pair.b_dev.snapshot(|l| l.played.len() >= 2 && l.rendered.len() >= 2)).await;

        // B hangs up.
        assert!(pair.b.end(localhost()));
        assert_eq!(pair.b.calls().status(localhost()), CallStatus::Idle);
        // A's loops see the streams close and end A's session on their own.
        wait_for(|| pair.a.calls().status(localhost()) == CallStatus::Idle).await;
        wait_for(|| pair.a_ends.0.lock().unwrap().len() == 1).await;
        wait_for(|| pair.b_dev.snapshot(|l| l.camera_released == 1 && l.speaker_stopped == 1)).await;
        wait_for(|| pair.a_dev.snapshot(|l| l.camera_released == 1 && l.speaker_stopped == 1)).await;
        // Local end is not reported back to B's collaborator.
        assert!(pair.b_ends.0.lock().unwrap().is_empty());
    }

    /// Two managers on loopback wired to each other's listeners.
    struct Pair {
        a: Arc<MediaManager>,
        b: Arc<MediaManager>,
        a_dev: RecordingDevices,
        b_dev: RecordingDevices,
        a_ends: Arc<EndLog>,
        b_ends: Arc<EndLog>,
        _stops: Vec<StopHandle>,
    }

    impl Pair {
        async fn new() -> Self {
            let (af, afp) = listen().await;
            let (ab, abp) = listen().await;
            let (bf, bfp) = listen().await;
            let (bb, bbp) = listen().await;
            let a_dev = RecordingDevices::new();
            let b_dev = RecordingDevices::new();
            let a_ends = Arc::new(EndLog::default());
            let b_ends = Arc::new(EndLog::default());
            let a = Arc::new(MediaManager::new(
                Arc::new(a_dev.clone()),
                a_ends.clone(),
                MediaPorts { forward: bfp, back: bbp },
            ));
            let b = Arc::new(MediaManager::new(
                Arc::new(b_dev.clone()),
                b_ends.clone(),
                MediaPorts { forward: afp, back: abp },
            ));
            let (sa, siga) = stop_pair();
            let (sb, sigb) = stop_pair();
            tokio::spawn(a.clone().run_listener(af, CallRole::Callee, siga.clone()));
            tokio::spawn(a.clone().run_listener(ab, CallRole::Caller, siga));
            tokio::spawn(b.clone().run_listener(bf, CallRole::Callee, sigb.clone()));
            tokio::spawn(b.clone().run_listener(bb, CallRole::Caller, sigb));
            Self {
                a,
                b,
                a_dev,
                b_dev,
                a_ends,
                b_ends,
                _stops: vec![sa, sb],
            }
        }
    }

    #[tokio::test]
    async fn end_is_prompt_with_uncooperative_peer() {
        // The "peer" is a raw socket that stops reading and writing after the first exchange.
        let (peer_listener, peer_port) = listen().await;
        let devices = RecordingDevices::new();
        let ends = Arc::new(EndLog::default());
        let manager = Arc::new(MediaManager::new(
            Arc::new(devices.clone()),
            ends.clone(),
            MediaPorts {
                forward: peer_port,
                back: peer_port,
            },
        ));
        let (local_listener, local_port) = listen().await;
        let (_stop, signal) = stop_pair();
        tokio::spawn(manager.clone().run_listener(local_listener, CallRole::Caller, signal));

        let peer = localhost();
        manager.request(peer).unwrap();
        manager.activate(peer).unwrap();
        let (mut outbound_seen, _) = peer_listener.accept().await.unwrap();
        let mut inbound = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
        // One pair each way proves both loops are running, then the peer goes silent.
        assert_eq!(read_frame(&mut outbound_seen).await.unwrap(), b"frame-1");
        write_frame(&mut inbound, b"jpeg").await.unwrap();
        write_frame(&mut inbound, b"pcm").await.unwrap();
        wait_for(|| devices.snapshot(|l| l.played.len() == 1)).await;

        assert!(manager.end(peer));
        assert_eq!(manager.calls().status(peer), CallStatus::Idle);

        // Both connections are closed from our side: reads on the peer's ends hit EOF.
        let mut buf = vec![0u8; 64 * 1024];
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match outbound_seen.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await
        .unwrap();
        let n = tokio::time::timeout(Duration::from_secs(2), inbound.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(n, Ok(0) | Err(_)));

        wait_for(|| {
            devices.snapshot(|l| {
                l.camera_released == 1
                    && l.mic_stopped == 1
                    && l.display_closed == 1
                    && l.speaker_stopped == 1
            })
        })
        .await;
        assert!(ends.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsolicited_stream_is_refused() {
        let manager = Arc::new(MediaManager::new(
            Arc::new(RecordingDevices::new()),
            Arc::new(EndLog::default()),
            MediaPorts { forward: 1, back: 1 },
        ));
        let (listener, port) = listen().await;
        let (_stop, signal) = stop_pair();
        tokio::spawn(manager.clone().run_listener(listener, CallRole::Callee, signal));

        let mut conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), conn.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(n, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn stream_for_wrong_role_is_refused() {
        let manager = MediaManager::new(
            Arc::new(RecordingDevices::new()),
            Arc::new(EndLog::default()),
            MediaPorts { forward: 1, back: 1 },
        );
        let peer = localhost();
        manager.request(peer).unwrap();
        let (listener, port) = listen().await;
        let client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        // We are the caller, so the stream belongs on the return port, not the forward one.
        assert!(!manager.attach_inbound(peer, CallRole::Callee, server));
        drop(client);
    }

    #[tokio::test]
    async fn decline_drops_pending_request() {
        let manager = MediaManager::new(
            Arc::new(RecordingDevices::new()),
            Arc::new(EndLog::default()),
            MediaPorts { forward: 1, back: 1 },
        );
        let peer = localhost();
        manager.request(peer).unwrap();
        assert!(manager.declined(peer));
        assert!(!manager.declined(peer));
        assert_eq!(manager.calls().status(peer), CallStatus::Idle);
    }

    #[test]
    fn session_and_handle_change_together_under_contention() {
        let ends = Arc::new(EndLog::default());
        let manager = MediaManager::new(
            Arc::new(RecordingDevices::new()),
            ends.clone(),
            MediaPorts { forward: 1, back: 1 },
        );
        let peer = localhost();
        for _ in 0..200 {
            manager.request(peer).unwrap();
            let stale = manager.handles().get(&peer).map(|h| h.id).unwrap();
            std::thread::scope(|s| {
                s.spawn(|| manager.end(peer));
                s.spawn(|| {
                    let _ = manager.request(peer);
                });
                // A loop of the first call exiting late must not touch a newer one.
                s.spawn(|| manager.finish(peer, stale, "send", Ok(())));
            });
            let session = manager.calls().get(peer).is_some();
            let handle = manager.handles().contains_key(&peer);
            assert_eq!(session, handle);
            manager.end(peer);
        }
    }

    #[tokio::test]
    async fn unreachable_peer_ends_call_and_notifies() {
        // Grab a free port, then close it so the connect is refused.
        let (l, dead_port) = listen().await;
        drop(l);
        let ends = Arc::new(EndLog::default());
        let manager = Arc::new(MediaManager::new(
            Arc::new(RecordingDevices::new()),
            ends.clone(),
            MediaPorts {
                forward: dead_port,
                back: dead_port,
            },
        ));
        let peer = localhost();
        manager.request(peer).unwrap();
        manager.activate(peer).unwrap();
        wait_for(|| manager.calls().status(peer) == CallStatus::Idle).await;
        assert_eq!(*ends.0.lock().unwrap(), vec![peer]);
    }
}

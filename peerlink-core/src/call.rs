//! Call state machine: Idle -> Requesting | Ringing -> Active -> Ended, one session per remote address.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Which side of the call this node is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallRole {
    /// Sent the request; receives the return stream on `video_port + 1`.
    Caller,
    /// Accepted the request; receives the caller's stream on `video_port`.
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    /// Request sent, waiting for accept or decline.
    Requesting,
    /// Local accept in flight.
    Ringing,
    Active,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub peer: IpAddr,
    pub role: CallRole,
    pub status: CallStatus,
}

/// Sessions keyed by peer address. Calls to different peers are independent.
/// An ended session is removed, so a peer with no entry is `Idle`.
#[derive(Debug, Default)]
pub struct CallTable {
    sessions: Mutex<HashMap<IpAddr, CallSession>>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, CallSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Outgoing request: create a Caller session in `Requesting`.
    pub fn request(&self, peer: IpAddr) -> Result<()> {
        let mut sessions = self.lock();
        if let Some(existing) = sessions.get(&peer) {
            return Err(Error::InvalidState(format!(
                "call with {} already {:?}",
                peer, existing.status
            )));
        }
        sessions.insert(
            peer,
            CallSession {
                peer,
                role: CallRole::Caller,
                status: CallStatus::Requesting,
            },
        );
        Ok(())
    }

    /// Local accept of an inbound request: create a Callee session in `Ringing`.
    /// Replaces our own outstanding request to the same peer if both sides called at once.
    pub fn ring(&self, peer: IpAddr) -> Result<()> {
        let mut sessions = self.lock();
        if let Some(existing) = sessions.get(&peer) {
            if matches!(existing.status, CallStatus::Ringing | CallStatus::Active) {
                return Err(Error::InvalidState(format!(
                    "call with {} already {:?}",
                    peer, existing.status
                )));
            }
        }
        sessions.insert(
            peer,
            CallSession {
                peer,
                role: CallRole::Callee,
                status: CallStatus::Ringing,
            },
        );
        Ok(())
    }

    /// `Requesting` or `Ringing` -> `Active`. Returns the local role.
    pub fn activate(&self, peer: IpAddr) -> Result<CallRole> {
        let mut sessions = self.lock();
        match sessions.get_mut(&peer) {
            Some(s) if matches!(s.status, CallStatus::Requesting | CallStatus::Ringing) => {
                s.status = CallStatus::Active;
                Ok(s.role)
            }
            Some(s) => Err(Error::InvalidState(format!(
                "cannot activate call with {} from {:?}",
                peer, s.status
            ))),
            None => Err(Error::InvalidState(format!("no call with {}", peer))),
        }
    }

    /// Peer declined: drop a `Requesting` session. Active calls are untouched.
    pub fn decline(&self, peer: IpAddr) -> Option<CallSession> {
        let mut sessions = self.lock();
        match sessions.get(&peer) {
            Some(s) if s.status == CallStatus::Requesting => sessions.remove(&peer),
            _ => None,
        }
    }

    /// End and remove the session. Returns it with status `Ended`, or None if there was none.
    pub fn end(&self, peer: IpAddr) -> Option<CallSession> {
        self.lock().remove(&peer).map(|mut s| {
            s.status = CallStatus::Ended;
            s
        })
    }

    /// End every session (shutdown).
    pub fn end_all(&self) -> Vec<CallSession> {
        self.lock()
            .drain()
            .map(|(_, mut s)| {
                s.status = CallStatus::Ended;
                s
            })
            .collect()
    }

    pub fn get(&self, peer: IpAddr) -> Option<CallSession> {
        self.lock().get(&peer).cloned()
    }

    pub fn status(&self, peer: IpAddr) -> CallStatus {
        self.lock()
            .get(&peer)
            .map_or(CallStatus::Idle, |s| s.status)
    }

    pub fn is_active(&self, peer: IpAddr) -> bool {
        self.status(peer) == CallStatus::Active
    }

    pub fn sessions(&self) -> Vec<CallSession> {
        self.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn caller_lifecycle() {
        let table = CallTable::new();
        let peer = ip("10.0.0.3");
        assert_eq!(table.status(peer), CallStatus::Idle);
        table.request(peer).unwrap();
        assert_eq!(table.status(peer), CallStatus::Requesting);
        assert_eq!(table.activate(peer).unwrap(), CallRole::Caller);
        assert!(table.is_active(peer));
        let ended = table.end(peer).unwrap();
        assert_eq!(ended.status, CallStatus::Ended);
        assert_eq!(ended.role, CallRole::Caller);
        assert_eq!(table.status(peer), CallStatus::Idle);
        assert!(table.end(peer).is_none());
    }

    #[test]
    fn callee_lifecycle() {
        let table = CallTable::new();
        let peer = ip("10.0.0.4");
        table.ring(peer).unwrap();
        assert_eq!(table.status(peer), CallStatus::Ringing);
        assert_eq!(table.activate(peer).unwrap(), CallRole::Callee);
        assert!(table.ring(peer).is_err());
        assert!(table.activate(peer).is_err());
    }

    #[test]
    fn decline_only_drops_requests() {
        let table = CallTable::new();
        let peer = ip("10.0.0.5");
        assert!(table.decline(peer).is_none());
        table.request(peer).unwrap();
        assert!(table.decline(peer).is_some());
        assert_eq!(table.status(peer), CallStatus::Idle);

        table.request(peer).unwrap();
        table.activate(peer).unwrap();
        assert!(table.decline(peer).is_none());
        assert!(table.is_active(peer));
    }

    #[test]
    fn duplicate_request_rejected() {
        let table = CallTable::new();
        let peer = ip("10.0.0.6");
        table.request(peer).unwrap();
        assert!(matches!(table.request(peer), Err(Error::InvalidState(_))));
        // Crossed requests: accepting theirs replaces ours.
        table.ring(peer).unwrap();
        assert_eq!(table.get(peer).unwrap().role, CallRole::Callee);
    }

    #[test]
    fn calls_to_different_peers_are_independent() {
        let table = CallTable::new();
        let a = ip("10.0.0.7");
        let b = ip("10.0.0.8");
        table.request(a).unwrap();
        table.ring(b).unwrap();
        table.activate(a).unwrap();
        table.activate(b).unwrap();
        table.end(a);
        assert!(table.is_active(b));
        assert_eq!(table.end_all().len(), 1);
        assert!(table.sessions().is_empty());
    }
}

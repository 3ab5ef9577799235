//! Pending voice mailbox: at most one undecided inbound voice connection.

use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

/// An inbound voice connection waiting for a play/reject decision.
#[derive(Debug)]
pub struct PendingVoice<C> {
    pub sender: IpAddr,
    pub conn: C,
}

/// Holds zero or one pending voice message. Generic over the connection type so the
/// daemon can park a socket here and tests can park anything.
#[derive(Debug)]
pub struct VoiceMailboxSlot<C> {
    slot: Mutex<Option<PendingVoice<C>>>,
}

impl<C> Default for VoiceMailboxSlot<C> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<C> VoiceMailboxSlot<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingVoice<C>>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Park a new message. A message already pending is displaced and returned; only one
    /// message can wait at a time.
    pub fn hold(&self, sender: IpAddr, conn: C) -> Option<PendingVoice<C>> {
        self.lock().replace(PendingVoice { sender, conn })
    }

    /// Take the pending message for a decision, leaving the slot empty.
    pub fn take(&self) -> Option<PendingVoice<C>> {
        self.lock().take()
    }

    /// Sender of the pending message, if any.
    pub fn sender(&self) -> Option<IpAddr> {
        self.lock().as_ref().map(|p| p.sender)
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }
}

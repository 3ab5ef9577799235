//! Text routing: per-peer "window open" flags and the FIFO backlog for closed windows.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

/// Where an incoming text went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Delivered,
    Queued,
}

/// Active-window set plus message queues.
///
/// Lock order is queues, then windows. Delivery closures run while the queue lock is held
/// so a backlog drain and a live delivery for the same peer can never interleave; they
/// must not call back into the inbox.
#[derive(Debug, Default)]
pub struct TextInbox {
    queues: Mutex<HashMap<IpAddr, VecDeque<String>>>,
    windows: Mutex<HashSet<IpAddr>>,
}

impl TextInbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<IpAddr, VecDeque<String>>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn windows(&self) -> MutexGuard<'_, HashSet<IpAddr>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_open(&self, peer: IpAddr) -> bool {
        self.windows().contains(&peer)
    }

    /// Deliver `message` now if the peer's window is open, otherwise append it to that peer's queue.
    pub fn route<F>(&self, peer: IpAddr, message: &str, deliver: F) -> Routed
    where
        F: FnOnce(&str),
    {
        let mut queues = self.queues();
        if self.windows().contains(&peer) {
            deliver(message);
            Routed::Delivered
        } else {
            queues.entry(peer).or_default().push_back(message.to_string());
            Routed::Queued
        }
    }

    /// Append to a peer's queue regardless of window state.
    pub fn enqueue(&self, peer: IpAddr, message: String) {
        self.queues().entry(peer).or_default().push_back(message);
    }

    /// Mark the window open and hand the backlog to `deliver` in receipt order.
    /// Returns the number of messages delivered.
    pub fn open_window<F>(&self, peer: IpAddr, mut deliver: F) -> usize
    where
        F: FnMut(&str),
    {
        let mut queues = self.queues();
        self.windows().insert(peer);
        let backlog = queues.remove(&peer).unwrap_or_default();
        for message in &backlog {
            deliver(message);
        }
        backlog.len()
    }

    /// Returns true if the window was open.
    pub fn close_window(&self, peer: IpAddr) -> bool {
        self.windows().remove(&peer)
    }

    /// Drain the backlog without opening the window.
    pub fn unread(&self, peer: IpAddr) -> Vec<String> {
        self.queues()
            .remove(&peer)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn pending(&self, peer: IpAddr) -> usize {
        self.queues().get(&peer).map_or(0, VecDeque::len)
    }
}

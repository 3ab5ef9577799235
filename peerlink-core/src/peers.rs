//! Discovered-peer set, keyed by address.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

/// One discovered peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerRecord {
    pub display_name: String,
    pub address: IpAddr,
}

/// Result of recording an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// First announcement from this address.
    New,
    /// Known address, display name changed.
    Renamed,
    /// Known address, nothing changed.
    Unchanged,
}

/// Peers seen on the discovery port. Entries are never evicted: a peer that goes
/// offline stays listed until the process exits.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: Mutex<BTreeMap<IpAddr, String>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<IpAddr, String>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an announcement. The address is the identity; a new name at a known address replaces the old one.
    pub fn observe(&self, address: IpAddr, display_name: &str) -> Discovery {
        let mut peers = self.lock();
        match peers.get_mut(&address) {
            None => {
                peers.insert(address, display_name.to_string());
                Discovery::New
            }
            Some(name) if name == display_name => Discovery::Unchanged,
            Some(name) => {
                *name = display_name.to_string();
                Discovery::Renamed
            }
        }
    }

    pub fn get(&self, address: IpAddr) -> Option<PeerRecord> {
        self.lock().get(&address).map(|name| PeerRecord {
            display_name: name.clone(),
            address,
        })
    }

    pub fn contains(&self, address: IpAddr) -> bool {
        self.lock().contains_key(&address)
    }

    /// Snapshot sorted by address.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.lock()
            .iter()
            .map(|(address, name)| PeerRecord {
                display_name: name.clone(),
                address: *address,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

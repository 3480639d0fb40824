//! Transport seam and an in-memory, lossy implementation of it.
//!
//! The replication layer only needs best-effort datagrams addressed by peer
//! identity plus a way to ask who the host is. [`LoopbackNetwork`] provides
//! both in-process, with seeded drop, duplicate and reorder behavior so tests
//! exercise the same failure modes a real lobby transport has.

use crate::error::NetError;
use crate::protocol::DEFAULT_MAX_PAYLOAD;
use arena_core::PeerId;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use tracing::{debug, trace};

/// Best-effort datagram transport.
pub trait Transport {
    /// Send to one peer. Returns false if the send could not be attempted.
    fn send(&mut self, peer: &PeerId, payload: &[u8]) -> bool;
    /// Send to every other session peer.
    fn broadcast(&mut self, payload: &[u8]) -> bool;
    /// Take everything received since the last poll.
    fn poll(&mut self) -> Vec<(Vec<u8>, PeerId)>;
    /// Largest payload a single send accepts.
    fn max_payload(&self) -> usize;
}

/// Identity and host election, owned by the lobby layer.
pub trait SessionInfo {
    /// Stable identity of the local peer.
    fn local_peer(&self) -> PeerId;
    /// Current host, if the session has one.
    fn host_peer(&self) -> Option<PeerId>;
}

/// Loss model for a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Largest accepted payload.
    pub max_payload: usize,
    /// Probability a delivery is lost.
    pub drop_rate: f64,
    /// Probability a delivery arrives twice.
    pub duplicate_rate: f64,
    /// Shuffle each inbox before it is polled.
    pub reorder: bool,
    /// Seed for the loss model.
    pub seed: u64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
            drop_rate: 0.0,
            duplicate_rate: 0.0,
            reorder: false,
            seed: 0,
        }
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Payloads handed to an inbox.
    pub delivered: u64,
    /// Deliveries lost to the drop rate.
    pub dropped: u64,
    /// Extra copies delivered.
    pub duplicated: u64,
    /// Sends refused for exceeding the payload ceiling.
    pub oversize: u64,
    /// Sends refused because either end was not connected.
    pub refused: u64,
}

#[derive(Debug, Default)]
struct Endpoint {
    inbox: VecDeque<(Vec<u8>, PeerId)>,
    connected: bool,
}

struct Hub {
    config: LoopbackConfig,
    rng: StdRng,
    endpoints: BTreeMap<PeerId, Endpoint>,
    host: Option<PeerId>,
    stats: LoopbackStats,
}

impl Hub {
    fn deliver(&mut self, from: &PeerId, to: &PeerId, payload: &[u8]) {
        if self.rng.gen_bool(self.config.drop_rate.clamp(0.0, 1.0)) {
            self.stats.dropped += 1;
            trace!(%from, %to, "loopback drop");
            return;
        }
        let copies = if self.rng.gen_bool(self.config.duplicate_rate.clamp(0.0, 1.0)) {
            self.stats.duplicated += 1;
            2
        } else {
            1
        };
        if let Some(endpoint) = self.endpoints.get_mut(to) {
            for _ in 0..copies {
                endpoint.inbox.push_back((payload.to_vec(), from.clone()));
            }
            self.stats.delivered += copies;
        }
    }

    fn is_connected(&self, peer: &PeerId) -> bool {
        self.endpoints.get(peer).is_some_and(|e| e.connected)
    }

    fn accept(&mut self, from: &PeerId, payload: &[u8]) -> bool {
        if payload.len() > self.config.max_payload {
            self.stats.oversize += 1;
            debug!(%from, len = payload.len(), "loopback refused oversize payload");
            return false;
        }
        if !self.is_connected(from) {
            self.stats.refused += 1;
            return false;
        }
        true
    }
}

/// Shared in-memory network. Cheap to clone; all clones see the same hub.
#[derive(Clone)]
pub struct LoopbackNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl LoopbackNetwork {
    /// Create an empty network.
    pub fn new(config: LoopbackConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            hub: Rc::new(RefCell::new(Hub {
                config,
                rng,
                endpoints: BTreeMap::new(),
                host: None,
                stats: LoopbackStats::default(),
            })),
        }
    }

    /// Attach a connected peer and return its transport handle.
    pub fn attach(&self, peer: PeerId) -> Result<LoopbackTransport, NetError> {
        let mut hub = self.hub.borrow_mut();
        if hub.endpoints.contains_key(&peer) {
            return Err(NetError::DuplicatePeer(peer.to_string()));
        }
        hub.endpoints.insert(
            peer.clone(),
            Endpoint {
                inbox: VecDeque::new(),
                connected: true,
            },
        );
        Ok(LoopbackTransport {
            hub: Rc::clone(&self.hub),
            local: peer,
        })
    }

    /// Mark a peer reachable or not. Unreachable peers neither send nor receive.
    pub fn set_connected(&self, peer: &PeerId, connected: bool) {
        if let Some(endpoint) = self.hub.borrow_mut().endpoints.get_mut(peer) {
            endpoint.connected = connected;
        }
    }

    /// Elect a host.
    pub fn set_host(&self, host: Option<PeerId>) {
        self.hub.borrow_mut().host = host;
    }

    /// Change the loss model mid-run.
    pub fn set_loss(&self, drop_rate: f64, duplicate_rate: f64) {
        let mut hub = self.hub.borrow_mut();
        hub.config.drop_rate = drop_rate;
        hub.config.duplicate_rate = duplicate_rate;
    }

    /// Delivery counters so far.
    pub fn stats(&self) -> LoopbackStats {
        self.hub.borrow().stats
    }

    /// Payloads waiting in `peer`'s inbox.
    pub fn in_flight(&self, peer: &PeerId) -> usize {
        self.hub
            .borrow()
            .endpoints
            .get(peer)
            .map_or(0, |e| e.inbox.len())
    }
}

/// One peer's handle on a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    hub: Rc<RefCell<Hub>>,
    local: PeerId,
}

impl Transport for LoopbackTransport {
    fn send(&mut self, peer: &PeerId, payload: &[u8]) -> bool {
        let mut hub = self.hub.borrow_mut();
        if !hub.accept(&self.local, payload) {
            return false;
        }
        if !hub.is_connected(peer) {
            hub.stats.refused += 1;
            return false;
        }
        hub.deliver(&self.local, peer, payload);
        true
    }

    fn broadcast(&mut self, payload: &[u8]) -> bool {
        let mut hub = self.hub.borrow_mut();
        if !hub.accept(&self.local, payload) {
            return false;
        }
        let targets: Vec<PeerId> = hub
            .endpoints
            .iter()
            .filter(|(peer, endpoint)| **peer != self.local && endpoint.connected)
            .map(|(peer, _)| peer.clone())
            .collect();
        for target in &targets {
            hub.deliver(&self.local, target, payload);
        }
        true
    }

    fn poll(&mut self) -> Vec<(Vec<u8>, PeerId)> {
        let mut guard = self.hub.borrow_mut();
        let hub = &mut *guard;
        let Some(endpoint) = hub.endpoints.get_mut(&self.local) else {
            return Vec::new();
        };
        if !endpoint.connected {
            return Vec::new();
        }
        let mut received: Vec<_> = endpoint.inbox.drain(..).collect();
        if hub.config.reorder {
            received.shuffle(&mut hub.rng);
        }
        received
    }

    fn max_payload(&self) -> usize {
        self.hub.borrow().config.max_payload
    }
}

impl SessionInfo for LoopbackTransport {
    fn local_peer(&self) -> PeerId {
        self.local.clone()
    }

    fn host_peer(&self) -> Option<PeerId> {
        self.hub.borrow().host.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(config: LoopbackConfig) -> (LoopbackNetwork, LoopbackTransport, LoopbackTransport) {
        let net = LoopbackNetwork::new(config);
        let a = net.attach(PeerId::from("a")).unwrap();
        let b = net.attach(PeerId::from("b")).unwrap();
        (net, a, b)
    }

    #[test]
    fn test_send_and_poll() {
        let (_net, mut a, mut b) = pair(LoopbackConfig::default());
        assert!(a.send(&PeerId::from("b"), b"hello"));
        let received = b.poll();
        assert_eq!(received, vec![(b"hello".to_vec(), PeerId::from("a"))]);
        assert!(b.poll().is_empty());
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let (net, mut a, mut b) = pair(LoopbackConfig::default());
        let mut c = net.attach(PeerId::from("c")).unwrap();
        assert!(a.broadcast(b"x"));
        assert!(a.poll().is_empty());
        assert_eq!(b.poll().len(), 1);
        assert_eq!(c.poll().len(), 1);
    }

    #[test]
    fn test_oversize_and_disconnected_sends_fail() {
        let (net, mut a, _b) = pair(LoopbackConfig {
            max_payload: 4,
            ..LoopbackConfig::default()
        });
        assert!(!a.send(&PeerId::from("b"), b"too long"));
        net.set_connected(&PeerId::from("a"), false);
        assert!(!a.send(&PeerId::from("b"), b"ok"));
        assert!(!a.broadcast(b"ok"));
        let stats = net.stats();
        assert_eq!(stats.oversize, 1);
        assert_eq!(stats.refused, 2);
    }

    #[test]
    fn test_full_drop_rate_loses_everything_but_reports_success() {
        let (net, mut a, mut b) = pair(LoopbackConfig {
            drop_rate: 1.0,
            ..LoopbackConfig::default()
        });
        assert!(a.send(&PeerId::from("b"), b"lost"));
        assert!(b.poll().is_empty());
        assert_eq!(net.stats().dropped, 1);
    }

    #[test]
    fn test_duplicate_rate_delivers_twice() {
        let (_net, mut a, mut b) = pair(LoopbackConfig {
            duplicate_rate: 1.0,
            ..LoopbackConfig::default()
        });
        a.send(&PeerId::from("b"), b"twice");
        assert_eq!(b.poll().len(), 2);
    }

    #[test]
    fn test_duplicate_attach_is_an_error() {
        let net = LoopbackNetwork::new(LoopbackConfig::default());
        net.attach(PeerId::from("a")).unwrap();
        assert_eq!(
            net.attach(PeerId::from("a")).err(),
            Some(NetError::DuplicatePeer("a".into()))
        );
    }

    #[test]
    fn test_host_is_shared() {
        let (net, a, b) = pair(LoopbackConfig::default());
        net.set_host(Some(PeerId::from("a")));
        assert_eq!(a.host_peer(), Some(PeerId::from("a")));
        assert_eq!(b.host_peer(), Some(PeerId::from("a")));
        assert_eq!(b.local_peer(), PeerId::from("b"));
    }
}

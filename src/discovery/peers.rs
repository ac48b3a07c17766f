//! Known peers and the services each one advertises.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::transport::{Headers, PeerId};
use crate::{Error, Result};

/// Everything this node knows about one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// The peer's identifier.
    pub id: PeerId,
    /// Display name.
    pub name: String,
    /// Headers announced on ENTER.
    pub headers: Headers,
    /// Address the membership transport sees the peer at.
    pub address: String,
    /// Service (group) name to advertised `host:port` endpoints.
    pub services: BTreeMap<String, BTreeSet<String>>,
    host: String,
}

impl PeerRecord {
    /// Create a record with no known services.
    pub fn new(id: PeerId, name: String, headers: Headers, address: String) -> Self {
        let host = host_address(&address).to_string();
        Self {
            id,
            name,
            headers,
            address,
            services: BTreeMap::new(),
            host,
        }
    }

    /// The address without its trailing port.
    pub fn host_address(&self) -> &str {
        &self.host
    }

    /// `host:port` for a port on this peer.
    pub fn endpoint(&self, port: u16) -> String {
        format!("{}:{}", self.host, port)
    }

    /// Endpoints for `service`, if the peer joined or advertised it.
    pub fn endpoints(&self, service: &str) -> Option<&BTreeSet<String>> {
        self.services.get(service)
    }

    /// Whether the peer has at least one endpoint for `service`.
    pub fn advertises(&self, service: &str) -> bool {
        self.services.get(service).is_some_and(|e| !e.is_empty())
    }

    /// A copy that only carries knowledge about `service`.
    pub fn restricted_to(&self, service: &str) -> Self {
        let mut copy = Self {
            services: BTreeMap::new(),
            ..self.clone()
        };
        if let Some(endpoints) = self.services.get(service) {
            copy.services.insert(service.to_string(), endpoints.clone());
        }
        copy
    }
}

/// Strip the trailing `:port` from an address.
pub fn host_address(address: &str) -> &str {
    address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(address)
}

/// Peers currently visible through the membership transport.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, PeerRecord>,
}

impl PeerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer that entered. A repeated ENTER starts the record afresh.
    pub fn enter(
        &mut self,
        id: PeerId,
        name: String,
        headers: Headers,
        address: String,
    ) -> &PeerRecord {
        let record = PeerRecord::new(id, name, headers, address);
        if self.peers.insert(id, record).is_some() {
            debug!(peer = %id.fmt_short(), "peer re-entered, previous record discarded");
        }
        &self.peers[&id]
    }

    /// Forget a peer and everything it advertised.
    pub fn exit(&mut self, id: &PeerId) -> Result<PeerRecord> {
        self.peers.remove(id).ok_or(Error::UnknownPeer(*id))
    }

    /// The peer joined `group`: its endpoints for that service start empty.
    pub fn join(&mut self, id: &PeerId, group: &str) -> Result<()> {
        self.get_mut(id)?
            .services
            .insert(group.to_string(), BTreeSet::new());
        Ok(())
    }

    /// The peer left `group`. Returns the endpoints it had for that service.
    pub fn leave(&mut self, id: &PeerId, group: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .get_mut(id)?
            .services
            .remove(group)
            .unwrap_or_default())
    }

    /// Replace the peer's endpoints for `service` with its host on `ports`.
    pub fn apply_update(
        &mut self,
        id: &PeerId,
        service: &str,
        ports: &BTreeSet<u16>,
    ) -> Result<()> {
        let peer = self.get_mut(id)?;
        let endpoints: BTreeSet<String> = ports.iter().map(|&port| peer.endpoint(port)).collect();
        peer.services.insert(service.to_string(), endpoints);
        Ok(())
    }

    /// Look up a peer.
    pub fn get(&self, id: &PeerId) -> Result<&PeerRecord> {
        self.peers.get(id).ok_or(Error::UnknownPeer(*id))
    }

    fn get_mut(&mut self, id: &PeerId) -> Result<&mut PeerRecord> {
        self.peers.get_mut(id).ok_or(Error::UnknownPeer(*id))
    }

    /// Copies of every peer advertising `service`, restricted to that service.
    pub fn peers_for(&self, service: &str) -> Vec<PeerRecord> {
        let mut peers: Vec<_> = self
            .peers
            .values()
            .filter(|p| p.advertises(service))
            .map(|p| p.restricted_to(service))
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Union of all peers' endpoints for `service`.
    pub fn endpoints(&self, service: &str) -> BTreeSet<String> {
        self.peers
            .values()
            .filter_map(|p| p.endpoints(service))
            .flatten()
            .cloned()
            .collect()
    }

    /// Full copies of every known peer.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut peers: Vec<_> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is known.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

//! In-process membership transport.
//!
//! [`MemoryNetwork`] is a hub that every [`MemoryTransport`] registers with.
//! It produces the same event sequence a beaconing transport would: peers
//! that are both started see each other ENTER, then JOIN for every group the
//! other side is in; group changes, shouts and whispers are delivered to the
//! relevant started peers; stopping (or dropping) a transport makes everyone
//! else see it EXIT.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use super::{EventStream, Headers, MembershipEvent, MembershipTransport, PeerId};
use crate::{Error, Result};

const BASE_PORT: u16 = 49152;

struct Member {
    name: String,
    address: String,
    headers: Headers,
    groups: BTreeSet<String>,
    started: bool,
    tx: mpsc::UnboundedSender<MembershipEvent>,
}

impl Member {
    fn deliver(&self, event: MembershipEvent) {
        trace!(to = %self.name, kind = event.kind(), "memory: deliver");
        let _ = self.tx.send(event);
    }

    fn enter_event(&self, id: PeerId) -> MembershipEvent {
        MembershipEvent::Enter {
            peer: id,
            name: self.name.clone(),
            headers: self.headers.clone(),
            address: self.address.clone(),
        }
    }
}

#[derive(Default)]
struct Hub {
    members: HashMap<PeerId, Member>,
    allocated: u16,
}

impl Hub {
    fn others(&self, id: PeerId) -> impl Iterator<Item = (&PeerId, &Member)> {
        self.members
            .iter()
            .filter(move |(other, m)| **other != id && m.started)
    }
}

/// Shared in-process network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node with an automatically assigned loopback address.
    pub fn node(&self, name: impl Into<String>) -> MemoryTransport {
        let address = {
            let mut hub = self.hub.lock();
            hub.allocated += 1;
            let n = hub.allocated;
            format!("tcp://127.0.{}.{}:{}", n / 256, n % 256, BASE_PORT.wrapping_add(n))
        };
        self.node_at(name, address)
    }

    /// Register a node that peers will see at `address`.
    pub fn node_at(&self, name: impl Into<String>, address: impl Into<String>) -> MemoryTransport {
        let id = PeerId::random();
        let (tx, rx) = mpsc::unbounded_channel();
        let name = name.into();
        self.hub.lock().members.insert(
            id,
            Member {
                name: name.clone(),
                address: address.into(),
                headers: Headers::new(),
                groups: BTreeSet::new(),
                started: false,
                tx,
            },
        );
        MemoryTransport {
            id,
            name,
            hub: Arc::clone(&self.hub),
            events: Some(rx),
        }
    }

    /// Number of started nodes.
    pub fn len(&self) -> usize {
        self.hub.lock().members.values().filter(|m| m.started).count()
    }

    /// Whether no node is started.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One node's handle on a [`MemoryNetwork`].
pub struct MemoryTransport {
    id: PeerId,
    name: String,
    hub: Arc<Mutex<Hub>>,
    events: Option<mpsc::UnboundedReceiver<MembershipEvent>>,
}

impl MemoryTransport {
    /// Add a header announced to peers on ENTER. Only effective before start.
    pub fn with_header(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(member) = self.hub.lock().members.get_mut(&self.id) {
            member.headers.insert(key.into(), value.into());
        }
        self
    }

    /// The address peers see this node at.
    pub fn address(&self) -> Option<String> {
        self.hub.lock().members.get(&self.id).map(|m| m.address.clone())
    }

    fn depart(&mut self) {
        let mut hub = self.hub.lock();
        let Some(me) = hub.members.remove(&self.id) else {
            return;
        };
        if !me.started {
            return;
        }
        debug!(node = %self.name, "memory: departing");
        for (_, other) in hub.others(self.id) {
            other.deliver(MembershipEvent::Exit {
                peer: self.id,
                name: me.name.clone(),
            });
        }
    }

    fn broadcast_group_change(&self, group: &str, joined: bool) -> Result<()> {
        let mut hub = self.hub.lock();
        let me = hub
            .members
            .get_mut(&self.id)
            .ok_or_else(|| Error::transport("node has left the network"))?;
        let changed = if joined {
            me.groups.insert(group.to_string())
        } else {
            me.groups.remove(group)
        };
        if !changed || !me.started {
            return Ok(());
        }
        for (_, other) in hub.others(self.id) {
            let event = if joined {
                MembershipEvent::Join {
                    peer: self.id,
                    name: self.name.clone(),
                    group: group.to_string(),
                }
            } else {
                MembershipEvent::Leave {
                    peer: self.id,
                    name: self.name.clone(),
                    group: group.to_string(),
                }
            };
            other.deliver(event);
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipTransport for MemoryTransport {
    fn id(&self) -> PeerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<()> {
        let mut hub = self.hub.lock();
        match hub.members.get_mut(&self.id) {
            Some(me) if me.started => return Ok(()),
            Some(me) => me.started = true,
            None => return Err(Error::transport("node has left the network")),
        }
        debug!(node = %self.name, "memory: starting");

        let me = &hub.members[&self.id];
        for (other_id, other) in hub.others(self.id) {
            other.deliver(me.enter_event(self.id));
            for group in &me.groups {
                other.deliver(MembershipEvent::Join {
                    peer: self.id,
                    name: me.name.clone(),
                    group: group.clone(),
                });
            }

            me.deliver(other.enter_event(*other_id));
            for group in &other.groups {
                me.deliver(MembershipEvent::Join {
                    peer: *other_id,
                    name: other.name.clone(),
                    group: group.clone(),
                });
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.depart();
        Ok(())
    }

    async fn join(&mut self, group: &str) -> Result<()> {
        self.broadcast_group_change(group, true)
    }

    async fn leave(&mut self, group: &str) -> Result<()> {
        self.broadcast_group_change(group, false)
    }

    async fn shout(&mut self, group: &str, payload: Bytes) -> Result<()> {
        let hub = self.hub.lock();
        for (_, other) in hub.others(self.id).filter(|(_, m)| m.groups.contains(group)) {
            other.deliver(MembershipEvent::Shout {
                peer: self.id,
                name: self.name.clone(),
                group: group.to_string(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    async fn whisper(&mut self, peer: PeerId, payload: Bytes) -> Result<()> {
        let hub = self.hub.lock();
        match hub.members.get(&peer) {
            Some(other) if other.started && peer != self.id => {
                other.deliver(MembershipEvent::Whisper {
                    peer: self.id,
                    name: self.name.clone(),
                    payload,
                });
                Ok(())
            }
            _ => Err(Error::UnknownPeer(peer)),
        }
    }

    fn take_events(&mut self) -> Option<EventStream> {
        self.events
            .take()
            .map(|rx| Box::pin(UnboundedReceiverStream::new(rx)) as EventStream)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.depart();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{FutureExt, StreamExt};

    async fn next(events: &mut EventStream) -> MembershipEvent {
        tokio::time::timeout(std::time::Duration::from_secs(1), events.next())
            .await
            .expect("event expected")
            .expect("stream open")
    }

    #[tokio::test]
    async fn started_nodes_see_each_other_enter_and_join() {
        let net = MemoryNetwork::new();
        let mut a = net.node("a");
        let mut b = net.node("b");
        let mut a_events = a.take_events().unwrap();
        let mut b_events = b.take_events().unwrap();
        assert!(a.take_events().is_none());

        a.join("svc").await.unwrap();
        a.start().await.unwrap();
        b.start().await.unwrap();
        assert_eq!(net.len(), 2);

        match next(&mut a_events).await {
            MembershipEvent::Enter { peer, name, address, .. } => {
                assert_eq!(peer, b.id());
                assert_eq!(name, "b");
                assert_eq!(Some(address), b.address());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(next(&mut b_events).await.kind(), "ENTER");
        match next(&mut b_events).await {
            MembershipEvent::Join { peer, group, .. } => {
                assert_eq!(peer, a.id());
                assert_eq!(group, "svc");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn shout_reaches_group_members_only() {
        let net = MemoryNetwork::new();
        let mut a = net.node("a");
        let mut b = net.node("b");
        let mut c = net.node("c");
        let mut b_events = b.take_events().unwrap();
        let mut c_events = c.take_events().unwrap();
        for t in [&mut a, &mut b, &mut c] {
            t.start().await.unwrap();
        }
        b.join("g").await.unwrap();

        a.shout("g", Bytes::from_static(b"hi")).await.unwrap();

        // b: ENTER a, ENTER c, SHOUT
        let mut kinds = Vec::new();
        for _ in 0..3 {
            kinds.push(next(&mut b_events).await.kind());
        }
        assert_eq!(kinds.iter().filter(|k| **k == "SHOUT").count(), 1);

        // c: ENTER a, ENTER b, JOIN b/g, nothing else
        for _ in 0..3 {
            assert_ne!(next(&mut c_events).await.kind(), "SHOUT");
        }
        assert!(c_events.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn dropping_a_transport_reports_exit() {
        let net = MemoryNetwork::new();
        let mut a = net.node("a");
        let mut b = net.node("b");
        let mut a_events = a.take_events().unwrap();
        a.start().await.unwrap();
        b.start().await.unwrap();
        let b_id = b.id();

        assert_eq!(next(&mut a_events).await.kind(), "ENTER");
        drop(b);
        assert_eq!(
            next(&mut a_events).await,
            MembershipEvent::Exit {
                peer: b_id,
                name: "b".into()
            }
        );
        assert!(matches!(
            a.whisper(b_id, Bytes::new()).await,
            Err(Error::UnknownPeer(_))
        ));
    }
}

//! Peer-membership transport seam.
//!
//! A membership transport beacons presence, tracks which peers are alive and
//! which groups they joined, and carries group multicast ([`shout`]) and
//! unicast ([`whisper`]). The discovery node consumes its event stream and
//! drives it through [`MembershipTransport`]; it never implements one.
//!
//! Events for one peer arrive in the order the transport observed them.
//!
//! [`shout`]: MembershipTransport::shout
//! [`whisper`]: MembershipTransport::whisper

pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use uuid::Uuid;

use crate::Result;

/// Opaque unique identifier of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Uuid);

impl PeerId {
    /// A fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build an identifier from its 16 raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// The raw bytes of this identifier.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short form for logs.
    pub fn fmt_short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Headers a peer announced on entering.
pub type Headers = HashMap<String, String>;

/// An inbound membership event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A peer became visible at `address`.
    Enter {
        /// The peer concerned.
        peer: PeerId,
        /// The peer's display name.
        name: String,
        /// Headers the peer announced.
        headers: Headers,
        /// The peer's transport address.
        address: String,
    },
    /// A peer went away.
    Exit {
        /// The peer concerned.
        peer: PeerId,
        /// The peer's display name.
        name: String,
    },
    /// A peer joined a group.
    Join {
        /// The peer concerned.
        peer: PeerId,
        /// The peer's display name.
        name: String,
        /// The group joined.
        group: String,
    },
    /// A peer left a group.
    Leave {
        /// The peer concerned.
        peer: PeerId,
        /// The peer's display name.
        name: String,
        /// The group left.
        group: String,
    },
    /// A peer multicast `payload` to a group we are in.
    Shout {
        /// The peer concerned.
        peer: PeerId,
        /// The peer's display name.
        name: String,
        /// The group shouted to.
        group: String,
        /// The message body.
        payload: Bytes,
    },
    /// A peer sent `payload` to us alone.
    Whisper {
        /// The peer concerned.
        peer: PeerId,
        /// The peer's display name.
        name: String,
        /// The message body.
        payload: Bytes,
    },
}

impl MembershipEvent {
    /// The peer this event is about.
    pub fn peer(&self) -> PeerId {
        match self {
            Self::Enter { peer, .. }
            | Self::Exit { peer, .. }
            | Self::Join { peer, .. }
            | Self::Leave { peer, .. }
            | Self::Shout { peer, .. }
            | Self::Whisper { peer, .. } => *peer,
        }
    }

    /// Event name as the transport spells it.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Enter { .. } => "ENTER",
            Self::Exit { .. } => "EXIT",
            Self::Join { .. } => "JOIN",
            Self::Leave { .. } => "LEAVE",
            Self::Shout { .. } => "SHOUT",
            Self::Whisper { .. } => "WHISPER",
        }
    }
}

/// Boxed stream of inbound membership events.
pub type EventStream = Pin<Box<dyn Stream<Item = MembershipEvent> + Send>>;

/// Operations the discovery node needs from a membership transport.
///
/// The node owns its transport exclusively and only touches it from its own
/// task, so implementations need `Send` but not `Sync`.
#[async_trait]
pub trait MembershipTransport: Send + 'static {
    /// This node's identifier.
    fn id(&self) -> PeerId;

    /// This node's display name.
    fn name(&self) -> &str;

    /// Begin beaconing and accepting peers.
    async fn start(&mut self) -> Result<()>;

    /// Stop beaconing; peers will observe our exit.
    async fn stop(&mut self) -> Result<()>;

    /// Join a group.
    async fn join(&mut self, group: &str) -> Result<()>;

    /// Leave a group.
    async fn leave(&mut self, group: &str) -> Result<()>;

    /// Multicast to all members of a group.
    async fn shout(&mut self, group: &str, payload: Bytes) -> Result<()>;

    /// Unicast to one peer.
    async fn whisper(&mut self, peer: PeerId, payload: Bytes) -> Result<()>;

    /// Take the inbound event stream. Yields `Some` exactly once.
    fn take_events(&mut self) -> Option<EventStream>;
}

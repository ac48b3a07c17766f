//! What flows in and out of a discovery node.

use std::collections::BTreeSet;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::peers::PeerRecord;
use crate::transport::{Headers, MembershipEvent, PeerId};

/// Something the application can observe on a [`DiscoveryNode`](super::DiscoveryNode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occurrence {
    /// A peer became visible.
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
    /// A peer went away; everything it advertised is forgotten.
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
    /// A peer shouted to a group we are in.
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
    /// A peer whispered to us.
    Whisper {
        /// The peer concerned.
        peer: PeerId,
        /// The peer's display name.
        name: String,
        /// The message body.
        payload: Bytes,
    },
    /// The known endpoints for `service` changed.
    Service {
        /// The service whose endpoints changed.
        service: String,
        /// Every endpoint now known for the service.
        endpoints: BTreeSet<String>,
    },
}

impl Occurrence {
    /// The peer this is about, if any.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Self::Enter { peer, .. }
            | Self::Exit { peer, .. }
            | Self::Join { peer, .. }
            | Self::Leave { peer, .. }
            | Self::Shout { peer, .. }
            | Self::Whisper { peer, .. } => Some(*peer),
            Self::Service { .. } => None,
        }
    }
}

impl From<MembershipEvent> for Occurrence {
    fn from(event: MembershipEvent) -> Self {
        match event {
            MembershipEvent::Enter {
                peer,
                name,
                headers,
                address,
            } => Self::Enter {
                peer,
                name,
                headers,
                address,
            },
            MembershipEvent::Exit { peer, name } => Self::Exit { peer, name },
            MembershipEvent::Join { peer, name, group } => Self::Join { peer, name, group },
            MembershipEvent::Leave { peer, name, group } => Self::Leave { peer, name, group },
            MembershipEvent::Shout {
                peer,
                name,
                group,
                payload,
            } => Self::Shout {
                peer,
                name,
                group,
                payload,
            },
            MembershipEvent::Whisper {
                peer,
                name,
                payload,
            } => Self::Whisper {
                peer,
                name,
                payload,
            },
        }
    }
}

/// API calls marshaled into the node task.
#[derive(Debug)]
pub(crate) enum Command {
    RegisterService {
        service: String,
        added_ports: BTreeSet<u16>,
        removed_ports: BTreeSet<u16>,
    },
    RequestService {
        service: String,
    },
    RequestServiceFrom {
        peer: PeerId,
        service: String,
    },
    Join {
        group: String,
    },
    Leave {
        group: String,
    },
    Shout {
        group: String,
        payload: Bytes,
    },
    Whisper {
        peer: PeerId,
        payload: Bytes,
    },
    Peers {
        service: String,
        reply: oneshot::Sender<Vec<PeerRecord>>,
    },
    AllPeers {
        reply: oneshot::Sender<Vec<PeerRecord>>,
    },
    Endpoints {
        service: String,
        reply: oneshot::Sender<BTreeSet<String>>,
    },
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::RegisterService { .. } => "register-service",
            Self::RequestService { .. } => "request-service",
            Self::RequestServiceFrom { .. } => "request-service-from",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Shout { .. } => "shout",
            Self::Whisper { .. } => "whisper",
            Self::Peers { .. } => "peers",
            Self::AllPeers { .. } => "all-peers",
            Self::Endpoints { .. } => "endpoints",
        }
    }
}

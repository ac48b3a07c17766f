//! Peer-to-peer service discovery driven by a single-threaded actor.
//!
//! The building blocks are usable on their own:
//!
//! - [`pipe`]: bounded, ordered, bidirectional message links.
//! - [`actor`]: a task behind a command pipe and an event pipe, with a
//!   start/stop handshake.
//! - [`reactor`]: a poll loop over keyed streams.
//! - [`transport`]: the group membership interface discovery runs on, plus an
//!   in-process implementation.
//!
//! [`DiscoveryNode`] combines them: an actor whose reactor consumes membership
//! events and API commands, and which owns the peer table and the local
//! service registry.
//!
//! ```no_run
//! use service_discovery::transport::memory::MemoryNetwork;
//! use service_discovery::{DiscoveryNode, Occurrence};
//!
//! # async fn run() -> service_discovery::Result<()> {
//! let network = MemoryNetwork::new();
//! let mut node = DiscoveryNode::start(network.node("worker")).await?;
//! node.join("db").await?;
//! node.add_service("db", 5432).await?;
//!
//! while let Some(occurrence) = node.recv().await? {
//!     if let Occurrence::Service { service, endpoints } = occurrence {
//!         println!("{service}: {endpoints:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod actor;
pub mod discovery;
pub mod error;
pub mod pipe;
pub mod reactor;
pub mod transport;

pub use actor::{Actor, ActorState};
pub use discovery::{
    endpoint_to_port, DiscoveryMessage, DiscoveryNode, NodeConfig, Occurrence, PeerRecord,
};
pub use error::{Error, Result};
pub use pipe::{pipe, PipeEnd, Signal};
pub use transport::{MembershipEvent, MembershipTransport, PeerId};

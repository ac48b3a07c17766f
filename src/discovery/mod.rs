//! Service discovery over group membership.
//!
//! Each [`DiscoveryNode`] advertises the ports of its own services to the
//! group named after each service and keeps a table of the endpoints other
//! peers advertise. Advertisements are full port sets (last write wins), so
//! peers converge by gossip without a central registry.

pub mod events;
pub mod message;
mod node;
pub mod peers;
pub mod registry;

pub use events::Occurrence;
pub use message::DiscoveryMessage;
pub use node::{endpoint_to_port, DiscoveryNode, NodeConfig};
pub use peers::{PeerRecord, PeerTable};
pub use registry::ServiceRegistry;

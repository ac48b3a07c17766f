//! Discovery wire messages.
//!
//! Encoded as a protobuf frame whose `oneof payload` tag is the message
//! discriminator:
//!
//! ```text
//! message DiscoveryFrame {
//!   oneof payload {
//!     ServiceRequest request = 1;
//!     ServiceUpdate update = 2;
//!   }
//! }
//! message ServiceRequest { string service = 1; }
//! message ServiceUpdate { string service = 1; repeated uint32 ports = 2; }
//! ```

use std::collections::BTreeSet;

use bytes::Bytes;
use prost::Message;

use crate::{Error, Result};

#[derive(Clone, PartialEq, Message)]
struct DiscoveryFrame {
    #[prost(oneof = "frame::Payload", tags = "1, 2")]
    payload: Option<frame::Payload>,
}

mod frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub(super) enum Payload {
        #[prost(message, tag = "1")]
        Request(super::ServiceRequest),
        #[prost(message, tag = "2")]
        Update(super::ServiceUpdate),
    }
}

#[derive(Clone, PartialEq, Message)]
struct ServiceRequest {
    #[prost(string, tag = "1")]
    service: String,
}

#[derive(Clone, PartialEq, Message)]
struct ServiceUpdate {
    #[prost(string, tag = "1")]
    service: String,
    #[prost(uint32, repeated, tag = "2")]
    ports: Vec<u32>,
}

/// A discovery protocol message.
///
/// An empty `service` means "the group this was shouted to". An update always
/// carries the sender's complete port set for the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    /// Ask the receiver to answer with its `Update` for `service`.
    Request {
        /// Requested service, or empty for the shout group.
        service: String,
    },
    /// The sender's current ports for `service`.
    Update {
        /// Advertised service, or empty for the shout group.
        service: String,
        /// Complete port set.
        ports: BTreeSet<u16>,
    },
}

impl DiscoveryMessage {
    /// Build a request.
    pub fn request(service: impl Into<String>) -> Self {
        Self::Request {
            service: service.into(),
        }
    }

    /// Build an update.
    pub fn update(service: impl Into<String>, ports: impl IntoIterator<Item = u16>) -> Self {
        Self::Update {
            service: service.into(),
            ports: ports.into_iter().collect(),
        }
    }

    /// The service field as sent, possibly empty.
    pub fn service(&self) -> &str {
        match self {
            Self::Request { service } | Self::Update { service, .. } => service,
        }
    }

    /// The service this message is about, falling back to the shout group
    /// when the field is empty.
    pub fn resolve_service<'a>(&'a self, group: Option<&'a str>) -> &'a str {
        match (self.service(), group) {
            ("", Some(group)) => group,
            (service, _) => service,
        }
    }

    /// Decode a message.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let frame = DiscoveryFrame::decode(data)?;
        match frame.payload {
            Some(frame::Payload::Request(req)) => Ok(Self::Request {
                service: req.service,
            }),
            Some(frame::Payload::Update(update)) => {
                let ports = update
                    .ports
                    .into_iter()
                    .map(|p| {
                        u16::try_from(p)
                            .map_err(|_| Error::malformed(format!("port {p} out of range")))
                    })
                    .collect::<Result<BTreeSet<_>>>()?;
                Ok(Self::Update {
                    service: update.service,
                    ports,
                })
            }
            None => Err(Error::malformed("no discovery payload")),
        }
    }

    /// Encode a message.
    pub fn serialize(&self) -> Bytes {
        let payload = match self {
            Self::Request { service } => frame::Payload::Request(ServiceRequest {
                service: service.clone(),
            }),
            Self::Update { service, ports } => frame::Payload::Update(ServiceUpdate {
                service: service.clone(),
                ports: ports.iter().copied().map(u32::from).collect(),
            }),
        };
        Bytes::from(
            DiscoveryFrame {
                payload: Some(payload),
            }
            .encode_to_vec(),
        )
    }
}

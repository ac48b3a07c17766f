//! The discovery node actor.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, debug_span, trace, warn, Instrument};

use super::events::{Command, Occurrence};
use super::message::DiscoveryMessage;
use super::peers::{PeerRecord, PeerTable};
use super::registry::ServiceRegistry;
use crate::actor::{Actor, CommandPipe, EventPipe};
use crate::pipe::{Signal, DEFAULT_CAPACITY};
use crate::reactor::{Handler, Reactor};
use crate::transport::{MembershipEvent, MembershipTransport, PeerId};
use crate::{Error, Result};

/// Node settings.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// High-water mark of the command and occurrence pipes.
    pub pipe_capacity: usize,
    /// Whisper our ports to peers that join a group we offer.
    pub announce_on_join: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            pipe_capacity: DEFAULT_CAPACITY,
            announce_on_join: true,
        }
    }
}

impl NodeConfig {
    /// Set the pipe capacity.
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// Enable or disable announcing to joining peers.
    pub fn with_announce_on_join(mut self, announce: bool) -> Self {
        self.announce_on_join = announce;
        self
    }
}

/// Port part of an endpoint such as `tcp://127.0.0.1:5555`. A bare port is
/// accepted too.
pub fn endpoint_to_port(endpoint: &str) -> Result<u16> {
    let port = endpoint
        .rsplit_once(':')
        .map(|(_, port)| port)
        .unwrap_or(endpoint);
    port.parse()
        .map_err(|_| Error::InvalidEndpoint(endpoint.to_string()))
}

/// A service discovery node.
///
/// Owns a membership transport, the table of known peers and the local
/// service registry inside its own task. Every method is marshaled into that
/// task as a command.
///
/// Occurrences must be drained with [`recv`](Self::recv): once
/// [`NodeConfig::pipe_capacity`] of them are pending the node stops
/// processing until the application catches up.
pub struct DiscoveryNode {
    id: PeerId,
    name: String,
    actor: Actor<Command, Occurrence>,
}

impl std::fmt::Debug for DiscoveryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.actor.state())
            .finish()
    }
}

impl DiscoveryNode {
    /// Start a node with default settings.
    pub async fn start<T: MembershipTransport>(transport: T) -> Result<Self> {
        Self::start_with_config(transport, NodeConfig::default()).await
    }

    /// Start a node. Returns once the transport is started and the node is
    /// processing events.
    ///
    /// A zero [`NodeConfig::pipe_capacity`] fails with
    /// [`Error::InvalidConfig`].
    pub async fn start_with_config<T: MembershipTransport>(
        transport: T,
        config: NodeConfig,
    ) -> Result<Self> {
        let id = transport.id();
        let name = transport.name().to_string();
        let span = debug_span!("discovery", node = %name);
        let capacity = config.pipe_capacity;
        let actor = Actor::<Command, Occurrence>::start_with_capacity(capacity, move |cmd, evt| {
            run_node(transport, config, cmd, evt).instrument(span)
        })
        .await?;
        Ok(Self { id, name, actor })
    }

    /// This node's peer id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// This node's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add and withdraw ports of `service` in one step, then announce the
    /// resulting port set to the service's group.
    pub async fn register_service<A, R>(
        &mut self,
        service: &str,
        added: A,
        removed: R,
    ) -> Result<()>
    where
        A: IntoIterator<Item = u16>,
        R: IntoIterator<Item = u16>,
    {
        self.actor
            .send(Command::RegisterService {
                service: service.to_string(),
                added_ports: added.into_iter().collect(),
                removed_ports: removed.into_iter().collect(),
            })
            .await
    }

    /// Advertise `port` for `service`.
    pub async fn add_service(&mut self, service: &str, port: u16) -> Result<()> {
        self.register_service(service, [port], []).await
    }

    /// Withdraw `port` for `service`.
    pub async fn remove_service(&mut self, service: &str, port: u16) -> Result<()> {
        self.register_service(service, [], [port]).await
    }

    /// Advertise the port of `endpoint` for `service`.
    pub async fn add_service_endpoint(&mut self, service: &str, endpoint: &str) -> Result<()> {
        let port = endpoint_to_port(endpoint)?;
        self.add_service(service, port).await
    }

    /// Withdraw the port of `endpoint` for `service`.
    pub async fn remove_service_endpoint(&mut self, service: &str, endpoint: &str) -> Result<()> {
        let port = endpoint_to_port(endpoint)?;
        self.remove_service(service, port).await
    }

    /// Ask every member of the service's group for its ports.
    pub async fn request_service(&mut self, service: &str) -> Result<()> {
        self.actor
            .send(Command::RequestService {
                service: service.to_string(),
            })
            .await
    }

    /// Ask one peer for its ports of `service`.
    pub async fn request_service_from(&mut self, peer: PeerId, service: &str) -> Result<()> {
        self.actor
            .send(Command::RequestServiceFrom {
                peer,
                service: service.to_string(),
            })
            .await
    }

    /// Peers advertising `service`, each restricted to that service.
    pub async fn get_peers(&mut self, service: &str) -> Result<Vec<PeerRecord>> {
        let (reply, rx) = oneshot::channel();
        self.actor
            .send(Command::Peers {
                service: service.to_string(),
                reply,
            })
            .await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Every known peer with everything it advertises.
    pub async fn get_all_peers(&mut self) -> Result<Vec<PeerRecord>> {
        let (reply, rx) = oneshot::channel();
        self.actor.send(Command::AllPeers { reply }).await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// All known endpoints of `service`.
    pub async fn get_endpoints(&mut self, service: &str) -> Result<BTreeSet<String>> {
        let (reply, rx) = oneshot::channel();
        self.actor
            .send(Command::Endpoints {
                service: service.to_string(),
                reply,
            })
            .await?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Join a group.
    pub async fn join(&mut self, group: &str) -> Result<()> {
        self.actor
            .send(Command::Join {
                group: group.to_string(),
            })
            .await
    }

    /// Leave a group.
    pub async fn leave(&mut self, group: &str) -> Result<()> {
        self.actor
            .send(Command::Leave {
                group: group.to_string(),
            })
            .await
    }

    /// Send `payload` to every member of `group`.
    pub async fn shout(&mut self, group: &str, payload: Bytes) -> Result<()> {
        self.actor
            .send(Command::Shout {
                group: group.to_string(),
                payload,
            })
            .await
    }

    /// Send `payload` to one peer.
    pub async fn whisper(&mut self, peer: PeerId, payload: Bytes) -> Result<()> {
        self.actor.send(Command::Whisper { peer, payload }).await
    }

    /// Next occurrence, or `None` once the node has terminated.
    pub async fn recv(&mut self) -> Result<Option<Occurrence>> {
        loop {
            match self.actor.recv().await? {
                Signal::Payload(occurrence) => return Ok(Some(occurrence)),
                Signal::Term => return Ok(None),
                Signal::Start => trace!("ignoring repeated start"),
            }
        }
    }

    /// Stop the node and its transport.
    ///
    /// With `block`, pending occurrences are discarded and the node's
    /// outcome is returned. Without it, keep calling [`recv`](Self::recv)
    /// until it returns `None`.
    pub async fn stop(&mut self, block: bool) -> Result<()> {
        self.actor.stop(block).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Source {
    Transport,
    Commands,
}

enum Input {
    Membership(MembershipEvent),
    Command(Signal<Command>),
}

async fn run_node<T: MembershipTransport>(
    mut transport: T,
    config: NodeConfig,
    cmd: CommandPipe<Command>,
    evt: EventPipe<Occurrence>,
) -> anyhow::Result<()> {
    let events = transport
        .take_events()
        .ok_or_else(|| Error::transport("membership events already taken"))?;
    transport.start().await?;

    let mut reactor = Reactor::new();
    reactor.register(Source::Transport, events.map(Input::Membership));
    reactor.register(Source::Commands, cmd.into_stream().map(Input::Command));

    let mut node = NodeTask {
        transport,
        config,
        peers: PeerTable::new(),
        registry: ServiceRegistry::new(),
        evt,
    };
    node.evt.send(Signal::Start).await?;
    debug!("node started");

    reactor.run(&mut node).await?;

    debug!("node stopping");
    node.transport.stop().await?;
    Ok(())
}

struct NodeTask<T> {
    transport: T,
    config: NodeConfig,
    peers: PeerTable,
    registry: ServiceRegistry,
    evt: EventPipe<Occurrence>,
}

#[async_trait]
impl<T: MembershipTransport> Handler<Source, Input> for NodeTask<T> {
    async fn handle(
        &mut self,
        reactor: &mut Reactor<Source, Input>,
        key: Source,
        item: Option<Input>,
    ) -> anyhow::Result<()> {
        match (key, item) {
            (_, Some(Input::Membership(event))) => self.on_membership(event).await,
            (_, Some(Input::Command(Signal::Payload(command)))) => self.on_command(command).await,
            (_, Some(Input::Command(Signal::Term))) => {
                debug!("stop requested");
                reactor.clear();
            }
            (_, Some(Input::Command(Signal::Start))) => warn!("unexpected start command"),
            (Source::Transport, None) => warn!("membership transport closed"),
            (Source::Commands, None) => {
                debug!("command pipe closed");
                reactor.clear();
            }
        }
        Ok(())
    }
}

impl<T: MembershipTransport> NodeTask<T> {
    async fn emit(&mut self, occurrence: Occurrence) {
        if self.evt.send(Signal::Payload(occurrence)).await.is_err() {
            trace!("nobody is listening for occurrences");
        }
    }

    async fn emit_service(&mut self, service: &str) {
        let endpoints = self.peers.endpoints(service);
        debug!(service, endpoints = endpoints.len(), "service endpoints changed");
        self.emit(Occurrence::Service {
            service: service.to_string(),
            endpoints,
        })
        .await;
    }

    async fn on_membership(&mut self, event: MembershipEvent) {
        let kind = event.kind();
        let peer = event.peer();
        trace!(kind, peer = %peer.fmt_short(), "membership event");

        match self.apply(&event).await {
            Ok(()) => {}
            Err(Error::UnknownPeer(_)) => {
                warn!(kind, peer = %peer.fmt_short(), "dropping event for unknown peer");
                return;
            }
            Err(Error::MalformedMessage(reason)) => {
                debug!(
                    kind,
                    peer = %peer.fmt_short(),
                    %reason,
                    "ignoring malformed discovery payload"
                );
            }
            Err(e) => {
                warn!(kind, peer = %peer.fmt_short(), "handling membership event failed: {e}")
            }
        }
        self.emit(event.into()).await;
    }

    async fn apply(&mut self, event: &MembershipEvent) -> Result<()> {
        match event {
            MembershipEvent::Enter {
                peer,
                name,
                headers,
                address,
            } => {
                let record = self
                    .peers
                    .enter(*peer, name.clone(), headers.clone(), address.clone());
                let host = record.host_address();
                debug!(peer = %peer.fmt_short(), %name, host, "peer entered");
            }
            MembershipEvent::Exit { peer, .. } => {
                let record = self.peers.exit(peer)?;
                debug!(peer = %peer.fmt_short(), name = %record.name, "peer exited");
                for (service, endpoints) in &record.services {
                    if !endpoints.is_empty() {
                        self.emit_service(service).await;
                    }
                }
            }
            MembershipEvent::Join { peer, group, .. } => {
                self.peers.join(peer, group)?;
                if self.config.announce_on_join && self.registry.offers(group) {
                    trace!(peer = %peer.fmt_short(), %group, "announcing to joining peer");
                    self.send_update(*peer, group).await;
                }
            }
            MembershipEvent::Leave { peer, group, .. } => {
                let withdrawn = self.peers.leave(peer, group)?;
                if !withdrawn.is_empty() {
                    self.emit_service(group).await;
                }
            }
            MembershipEvent::Shout {
                peer, group, payload, ..
            } => self.on_discovery(*peer, Some(group.as_str()), payload).await?,
            MembershipEvent::Whisper { peer, payload, .. } => {
                self.on_discovery(*peer, None, payload).await?
            }
        }
        Ok(())
    }

    async fn on_discovery(
        &mut self,
        peer: PeerId,
        group: Option<&str>,
        payload: &[u8],
    ) -> Result<()> {
        self.peers.get(&peer)?;
        let message = DiscoveryMessage::parse(payload)?;
        let service = message.resolve_service(group).to_string();

        match message {
            DiscoveryMessage::Request { .. } => {
                trace!(peer = %peer.fmt_short(), %service, "answering service request");
                self.send_update(peer, &service).await;
            }
            DiscoveryMessage::Update { ports, .. } => {
                trace!(peer = %peer.fmt_short(), %service, ports = ?ports, "service update");
                self.peers.apply_update(&peer, &service, &ports)?;
                self.emit_service(&service).await;
            }
        }
        Ok(())
    }

    /// Whisper our ports of `service` to `peer`. A failed send is logged and
    /// leaves the peer table untouched.
    async fn send_update(&mut self, peer: PeerId, service: &str) {
        let update = self.registry.update_message(service);
        if let Err(e) = self.transport.whisper(peer, update.serialize()).await {
            warn!(peer = %peer.fmt_short(), %service, "sending service update failed: {e}");
        }
    }

    async fn on_command(&mut self, command: Command) {
        let name = command.name();
        trace!(command = name, "api command");
        if let Err(e) = self.execute(command).await {
            warn!(command = name, "command failed: {e}");
        }
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::RegisterService {
                service,
                added_ports,
                removed_ports,
            } => {
                let ports = self.registry.register(&service, added_ports, removed_ports);
                debug!(%service, ports = ?ports, "local service registered");
                let update = DiscoveryMessage::update(service.as_str(), ports);
                self.transport.shout(&service, update.serialize()).await
            }
            Command::RequestService { service } => {
                self.transport
                    .shout(&service, DiscoveryMessage::request("").serialize())
                    .await
            }
            Command::RequestServiceFrom { peer, service } => {
                self.transport
                    .whisper(peer, DiscoveryMessage::request(service).serialize())
                    .await
            }
            Command::Join { group } => {
                self.transport.join(&group).await?;
                if self.registry.offers(&group) {
                    let update = self.registry.update_message(&group);
                    self.transport.shout(&group, update.serialize()).await?;
                }
                Ok(())
            }
            Command::Leave { group } => self.transport.leave(&group).await,
            Command::Shout { group, payload } => self.transport.shout(&group, payload).await,
            Command::Whisper { peer, payload } => self.transport.whisper(peer, payload).await,
            Command::Peers { service, reply } => {
                let _ = reply.send(self.peers.peers_for(&service));
                Ok(())
            }
            Command::AllPeers { reply } => {
                let _ = reply.send(self.peers.snapshot());
                Ok(())
            }
            Command::Endpoints { service, reply } => {
                let _ = reply.send(self.peers.endpoints(&service));
                Ok(())
            }
        }
    }
}

//! End-to-end discovery between nodes on an in-process network.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::timeout;
use tracing::info;

use service_discovery::discovery::peers::host_address;
use service_discovery::transport::memory::MemoryNetwork;
use service_discovery::{DiscoveryMessage, DiscoveryNode, NodeConfig, Occurrence, PeerId};

/// Receive occurrences until one matches, failing after a few seconds.
async fn wait_for<F>(node: &mut DiscoveryNode, mut matches: F) -> Occurrence
where
    F: FnMut(&Occurrence) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let next = node.recv().await.expect("node pipe");
            match next {
                Some(occurrence) if matches(&occurrence) => return occurrence,
                Some(_) => continue,
                None => panic!("node {} terminated", node.name()),
            }
        }
    })
    .await
    .expect("timed out waiting for occurrence")
}

fn joined(peer: PeerId, wanted: &'static str) -> impl FnMut(&Occurrence) -> bool {
    move |o| matches!(o, Occurrence::Join { peer: p, group, .. } if *p == peer && group == wanted)
}

fn service_is(wanted: BTreeSet<String>) -> impl FnMut(&Occurrence) -> bool {
    move |o| match o {
        Occurrence::Service { service, endpoints } => service == "svc" && *endpoints == wanted,
        _ => false,
    }
}

fn shouted_by(peer: PeerId) -> impl FnMut(&Occurrence) -> bool {
    move |o| matches!(o, Occurrence::Shout { peer: p, .. } if *p == peer)
}

fn whispered_by(peer: PeerId) -> impl FnMut(&Occurrence) -> bool {
    move |o| matches!(o, Occurrence::Whisper { peer: p, .. } if *p == peer)
}

fn entered(peer: PeerId) -> impl FnMut(&Occurrence) -> bool {
    move |o| matches!(o, Occurrence::Enter { peer: p, .. } if *p == peer)
}

fn exited(peer: PeerId) -> impl FnMut(&Occurrence) -> bool {
    move |o| matches!(o, Occurrence::Exit { peer: p, .. } if *p == peer)
}

fn endpoint_set(endpoints: &[String]) -> BTreeSet<String> {
    endpoints.iter().cloned().collect()
}

/// Start two nodes and have both join `svc`, returning them with node2's host.
async fn joined_pair(network: &MemoryNetwork) -> (DiscoveryNode, DiscoveryNode, String) {
    let t1 = network.node("node1");
    let t2 = network.node("node2");
    let host2 = host_address(&t2.address().unwrap()).to_string();

    let mut node1 = DiscoveryNode::start(t1).await.unwrap();
    let mut node2 = DiscoveryNode::start(t2).await.unwrap();
    node1.join("svc").await.unwrap();
    node2.join("svc").await.unwrap();

    let (id1, id2) = (node1.id(), node2.id());
    wait_for(&mut node1, joined(id2, "svc")).await;
    wait_for(&mut node2, joined(id1, "svc")).await;
    (node1, node2, host2)
}

#[test_log::test(tokio::test)]
async fn test_gossip_request_and_withdrawal() {
    let network = MemoryNetwork::new();
    let (mut node1, mut node2, host2) = joined_pair(&network).await;
    let expected = endpoint_set(&[format!("{host2}:5555")]);
    info!(%host2, "nodes joined");

    // gossip
    node2.add_service("svc", 5555).await.unwrap();
    wait_for(&mut node1, service_is(expected.clone())).await;

    let peers = node1.get_peers("svc").await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, node2.id());
    assert_eq!(peers[0].endpoints("svc"), Some(&expected));

    // request and unicast answer
    node1.request_service("svc").await.unwrap();
    let shout = wait_for(&mut node2, shouted_by(node1.id())).await;
    match shout {
        Occurrence::Shout { group, payload, .. } => {
            assert_eq!(group, "svc");
            assert_eq!(DiscoveryMessage::parse(&payload).unwrap(), DiscoveryMessage::request(""));
        }
        other => panic!("unexpected {other:?}"),
    }

    let whisper = wait_for(&mut node1, whispered_by(node2.id())).await;
    match whisper {
        Occurrence::Whisper { payload, .. } => assert_eq!(
            DiscoveryMessage::parse(&payload).unwrap(),
            DiscoveryMessage::update("svc", [5555])
        ),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(node1.get_peers("svc").await.unwrap(), peers);

    // withdrawal
    node2.remove_service("svc", 5555).await.unwrap();
    wait_for(&mut node1, service_is(BTreeSet::new())).await;
    assert!(node1.get_peers("svc").await.unwrap().is_empty());
    let all = node1.get_all_peers().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].endpoints("svc"), Some(&BTreeSet::new()));

    node2.stop(true).await.unwrap();
    node1.stop(true).await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_exit_forgets_peer() {
    let network = MemoryNetwork::new();
    let (mut node1, mut node2, host2) = joined_pair(&network).await;

    node2.add_service_endpoint("svc", "tcp://0.0.0.0:7000").await.unwrap();
    wait_for(&mut node1, service_is(endpoint_set(&[format!("{host2}:7000")]))).await;

    let id2 = node2.id();
    node2.stop(true).await.unwrap();
    wait_for(&mut node1, service_is(BTreeSet::new())).await;
    wait_for(&mut node1, exited(id2)).await;

    assert!(node1.get_peers("svc").await.unwrap().is_empty());
    assert!(node1.get_all_peers().await.unwrap().is_empty());
    assert!(node1.get_endpoints("svc").await.unwrap().is_empty());
    node1.stop(true).await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_bursts_converge_to_net_port_set() {
    let network = MemoryNetwork::new();
    let (mut node1, mut node2, host2) = joined_pair(&network).await;

    node2.add_service("svc", 1).await.unwrap();
    node2.add_service("svc", 2).await.unwrap();
    node2.remove_service("svc", 1).await.unwrap();
    node2.register_service("svc", [3, 4], [2]).await.unwrap();
    node2.add_service("svc", 1).await.unwrap();
    node2.remove_service("svc", 4).await.unwrap();

    let expected = endpoint_set(&[format!("{host2}:1"), format!("{host2}:3")]);
    wait_for(&mut node1, service_is(expected.clone())).await;
    assert_eq!(node1.get_endpoints("svc").await.unwrap(), expected);
}

#[test_log::test(tokio::test)]
async fn test_late_joiner_receives_announcement() {
    let network = MemoryNetwork::new();
    let t1 = network.node("early");
    let host1 = host_address(&t1.address().unwrap()).to_string();
    let mut early = DiscoveryNode::start(t1).await.unwrap();
    early.join("svc").await.unwrap();
    early.add_service("svc", 8080).await.unwrap();

    let mut late = DiscoveryNode::start(network.node("late")).await.unwrap();
    late.join("svc").await.unwrap();

    wait_for(&mut late, service_is(endpoint_set(&[format!("{host1}:8080")]))).await;
    let peers = late.get_peers("svc").await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, early.id());
    assert_eq!(peers[0].name, "early");
}

#[test_log::test(tokio::test)]
async fn test_targeted_request_without_announcements() {
    let network = MemoryNetwork::new();
    let config = NodeConfig::default().with_announce_on_join(false);
    let t1 = network.node("asker");
    let t2 = network.node("offerer");
    let host2 = host_address(&t2.address().unwrap()).to_string();

    let mut offerer = DiscoveryNode::start_with_config(t2, config.clone()).await.unwrap();
    offerer.add_service("svc", 9000).await.unwrap();
    // commands run in order, so the port is registered once this returns
    offerer.get_all_peers().await.unwrap();
    let mut asker = DiscoveryNode::start_with_config(t1, config).await.unwrap();

    let id2 = offerer.id();
    wait_for(&mut asker, entered(id2)).await;
    asker.request_service_from(id2, "svc").await.unwrap();

    wait_for(&mut asker, service_is(endpoint_set(&[format!("{host2}:9000")]))).await;
    assert_eq!(asker.get_peers("svc").await.unwrap().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_non_blocking_stop_drains_to_end() {
    let network = MemoryNetwork::new();
    let (mut node1, mut node2, _) = joined_pair(&network).await;

    node2.stop(false).await.unwrap();
    let drained = timeout(Duration::from_secs(5), async {
        let mut count = 0;
        while node2.recv().await.unwrap().is_some() {
            count += 1;
        }
        count
    })
    .await
    .expect("node2 should terminate");
    info!(drained, "node2 terminated");

    wait_for(&mut node1, exited(node2.id())).await;
    node1.stop(true).await.unwrap();
    assert!(network.is_empty());
}

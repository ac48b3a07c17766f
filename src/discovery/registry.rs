//! The local node's own advertised services.

use std::collections::{BTreeSet, HashMap};

use super::message::DiscoveryMessage;

/// Service name to advertised ports, for services this node offers.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, BTreeSet<u16>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch of changes to `service`: `added` first, then `removed`.
    ///
    /// Returns the resulting port set.
    pub fn register<A, R>(&mut self, service: &str, added: A, removed: R) -> BTreeSet<u16>
    where
        A: IntoIterator<Item = u16>,
        R: IntoIterator<Item = u16>,
    {
        let ports = self.services.entry(service.to_string()).or_default();
        ports.extend(added);
        for port in removed {
            ports.remove(&port);
        }
        let current = ports.clone();
        if current.is_empty() {
            self.services.remove(service);
        }
        current
    }

    /// Advertise one port. Returns `false` if it was already advertised.
    pub fn add(&mut self, service: &str, port: u16) -> bool {
        self.services
            .entry(service.to_string())
            .or_default()
            .insert(port)
    }

    /// Withdraw one port. Returns `false` if it was not advertised.
    pub fn remove(&mut self, service: &str, port: u16) -> bool {
        let Some(ports) = self.services.get_mut(service) else {
            return false;
        };
        let removed = ports.remove(&port);
        if ports.is_empty() {
            self.services.remove(service);
        }
        removed
    }

    /// Current ports for `service`; empty if not offered.
    pub fn ports(&self, service: &str) -> BTreeSet<u16> {
        self.services.get(service).cloned().unwrap_or_default()
    }

    /// Whether `service` has at least one port.
    pub fn offers(&self, service: &str) -> bool {
        self.services.get(service).is_some_and(|p| !p.is_empty())
    }

    /// Names of offered services.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// The `Update` announcing this node's current ports for `service`.
    pub fn update_message(&self, service: &str) -> DiscoveryMessage {
        DiscoveryMessage::update(service, self.ports(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_applies_adds_then_removes() {
        let mut reg = ServiceRegistry::new();
        assert_eq!(reg.register("svc", [1, 2, 3], [2]), BTreeSet::from([1, 3]));
        assert_eq!(reg.register("svc", [4], [1, 4]), BTreeSet::from([3]));
        assert_eq!(reg.ports("svc"), BTreeSet::from([3]));
    }

    #[test]
    fn emptied_service_is_no_longer_offered() {
        let mut reg = ServiceRegistry::new();
        assert!(reg.add("svc", 5555));
        assert!(!reg.add("svc", 5555));
        assert!(reg.offers("svc"));

        assert!(reg.remove("svc", 5555));
        assert!(!reg.remove("svc", 5555));
        assert!(!reg.offers("svc"));
        assert_eq!(reg.services().count(), 0);
        assert!(reg.ports("svc").is_empty());
    }

    #[test]
    fn net_effect_of_interleaved_calls() {
        let mut reg = ServiceRegistry::new();
        let ops: &[(bool, u16)] = &[
            (true, 1),
            (true, 2),
            (false, 1),
            (true, 3),
            (true, 1),
            (false, 3),
        ];
        for &(add, port) in ops {
            if add {
                reg.add("svc", port);
            } else {
                reg.remove("svc", port);
            }
        }
        assert_eq!(reg.ports("svc"), BTreeSet::from([1, 2]));
    }

    #[test]
    fn update_message_carries_full_port_set() {
        let mut reg = ServiceRegistry::new();
        reg.register("svc", [10, 20], []);
        assert_eq!(
            reg.update_message("svc"),
            DiscoveryMessage::update("svc", [10, 20])
        );
        assert_eq!(
            reg.update_message("other"),
            DiscoveryMessage::update("other", [])
        );
    }
}

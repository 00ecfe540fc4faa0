//! Connection tracking from polled device state
//!
//! BlueZ exposes connection and pairing as device properties. The tracker
//! diffs successive polls into the [`ConnectionEvent`]s the bridge consumes.

use std::collections::{BTreeMap, BTreeSet};

use hogp_core::ConnectionEvent;

/// One device as seen by a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub address: String,
    pub connected: bool,
    pub paired: bool,
}

/// Connected devices and whether each is bonded
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    links: BTreeMap<String, bool>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of links currently considered up
    pub fn connected(&self) -> usize {
        self.links.len()
    }

    /// Apply a poll and return the transitions it implies
    pub fn observe(&mut self, devices: &[DeviceStatus]) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();

        for device in devices.iter().filter(|d| d.connected) {
            match self.links.get_mut(&device.address) {
                None => {
                    self.links.insert(device.address.clone(), device.paired);
                    events.push(ConnectionEvent::Connected {
                        address: device.address.clone(),
                        bonded: device.paired,
                    });
                }
                Some(bonded) if !*bonded && device.paired => {
                    *bonded = true;
                    events.push(ConnectionEvent::Bonded {
                        address: device.address.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        let live: BTreeSet<&str> = devices
            .iter()
            .filter(|d| d.connected)
            .map(|d| d.address.as_str())
            .collect();
        let gone: Vec<String> = self
            .links
            .keys()
            .filter(|address| !live.contains(address.as_str()))
            .cloned()
            .collect();
        for address in gone {
            self.links.remove(&address);
            events.push(ConnectionEvent::Disconnected { address });
        }

        events
    }
}

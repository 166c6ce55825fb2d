//! Desired address extraction from container metadata.
//!
//! [`DesiredAddresses`] is the set of IP addresses that should exist as
//! proxy neighbour entries on one parent interface, computed fresh from a
//! container snapshot on every reconciliation run. Addresses are keyed by
//! their canonical textual form, so equivalent literals collapse to one
//! entry and iteration order is stable.

use std::collections::BTreeMap;
use std::net::IpAddr;

use tracing::trace;

use proxyneigh_core::types::ContainerInfo;

// LXD device config keys.
const KEY_TYPE: &str = "type";
const KEY_NICTYPE: &str = "nictype";
const KEY_PARENT: &str = "parent";
const KEY_IPV4_ADDRESS: &str = "ipv4.address";
const KEY_IPV6_ADDRESS: &str = "ipv6.address";

// Device signature this module acts on.
const DEVICE_TYPE_NIC: &str = "nic";
const NICTYPE_IPVLAN: &str = "ipvlan";

/// The address set that should be present on one parent interface.
///
/// Built from all IPVLAN NIC devices of running containers whose declared
/// `parent` matches the target interface (case-insensitive). Discarded
/// after the run completes; nothing is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredAddresses {
    link: String,
    addresses: BTreeMap<String, IpAddr>,
}

impl DesiredAddresses {
    /// Computes the desired address set for `link` from a container snapshot.
    ///
    /// Malformed input never fails: containers without a running init
    /// process, devices with the wrong type/nictype/parent, and address
    /// tokens that do not parse as IP literals all simply contribute
    /// nothing.
    pub fn extract(link: &str, containers: &[ContainerInfo]) -> Self {
        let mut desired = Self {
            link: link.trim().to_owned(),
            addresses: BTreeMap::new(),
        };

        for container in containers {
            // 컨테이너에 init PID가 없으면 건너뜀
            if !container.is_running() {
                continue;
            }

            for (device_name, device) in &container.devices {
                if device.get(KEY_TYPE).map(String::as_str) != Some(DEVICE_TYPE_NIC) {
                    continue;
                }
                if device.get(KEY_NICTYPE).map(String::as_str) != Some(NICTYPE_IPVLAN) {
                    continue;
                }

                // parent 없는 디바이스는 대상이 아님
                let Some(parent) = device.get(KEY_PARENT) else {
                    continue;
                };
                if !desired.link.eq_ignore_ascii_case(parent.trim()) {
                    continue;
                }

                trace!(
                    container = %container.name,
                    device = %device_name,
                    "collecting addresses from ipvlan device"
                );

                // 주소 필드는 패밀리별로 독립적으로 처리
                if let Some(field) = device.get(KEY_IPV4_ADDRESS) {
                    desired.insert_tokens(field);
                }
                if let Some(field) = device.get(KEY_IPV6_ADDRESS) {
                    desired.insert_tokens(field);
                }
            }
        }

        desired
    }

    /// Splits an address field on runs of commas/whitespace and inserts
    /// every token that parses as an IP literal.
    fn insert_tokens(&mut self, field: &str) {
        let tokens = field
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty());

        for token in tokens {
            match token.parse::<IpAddr>() {
                Ok(ip) => {
                    self.addresses.insert(ip.to_string(), ip);
                }
                Err(_) => trace!(token, "ignoring unparseable address token"),
            }
        }
    }

    /// The trimmed target interface name.
    pub fn link(&self) -> &str {
        &self.link
    }

    /// Whether `ip` is in the desired set (by canonical form).
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addresses.contains_key(&ip.to_string())
    }

    /// Number of distinct addresses.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// True when no device contributed any address.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Iterates the addresses in canonical-form order.
    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.addresses.values()
    }
}

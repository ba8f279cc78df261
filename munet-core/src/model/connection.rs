//! Connections (§3) — declared adjacencies that the Link Planner resolves
//! into link endpoints.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::model::constraints::IntfConstraints;

/// One declared adjacency from a node to a network, another node, a host
/// interface, or a physical device.
///
/// Exactly one of `to`, `hostintf`, `physical` should be set; which one
/// determines the connection's kind. `to` is further disambiguated into
/// bridge-attach vs p2p by the Link Planner, which is the only component
/// with enough context (the set of network names) to tell them apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// A network name (bridge-attach) or another node's name (p2p).
    pub to: Option<String>,
    /// An existing host interface to move into the node's netns.
    pub hostintf: Option<String>,
    /// A PCI address of a device to pass through (VM backends only).
    pub physical: Option<String>,

    /// Local interface name; defaults to `eth<i>` by connection position.
    pub name: Option<String>,
    /// Disambiguates duplicate p2p pairs between the same two nodes.
    #[serde(rename = "remote-name")]
    pub remote_name: Option<String>,

    pub ip: Option<IpNetwork>,
    pub mtu: Option<u32>,

    #[serde(rename = "intf-constraints", default)]
    pub constraints: IntfConstraints,
}

impl Connection {
    pub fn kind(&self) -> RawConnectionKind {
        if self.hostintf.is_some() {
            RawConnectionKind::HostBind
        } else if self.physical.is_some() {
            RawConnectionKind::Physical
        } else {
            RawConnectionKind::To
        }
    }
}

/// The connection's kind before the Link Planner resolves `to` against the
/// set of known network/node names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawConnectionKind {
    /// `to` set: resolved by the Link Planner into BridgeAttach or P2p.
    To,
    HostBind,
    Physical,
}

//! Address & Name Allocator (§4.3) — deterministic CIDR/address/name
//! assignment given declaration order.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

use crate::error::MunetError;
use crate::model::{Connection, Network, Node, Topology};

/// One network's allocation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkAllocation {
    pub name: String,
    pub cidr: IpNetwork,
    pub bridge_addr: IpAddr,
}

/// The full allocation table for a run (§6 persisted state layout).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationTable {
    pub networks: Vec<NetworkAllocation>,
    /// node name -> (interface name -> assigned address, if any)
    pub node_ifaces: HashMap<String, HashMap<String, Option<IpNetwork>>>,
}

/// Phase 1 (§4.3): assign CIDRs and bridge addresses to networks in
/// declaration order.
pub fn allocate_networks(
    networks: &[Network],
    autonumber: bool,
    ipv6: bool,
) -> Result<Vec<NetworkAllocation>, MunetError> {
    let mut out = Vec::with_capacity(networks.len());
    for (k, net) in networks.iter().enumerate() {
        let cidr = match &net.ip {
            Some(ip) => *ip,
            None if autonumber => default_cidr_for_index(k, ipv6),
            None => {
                return Err(MunetError::Internal(format!(
                    "network {:?} has no ip and autonumbering is disabled",
                    net.name
                )))
            }
        };
        let bridge_addr = bridge_address(&cidr)?;
        out.push(NetworkAllocation {
            name: net.name.clone(),
            cidr,
            bridge_addr,
        });
    }
    Ok(out)
}

fn default_cidr_for_index(k: usize, ipv6: bool) -> IpNetwork {
    if ipv6 {
        let mut segments = [0u16; 8];
        segments[0] = 0x2001;
        segments[1] = 0x0db8;
        segments[2] = k as u16;
        IpNetwork::V6(
            Ipv6Network::new(Ipv6Addr::from(segments), 64)
                .expect("fixed /64 prefix is always valid"),
        )
    } else {
        let addr = Ipv4Addr::new(10, 0, k as u8, 0);
        IpNetwork::V4(Ipv4Network::new(addr, 24).expect("fixed /24 prefix is always valid"))
    }
}

/// The bridge receives the CIDR's host bits when the user's CIDR has a
/// non-zero host part, else the first usable address (§3 Network).
fn bridge_address(cidr: &IpNetwork) -> Result<IpAddr, MunetError> {
    match cidr {
        IpNetwork::V4(net) => {
            if net.ip() != net.network() {
                Ok(IpAddr::V4(net.ip()))
            } else {
                first_usable_v4(net)
            }
        }
        IpNetwork::V6(net) => {
            if net.ip() != net.network() {
                Ok(IpAddr::V6(net.ip()))
            } else {
                first_usable_v6(net)
            }
        }
    }
}

fn first_usable_v4(net: &Ipv4Network) -> Result<IpAddr, MunetError> {
    let base = u32::from(net.network());
    let candidate = base + 1;
    if candidate >= u32::from(net.broadcast()) {
        return Err(MunetError::AddressExhausted {
            network: net.to_string(),
        });
    }
    Ok(IpAddr::V4(Ipv4Addr::from(candidate)))
}

fn first_usable_v6(net: &Ipv6Network) -> Result<IpAddr, MunetError> {
    let base = u128::from(net.network());
    Ok(IpAddr::V6(Ipv6Addr::from(base + 1)))
}

/// Phase 2 (§4.3): assign interface names and, for bridge-attach
/// connections under autonumbering, host addresses within the owning
/// network's CIDR.
pub fn allocate_node_ifaces(
    nodes: &[Node],
    network_allocs: &[NetworkAllocation],
    autonumber: bool,
) -> Result<HashMap<String, HashMap<String, Option<IpNetwork>>>, MunetError> {
    let net_index: HashMap<&str, &NetworkAllocation> =
        network_allocs.iter().map(|n| (n.name.as_str(), n)).collect();
    let net_names: std::collections::HashSet<&str> =
        network_allocs.iter().map(|n| n.name.as_str()).collect();

    // Per-network host counter: starts at 2 unless the bridge holds the
    // first usable address (then the offset already accounts for it, and
    // the counter starts at the next one).
    let mut counters: HashMap<&str, u128> = HashMap::new();
    for alloc in network_allocs {
        let start = if bridge_holds_first_address(alloc) { 2 } else { 1 };
        counters.insert(alloc.name.as_str(), start);
    }

    let mut result = HashMap::with_capacity(nodes.len());
    for node in nodes {
        let mut used_names: std::collections::HashSet<String> = node
            .connections
            .iter()
            .filter_map(|c| c.name.clone())
            .collect();
        let mut ifaces = HashMap::with_capacity(node.connections.len());

        for (i, conn) in node.connections.iter().enumerate() {
            let ifname = match &conn.name {
                Some(n) => n.clone(),
                None => {
                    let name = next_free_eth_name(i, &used_names);
                    used_names.insert(name.clone());
                    name
                }
            };

            let assigned = assign_iface_address(
                conn,
                &net_index,
                &net_names,
                autonumber,
                &mut counters,
            )?;

            ifaces.insert(ifname, assigned);
        }
        result.insert(node.name.clone(), ifaces);
    }
    Ok(result)
}

fn bridge_holds_first_address(alloc: &NetworkAllocation) -> bool {
    match alloc.cidr {
        IpNetwork::V4(net) => u32::from(alloc_addr_v4(alloc.bridge_addr)) == u32::from(net.network()) + 1,
        IpNetwork::V6(net) => {
            if let (IpAddr::V6(bridge), net_base) = (alloc.bridge_addr, net.network()) {
                u128::from(bridge) == u128::from(net_base) + 1
            } else {
                false
            }
        }
    }
}

fn alloc_addr_v4(addr: IpAddr) -> Ipv4Addr {
    match addr {
        IpAddr::V4(a) => a,
        IpAddr::V6(_) => unreachable!("v4 network implies v4 bridge address"),
    }
}

fn next_free_eth_name(start_index: usize, used: &std::collections::HashSet<String>) -> String {
    let mut i = start_index;
    loop {
        let candidate = format!("eth{i}");
        if !used.contains(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

fn assign_iface_address(
    conn: &Connection,
    net_index: &HashMap<&str, &NetworkAllocation>,
    net_names: &std::collections::HashSet<&str>,
    autonumber: bool,
    counters: &mut HashMap<&str, u128>,
) -> Result<Option<IpNetwork>, MunetError> {
    if conn.ip.is_some() {
        return Ok(conn.ip);
    }
    if !autonumber {
        return Ok(None);
    }
    let Some(target) = conn.to.as_deref() else {
        return Ok(None);
    };
    if !net_names.contains(target) {
        // p2p connection to another node: no address assigned unless the
        // user provided one explicitly (§4.3).
        return Ok(None);
    }

    let alloc = net_index[target];
    let counter = counters.get_mut(target).expect("counter seeded for every network");

    match alloc.cidr {
        IpNetwork::V4(net) => {
            let candidate = u32::from(net.network()) + *counter as u32;
            if candidate >= u32::from(net.broadcast()) {
                return Err(MunetError::AddressExhausted {
                    network: target.to_string(),
                });
            }
            *counter += 1;
            let addr = Ipv4Addr::from(candidate);
            Ok(Some(IpNetwork::V4(
                Ipv4Network::new(addr, net.prefix()).expect("prefix copied from parent network"),
            )))
        }
        IpNetwork::V6(net) => {
            let candidate = u128::from(net.network()) + *counter;
            *counter += 1;
            let addr = Ipv6Addr::from(candidate);
            Ok(Some(IpNetwork::V6(
                Ipv6Network::new(addr, net.prefix()).expect("prefix copied from parent network"),
            )))
        }
    }
}

/// Run both allocation phases for a topology.
pub fn allocate(topology: &Topology, nodes: &[Node]) -> Result<AllocationTable, MunetError> {
    let networks = allocate_networks(
        &topology.networks,
        topology.networks_autonumber,
        topology.ipv6_enable,
    )?;
    let node_ifaces =
        allocate_node_ifaces(nodes, &networks, topology.networks_autonumber)?;
    Ok(AllocationTable {
        networks,
        node_ifaces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Network;

    #[test]
    fn autonumbers_sequential_v4_networks() {
        let nets = vec![
            Network { name: "net0".into(), ip: None },
            Network { name: "net1".into(), ip: None },
        ];
        let allocs = allocate_networks(&nets, true, false).unwrap();
        assert_eq!(allocs[0].cidr.to_string(), "10.0.0.0/24");
        assert_eq!(allocs[0].bridge_addr.to_string(), "10.0.0.1");
        assert_eq!(allocs[1].cidr.to_string(), "10.0.1.0/24");
    }

    #[test]
    fn two_node_bridge_scenario() {
        // Seed scenario 1 from §8: net0 autonumbered, a and b each with one
        // bridge-attach connection, no explicit IPs.
        let nets = vec![Network { name: "net0".into(), ip: None }];
        let allocs = allocate_networks(&nets, true, false).unwrap();
        assert_eq!(allocs[0].bridge_addr.to_string(), "10.0.0.1");

        let mut conn_a = Connection::default();
        conn_a.to = Some("net0".into());
        let mut conn_b = Connection::default();
        conn_b.to = Some("net0".into());

        let node_a = crate::model::Node::from_merge(
            "a".into(),
            1,
            &crate::model::kind::Kind::default(),
            &{
                let mut raw = crate::model::node::RawNode::default();
                raw.connections.push(conn_a);
                raw
            },
        );
        let node_b = crate::model::Node::from_merge(
            "b".into(),
            2,
            &crate::model::kind::Kind::default(),
            &{
                let mut raw = crate::model::node::RawNode::default();
                raw.connections.push(conn_b);
                raw
            },
        );

        let ifaces = allocate_node_ifaces(&[node_a, node_b], &allocs, true).unwrap();
        let a_addr = ifaces["a"]["eth0"].unwrap();
        let b_addr = ifaces["b"]["eth0"].unwrap();
        assert_eq!(a_addr.ip().to_string(), "10.0.0.2");
        assert_eq!(b_addr.ip().to_string(), "10.0.0.3");
    }

    #[test]
    fn determinism_allocating_twice_is_identical() {
        let nets = vec![Network { name: "net0".into(), ip: None }];
        let a1 = allocate_networks(&nets, true, false).unwrap();
        let a2 = allocate_networks(&nets, true, false).unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn exhausted_pool_is_address_exhausted() {
        let nets = vec![Network {
            name: "tiny".into(),
            ip: Some("10.0.0.0/30".parse().unwrap()),
        }];
        let allocs = allocate_networks(&nets, true, false).unwrap();

        let mut conns = Vec::new();
        for _ in 0..3 {
            let mut c = Connection::default();
            c.to = Some("tiny".into());
            conns.push(c);
        }
        let mut raw = crate::model::node::RawNode::default();
        raw.connections = conns;
        let node = crate::model::Node::from_merge(
            "n".into(),
            1,
            &crate::model::kind::Kind::default(),
            &raw,
        );

        let err = allocate_node_ifaces(&[node], &allocs, true).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AddressExhausted);
    }
}

//! Link Planner (§4.4) — turns connections into an ordered list of link
//! endpoints, bridge-attach first, then p2p, then host-bind, then physical.

use std::collections::{HashMap, HashSet};

use ipnetwork::IpNetwork;

use crate::error::MunetError;
use crate::model::connection::RawConnectionKind;
use crate::model::Node;

/// The realised kind of one link endpoint, after resolving `to` against the
/// set of known network/node names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    BridgeAttach,
    P2p,
    HostBind,
    Physical,
}

/// One endpoint of a link, local to a single node (§3 "Link endpoint").
#[derive(Debug, Clone)]
pub struct LinkEndpoint {
    pub kind: LinkKind,
    pub node: String,
    pub ifname: String,
    /// Bridge name for `BridgeAttach`, peer node name for `P2p`, host
    /// interface name for `HostBind`, PCI address for `Physical`.
    pub peer: String,
    /// The matching endpoint's interface name, for `P2p` only.
    pub peer_ifname: Option<String>,
    pub ip: Option<IpNetwork>,
    pub mtu: Option<u32>,
    pub constraints: crate::model::constraints::IntfConstraints,
}

/// The full, ordered link plan for a topology.
#[derive(Debug, Clone, Default)]
pub struct LinkPlan {
    pub endpoints: Vec<LinkEndpoint>,
}

/// Build the ordered link plan (§4.4).
///
/// `node_ifaces` is the allocator's interface-name assignment per node
/// (connection index -> chosen ifname), needed here because names may have
/// been auto-generated.
pub fn plan_links(
    nodes: &[Node],
    network_names: &HashSet<String>,
    node_ifaces: &HashMap<String, HashMap<String, Option<IpNetwork>>>,
) -> Result<LinkPlan, MunetError> {
    let ifname_by_index = resolve_ifnames(nodes, node_ifaces);

    let mut bridge_attach = Vec::new();
    let mut host_bind = Vec::new();
    let mut physical = Vec::new();
    let mut p2p_candidates: Vec<(String, usize, &crate::model::Connection)> = Vec::new();

    for node in nodes {
        for (i, conn) in node.connections.iter().enumerate() {
            let ifname = ifname_by_index[&node.name][i].clone();
            let ip = node_ifaces[&node.name][&ifname];

            match conn.kind() {
                RawConnectionKind::HostBind => {
                    host_bind.push(LinkEndpoint {
                        kind: LinkKind::HostBind,
                        node: node.name.clone(),
                        ifname,
                        peer: conn.hostintf.clone().unwrap_or_default(),
                        peer_ifname: None,
                        ip,
                        mtu: conn.mtu,
                        constraints: conn.constraints.clone(),
                    });
                }
                RawConnectionKind::Physical => {
                    physical.push(LinkEndpoint {
                        kind: LinkKind::Physical,
                        node: node.name.clone(),
                        ifname,
                        peer: conn.physical.clone().unwrap_or_default(),
                        peer_ifname: None,
                        ip,
                        mtu: conn.mtu,
                        constraints: conn.constraints.clone(),
                    });
                }
                RawConnectionKind::To => {
                    let target = conn.to.as_deref().unwrap_or_default();
                    if network_names.contains(target) {
                        bridge_attach.push(LinkEndpoint {
                            kind: LinkKind::BridgeAttach,
                            node: node.name.clone(),
                            ifname,
                            peer: target.to_string(),
                            peer_ifname: None,
                            ip,
                            mtu: conn.mtu,
                            constraints: conn.constraints.clone(),
                        });
                    } else {
                        p2p_candidates.push((node.name.clone(), i, conn));
                    }
                }
            }
        }
    }

    let p2p = resolve_p2p(nodes, &p2p_candidates, &ifname_by_index, node_ifaces)?;

    let mut endpoints = Vec::with_capacity(
        bridge_attach.len() + p2p.len() + host_bind.len() + physical.len(),
    );
    endpoints.extend(bridge_attach);
    endpoints.extend(p2p);
    endpoints.extend(host_bind);
    endpoints.extend(physical);
    Ok(LinkPlan { endpoints })
}

fn resolve_ifnames(
    nodes: &[Node],
    node_ifaces: &HashMap<String, HashMap<String, Option<IpNetwork>>>,
) -> HashMap<String, Vec<String>> {
    // The allocator assigned names but keyed its result by name, not index;
    // recover per-index order the same way it derived names: explicit
    // `name` wins, otherwise the next unused `eth<i>`.
    let mut out = HashMap::with_capacity(nodes.len());
    for node in nodes {
        let available: HashSet<String> = node_ifaces
            .get(&node.name)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        let mut used = HashSet::new();
        let mut names = Vec::with_capacity(node.connections.len());
        for (i, conn) in node.connections.iter().enumerate() {
            let name = match &conn.name {
                Some(n) => n.clone(),
                None => {
                    let mut j = i;
                    loop {
                        let candidate = format!("eth{j}");
                        if available.contains(&candidate) && !used.contains(&candidate) {
                            break candidate;
                        }
                        j += 1;
                    }
                }
            };
            used.insert(name.clone());
            names.push(name);
        }
        out.insert(node.name.clone(), names);
    }
    out
}

fn resolve_p2p(
    nodes: &[Node],
    candidates: &[(String, usize, &crate::model::Connection)],
    ifname_by_index: &HashMap<String, Vec<String>>,
    node_ifaces: &HashMap<String, HashMap<String, Option<IpNetwork>>>,
) -> Result<Vec<LinkEndpoint>, MunetError> {
    let node_names: HashSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
    for (node_name, _, conn) in candidates {
        let target = conn.to.as_deref().unwrap_or_default();
        if !node_names.contains(target) {
            return Err(MunetError::Internal(format!(
                "connection on {node_name:?} targets unknown network or node {target:?}"
            )));
        }
    }

    let mut matched: HashSet<(String, usize)> = HashSet::new();
    let mut endpoints = Vec::new();

    for (a_idx, (a_name, a_conn_idx, a_conn)) in candidates.iter().enumerate() {
        if matched.contains(&(a_name.clone(), *a_conn_idx)) {
            continue;
        }
        let b_name = a_conn.to.clone().unwrap_or_default();
        let a_ifname = ifname_by_index[a_name][*a_conn_idx].clone();

        // Candidates on the peer side declaring `to == a_name`.
        let mut peers: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(b_idx, (b_node, b_conn_idx, b_conn))| {
                *b_idx != a_idx
                    && b_node == &b_name
                    && b_conn.to.as_deref() == Some(a_name.as_str())
                    && !matched.contains(&(b_node.clone(), *b_conn_idx))
            })
            .map(|(b_idx, _)| b_idx)
            .collect();

        // Disambiguate by remote-name if the declaring side set one.
        if let Some(remote_name) = &a_conn.remote_name {
            let by_remote_name: Vec<usize> = peers
                .iter()
                .copied()
                .filter(|&b_idx| {
                    let (_, b_conn_idx, _) = &candidates[b_idx];
                    &ifname_by_index[&b_name][*b_conn_idx] == remote_name
                })
                .collect();
            if !by_remote_name.is_empty() {
                peers = by_remote_name;
            }
        }

        if peers.len() > 1 {
            return Err(MunetError::P2PAmbiguous {
                a: a_name.clone(),
                b: b_name.clone(),
                reason: "multiple unmatched p2p candidates between the same two nodes"
                    .to_string(),
            });
        }
        let Some(b_idx) = peers.into_iter().next() else {
            return Err(MunetError::P2PAmbiguous {
                a: a_name.clone(),
                b: b_name.clone(),
                reason: "no matching peer-side connection found".to_string(),
            });
        };

        let (b_node, b_conn_idx, b_conn) = &candidates[b_idx];
        let b_ifname = ifname_by_index[b_node][*b_conn_idx].clone();

        matched.insert((a_name.clone(), *a_conn_idx));
        matched.insert((b_node.clone(), *b_conn_idx));

        let a_ip = node_ifaces[a_name][&a_ifname];
        let b_ip = node_ifaces[b_node][&b_ifname];

        endpoints.push(LinkEndpoint {
            kind: LinkKind::P2p,
            node: a_name.clone(),
            ifname: a_ifname.clone(),
            peer: b_node.clone(),
            peer_ifname: Some(b_ifname.clone()),
            ip: a_ip,
            mtu: a_conn.mtu,
            constraints: a_conn.constraints.clone(),
        });
        endpoints.push(LinkEndpoint {
            kind: LinkKind::P2p,
            node: b_node.clone(),
            ifname: b_ifname,
            peer: a_name.clone(),
            peer_ifname: Some(a_ifname),
            ip: b_ip,
            mtu: b_conn.mtu,
            constraints: b_conn.constraints.clone(),
        });
    }

    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::kind::Kind;
    use crate::model::node::RawNode;
    use crate::model::Connection;

    fn node_with_conns(name: &str, id: u32, conns: Vec<Connection>) -> Node {
        let mut raw = RawNode::default();
        raw.connections = conns;
        Node::from_merge(name.into(), id, &Kind::default(), &raw)
    }

    #[test]
    fn bridge_attach_ordered_before_p2p() {
        let mut net_conn = Connection::default();
        net_conn.to = Some("net0".into());
        let node_a = node_with_conns("a", 1, vec![net_conn]);

        let mut p2p_a = Connection::default();
        p2p_a.to = Some("c".into());
        let mut p2p_c = Connection::default();
        p2p_c.to = Some("b".into());
        let node_b = node_with_conns("b", 2, vec![p2p_a]);
        let node_c = node_with_conns("c", 3, vec![p2p_c]);

        let mut net_names = HashSet::new();
        net_names.insert("net0".to_string());

        let mut node_ifaces = HashMap::new();
        let mut a_ifaces = HashMap::new();
        a_ifaces.insert("eth0".to_string(), None);
        node_ifaces.insert("a".to_string(), a_ifaces);
        let mut b_ifaces = HashMap::new();
        b_ifaces.insert("eth0".to_string(), None);
        node_ifaces.insert("b".to_string(), b_ifaces);
        let mut c_ifaces = HashMap::new();
        c_ifaces.insert("eth0".to_string(), None);
        node_ifaces.insert("c".to_string(), c_ifaces);

        let plan = plan_links(&[node_a, node_b, node_c], &net_names, &node_ifaces).unwrap();
        assert_eq!(plan.endpoints[0].kind, LinkKind::BridgeAttach);
        assert!(plan.endpoints[1..].iter().all(|e| e.kind == LinkKind::P2p));
        assert_eq!(plan.endpoints.len(), 3);
    }

    #[test]
    fn p2p_disambiguated_by_remote_name() {
        let mut r2_1 = Connection::default();
        r2_1.to = Some("r3".into());
        r2_1.name = Some("p2p1".into());
        r2_1.remote_name = Some("eth1".into());

        let mut r2_2 = Connection::default();
        r2_2.to = Some("r3".into());
        r2_2.name = Some("p2p2".into());
        r2_2.remote_name = Some("eth2".into());

        let mut r3_1 = Connection::default();
        r3_1.to = Some("r2".into());
        r3_1.name = Some("eth1".into());

        let mut r3_2 = Connection::default();
        r3_2.to = Some("r2".into());
        r3_2.name = Some("eth2".into());

        let node_r2 = node_with_conns("r2", 1, vec![r2_1, r2_2]);
        let node_r3 = node_with_conns("r3", 2, vec![r3_1, r3_2]);

        let net_names = HashSet::new();
        let mut node_ifaces = HashMap::new();
        let mut r2_ifaces = HashMap::new();
        r2_ifaces.insert("p2p1".to_string(), None);
        r2_ifaces.insert("p2p2".to_string(), None);
        node_ifaces.insert("r2".to_string(), r2_ifaces);
        let mut r3_ifaces = HashMap::new();
        r3_ifaces.insert("eth1".to_string(), None);
        r3_ifaces.insert("eth2".to_string(), None);
        node_ifaces.insert("r3".to_string(), r3_ifaces);

        let plan = plan_links(&[node_r2, node_r3], &net_names, &node_ifaces).unwrap();
        assert_eq!(plan.endpoints.len(), 4);
        let p2p2 = plan
            .endpoints
            .iter()
            .find(|e| e.ifname == "p2p2")
            .expect("p2p2 endpoint present");
        assert_eq!(p2p2.peer_ifname.as_deref(), Some("eth2"));
    }
}

//! Topology Orchestrator (§4.6, §5) — drives the phase machine, wires
//! links via bridges/veths, supervises node processes, and tears
//! everything down on exit or signal.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::alloc::{self, AllocationTable};
use crate::backend::NodeBackend;
use crate::error::MunetError;
use crate::linkplan::{self, LinkEndpoint, LinkKind, LinkPlan};
use crate::model::{kind, Config, Node};
use crate::state::{RunDir, RunPhase, RunState};
use crate::tc;

/// One resource created during bring-up, recorded so a failure can unwind
/// exactly the resources that reached each prior phase, in reverse order
/// (§4.6 "Failure during bring-up unwinds").
enum Created {
    Bridge(String),
    Veth { host_side: String },
    NodePrepared(String),
}

/// Per-node progress, behind a single mutex shared across the concurrent
/// per-node tasks of a phase (§5 "a single mutex-guarded progress map").
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub phase: HashMap<String, RunPhase>,
}

pub struct Orchestrator {
    run_id: String,
    config: Config,
    nodes: Vec<Node>,
    allocation: AllocationTable,
    plan: LinkPlan,
    backends: HashMap<String, NodeBackend>,
    created: Vec<Created>,
    progress: Arc<Mutex<Progress>>,
}

impl Orchestrator {
    /// Resolve kinds, allocate addresses/names, and plan links (components
    /// B, C, D) for `config`, ready to bring up as `run_id`.
    pub fn new(run_id: String, config: Config) -> Result<Self, MunetError> {
        let nodes = kind::resolve_nodes(&config.topology.nodes, &config.kinds)?;
        let allocation = alloc::allocate(&config.topology, &nodes)?;

        let network_names: std::collections::HashSet<String> = config
            .topology
            .networks
            .iter()
            .map(|n| n.name.clone())
            .collect();
        let plan = linkplan::plan_links(&nodes, &network_names, &allocation.node_ifaces)?;

        let backends = nodes
            .iter()
            .cloned()
            .map(|n| (n.name.clone(), NodeBackend::for_node(n)))
            .collect();

        Ok(Orchestrator {
            run_id,
            config,
            nodes,
            allocation,
            plan,
            backends,
            created: Vec::new(),
            progress: Arc::new(Mutex::new(Progress::default())),
        })
    }

    pub fn run_dir(&self) -> RunDir {
        RunDir::new(self.run_id.clone())
    }

    /// Drive the full phase machine (§4.6). On any phase's failure, rolls
    /// back everything created so far and returns the original error.
    #[instrument(skip(self), fields(run_id = %self.run_id))]
    pub async fn bring_up(&mut self) -> Result<(), MunetError> {
        if let Err(e) = self.networks_up().await {
            self.teardown().await;
            return Err(e);
        }
        if let Err(e) = self.nodes_prepared().await {
            self.teardown().await;
            return Err(e);
        }
        if let Err(e) = self.links_up().await {
            self.teardown().await;
            return Err(e);
        }
        if let Err(e) = self.nodes_running().await {
            self.teardown().await;
            return Err(e);
        }

        let state = RunState::new(self.run_id.clone(), self.config.clone(), self.allocation.clone());
        state.persist(&self.run_dir())?;
        info!("topology brought up");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn networks_up(&mut self) -> Result<(), MunetError> {
        for net_alloc in &self.allocation.networks {
            let bridge = bridge_name(&net_alloc.name);
            create_bridge(&bridge).await?;
            self.created.push(Created::Bridge(bridge.clone()));

            let mtu = self
                .plan
                .endpoints
                .iter()
                .filter(|e| e.kind == LinkKind::BridgeAttach && e.peer == net_alloc.name)
                .filter_map(|e| e.mtu)
                .max();

            set_addr(&bridge, &net_alloc.cidr_with_addr(net_alloc.bridge_addr)).await?;
            if let Some(mtu) = mtu {
                set_mtu(&bridge, mtu).await?;
            }
            set_up(&bridge).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn nodes_prepared(&mut self) -> Result<(), MunetError> {
        let names: Vec<String> = self.backends.keys().cloned().collect();
        let mut tasks = Vec::with_capacity(names.len());
        for name in &names {
            let mut backend = self.backends.remove(name).expect("name came from backends' own keys");
            let name = name.clone();
            tasks.push(async move {
                let result = backend.prepare().await;
                (name, backend, result)
            });
        }
        for (name, backend, result) in join_all(tasks).await {
            self.backends.insert(name.clone(), backend);
            result?;
            self.created.push(Created::NodePrepared(name));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn links_up(&mut self) -> Result<(), MunetError> {
        let endpoints = self.plan.endpoints.clone();
        for endpoint in &endpoints {
            self.realise_endpoint(endpoint).await?;
        }
        for endpoint in &endpoints {
            let backend = self
                .backends
                .get_mut(&endpoint.node)
                .ok_or_else(|| MunetError::Internal(format!("unknown node {:?}", endpoint.node)))?;
            backend.attach_link(endpoint).await?;
            if !endpoint.constraints.is_empty() {
                tc::apply_constraints(&endpoint.node, &endpoint.ifname, &endpoint.constraints).await?;
            }
        }
        Ok(())
    }

    /// Create the kernel-level interface this endpoint needs, before the
    /// backend finalises addressing via `attach_link` (§4.4/§4.5 split of
    /// responsibility).
    async fn realise_endpoint(&mut self, endpoint: &LinkEndpoint) -> Result<(), MunetError> {
        match endpoint.kind {
            LinkKind::BridgeAttach => {
                let bridge = bridge_name(&endpoint.peer);
                let host_side = format!("veth-{}-{}", endpoint.node, endpoint.ifname);
                create_veth_pair(&host_side, &endpoint.ifname).await?;
                self.created.push(Created::Veth { host_side: host_side.clone() });
                move_to_netns(&endpoint.ifname, &endpoint.node).await?;
                enslave_to_bridge(&bridge, &host_side).await?;
                set_up(&host_side).await?;
            }
            LinkKind::P2p => {
                // Only realise the pair once: the declaring side's
                // endpoint (the one the Link Planner emitted first for
                // this pair) creates it; the peer side finds its end
                // already moved into its own namespace.
                if !self.veth_already_created(endpoint) {
                    let a_temp = format!("veth-{}-{}", endpoint.node, endpoint.ifname);
                    let b_temp = endpoint
                        .peer_ifname
                        .clone()
                        .unwrap_or_else(|| format!("veth-{}-peer", endpoint.node));
                    create_veth_pair(&endpoint.ifname, &b_temp).await?;
                    self.created.push(Created::Veth { host_side: endpoint.ifname.clone() });
                    move_to_netns(&endpoint.ifname, &endpoint.node).await?;
                    move_to_netns(&b_temp, &endpoint.peer).await?;
                }
            }
            LinkKind::HostBind => {
                move_to_netns(&endpoint.peer, &endpoint.node).await?;
                rename_iface(&endpoint.peer, &endpoint.ifname, &endpoint.node).await?;
            }
            LinkKind::Physical => {
                // Handled entirely inside the backend (VM passthrough); no
                // kernel-level interface to create here.
            }
        }
        Ok(())
    }

    fn veth_already_created(&self, endpoint: &LinkEndpoint) -> bool {
        self.created.iter().any(|c| matches!(c, Created::Veth { host_side } if host_side == &endpoint.ifname))
    }

    #[instrument(skip(self))]
    async fn nodes_running(&mut self) -> Result<(), MunetError> {
        let names: Vec<String> = self.backends.keys().cloned().collect();
        let mut tasks = Vec::with_capacity(names.len());
        for name in &names {
            let mut backend = self.backends.remove(name).expect("name came from backends' own keys");
            let name = name.clone();
            tasks.push(async move {
                let result = backend.start().await;
                (name, backend, result)
            });
        }
        for (name, backend, result) in join_all(tasks).await {
            self.backends.insert(name, backend);
            result?;
        }
        Ok(())
    }

    /// Best-effort teardown in reverse creation order (§4.6). Never
    /// returns an error: teardown errors are logged only (§7).
    #[instrument(skip(self))]
    pub async fn teardown(&mut self) {
        let mut tasks = Vec::new();
        for (_, backend) in self.backends.iter_mut() {
            tasks.push(backend.cleanup());
        }
        join_all(tasks).await;

        for created in self.created.drain(..).collect::<Vec<_>>().into_iter().rev() {
            match created {
                Created::NodePrepared(_) => {
                    // Namespace deletion already happened inside
                    // backend::cleanup above.
                }
                Created::Veth { host_side } => {
                    if let Err(e) = delete_link(&host_side).await {
                        warn!(iface = %host_side, error = %e, "failed to delete veth");
                    }
                }
                Created::Bridge(bridge) => {
                    if let Err(e) = delete_link(&bridge).await {
                        warn!(bridge = %bridge, error = %e, "failed to delete bridge");
                    }
                }
            }
        }
        info!("teardown complete");
    }

    /// Awaits a shutdown trigger: SIGINT/SIGTERM, or (with no CLI hook
    /// attached) all node processes exiting. Always followed by teardown
    /// (§4.6).
    pub async fn wait_for_shutdown(&mut self) -> Result<(), MunetError> {
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .map_err(MunetError::Io)?;
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .map_err(MunetError::Io)?;

        let fail_on_first_exit = self.config.topology.fail_on_first_exit;

        let mut supervised: FuturesUnordered<_> = self
            .backends
            .iter_mut()
            .filter(|(_, backend)| backend.has_process())
            .map(|(name, backend)| {
                let name = name.clone();
                async move {
                    let result = backend.wait().await;
                    (name, result)
                }
            })
            .collect();
        let had_any_process = !supervised.is_empty();

        // §4.6 exit condition (c): with no supervisable process anywhere,
        // there is nothing to wait on but signals, so this arm never fires.
        let supervise_all = async {
            if !had_any_process {
                std::future::pending::<()>().await;
            }
            let mut first_failure: Option<String> = None;
            while let Some((name, result)) = supervised.next().await {
                match result {
                    Ok(status) => {
                        warn!(node = %name, status = %status, "node process exited");
                        if fail_on_first_exit && !status.success() && first_failure.is_none() {
                            first_failure = Some(name);
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(node = %name, error = %e, "failed to await node process");
                    }
                }
            }
            first_failure
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, tearing down");
                self.teardown().await;
                Err(MunetError::Cancelled)
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, tearing down");
                self.teardown().await;
                Err(MunetError::Cancelled)
            }
            failed = supervise_all => {
                self.teardown().await;
                match failed {
                    Some(node) => Err(MunetError::NodeExited(node)),
                    None => Ok(()),
                }
            }
        }
    }
}

fn bridge_name(network_name: &str) -> String {
    format!("br-{network_name}")
}

async fn run_ip(args: &[String]) -> Result<(), MunetError> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(MunetError::Io)?;
    if !output.status.success() {
        return Err(MunetError::Internal(format!(
            "ip {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

async fn create_bridge(name: &str) -> Result<(), MunetError> {
    run_ip(&["link".into(), "add".into(), "name".into(), name.into(), "type".into(), "bridge".into()]).await
}

async fn create_veth_pair(a: &str, b: &str) -> Result<(), MunetError> {
    run_ip(&[
        "link".into(),
        "add".into(),
        a.into(),
        "type".into(),
        "veth".into(),
        "peer".into(),
        "name".into(),
        b.into(),
    ])
    .await
}

async fn move_to_netns(iface: &str, ns: &str) -> Result<(), MunetError> {
    run_ip(&["link".into(), "set".into(), iface.into(), "netns".into(), ns.into()]).await
}

async fn rename_iface(old: &str, new: &str, ns: &str) -> Result<(), MunetError> {
    if old == new {
        return Ok(());
    }
    run_ip(&["-n".into(), ns.into(), "link".into(), "set".into(), old.into(), "name".into(), new.into()]).await
}

async fn enslave_to_bridge(bridge: &str, iface: &str) -> Result<(), MunetError> {
    run_ip(&["link".into(), "set".into(), iface.into(), "master".into(), bridge.into()]).await
}

async fn set_up(iface: &str) -> Result<(), MunetError> {
    run_ip(&["link".into(), "set".into(), "dev".into(), iface.into(), "up".into()]).await
}

async fn set_mtu(iface: &str, mtu: u32) -> Result<(), MunetError> {
    run_ip(&["link".into(), "set".into(), "dev".into(), iface.into(), "mtu".into(), mtu.to_string()]).await
}

async fn set_addr(iface: &str, cidr: &str) -> Result<(), MunetError> {
    run_ip(&["addr".into(), "add".into(), cidr.into(), "dev".into(), iface.into()]).await
}

async fn delete_link(iface: &str) -> Result<(), MunetError> {
    run_ip(&["link".into(), "del".into(), iface.into()]).await
}

impl crate::alloc::NetworkAllocation {
    fn cidr_with_addr(&self, addr: std::net::IpAddr) -> String {
        format!("{addr}/{}", self.cidr.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Config, Kind, Network, Topology};
    use crate::model::connection::Connection;
    use crate::model::node::RawNode;

    fn two_node_bridge_config() -> Config {
        let mut conn = Connection::default();
        conn.to = Some("net0".into());

        let mut a = RawNode::default();
        a.name = "a".into();
        a.connections = vec![conn.clone()];
        let mut b = RawNode::default();
        b.name = "b".into();
        b.connections = vec![conn];

        Config {
            version: "1".into(),
            kinds: HashMap::<String, Kind>::new(),
            topology: Topology {
                networks: vec![Network { name: "net0".into(), ip: None }],
                nodes: vec![a, b],
                networks_autonumber: true,
                ipv6_enable: false,
                fail_on_first_exit: false,
            },
            cli: vec![],
        }
    }

    #[test]
    fn planning_assigns_scenario_1_addresses() {
        // Seed scenario 1 from §8, the planning half (no kernel mutation):
        // net0 autonumbered to 10.0.0.0/24, a=10.0.0.2, b=10.0.0.3.
        let config = two_node_bridge_config();
        let orchestrator = Orchestrator::new("test-run".into(), config).unwrap();
        assert_eq!(orchestrator.allocation.networks[0].cidr.to_string(), "10.0.0.0/24");
        assert_eq!(orchestrator.allocation.networks[0].bridge_addr.to_string(), "10.0.0.1");
        let a_eth0 = orchestrator.allocation.node_ifaces["a"]["eth0"].unwrap();
        let b_eth0 = orchestrator.allocation.node_ifaces["b"]["eth0"].unwrap();
        assert_eq!(a_eth0.ip().to_string(), "10.0.0.2");
        assert_eq!(b_eth0.ip().to_string(), "10.0.0.3");
        assert_eq!(orchestrator.plan.endpoints.len(), 2);
        assert!(orchestrator.plan.endpoints.iter().all(|e| e.kind == LinkKind::BridgeAttach));
    }

    /// Full bring-up/teardown against the real kernel; needs CAP_NET_ADMIN.
    #[tokio::test]
    #[cfg(feature = "sudo-tests")]
    async fn two_node_bridge_brings_up_and_tears_down() {
        std::env::set_var("MUNET_RUNTIME_DIR", std::env::temp_dir().join("munet-orch-test"));
        let config = two_node_bridge_config();
        let mut orchestrator = Orchestrator::new("orch-test".into(), config).unwrap();
        orchestrator.bring_up().await.expect("bring-up should succeed as root");
        orchestrator.teardown().await;
    }
}

//! Node Backends (§4.5) — a uniform lifecycle contract implemented by
//! [`shell::ShellNode`], [`container::ContainerNode`], and [`qemu::QemuNode`].
//!
//! Per design note in §9 ("Backend polymorphism"), this is modelled as an
//! explicit tagged enum rather than a trait object: the set of backends is
//! closed and known at compile time, so there is no need for dynamic
//! dispatch, and `match`-based dispatch keeps each backend's operation
//! table honest against §4.5's contract.

pub mod container;
pub mod qemu;
pub mod shell;

use nix::sys::signal::Signal;

use crate::error::MunetError;
use crate::linkplan::LinkEndpoint;
use crate::model::Node;

/// Outcome of a transient command run inside a node (`exec`, §4.5).
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// One backend instance bound to a single resolved node.
pub enum NodeBackend {
    Shell(shell::ShellNode),
    Container(container::ContainerNode),
    Qemu(qemu::QemuNode),
}

impl NodeBackend {
    /// Backend selection rule (§4.5): VM if `qemu.kernel` set, else
    /// container if `image` set, else shell-in-namespace.
    pub fn for_node(node: Node) -> NodeBackend {
        match node.backend() {
            crate::model::node::Backend::Qemu => NodeBackend::Qemu(qemu::QemuNode::new(node)),
            crate::model::node::Backend::Container => {
                NodeBackend::Container(container::ContainerNode::new(node))
            }
            crate::model::node::Backend::Shell => NodeBackend::Shell(shell::ShellNode::new(node)),
        }
    }

    pub fn node_name(&self) -> &str {
        match self {
            NodeBackend::Shell(n) => n.node_name(),
            NodeBackend::Container(n) => n.node_name(),
            NodeBackend::Qemu(n) => n.node_name(),
        }
    }

    pub async fn prepare(&mut self) -> Result<(), MunetError> {
        match self {
            NodeBackend::Shell(n) => n.prepare().await,
            NodeBackend::Container(n) => n.prepare().await,
            NodeBackend::Qemu(n) => n.prepare().await,
        }
    }

    pub async fn attach_link(&mut self, endpoint: &LinkEndpoint) -> Result<(), MunetError> {
        match self {
            NodeBackend::Shell(n) => n.attach_link(endpoint).await,
            NodeBackend::Container(n) => n.attach_link(endpoint).await,
            NodeBackend::Qemu(n) => n.attach_link(endpoint).await,
        }
    }

    pub async fn start(&mut self) -> Result<(), MunetError> {
        match self {
            NodeBackend::Shell(n) => n.start().await,
            NodeBackend::Container(n) => n.start().await,
            NodeBackend::Qemu(n) => n.start().await,
        }
    }

    pub async fn exec(&mut self, argv: &[String]) -> Result<ExecOutput, MunetError> {
        match self {
            NodeBackend::Shell(n) => n.exec(argv).await,
            NodeBackend::Container(n) => n.exec(argv).await,
            NodeBackend::Qemu(n) => n.exec(argv).await,
        }
    }

    pub async fn signal(&mut self, sig: Signal) -> Result<(), MunetError> {
        match self {
            NodeBackend::Shell(n) => n.signal(sig).await,
            NodeBackend::Container(n) => n.signal(sig).await,
            NodeBackend::Qemu(n) => n.signal(sig).await,
        }
    }

    pub async fn cleanup(&mut self) {
        match self {
            NodeBackend::Shell(n) => n.cleanup().await,
            NodeBackend::Container(n) => n.cleanup().await,
            NodeBackend::Qemu(n) => n.cleanup().await,
        }
    }

    /// Whether this node has a main process the orchestrator should
    /// supervise (§4.6, §5): a `cmd`-less shell node only holds its
    /// namespace open and is excluded from supervision.
    pub fn has_process(&self) -> bool {
        match self {
            NodeBackend::Shell(n) => n.has_process(),
            NodeBackend::Container(n) => n.has_process(),
            NodeBackend::Qemu(n) => n.has_process(),
        }
    }

    /// Block until this node's main process exits.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, MunetError> {
        match self {
            NodeBackend::Shell(n) => n.wait().await,
            NodeBackend::Container(n) => n.wait().await,
            NodeBackend::Qemu(n) => n.wait().await,
        }
    }
}

/// Build the `ip netns exec <ns> <cmd...>` argv prefix shared by every
/// backend whose process runs inside a network namespace (shell and
/// container backends; VMs use a different mechanism).
pub(crate) fn netns_exec_prefix(ns: &str) -> Vec<String> {
    vec!["netns".to_string(), "exec".to_string(), ns.to_string()]
}

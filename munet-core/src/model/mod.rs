//! The canonical declarative model (§3 DATA MODEL).
//!
//! Types here are the post-parse, pre-resolution representation: what the
//! [`crate::loader`] produces from a config file. [`kind::resolve_nodes`]
//! turns `Config` into fully-resolved [`node::Node`]s.

pub mod command;
pub mod connection;
pub mod constraints;
pub mod kind;
pub mod network;
pub mod node;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use command::CliCommand;
pub use connection::Connection;
pub use constraints::IntfConstraints;
pub use kind::Kind;
pub use network::Network;
pub use node::Node;

/// The root of a parsed configuration file, before kind resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub kinds: HashMap<String, Kind>,

    pub topology: Topology,

    #[serde(default)]
    pub cli: Vec<CliCommand>,
}

fn default_version() -> String {
    "1".to_string()
}

/// `topology` section: the networks and nodes that make up the run, plus
/// global knobs that affect the Allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub networks: Vec<Network>,

    /// Declared in topology order; node IDs are assigned monotonically over
    /// this order when a node has no explicit `id` (§3, §4.3).
    #[serde(default)]
    pub nodes: Vec<node::RawNode>,

    /// If true and a network has no explicit `ip`, the Allocator assigns one
    /// from the `10.0.<k>.0/24` pool (§4.3).
    #[serde(default = "default_true", rename = "networks-autonumber")]
    pub networks_autonumber: bool,

    /// If true, autonumbering and constraint defaults apply to IPv6 as well,
    /// using the `2001:db8:<k>::/64` pool.
    #[serde(default, rename = "ipv6-enable")]
    pub ipv6_enable: bool,

    /// If true, any node's `cmd` exiting non-zero tears the whole topology
    /// down instead of only being logged (§7). Default false: per-node
    /// command failures are logged but otherwise inert.
    #[serde(default, rename = "fail-on-first-exit")]
    pub fail_on_first_exit: bool,
}

fn default_true() -> bool {
    true
}

//! Networks (§3) — Layer-2 broadcast domains realised as Linux bridges.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// A declared network. Same name constraints as a node (§3 invariant 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    /// Explicit CIDR; if absent and `networks-autonumber`, the Allocator
    /// assigns one (§4.3).
    pub ip: Option<IpNetwork>,
}

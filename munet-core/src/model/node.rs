//! Nodes (§3): the raw per-config record and the fully kind-resolved record.

use serde::{Deserialize, Serialize};

use crate::model::connection::Connection;
use crate::model::kind::{
    merge_keyed_list, merge_leaf_list, EnvVar, InitPolicy, Kind, Mount, PodmanExtras,
    QemuSettings, ShellPolicy, Volume,
};

/// A node as written in the config file, before kind resolution. Every
/// property field is optional: absence means "inherit from kind, or the
/// engine default if there is no kind".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNode {
    pub name: String,
    pub kind: Option<String>,
    pub id: Option<u32>,

    pub image: Option<String>,
    pub cmd: Option<String>,
    #[serde(rename = "cleanup-cmd")]
    pub cleanup_cmd: Option<String>,
    pub shell: Option<ShellPolicy>,
    pub init: Option<InitPolicy>,
    pub privileged: Option<bool>,

    #[serde(default, rename = "cap-add")]
    pub cap_add: Vec<String>,
    #[serde(default, rename = "cap-remove")]
    pub cap_remove: Vec<String>,

    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub volumes: Vec<Volume>,

    #[serde(default)]
    pub connections: Vec<Connection>,

    pub podman: Option<PodmanExtras>,
    pub qemu: Option<QemuSettings>,
}

/// Which engine realises this node's process, derived from `image`/`qemu.*`
/// per §4.5's backend selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Shell,
    Container,
    Qemu,
}

/// A node after kind resolution (§4.2): every field fully merged, ready for
/// the Allocator and Link Planner.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub id: u32,

    pub image: Option<String>,
    pub cmd: Option<String>,
    pub cleanup_cmd: Option<String>,
    pub shell: ShellPolicy,
    pub init: InitPolicy,
    pub privileged: bool,

    pub cap_add: Vec<String>,
    pub cap_remove: Vec<String>,

    pub env: Vec<EnvVar>,
    pub mounts: Vec<Mount>,
    pub volumes: Vec<Volume>,

    pub connections: Vec<Connection>,

    pub podman: Option<PodmanExtras>,
    pub qemu: Option<QemuSettings>,
}

/// The key `merge_keyed_list` overrides connections on: `to` (spec.md's
/// explicit override key), falling back to `hostintf`/`physical` for the
/// connection kinds that don't set `to`.
fn connection_key(conn: &Connection) -> String {
    if let Some(to) = &conn.to {
        format!("to:{to}")
    } else if let Some(hostintf) = &conn.hostintf {
        format!("hostintf:{hostintf}")
    } else if let Some(physical) = &conn.physical {
        format!("physical:{physical}")
    } else {
        String::new()
    }
}

impl Node {
    /// Apply §4.2's merge algebra: `base` is the resolved kind (or the
    /// empty default if the node names no kind), `raw` is the node's own
    /// overrides. Fields named in `base.merge` are concatenated; all
    /// others are replaced wholesale when the node sets them.
    pub fn from_merge(name: String, id: u32, base: &Kind, raw: &RawNode) -> Node {
        let merges = |field: &str| base.merge.iter().any(|m| m == field);

        let cap_add = if merges("cap-add") {
            merge_leaf_list(&base.cap_add, &raw.cap_add)
        } else if raw.cap_add.is_empty() {
            base.cap_add.clone()
        } else {
            raw.cap_add.clone()
        };

        let cap_remove = if merges("cap-remove") {
            merge_leaf_list(&base.cap_remove, &raw.cap_remove)
        } else if raw.cap_remove.is_empty() {
            base.cap_remove.clone()
        } else {
            raw.cap_remove.clone()
        };

        let env = if merges("env") {
            merge_keyed_list(&base.env, &raw.env, |e| e.name.clone())
        } else if raw.env.is_empty() {
            base.env.clone()
        } else {
            raw.env.clone()
        };

        let mounts = if merges("mounts") {
            merge_keyed_list(&base.mounts, &raw.mounts, |m| m.destination.clone())
        } else if raw.mounts.is_empty() {
            base.mounts.clone()
        } else {
            raw.mounts.clone()
        };

        let volumes = if merges("volumes") {
            merge_keyed_list(&base.volumes, &raw.volumes, |v| v.destination.clone())
        } else if raw.volumes.is_empty() {
            base.volumes.clone()
        } else {
            raw.volumes.clone()
        };

        // A node with no explicit connections inherits the kind's
        // connections verbatim, even without being named in `merge`
        // (§4.2: "the kind's connections *are* the node's default
        // topology contribution").
        let connections = if merges("connections") {
            merge_keyed_list(&base.connections, &raw.connections, connection_key)
        } else if raw.connections.is_empty() {
            base.connections.clone()
        } else {
            raw.connections.clone()
        };

        Node {
            name,
            id,
            image: raw.image.clone().or_else(|| base.image.clone()),
            cmd: raw.cmd.clone().or_else(|| base.cmd.clone()),
            cleanup_cmd: raw.cleanup_cmd.clone().or_else(|| base.cleanup_cmd.clone()),
            shell: raw.shell.clone().unwrap_or_else(|| base.shell.clone().unwrap_or_default()),
            init: raw.init.clone().unwrap_or_else(|| base.init.clone().unwrap_or_default()),
            privileged: raw.privileged.or(base.privileged).unwrap_or(false),
            cap_add,
            cap_remove,
            env,
            mounts,
            volumes,
            connections,
            podman: raw.podman.clone().or_else(|| base.podman.clone()),
            qemu: raw.qemu.clone().or_else(|| base.qemu.clone()),
        }
    }

    /// Backend selection rule (§4.5): VM if `qemu.kernel` set, else
    /// container if `image` set, else shell-in-namespace.
    pub fn backend(&self) -> Backend {
        if self.qemu.as_ref().and_then(|q| q.kernel.as_ref()).is_some() {
            Backend::Qemu
        } else if self.image.is_some() {
            Backend::Container
        } else {
            Backend::Shell
        }
    }
}

/// Node/network name constraints (§3): unique, `<= 11` chars,
/// `[-A-Za-z0-9_]`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 11
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(is_valid_name("r1"));
        assert!(is_valid_name("node-1_a"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("this-name-is-too-long"));
        assert!(!is_valid_name("bad.name"));
    }

    #[test]
    fn backend_selection_prefers_qemu_over_image() {
        let mut node = Node::from_merge("n".into(), 1, &Kind::default(), &RawNode::default());
        node.image = Some("alpine".into());
        node.qemu = Some(QemuSettings {
            kernel: Some("/boot/vmlinuz".into()),
            ..Default::default()
        });
        assert_eq!(node.backend(), Backend::Qemu);
    }

    #[test]
    fn backend_selection_falls_back_to_shell() {
        let node = Node::from_merge("n".into(), 1, &Kind::default(), &RawNode::default());
        assert_eq!(node.backend(), Backend::Shell);
    }

    #[test]
    fn connections_merge_overrides_by_to_instead_of_duplicating() {
        let kind = Kind {
            connections: vec![Connection {
                to: Some("net0".into()),
                ..Default::default()
            }],
            merge: vec!["connections".into()],
            ..Default::default()
        };
        let raw = RawNode {
            connections: vec![Connection {
                to: Some("net0".into()),
                ip: Some("10.0.0.1/24".parse().unwrap()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let node = Node::from_merge("n".into(), 1, &kind, &raw);
        assert_eq!(node.connections.len(), 1);
        assert_eq!(node.connections[0].ip.unwrap().to_string(), "10.0.0.1/24");
    }

    #[test]
    fn connections_merge_appends_new_to_keys() {
        let kind = Kind {
            connections: vec![Connection {
                to: Some("net0".into()),
                ..Default::default()
            }],
            merge: vec!["connections".into()],
            ..Default::default()
        };
        let raw = RawNode {
            connections: vec![Connection {
                to: Some("net1".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let node = Node::from_merge("n".into(), 1, &kind, &raw);
        assert_eq!(node.connections.len(), 2);
        assert_eq!(node.connections[0].to.as_deref(), Some("net0"));
        assert_eq!(node.connections[1].to.as_deref(), Some("net1"));
    }
}

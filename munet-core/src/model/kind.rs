//! Kind templates and the Kind Resolver (§4.2).
//!
//! A [`Kind`] carries the same property fields as a [`crate::model::node::RawNode`],
//! plus a `merge` list naming which of its list/leaf-list/map fields are
//! concatenated with a node's own values rather than replaced outright.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::MunetError;
use crate::model::node::{Node, RawNode};

/// A shell environment variable. Maps keyed by `name` per §4.2's merge rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// A mount inside the node's mount namespace (§10.7). Maps keyed by
/// `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub readonly: bool,
}

/// A named passthrough to the container backend's `-v` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub destination: String,
}

/// Podman-specific extras, forwarded into the invoked engine's argv without
/// further interpretation (§10.7).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodmanExtras {
    #[serde(default, rename = "extra-cap-add")]
    pub extra_cap_add: Vec<String>,
    #[serde(default, rename = "extra-mounts")]
    pub extra_mounts: Vec<Mount>,
    #[serde(default, rename = "network-mode")]
    pub network_mode: Option<String>,
}

/// QEMU-specific settings, forwarded into `qemu-system-*`'s argv (§10.7).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QemuSettings {
    pub kernel: Option<String>,
    pub disk: Option<String>,
    pub memory: Option<String>,
    pub smp: Option<u32>,
    #[serde(default, rename = "extra-args")]
    pub extra_args: Vec<String>,
}

/// A named template of node properties (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Kind {
    pub image: Option<String>,
    pub cmd: Option<String>,
    #[serde(rename = "cleanup-cmd")]
    pub cleanup_cmd: Option<String>,
    pub shell: Option<ShellPolicy>,
    pub init: Option<InitPolicy>,
    #[serde(default)]
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
    pub connections: Vec<crate::model::connection::Connection>,

    pub podman: Option<PodmanExtras>,
    pub qemu: Option<QemuSettings>,

    /// Names of the list/leaf-list/map fields above that merge with the
    /// node's own values instead of being replaced wholesale.
    #[serde(default)]
    pub merge: Vec<String>,
}

/// Whether the node execs `cmd` through a shell, and which one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShellPolicy {
    Enabled(bool),
    Path(String),
}

impl Default for ShellPolicy {
    fn default() -> Self {
        ShellPolicy::Enabled(false)
    }
}

/// Whether the node's main process runs under an init/reaper wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitPolicy {
    Enabled(bool),
    Path(String),
}

impl Default for InitPolicy {
    fn default() -> Self {
        InitPolicy::Enabled(false)
    }
}

/// Resolve every node in `raw_nodes` against `kinds`, in topology
/// (declaration) order, assigning monotonic IDs to nodes without an
/// explicit `id` (§3, §4.3).
pub fn resolve_nodes(
    raw_nodes: &[RawNode],
    kinds: &HashMap<String, Kind>,
) -> Result<Vec<Node>, MunetError> {
    let mut next_id = 1u32;
    let mut used_ids = std::collections::HashSet::new();
    for raw in raw_nodes {
        if let Some(id) = raw.id {
            if !used_ids.insert(id) {
                return Err(MunetError::NameCollision(format!("node id {id}")));
            }
        }
    }

    let mut resolved = Vec::with_capacity(raw_nodes.len());
    for raw in raw_nodes {
        let name = &raw.name;

        let base = match &raw.kind {
            Some(kind_name) => kinds
                .get(kind_name)
                .ok_or_else(|| MunetError::UnknownKind {
                    node: name.clone(),
                    kind: kind_name.clone(),
                })?
                .clone(),
            None => Kind::default(),
        };

        let id = match raw.id {
            Some(id) => id,
            None => {
                while used_ids.contains(&next_id) {
                    next_id += 1;
                }
                used_ids.insert(next_id);
                let id = next_id;
                next_id += 1;
                id
            }
        };

        resolved.push(Node::from_merge(name.clone(), id, &base, raw));
    }
    Ok(resolved)
}

/// Concatenate `kind` then `node` entries for a leaf-list field that is not
/// keyed (plain merge, order preserved).
pub(crate) fn merge_leaf_list<T: Clone>(kind: &[T], node: &[T]) -> Vec<T> {
    let mut out = kind.to_vec();
    out.extend(node.iter().cloned());
    out
}

/// Merge a map-like list keyed by `key_of`: node entries override kind
/// entries sharing a key (in kind order), then new node keys are appended.
pub(crate) fn merge_keyed_list<T, K, F>(kind: &[T], node: &[T], key_of: F) -> Vec<T>
where
    T: Clone,
    K: Eq + std::hash::Hash,
    F: Fn(&T) -> K,
{
    let node_keys: HashMap<K, &T> = node.iter().map(|e| (key_of(e), e)).collect();
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<T> = Vec::with_capacity(kind.len() + node.len());
    for k in kind {
        let key = key_of(k);
        if let Some(n) = node_keys.get(&key) {
            out.push((*n).clone());
        } else {
            out.push(k.clone());
        }
        seen.insert(key);
    }
    for n in node {
        let key = key_of(n);
        if !seen.contains(&key) {
            out.push(n.clone());
            seen.insert(key);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_list_concatenates_kind_then_node() {
        let kind = vec!["a".to_string(), "b".to_string()];
        let node = vec!["c".to_string()];
        assert_eq!(merge_leaf_list(&kind, &node), vec!["a", "b", "c"]);
    }

    #[test]
    fn keyed_list_overrides_and_appends() {
        let kind = vec![
            EnvVar { name: "A".into(), value: "1".into() },
            EnvVar { name: "C".into(), value: "3".into() },
        ];
        let node = vec![EnvVar { name: "A".into(), value: "override".into() }];
        let merged = merge_keyed_list(&kind, &node, |e| e.name.clone());
        assert_eq!(
            merged,
            vec![
                EnvVar { name: "A".into(), value: "override".into() },
                EnvVar { name: "C".into(), value: "3".into() },
            ]
        );
    }

    #[test]
    fn keyed_list_appends_new_node_keys() {
        let kind = vec![EnvVar { name: "A".into(), value: "1".into() }];
        let node = vec![EnvVar { name: "B".into(), value: "2".into() }];
        let merged = merge_keyed_list(&kind, &node, |e| e.name.clone());
        assert_eq!(
            merged,
            vec![
                EnvVar { name: "A".into(), value: "1".into() },
                EnvVar { name: "B".into(), value: "2".into() },
            ]
        );
    }
}

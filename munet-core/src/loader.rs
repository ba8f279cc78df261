//! Config Loader (§4.1): probes `<stem>.{json,yaml,toml}` in that priority,
//! parses, and validates against a pluggable schema validator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::MunetError;
use crate::model::Config;
use crate::validate::ConfigValidator;

const PROBE_EXTENSIONS: &[&str] = &["json", "yaml", "toml"];
const CONFIG_PATH_ENV: &str = "MUNET_CONFIG_PATH";

/// Resolve `stem_or_path` to a concrete config file.
///
/// If `stem_or_path` already names an existing file, it is used as-is.
/// Otherwise each of `.json`, `.yaml`, `.toml` is probed in turn against
/// `stem_or_path` itself and, for a relative stem, against each directory
/// named in `$MUNET_CONFIG_PATH` (colon-separated, first match wins; §6
/// "Respects a `MUNET_*` namespace for path overrides").
pub fn resolve_path(stem_or_path: &Path) -> Result<PathBuf, MunetError> {
    if stem_or_path.is_file() {
        return Ok(stem_or_path.to_path_buf());
    }

    let mut stems = vec![stem_or_path.to_path_buf()];
    if stem_or_path.is_relative() {
        if let Ok(search_path) = std::env::var(CONFIG_PATH_ENV) {
            for dir in std::env::split_paths(&search_path) {
                stems.push(dir.join(stem_or_path));
            }
        }
    }

    let mut probed = Vec::with_capacity(stems.len() * PROBE_EXTENSIONS.len());
    for stem in &stems {
        for ext in PROBE_EXTENSIONS {
            let candidate = stem.with_extension(ext);
            if candidate.is_file() {
                return Ok(candidate);
            }
            probed.push(candidate);
        }
    }

    Err(MunetError::ConfigNotFound {
        stem: stem_or_path.to_path_buf(),
        probed,
    })
}

/// Parse the raw document at `path` into a [`serde_json::Value`], dispatching
/// on file extension. All three formats deserialize into the same model, so
/// equivalence is structural.
fn parse_raw(path: &Path, contents: &str) -> Result<serde_json::Value, MunetError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "json" => serde_json::from_str(contents)
            .map_err(|e| MunetError::Internal(format!("invalid JSON in {path:?}: {e}"))),
        "yaml" | "yml" => serde_yaml::from_str(contents)
            .map_err(|e| MunetError::Internal(format!("invalid YAML in {path:?}: {e}"))),
        "toml" => {
            let value: toml::Value = toml::from_str(contents)
                .map_err(|e| MunetError::Internal(format!("invalid TOML in {path:?}: {e}")))?;
            serde_json::to_value(value)
                .map_err(|e| MunetError::Internal(format!("TOML->JSON conversion failed: {e}")))
        }
        other => Err(MunetError::Internal(format!(
            "unrecognised config extension {other:?} for {path:?}"
        ))),
    }
}

/// Load and validate the config at `stem_or_path`, returning the canonical
/// in-memory model on success.
pub fn load(
    stem_or_path: &Path,
    validator: &dyn ConfigValidator,
) -> Result<Config, MunetError> {
    let path = resolve_path(stem_or_path)?;
    let contents = std::fs::read_to_string(&path)?;
    let document = parse_raw(&path, &contents)?;

    validator
        .validate(&document)
        .map_err(MunetError::ConfigInvalid)?;

    let config: Config = serde_json::from_value(document)
        .map_err(|e| MunetError::Internal(format!("model deserialisation failed: {e}")))?;

    check_cross_field_invariants(&config)?;
    Ok(config)
}

/// Invariants not expressible in JSON Schema alone (§3 invariant 7, name
/// uniqueness across nodes and networks).
fn check_cross_field_invariants(config: &Config) -> Result<(), MunetError> {
    let mut names: HashMap<&str, ()> = HashMap::new();
    for net in &config.topology.networks {
        if names.insert(net.name.as_str(), ()).is_some() {
            return Err(MunetError::NameCollision(net.name.clone()));
        }
        if !crate::model::node::is_valid_name(&net.name) {
            return Err(MunetError::ConfigInvalid(vec![crate::validate::ValidationError {
                pointer: format!("/topology/networks/{}", net.name),
                message: "network name must be <=11 chars of [-A-Za-z0-9_]".to_string(),
            }]));
        }
    }
    for node in &config.topology.nodes {
        if names.insert(node.name.as_str(), ()).is_some() {
            return Err(MunetError::NameCollision(node.name.clone()));
        }
        if !crate::model::node::is_valid_name(&node.name) {
            return Err(MunetError::ConfigInvalid(vec![crate::validate::ValidationError {
                pointer: format!("/topology/nodes/{}", node.name),
                message: "node name must be <=11 chars of [-A-Za-z0-9_]".to_string(),
            }]));
        }
    }

    let mut constraint_errors = Vec::new();
    for node in &config.topology.nodes {
        for (i, conn) in node.connections.iter().enumerate() {
            if conn.constraints.is_empty() {
                continue;
            }
            let pointer = format!("/topology/nodes/{}/connections/{i}/intf-constraints", node.name);
            constraint_errors.extend(crate::validate::check_constraint_invariants(
                &pointer,
                &conn.constraints,
            ));
        }
    }
    // A kind's connections are a node's default topology contribution
    // (§4.2), so an invalid constraint on one is just as reachable as an
    // invalid one declared directly on a node.
    for (kind_name, kind) in &config.kinds {
        for (i, conn) in kind.connections.iter().enumerate() {
            if conn.constraints.is_empty() {
                continue;
            }
            let pointer = format!("/kinds/{kind_name}/connections/{i}/intf-constraints");
            constraint_errors.extend(crate::validate::check_constraint_invariants(
                &pointer,
                &conn.constraints,
            ));
        }
    }
    if !constraint_errors.is_empty() {
        return Err(MunetError::ConfigInvalid(constraint_errors));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::NullValidator;
    use std::io::Write;

    fn write_tmp(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn probes_json_before_yaml_before_toml() {
        let dir = tempfile::tempdir().unwrap();
        write_tmp(&dir, "munet.yaml", "topology: {}\n");
        write_tmp(&dir, "munet.json", r#"{"topology": {}}"#);
        let stem = dir.path().join("munet");
        let resolved = resolve_path(&stem).unwrap();
        assert_eq!(resolved.extension().unwrap(), "json");
    }

    #[test]
    fn missing_config_is_config_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("munet");
        let err = resolve_path(&stem).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigNotFound);
    }

    #[test]
    fn loads_minimal_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(
            &dir,
            "munet.json",
            r#"{"topology": {"networks": [], "nodes": []}}"#,
        );
        let config = load(&path, &NullValidator).unwrap();
        assert_eq!(config.version, "1");
        assert!(config.topology.networks.is_empty());
    }

    #[test]
    fn duplicate_node_and_network_name_is_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(
            &dir,
            "munet.json",
            r#"{"topology": {"networks": [{"name": "a"}], "nodes": [{"name": "a"}]}}"#,
        );
        let err = load(&path, &NullValidator).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NameCollision);
    }

    #[test]
    fn orphaned_jitter_on_a_kind_connection_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_tmp(
            &dir,
            "munet.json",
            r#"{
                "kinds": {
                    "router": {
                        "connections": [
                            {"to": "net0", "intf-constraints": {"jitter": "5ms"}}
                        ]
                    }
                },
                "topology": {"networks": [{"name": "net0"}], "nodes": [{"name": "r1", "kind": "router"}]}
            }"#,
        );
        let err = load(&path, &NullValidator).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigInvalid);
    }
}

//! Persisted state layout (§6): one directory per run under the runtime
//! directory (`$MUNET_RUNTIME_DIR`, default `/var/run/munet`), holding the
//! resolved config, the allocation table, and per-node log files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::alloc::AllocationTable;
use crate::error::MunetError;
use crate::model::Config;

const DEFAULT_RUNTIME_DIR: &str = "/var/run/munet";
const RUNTIME_DIR_ENV: &str = "MUNET_RUNTIME_DIR";

/// The resolved location of a single run's on-disk state.
#[derive(Debug, Clone)]
pub struct RunDir {
    pub run_id: String,
    pub root: PathBuf,
}

impl RunDir {
    pub fn new(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let base = std::env::var(RUNTIME_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_RUNTIME_DIR));
        RunDir {
            root: base.join(&run_id),
            run_id,
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(format!("{}.state", self.run_id))
    }

    pub fn config_json(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn allocation_json(&self) -> PathBuf {
        self.root.join("allocation.json")
    }

    pub fn node_stdout(&self, node_name: &str) -> PathBuf {
        self.root.join(format!("{node_name}.out"))
    }

    pub fn node_stderr(&self, node_name: &str) -> PathBuf {
        self.root.join(format!("{node_name}.err"))
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(format!("{}.log", self.run_id))
    }

    fn ensure_dir(&self) -> Result<(), MunetError> {
        std::fs::create_dir_all(&self.root).map_err(MunetError::Io)
    }
}

/// A run's full persisted state, as written to `<run-id>.state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub phase: RunPhase,
    pub config: Config,
    pub allocation: AllocationTable,
}

/// Mirrors §4.6's phase machine, persisted so `--cleanup-only` can resume a
/// previous run without re-deriving where it got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Planned,
    NetworksUp,
    NodesPrepared,
    LinksUp,
    NodesRunning,
    Teardown,
    Done,
}

impl RunState {
    pub fn new(run_id: String, config: Config, allocation: AllocationTable) -> Self {
        RunState {
            run_id,
            phase: RunPhase::Planned,
            config,
            allocation,
        }
    }

    pub fn persist(&self, dir: &RunDir) -> Result<(), MunetError> {
        dir.ensure_dir()?;
        let state_json = serde_json::to_vec_pretty(self)
            .map_err(|e| MunetError::Internal(format!("failed to serialise run state: {e}")))?;
        std::fs::write(dir.state_file(), state_json)?;

        let config_json = serde_json::to_vec_pretty(&self.config)
            .map_err(|e| MunetError::Internal(format!("failed to serialise config: {e}")))?;
        std::fs::write(dir.config_json(), config_json)?;

        let alloc_json = serde_json::to_vec_pretty(&self.allocation)
            .map_err(|e| MunetError::Internal(format!("failed to serialise allocation: {e}")))?;
        std::fs::write(dir.allocation_json(), alloc_json)?;
        Ok(())
    }

    pub fn load(dir: &RunDir) -> Result<Self, MunetError> {
        let contents = std::fs::read_to_string(dir.state_file())?;
        serde_json::from_str(&contents)
            .map_err(|e| MunetError::Internal(format!("failed to parse run state: {e}")))
    }
}

/// List the run IDs with persisted state under the runtime directory.
pub fn list_runs(runtime_dir: Option<&Path>) -> Result<Vec<String>, MunetError> {
    let base = match runtime_dir {
        Some(p) => p.to_path_buf(),
        None => std::env::var(RUNTIME_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_RUNTIME_DIR)),
    };
    if !base.is_dir() {
        return Ok(Vec::new());
    }
    let mut runs = Vec::new();
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                runs.push(name.to_string());
            }
        }
    }
    runs.sort();
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Topology;

    #[test]
    fn run_dir_paths_are_scoped_to_run_id() {
        std::env::set_var(RUNTIME_DIR_ENV, "/tmp/munet-test-runtime");
        let dir = RunDir::new("run-42");
        assert_eq!(dir.state_file(), PathBuf::from("/tmp/munet-test-runtime/run-42/run-42.state"));
        assert_eq!(dir.node_stdout("r1"), PathBuf::from("/tmp/munet-test-runtime/run-42/r1.out"));
    }

    #[test]
    fn persist_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var(RUNTIME_DIR_ENV, tmp.path());
        let dir = RunDir::new("run-1");

        let config = Config {
            version: "1".into(),
            kinds: Default::default(),
            topology: Topology {
                networks: vec![],
                nodes: Default::default(),
                networks_autonumber: true,
                ipv6_enable: false,
                fail_on_first_exit: false,
            },
            cli: vec![],
        };
        let state = RunState::new("run-1".into(), config, AllocationTable::default());
        state.persist(&dir).unwrap();

        let loaded = RunState::load(&dir).unwrap();
        assert_eq!(loaded.run_id, "run-1");
        assert_eq!(loaded.phase, RunPhase::Planned);
    }
}

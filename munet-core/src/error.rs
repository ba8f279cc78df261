//! Error taxonomy for the topology realisation engine.
//!
//! Every fallible operation in this crate returns [`MunetError`] (or a
//! concern-specific error that converts into it via `#[from]`). The CLI maps
//! `kind()` to the process exit codes from the external interface contract.

use std::path::PathBuf;

use crate::validate::ValidationError;

pub type Result<T> = std::result::Result<T, MunetError>;

/// The error kinds named by the engine's error taxonomy.
///
/// `MunetError` variants map 1:1 onto this enum via [`MunetError::kind`];
/// the enum exists separately so callers can match on kind without caring
/// about payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigNotFound,
    ConfigInvalid,
    UnknownKind,
    NameCollision,
    AddressExhausted,
    P2PAmbiguous,
    BackendUnavailable,
    PermissionDenied,
    LinkExists,
    IfaceNotFound,
    StartFailed,
    ExecFailed,
    NotRunning,
    NodeExited,
    Cancelled,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum MunetError {
    #[error("no config file found for stem {stem:?} (probed {probed:?})")]
    ConfigNotFound { stem: PathBuf, probed: Vec<PathBuf> },

    #[error("config is invalid: {} error(s)", .0.len())]
    ConfigInvalid(Vec<ValidationError>),

    #[error("node {node:?} references unknown kind {kind:?}")]
    UnknownKind { node: String, kind: String },

    #[error("name collision: {0:?} is used more than once")]
    NameCollision(String),

    #[error("address pool exhausted for network {network:?}")]
    AddressExhausted { network: String },

    #[error("ambiguous p2p connection between {a:?} and {b:?}: {reason}")]
    P2PAmbiguous { a: String, b: String, reason: String },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("link already exists: {0}")]
    LinkExists(String),

    #[error("interface not found: {0}")]
    IfaceNotFound(String),

    #[error("failed to start node {node:?}: {reason}")]
    StartFailed { node: String, reason: String },

    #[error("exec failed in node {node:?}: {reason}")]
    ExecFailed { node: String, reason: String },

    #[error("node {0:?} is not running")]
    NotRunning(String),

    #[error("node {0:?} exited non-zero with fail-on-first-exit enabled")]
    NodeExited(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),
}

impl MunetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MunetError::ConfigNotFound { .. } => ErrorKind::ConfigNotFound,
            MunetError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            MunetError::UnknownKind { .. } => ErrorKind::UnknownKind,
            MunetError::NameCollision(_) => ErrorKind::NameCollision,
            MunetError::AddressExhausted { .. } => ErrorKind::AddressExhausted,
            MunetError::P2PAmbiguous { .. } => ErrorKind::P2PAmbiguous,
            MunetError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            MunetError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            MunetError::LinkExists(_) => ErrorKind::LinkExists,
            MunetError::IfaceNotFound(_) => ErrorKind::IfaceNotFound,
            MunetError::StartFailed { .. } => ErrorKind::StartFailed,
            MunetError::ExecFailed { .. } => ErrorKind::ExecFailed,
            MunetError::NotRunning(_) => ErrorKind::NotRunning,
            MunetError::NodeExited(_) => ErrorKind::NodeExited,
            MunetError::Cancelled => ErrorKind::Cancelled,
            MunetError::Internal(_) | MunetError::Io(_) | MunetError::Netlink(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Process exit code per the external interface contract.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::ConfigNotFound | ErrorKind::UnknownKind | ErrorKind::NameCollision => 2,
            ErrorKind::ConfigInvalid => 3,
            ErrorKind::PermissionDenied => 4,
            ErrorKind::BackendUnavailable => 5,
            ErrorKind::AddressExhausted
            | ErrorKind::P2PAmbiguous
            | ErrorKind::LinkExists
            | ErrorKind::IfaceNotFound
            | ErrorKind::StartFailed
            | ErrorKind::ExecFailed
            | ErrorKind::NotRunning
            | ErrorKind::NodeExited
            | ErrorKind::Internal => 6,
            ErrorKind::Cancelled => 130,
        }
    }
}

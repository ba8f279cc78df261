//! munet-core: the topology realisation and lifecycle engine.
//!
//! This crate is both a library and the engine behind the `munet` driver
//! binary. The entry point is [`Munet`], which loads a config, resolves
//! it, and drives the phase machine in [`orchestrator`].

pub mod alloc;
pub mod backend;
pub mod error;
pub mod linkplan;
pub mod loader;
pub mod model;
pub mod numfmt;
pub mod orchestrator;
pub mod registry;
pub mod state;
pub mod tc;
pub mod validate;

use std::path::Path;

use tracing::{info, instrument};
use tracing_subscriber::{fmt, EnvFilter};

pub use error::{ErrorKind, MunetError, Result};
pub use model::Config;
pub use orchestrator::Orchestrator;

/// Top-level handle to one run of the engine, analogous to the teacher's
/// `Dune` struct: owns the resolved config and drives bring-up/teardown.
pub struct Munet {
    orchestrator: Orchestrator,
}

impl Munet {
    /// Install a `tracing-subscriber` `fmt` layer honouring `RUST_LOG`/
    /// `MUNET_LOG`, writing to stdout and, if `log_file` is given, also to
    /// a non-blocking rolling appender (§10.1).
    pub fn init_logging(log_file: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
        let filter = EnvFilter::try_from_env("MUNET_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));

        match log_file {
            Some(path) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let file_name = path
                    .file_name()
                    .map(|f| f.to_string_lossy().to_string())
                    .unwrap_or_else(|| "munet.log".to_string());
                let appender = tracing_appender::rolling::never(dir, file_name);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stdout.and(non_blocking))
                    .init();
                Some(guard)
            }
            None => {
                fmt().with_env_filter(filter).init();
                None
            }
        }
    }

    /// Load, validate, and resolve `config_path` into a runnable
    /// orchestrator for `run_id`.
    #[instrument(skip(validator))]
    pub fn new(
        run_id: String,
        config_path: &Path,
        validator: &dyn validate::ConfigValidator,
    ) -> Result<Self> {
        let config = loader::load(config_path, validator)?;
        let orchestrator = Orchestrator::new(run_id, config)?;
        Ok(Munet { orchestrator })
    }

    /// Bring the topology up, then idle until a shutdown trigger, then
    /// tear down (§4.6's full phase machine).
    pub async fn run(&mut self) -> Result<()> {
        self.orchestrator.bring_up().await?;
        let shutdown = self.orchestrator.wait_for_shutdown().await;
        match shutdown {
            Ok(()) => Ok(()),
            Err(MunetError::Cancelled) => {
                info!("shutdown complete");
                Err(MunetError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// Bring the topology up and return without waiting for shutdown
    /// (`--topology-only`, §6).
    pub async fn bring_up_only(&mut self) -> Result<()> {
        self.orchestrator.bring_up().await
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }
}

/// Tear down a previously named run without reloading its config from a
/// fresh config file (`--cleanup-only <RUN_ID>`, §6).
pub async fn cleanup_only(run_id: &str) -> Result<()> {
    let dir = state::RunDir::new(run_id.to_string());
    let run_state = state::RunState::load(&dir)?;
    let mut orchestrator = Orchestrator::new(run_id.to_string(), run_state.config)?;
    orchestrator.teardown().await;
    Ok(())
}

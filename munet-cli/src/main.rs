//! `munet`: the standalone driver for the topology realisation engine.
//!
//! Must be run with `CAP_SYS_ADMIN` (typically via `sudo`); see §6.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use munet_core::validate::{JsonSchemaValidator, NullValidator};
use munet_core::{cleanup_only, Munet};

/// Build and run a declarative network topology.
#[derive(Debug, Parser)]
#[command(name = "munet", version)]
struct Cli {
    /// Path or stem to the config file (probes .json/.yaml/.toml).
    #[arg(short, long, value_name = "PATH", default_value = "munet")]
    config: PathBuf,

    /// Log level (error/warn/info/debug/trace); overrides MUNET_LOG.
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Disable the interactive CLI hook REPL.
    #[arg(long)]
    no_interactive: bool,

    /// Build the topology, then idle without starting the CLI hook REPL.
    #[arg(long)]
    topology_only: bool,

    /// Tear down a previously named run and exit.
    #[arg(long, value_name = "RUN_ID")]
    cleanup_only: Option<String>,

    /// Path to a JSON schema document to validate the config against.
    /// Without one, validation is skipped (NullValidator).
    #[arg(long, value_name = "PATH")]
    schema: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(level) = &cli.log_level {
        std::env::set_var("MUNET_LOG", level);
    }
    let _guard = Munet::init_logging(None);

    match run(cli).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            // `.context(...)` wraps the original error, so the exit-code-
            // bearing `MunetError` may not be the chain's top frame; walk
            // the whole chain to find it.
            if let Some(munet_err) = err.chain().find_map(|e| e.downcast_ref::<munet_core::MunetError>()) {
                eprintln!("error: {err:#}");
                ExitCode::from(munet_err.exit_code() as u8)
            } else {
                eprintln!("error: {err:#}");
                ExitCode::from(6)
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(run_id) = &cli.cleanup_only {
        cleanup_only(run_id)
            .await
            .context("cleanup-only run failed")?;
        return Ok(());
    }

    let run_id = format!("run-{}", std::process::id());

    let validator: Box<dyn munet_core::validate::ConfigValidator> = match &cli.schema {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading schema {path:?}"))?;
            let schema: serde_json::Value =
                serde_json::from_str(&contents).context("parsing schema JSON")?;
            Box::new(
                JsonSchemaValidator::compile(&schema)
                    .map_err(|e| anyhow::anyhow!("compiling schema: {e}"))?,
            )
        }
        None => Box::new(NullValidator),
    };

    let mut munet = Munet::new(run_id, &cli.config, validator.as_ref())
        .map_err(anyhow::Error::from)
        .context("loading config")?;

    if cli.topology_only {
        munet.bring_up_only().await.map_err(anyhow::Error::from)?;
        return Ok(());
    }

    // The interactive CLI hook REPL is an external collaborator per §1's
    // scope note; `--no-interactive` and the default path both reduce to
    // the engine's own bring-up/steady-state/teardown contract here.
    let _ = cli.no_interactive;
    munet.run().await.map_err(anyhow::Error::from)
}

//! Pre-flight steps executed before either child is spawned.
//!
//! Two steps, both driven by configuration: provisioning the shared
//! database file, and an optional patch command. The patch step exists
//! because one deployment variant still rewrites the database layer before
//! launch; whether that is required is deployment-specific, so it is off
//! unless configured.

use anyhow::{Context, Result, bail};
use tokio::process::Command;
use tracing::{debug, info};

use homewatt_core::Config;
use homewatt_core::provision::provision_database;

/// Run all configured pre-flight steps, in order: database provisioning,
/// then the optional patch command.
pub async fn run(config: &Config) -> Result<()> {
    if config.preflight.skip_provision {
        info!("Skipping database provisioning");
    } else {
        provision_database(&config.database.path).with_context(|| {
            format!(
                "failed to provision database file {}",
                config.database.path.display()
            )
        })?;
    }

    if let Some(command) = &config.preflight.patch_command {
        run_patch_command(command).await?;
    }

    Ok(())
}

/// Execute the configured patch command, failing on a non-zero status.
async fn run_patch_command(command: &[String]) -> Result<()> {
    let (program, args) = command
        .split_first()
        .context("pre-flight patch command is empty")?;
    let cmd_line = command.join(" ");
    info!("Running pre-flight patch command");
    debug!("exec: {cmd_line}");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("failed to execute: {cmd_line}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pre-flight patch command failed (exit {}): {stderr}",
            output.status
        );
    }
    Ok(())
}

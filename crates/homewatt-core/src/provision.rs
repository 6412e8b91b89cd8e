//! Database file provisioning.
//!
//! The worker and server both open the same SQLite file; neither runs as a
//! user guaranteed to own it. Before either child starts, the supervisor
//! makes sure the file exists and is world-writable. The schema itself is
//! created by the children -- this module never executes SQL.

use std::fs::{self, OpenOptions};
use std::path::Path;

use tracing::{debug, info};

use crate::error::Result;

/// Permission bits applied to the database file.
pub const DB_FILE_MODE: u32 = 0o666;

/// Ensure the database file exists and is world-writable.
///
/// Creates the parent directory and the file if missing. Idempotent: an
/// existing file is left untouched apart from its permission bits.
pub fn provision_database(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // Opens the file without truncating so existing data survives restarts.
    let existed = path.exists();
    OpenOptions::new().write(true).create(true).open(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(DB_FILE_MODE))?;
    }

    if existed {
        debug!(path = %path.display(), "Database file already present");
    } else {
        info!(path = %path.display(), "Provisioned database file");
    }
    Ok(())
}

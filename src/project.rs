//! Project files: the connections and record types of a workspace.

use crate::connections::ConnectionDescriptor;
use crate::error::{LedgerError, Result};
use crate::record_types::RecordTypeDescriptor;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Current project file version.
pub const PROJECT_VERSION: u32 = 1;

/// Everything a project persists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub connections: Vec<ConnectionDescriptor>,
    #[serde(default)]
    pub record_types: Vec<RecordTypeDescriptor>,
}

fn current_version() -> u32 {
    PROJECT_VERSION
}

impl ProjectSnapshot {
    pub fn new(
        connections: Vec<ConnectionDescriptor>,
        record_types: Vec<RecordTypeDescriptor>,
    ) -> Self {
        Self {
            version: PROJECT_VERSION,
            connections,
            record_types,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let snapshot: Self = serde_json::from_str(&text)?;
        if snapshot.version > PROJECT_VERSION {
            return Err(LedgerError::UnsupportedFormat(format!(
                "project version {}",
                snapshot.version
            )));
        }
        info!(
            path = %path.as_ref().display(),
            connections = snapshot.connections.len(),
            record_types = snapshot.record_types.len(),
            "project loaded"
        );
        Ok(snapshot)
    }

    /// Write the project, holding an exclusive lock on a sibling lock file
    /// so two writers cannot interleave.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let lock_file = acquire_lock(path)?;

        // Write to a temp file then rename so readers never see half a file.
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)?;

        lock_file.unlock()?;
        info!(path = %path.display(), "project saved");
        Ok(())
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

fn acquire_lock(path: &Path) -> Result<File> {
    let lock_path = lock_path(path);
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;

    lock_file
        .try_lock_exclusive()
        .map_err(|_| LedgerError::Locked(lock_path.display().to_string()))?;

    Ok(lock_file)
}

//! Durable PID registry: flat `name=pid` store with self-healing lookups
//!
//! The registry is the crash-recovery anchor for the supervisor: a record
//! exists exactly while a process by that name is believed to be running.
//! Writes are write-through and crash-safe via write-to-temp + fsync +
//! rename, so a host crash immediately after a start still leaves the PID
//! on disk. Reads tolerate unknown keys and a missing file.
//!
//! Any I/O error on the backing store is logged and treated as "no record"
//! so a broken store never blocks a fresh start.

use crate::{process, CoreError, Result};
use schema::executable_name;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// File name of the PID store inside the data directory
pub const PID_FILE_NAME: &str = "frpc_pid.properties";

const FILE_HEADER: &str = "# frpwarden process records";

/// Durable name -> PID mapping
///
/// The registry is the sole writer of its backing file. Entries are kept
/// as raw strings so keys this version does not understand survive a
/// rewrite untouched.
#[derive(Debug)]
pub struct PidRegistry {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl PidRegistry {
    /// Open the registry backed by `<data_dir>/frpc_pid.properties`
    ///
    /// A missing or unreadable file yields an empty registry.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join(PID_FILE_NAME);
        let entries = match load_entries(&path) {
            Ok(entries) => {
                if !entries.is_empty() {
                    debug!("Loaded {} record(s) from {}", entries.len(), path.display());
                }
                entries
            }
            Err(e) => {
                warn!("Failed to load PID records from {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Record the PID for a named process, persisting immediately
    pub fn record(&self, name: &str, pid: u32) -> Result<()> {
        let mut entries = self.entries.lock().expect("pid registry lock poisoned");
        entries.insert(name.to_string(), pid.to_string());
        persist(&self.path, &entries)?;
        info!("Recorded pid {} for process '{}'", pid, name);
        Ok(())
    }

    /// Remove the record for a named process, persisting immediately
    ///
    /// A second call for the same name is a no-op.
    pub fn clear(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("pid registry lock poisoned");
        if entries.remove(name).is_none() {
            return Ok(());
        }
        persist(&self.path, &entries)?;
        info!("Cleared pid record for process '{}'", name);
        Ok(())
    }

    /// Return the recorded PID without probing the OS
    ///
    /// A malformed value is reported as absent.
    pub fn peek(&self, name: &str) -> Option<u32> {
        let entries = self.entries.lock().expect("pid registry lock poisoned");
        let raw = entries.get(name)?;
        match raw.parse::<u32>() {
            Ok(pid) => Some(pid),
            Err(_) => {
                warn!("Invalid pid record for '{}': {}", name, raw);
                None
            }
        }
    }

    /// Return the recorded PID only if that process is still alive
    ///
    /// A record whose process no longer exists is stale; it is cleared as
    /// a side effect and absence is returned, so callers never have to
    /// garbage-collect entries themselves. A probe error is treated
    /// conservatively as "not running".
    pub fn check(&self, name: &str) -> Option<u32> {
        let pid = self.peek(name)?;
        match process::pid_alive(pid, &executable_name(name)) {
            Ok(true) => {
                info!("Process '{}' (pid {}) is still running", name, pid);
                Some(pid)
            }
            Ok(false) => {
                debug!("Stale pid record for '{}' (pid {}), clearing", name, pid);
                if let Err(e) = self.clear(name) {
                    warn!("Failed to clear stale record for '{}': {}", name, e);
                }
                None
            }
            Err(e) => {
                warn!("{}; treating '{}' as not running", e, name);
                if let Err(e) = self.clear(name) {
                    warn!("Failed to clear record for '{}': {}", name, e);
                }
                None
            }
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse the flat key-value file, skipping comments and unknown junk
fn load_entries(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = fs::read_to_string(path).map_err(|e| {
        CoreError::PersistenceFailure(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let mut entries = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(entries)
}

/// Atomically rewrite the backing file from the in-memory entries
///
/// Write JSON-free flat text to a temp file in the same directory, fsync,
/// rename over the destination, then best-effort fsync the directory.
fn persist(path: &Path, entries: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            CoreError::PersistenceFailure(format!(
                "Failed to create {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let tmp_path = path.with_extension("properties.tmp");
    let mut body = String::from(FILE_HEADER);
    body.push('\n');
    for (key, value) in entries {
        body.push_str(key);
        body.push('=');
        body.push_str(value);
        body.push('\n');
    }

    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| {
                CoreError::PersistenceFailure(format!(
                    "Failed to open {}: {}",
                    tmp_path.display(),
                    e
                ))
            })?;
        f.write_all(body.as_bytes()).map_err(|e| {
            CoreError::PersistenceFailure(format!(
                "Failed to write {}: {}",
                tmp_path.display(),
                e
            ))
        })?;
        let _ = f.sync_all();
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        CoreError::PersistenceFailure(format!(
            "Failed to replace {} with {}: {}",
            path.display(),
            tmp_path.display(),
            e
        ))
    })?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

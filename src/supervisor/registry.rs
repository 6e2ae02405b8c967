//! Process registry
//!
//! Every supervisor records its own pid and its workers' pids so that a
//! separate `flotilla clear` can abort a stuck run. The file is shared by
//! every run on the machine, so each update holds an exclusive `flock` on a
//! sidecar `.lock` file for its whole read-modify-write.

use chrono::{DateTime, Utc};
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::process;

/// Registry failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to access pid registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pid registry {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },
}

/// Persistent set of pids belonging to flotilla runs
pub trait ProcessRegistry {
    fn register(&mut self, pid: u32) -> Result<(), RegistryError>;
    fn unregister(&mut self, pid: u32) -> Result<(), RegistryError>;
    fn list(&self) -> Result<Vec<u32>, RegistryError>;
    fn terminate(&mut self, pid: u32) -> Result<(), RegistryError>;
}

/// One registered process
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidEntry {
    pub pid: u32,
    pub registered_at: DateTime<Utc>,
}

/// JSON pid file
#[derive(Clone, Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<runtime dir>/flotilla/pids.json`, falling back to the cache dir
    /// and then the temp dir
    pub fn default_location() -> Self {
        let base = dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(std::env::temp_dir);
        Self::new(base.join("flotilla").join("pids.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<PidEntry>, RegistryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    /// Run `update` on the current entries while holding the file lock.
    /// `update` returns whether the entries changed and need storing.
    fn update<F>(&self, update: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Vec<PidEntry>) -> bool,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
            .map_err(|e| self.io_error(e))?;
        // Released when dropped
        let _lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| self.io_error(errno.into()))?;

        let mut entries = self.entries()?;
        if update(&mut entries) {
            self.store(&entries)?;
        }
        Ok(())
    }

    fn store(&self, entries: &[PidEntry]) -> Result<(), RegistryError> {
        let content = serde_json::to_string_pretty(entries).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        // Write-then-rename so a concurrent reader never sees half a file
        let staging = self.path.with_extension(format!("json.{}", process::current_pid()));
        fs::write(&staging, content).map_err(|e| self.io_error(e))?;
        fs::rename(&staging, &self.path).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ProcessRegistry for PidFile {
    fn register(&mut self, pid: u32) -> Result<(), RegistryError> {
        self.update(|entries| {
            if entries.iter().any(|e| e.pid == pid) {
                return false;
            }
            entries.push(PidEntry {
                pid,
                registered_at: Utc::now(),
            });
            true
        })?;
        debug!(pid, path = %self.path.display(), "Registered process");
        Ok(())
    }

    fn unregister(&mut self, pid: u32) -> Result<(), RegistryError> {
        self.update(|entries| {
            let before = entries.len();
            entries.retain(|e| e.pid != pid);
            entries.len() != before
        })?;
        debug!(pid, "Unregistered process");
        Ok(())
    }

    fn list(&self) -> Result<Vec<u32>, RegistryError> {
        Ok(self.entries()?.into_iter().map(|e| e.pid).collect())
    }

    fn terminate(&mut self, pid: u32) -> Result<(), RegistryError> {
        match process::abort(pid) {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(pid, "Process already gone");
                Ok(())
            }
            Err(source) => Err(RegistryError::Signal { pid, source }),
        }
    }
}

/// Abort every registered process except `own`, then forget it. Returns
/// the number of processes signalled.
pub fn clear(registry: &mut dyn ProcessRegistry, own: u32) -> Result<usize, RegistryError> {
    let mut signalled = 0;
    for pid in registry.list()? {
        if pid == own {
            continue;
        }
        match registry.terminate(pid) {
            Ok(()) => signalled += 1,
            Err(e) => warn!(error = %e, "Failed to abort process"),
        }
        registry.unregister(pid)?;
    }
    info!(signalled, "Cleared registered processes");
    Ok(signalled)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::BTreeSet;

    /// In-memory registry that records terminations instead of signalling
    #[derive(Debug, Default)]
    pub struct FakeRegistry {
        pub pids: BTreeSet<u32>,
        pub terminated: Vec<u32>,
    }

    impl ProcessRegistry for FakeRegistry {
        fn register(&mut self, pid: u32) -> Result<(), RegistryError> {
            self.pids.insert(pid);
            Ok(())
        }

        fn unregister(&mut self, pid: u32) -> Result<(), RegistryError> {
            self.pids.remove(&pid);
            Ok(())
        }

        fn list(&self) -> Result<Vec<u32>, RegistryError> {
            Ok(self.pids.iter().copied().collect())
        }

        fn terminate(&mut self, pid: u32) -> Result<(), RegistryError> {
            self.terminated.push(pid);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeRegistry;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pid_file_register_and_unregister() {
        let dir = tempdir().unwrap();
        let mut registry = PidFile::new(dir.path().join("nested").join("pids.json"));
        assert!(registry.list().unwrap().is_empty());

        registry.register(100).unwrap();
        registry.register(200).unwrap();
        registry.register(100).unwrap();
        assert_eq!(registry.list().unwrap(), vec![100, 200]);

        let entries = registry.entries().unwrap();
        assert!(entries.iter().all(|e| e.registered_at <= Utc::now()));

        registry.unregister(100).unwrap();
        registry.unregister(999).unwrap();
        assert_eq!(registry.list().unwrap(), vec![200]);
    }

    #[test]
    fn test_concurrent_registrations_are_all_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pids.json");

        let handles: Vec<_> = (0..8u32)
            .map(|thread| {
                let mut registry = PidFile::new(&path);
                std::thread::spawn(move || {
                    for n in 0..20 {
                        registry.register(thread * 1000 + n).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let registry = PidFile::new(&path);
        assert_eq!(registry.list().unwrap().len(), 160);

        let handles: Vec<_> = (0..8u32)
            .map(|thread| {
                let mut registry = PidFile::new(&path);
                std::thread::spawn(move || {
                    for n in (0..20).step_by(2) {
                        registry.unregister(thread * 1000 + n).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let left = registry.list().unwrap();
        assert_eq!(left.len(), 80);
        assert!(left.iter().all(|pid| pid % 2 == 1));
    }

    #[test]
    fn test_default_location() {
        let registry = PidFile::default_location();
        assert!(registry.path().ends_with("flotilla/pids.json"));
    }

    #[test]
    fn test_corrupt_pid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pids.json");
        fs::write(&path, "not json").unwrap();

        let registry = PidFile::new(&path);
        assert!(matches!(registry.list(), Err(RegistryError::Corrupt { .. })));
    }

    #[test]
    fn test_clear_skips_own_pid_and_forgets_the_rest() {
        let mut registry = FakeRegistry::default();
        for pid in [10, 20, 30] {
            registry.register(pid).unwrap();
        }

        let signalled = clear(&mut registry, 20).unwrap();
        assert_eq!(signalled, 2);
        assert_eq!(registry.terminated, vec![10, 30]);
        assert_eq!(registry.list().unwrap(), vec![20]);
    }

    #[test]
    fn test_clear_aborts_real_processes() {
        let dir = tempdir().unwrap();
        let mut registry = PidFile::new(dir.path().join("pids.json"));
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        registry.register(child.id()).unwrap();

        assert_eq!(clear(&mut registry, process::current_pid()).unwrap(), 1);
        assert!(!child.wait().unwrap().success());
        assert!(registry.list().unwrap().is_empty());
    }
}

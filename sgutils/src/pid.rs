use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Verrou d'instance unique matérialisé par un fichier PID.
///
/// `acquire()` échoue si un autre processus vivant détient déjà le fichier.
/// Un fichier laissé par un processus mort est récupéré silencieusement.
/// Le fichier est supprimé au `drop` s'il contient toujours notre PID.
pub struct PidLock {
    path: PathBuf,
    pid: u32,
}

impl PidLock {
    /// Emplacement par défaut : `$XDG_RUNTIME_DIR/spyglass.pid`,
    /// sinon le répertoire temporaire du système.
    pub fn default_path() -> PathBuf {
        let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
        dir.join("spyglass.pid")
    }

    /// Retourne le PID du démon en cours d'exécution, s'il y en a un.
    pub fn running_pid() -> Option<u32> {
        Self::running_pid_at(&Self::default_path())
    }

    pub fn running_pid_at(path: &Path) -> Option<u32> {
        let text = fs::read_to_string(path).ok()?;
        let pid = text.trim().parse::<u32>().ok()?;
        if process_alive(pid) { Some(pid) } else { None }
    }

    /// Prend le verrou à l'emplacement par défaut.
    pub fn acquire() -> Result<Self> {
        Self::acquire_at(Self::default_path())
    }

    /// Prend le verrou au chemin donné.
    ///
    /// Échoue si le fichier désigne un processus encore vivant.
    pub fn acquire_at(path: PathBuf) -> Result<Self> {
        if let Some(pid) = Self::running_pid_at(&path) {
            bail!("another instance is already running (pid {})", pid);
        }
        if path.exists() {
            debug!("reclaiming stale pid file {:?}", path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create runtime directory {:?}", parent))?;
        }
        let pid = std::process::id();
        fs::write(&path, format!("{}\n", pid))
            .with_context(|| format!("cannot write pid file {:?}", path))?;
        debug!("pid file {:?} acquired (pid {})", path, pid);
        Ok(Self { path, pid })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Ne supprimer le fichier que s'il nous appartient encore.
        match fs::read_to_string(&self.path) {
            Ok(s) if s.trim().parse::<u32>().ok() == Some(self.pid) => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!("cannot remove pid file {:?}: {}", self.path, e);
                }
            }
            _ => {}
        }
    }
}

fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let mut system = System::new_all();
    system.refresh_all();
    system.process(Pid::from_u32(pid)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_own_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spyglass.pid");
        let lock = PidLock::acquire_at(path.clone()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim().parse::<u32>().unwrap(), std::process::id());
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spyglass.pid");
        let _lock = PidLock::acquire_at(path.clone()).unwrap();
        assert!(PidLock::acquire_at(path).is_err());
    }

    #[test]
    fn test_stale_file_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spyglass.pid");
        // PID au-delà de pid_max, ne peut désigner aucun processus vivant.
        fs::write(&path, "4294967294\n").unwrap();
        let lock = PidLock::acquire_at(path.clone()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim().parse::<u32>().unwrap(), std::process::id());
        drop(lock);
    }

    #[test]
    fn test_running_pid_reports_live_process() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("spyglass.pid");
        assert_eq!(PidLock::running_pid_at(&path), None);
        let _lock = PidLock::acquire_at(path.clone()).unwrap();
        assert_eq!(PidLock::running_pid_at(&path), Some(std::process::id()));
    }
}

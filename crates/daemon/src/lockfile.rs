//! Singleton-discovery lockfile (spec §4.5, §6).
//!
//! On bind, the daemon atomically writes a JSON lockfile recording `pid`,
//! `port`, `bind_address`, a freshly generated bearer `token`, and
//! `started_at`. Clients discover the running daemon by reading this file
//! and treat it as stale if the recorded `pid` is not alive.
//!
//! Liveness is checked two ways: an `fs2` advisory lock held on the file
//! for the life of the process (a second daemon trying to start finds the
//! lock already held and refuses), and a `pid`-alive probe for clients
//! that only ever read the file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// The on-disk lockfile contract (spec §6): `{pid, port, bind_address,
/// token, started_at}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lockfile {
    pub pid: u32,
    pub port: u16,
    pub bind_address: String,
    pub token: String,
    pub started_at: DateTime<Utc>,
}

/// A held lockfile: the parsed contents plus the open file handle whose
/// `fs2` exclusive lock must stay alive for the daemon's lifetime.
pub struct LockfileHandle {
    pub lockfile: Lockfile,
    path: PathBuf,
    file: File,
}

impl LockfileHandle {
    /// Acquire the lockfile at `path`, generating a fresh 32-byte auth
    /// token. Fails if another live process already holds the advisory
    /// lock on this file.
    pub fn acquire(path: &Path, port: u16, bind_address: &str) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("opening lockfile {}: {e}", path.display()))?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!("another muxd daemon instance is already running (lockfile {} is held)", path.display())
        })?;

        let lockfile = Lockfile {
            pid: std::process::id(),
            port,
            bind_address: bind_address.to_owned(),
            token: generate_token(),
            started_at: Utc::now(),
        };

        write_contents(&file, &lockfile)?;
        tracing::info!(path = %path.display(), pid = lockfile.pid, port, "lockfile acquired");

        Ok(Self { lockfile, path: path.to_owned(), file })
    }

    pub fn token(&self) -> &str {
        &self.lockfile.token
    }
}

impl Drop for LockfileHandle {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lockfile on shutdown");
        } else {
            tracing::info!(path = %self.path.display(), "lockfile removed");
        }
    }
}

fn write_contents(mut file: &File, lockfile: &Lockfile) -> anyhow::Result<()> {
    file.set_len(0)?;
    use std::io::Seek;
    file.seek(std::io::SeekFrom::Start(0))?;
    let json = serde_json::to_string_pretty(lockfile)?;
    file.write_all(json.as_bytes())?;
    file.flush()?;
    Ok(())
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Read a lockfile at `path` without acquiring it, for client-side
/// discovery. Returns `None` if the file is missing, malformed, or its
/// `pid` is not alive.
pub fn read_live(path: &Path) -> Option<Lockfile> {
    let raw = fs::read_to_string(path).ok()?;
    let lockfile: Lockfile = serde_json::from_str(&raw).ok()?;
    if is_pid_alive(lockfile.pid) {
        Some(lockfile)
    } else {
        None
    }
}

#[cfg(unix)]
fn is_pid_alive(pid: u32) -> bool {
    // Signal 0 performs no action but still validates the pid exists.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_writes_lockfile_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");
        let handle = LockfileHandle::acquire(&path, 4096, "127.0.0.1").unwrap();
        assert_eq!(handle.lockfile.port, 4096);
        assert_eq!(handle.lockfile.pid, std::process::id());
        assert_eq!(handle.token().len(), 64);

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Lockfile = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.port, 4096);
    }

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");
        let _first = LockfileHandle::acquire(&path, 4096, "127.0.0.1").unwrap();
        let second = LockfileHandle::acquire(&path, 4096, "127.0.0.1");
        assert!(second.is_err());
    }

    #[test]
    fn drop_removes_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");
        {
            let _handle = LockfileHandle::acquire(&path, 4096, "127.0.0.1").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn read_live_reflects_current_process_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");
        let handle = LockfileHandle::acquire(&path, 4096, "127.0.0.1").unwrap();
        let read = read_live(&path).unwrap();
        assert_eq!(read.token, handle.token());
    }

    #[test]
    fn read_live_rejects_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");
        let stale = Lockfile { pid: 999_999, port: 4096, bind_address: "127.0.0.1".into(), token: "x".into(), started_at: Utc::now() };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        assert!(read_live(&path).is_none());
    }
}

//! 作業ディレクトリ単位の実行ロック
//!
//! `.stackflow/run.lock` に保持者と取得時刻を書く。
//! 1時間以上前のロックは古いものとして取り除く。

use crate::error::{DeployError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "run.lock";

/// ロック情報
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// 実行ロックの RAII ガード
#[derive(Debug)]
pub struct RunLock {
    lock_path: PathBuf,
    released: bool,
}

impl RunLock {
    /// `state_dir` にロックを作成する
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir).map_err(|e| not_writable(state_dir, e))?;
        let lock_path = state_dir.join(LOCK_FILE);

        if lock_path.exists() {
            match read_lock(&lock_path) {
                Some(info) => {
                    let age = Utc::now().signed_duration_since(info.acquired_at);
                    if age.num_hours() < 1 {
                        return Err(DeployError::Locked {
                            holder: info.holder,
                            since: info.acquired_at.to_rfc3339(),
                            path: lock_path,
                        });
                    }
                    tracing::warn!(holder = %info.holder, "Removing stale run lock");
                }
                None => tracing::warn!(path = %lock_path.display(), "Removing unreadable run lock"),
            }
            std::fs::remove_file(&lock_path).map_err(|e| not_writable(&lock_path, e))?;
        }

        let info = LockInfo {
            holder: holder(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&info)
            .map_err(|e| not_writable(&lock_path, std::io::Error::other(e)))?;

        // 同時に取得しようとした別プロセスとは create_new で競合を判定する
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DeployError::Locked {
                    holder: "unknown".to_string(),
                    since: Utc::now().to_rfc3339(),
                    path: lock_path,
                });
            }
            Err(e) => return Err(not_writable(&lock_path, e)),
        };
        file.write_all(content.as_bytes())
            .map_err(|e| not_writable(&lock_path, e))?;

        tracing::debug!(path = %lock_path.display(), "Acquired run lock");
        Ok(Self {
            lock_path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// ロックを解放する
    pub fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                std::fs::remove_file(&self.lock_path)
                    .map_err(|e| not_writable(&self.lock_path, e))?;
                tracing::debug!("Released run lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

fn read_lock(path: &Path) -> Option<LockInfo> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn holder() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}", host, std::process::id())
}

fn not_writable(path: &Path, e: std::io::Error) -> DeployError {
    DeployError::WorkdirNotWritable {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_is_refused() {
        let temp_dir = tempdir().unwrap();
        let lock = RunLock::acquire(temp_dir.path()).unwrap();

        match RunLock::acquire(temp_dir.path()) {
            Err(DeployError::Locked { holder, .. }) => {
                assert!(holder.ends_with(&format!(":{}", std::process::id())));
            }
            other => panic!("Expected Locked, got {:?}", other),
        }

        lock.release().unwrap();
        assert!(!temp_dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_drop_removes_lock() {
        let temp_dir = tempdir().unwrap();
        {
            let lock = RunLock::acquire(temp_dir.path()).unwrap();
            assert!(lock.path().exists());
        }
        assert!(!temp_dir.path().join(LOCK_FILE).exists());
        RunLock::acquire(temp_dir.path()).unwrap();
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let temp_dir = tempdir().unwrap();
        let stale = LockInfo {
            holder: "old-host:1".to_string(),
            acquired_at: Utc::now() - Duration::hours(2),
        };
        std::fs::write(
            temp_dir.path().join(LOCK_FILE),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = RunLock::acquire(temp_dir.path()).unwrap();
        let info = read_lock(lock.path()).unwrap();
        assert_ne!(info.holder, "old-host:1");
    }

    #[test]
    fn test_unreadable_lock_is_replaced() {
        let temp_dir = tempdir().unwrap();
        std::fs::write(temp_dir.path().join(LOCK_FILE), "not json").unwrap();
        assert!(RunLock::acquire(temp_dir.path()).is_ok());
    }
}

//! 起動前のホスト確認

use crate::error::{DeployError, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::TcpListener;
use std::path::Path;
use tracing::{debug, warn};

/// 起動前チェック
#[async_trait]
pub trait Preflight: Send + Sync {
    /// 作業ディレクトリが存在し、書き込めること
    async fn check_workdir(&self, workdir: &Path) -> Result<()>;

    /// 公開するホストポートがすべて空いていること
    async fn check_ports(&self, ports: &[(String, u16)]) -> Result<()>;
}

/// 実ホストに対するチェック
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPreflight;

#[async_trait]
impl Preflight for HostPreflight {
    async fn check_workdir(&self, workdir: &Path) -> Result<()> {
        let not_writable = |message: String| DeployError::WorkdirNotWritable {
            path: workdir.to_path_buf(),
            message,
        };

        let metadata = std::fs::metadata(workdir).map_err(|e| not_writable(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(not_writable("ディレクトリではありません".to_string()));
        }

        tempfile::Builder::new()
            .prefix(".stackflow-probe-")
            .tempfile_in(workdir)
            .map_err(|e| not_writable(e.to_string()))?;

        debug!(workdir = %workdir.display(), "Working directory is writable");
        Ok(())
    }

    async fn check_ports(&self, ports: &[(String, u16)]) -> Result<()> {
        let mut seen = BTreeSet::new();
        for (service, port) in ports {
            if !seen.insert(*port) {
                continue;
            }
            match TcpListener::bind(("0.0.0.0", *port)) {
                Ok(listener) => drop(listener),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    return Err(DeployError::PortInUse {
                        service: service.clone(),
                        port: *port,
                    });
                }
                Err(e) => {
                    // 特権ポートなど、ここでは判断できないものは compose に任せる
                    warn!(port, service = %service, error = %e, "Could not probe host port");
                }
            }
        }
        Ok(())
    }
}

//! 固定バージョンの docker-compose バイナリのインストール
//!
//! ホストを変更する唯一の処理。一時ファイルに書いてからリネームするため、
//! 中断されても壊れたバイナリは残らない。

use crate::error::{ContainerError, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const RELEASE_BASE_URL: &str = "https://github.com/docker/compose/releases/download";

/// インストール先とインストール処理の抽象
#[async_trait]
pub trait Installer: Send + Sync {
    /// インストール先のバイナリパス
    fn target(&self) -> PathBuf;

    /// バイナリをダウンロードして `target()` に配置する
    async fn install(&self) -> Result<PathBuf>;
}

/// GitHub Releases から docker-compose を取得するインストーラ
pub struct ComposeInstaller {
    version: String,
    install_dir: PathBuf,
    client: reqwest::Client,
}

impl ComposeInstaller {
    pub fn new(version: impl Into<String>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            install_dir: install_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self) -> Result<String> {
        release_url(&self.version, std::env::consts::OS, std::env::consts::ARCH)
    }
}

/// リリースアセットの URL
pub fn release_url(version: &str, os: &str, arch: &str) -> Result<String> {
    let os_name = match os {
        "linux" => "linux",
        "macos" => "darwin",
        _ => {
            return Err(ContainerError::InstallFailed {
                version: version.to_string(),
                url: RELEASE_BASE_URL.to_string(),
                message: format!("このプラットフォームはサポートされていません: {}-{}", os, arch),
            });
        }
    };
    let arch_name = match arch {
        "x86_64" => "x86_64",
        "aarch64" => "aarch64",
        "arm" => "armv7",
        _ => {
            return Err(ContainerError::InstallFailed {
                version: version.to_string(),
                url: RELEASE_BASE_URL.to_string(),
                message: format!("このアーキテクチャはサポートされていません: {}", arch),
            });
        }
    };
    Ok(format!(
        "{}/v{}/docker-compose-{}-{}",
        RELEASE_BASE_URL,
        version.trim_start_matches('v'),
        os_name,
        arch_name
    ))
}

#[async_trait]
impl Installer for ComposeInstaller {
    fn target(&self) -> PathBuf {
        self.install_dir.join("docker-compose")
    }

    async fn install(&self) -> Result<PathBuf> {
        let url = self.url()?;
        let install_failed = |message: String| ContainerError::InstallFailed {
            version: self.version.clone(),
            url: url.clone(),
            message,
        };

        info!(url = %url, dir = %self.install_dir.display(), "Installing docker-compose");

        let response = self
            .client
            .get(&url)
            .header("User-Agent", "stackflow")
            .send()
            .await
            .map_err(|e| install_failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(install_failed(format!("HTTP {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| install_failed(e.to_string()))?;

        let target = self.target();
        place_executable(&self.install_dir, &target, &bytes)?;

        info!(path = %target.display(), "docker-compose installed");
        Ok(target)
    }
}

/// 一時ファイル経由で実行可能ファイルを配置する
pub fn place_executable(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let io_err = |path: &Path, source: std::io::Error| ContainerError::Io {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".docker-compose-")
        .tempfile_in(dir)
        .map_err(|e| io_err(dir, e))?;
    temp.write_all(bytes).map_err(|e| io_err(temp.path(), e))?;
    temp.as_file().sync_all().map_err(|e| io_err(target, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o755))
            .map_err(|e| io_err(target, e))?;
    }

    temp.persist(target).map_err(|e| io_err(target, e.error))?;
    Ok(())
}

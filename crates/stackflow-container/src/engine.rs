//! コンテナエンジンの識別と候補順序

use crate::error::{ContainerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const OS_RELEASE: &str = "/etc/os-release";

/// podman がネイティブなディストリビューション
const RHEL_FAMILY: &[&str] = &["fedora", "rhel", "centos", "rocky", "almalinux"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineId {
    Docker,
    Podman,
}

impl EngineId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// エンジン CLI の実行ファイル名
    pub fn binary(&self) -> &'static str {
        self.as_str()
    }

    /// エンジン専用のスタンドアロン compose バイナリ
    pub fn standalone_compose(&self) -> &'static str {
        match self {
            Self::Docker => "docker-compose",
            Self::Podman => "podman-compose",
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineId {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            _ => Err(ContainerError::InvalidEngine {
                value: s.to_string(),
            }),
        }
    }
}

/// エンジン名のリストを解釈する（重複は先勝ち）
pub fn parse_engine_order<S: AsRef<str>>(names: &[S]) -> Result<Vec<EngineId>> {
    let mut order = Vec::new();
    for name in names {
        let engine: EngineId = name.as_ref().parse()?;
        if !order.contains(&engine) {
            order.push(engine);
        }
    }
    Ok(order)
}

/// ホストに応じた既定の候補順序
pub fn default_engine_order() -> Vec<EngineId> {
    let os_release = std::fs::read_to_string(OS_RELEASE).ok();
    engine_order_for(os_release.as_deref())
}

/// `/etc/os-release` の内容から候補順序を決める
pub fn engine_order_for(os_release: Option<&str>) -> Vec<EngineId> {
    if os_release.is_some_and(is_rhel_family) {
        vec![EngineId::Podman, EngineId::Docker]
    } else {
        vec![EngineId::Docker, EngineId::Podman]
    }
}

fn is_rhel_family(os_release: &str) -> bool {
    os_release
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| matches!(key.trim(), "ID" | "ID_LIKE"))
        .flat_map(|(_, value)| {
            value
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .split_whitespace()
                .map(str::to_ascii_lowercase)
                .collect::<Vec<_>>()
        })
        .any(|id| RHEL_FAMILY.contains(&id.as_str()))
}

/// podman の Docker 互換 API ソケットの候補
pub fn podman_socket_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        candidates.push(Path::new(&dir).join("podman").join("podman.sock"));
    }
    candidates.push(PathBuf::from("/run/podman/podman.sock"));
    candidates
}

/// 存在する最初の podman ソケット
pub fn find_podman_socket(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.exists()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_engine() {
        assert_eq!("Docker".parse::<EngineId>().unwrap(), EngineId::Docker);
        assert_eq!(" podman ".parse::<EngineId>().unwrap(), EngineId::Podman);
        assert!(matches!(
            "containerd".parse::<EngineId>(),
            Err(ContainerError::InvalidEngine { .. })
        ));
    }

    #[test]
    fn test_parse_engine_order_dedups() {
        let order = parse_engine_order(&["podman", "docker", "podman"]).unwrap();
        assert_eq!(order, vec![EngineId::Podman, EngineId::Docker]);
    }

    #[test]
    fn test_default_order_prefers_docker() {
        let ubuntu = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(
            engine_order_for(Some(ubuntu)),
            vec![EngineId::Docker, EngineId::Podman]
        );
        assert_eq!(
            engine_order_for(None),
            vec![EngineId::Docker, EngineId::Podman]
        );
    }

    #[test]
    fn test_rhel_family_prefers_podman() {
        for content in [
            "ID=fedora\nVERSION_ID=40\n",
            "ID=\"rhel\"\nID_LIKE=\"fedora\"\n",
            "ID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n",
            "ID=\"almalinux\"\n",
            "ID=ol\nID_LIKE=\"fedora\"\n",
        ] {
            assert_eq!(
                engine_order_for(Some(content)),
                vec![EngineId::Podman, EngineId::Docker],
                "{content}"
            );
        }
    }

    #[test]
    fn test_find_podman_socket() {
        let dir = tempfile::TempDir::new().unwrap();
        let sock = dir.path().join("podman.sock");
        let missing = dir.path().join("missing.sock");
        assert_eq!(find_podman_socket(&[missing.clone()]), None);

        std::fs::write(&sock, "").unwrap();
        assert_eq!(find_podman_socket(&[missing, sock.clone()]), Some(sock));
    }
}

#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const HEX: &str = "abc0000000000000000000000000000000000000000000000000000000000def";

pub struct TestProject {
    pub root: TempDir,
    home: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            home: tempfile::tempdir().unwrap(),
        }
    }

    #[allow(dead_code)]
    pub fn write_settings(&self, content: &str) {
        fs::write(self.root.path().join("stackflow.yml"), content).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_manifest(&self) {
        let mut manifest = String::new();
        for (name, repo, tag) in [
            ("app", "ghcr.io/example/search", "2.11.0"),
            ("cache", "redis", "7-alpine"),
            ("metrics-collector", "prom/prometheus", "v2.54.1"),
            ("dashboard", "grafana/grafana", "11.2.0"),
        ] {
            manifest.push_str(&format!(
                "{name}:\n  repository: {repo}\n  tag: {tag}\n  digest: sha256:{HEX}\n"
            ));
        }
        fs::write(self.root.path().join("versions.yml"), manifest).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    /// ユーザー環境の設定・環境変数に影響されないコマンド
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("stackflow").unwrap();
        cmd.current_dir(self.path())
            .env("XDG_CONFIG_HOME", self.home.path())
            .env("HOME", self.home.path())
            .env_remove("STACKFLOW_CONFIG_PATH")
            .env_remove("STACKFLOW_ENGINE")
            .env_remove("STACKFLOW_PROJECT")
            .env_remove("STACKFLOW_SIZE")
            .env_remove("STACKFLOW_MANIFEST")
            .env_remove("STACKFLOW_WORKDIR");
        cmd
    }
}

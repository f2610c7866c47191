//! compose ドライバのプロバイダチェーン
//!
//! 上から順にプローブし、最初に成功したものを採用する。
//! 1. ネイティブプラグイン（`<engine> compose`）
//! 2. エンジン専用のスタンドアロンバイナリ
//! 3. podman ソケットを使う docker-compose（podman 選択時のみ）
//! 4. 固定バージョンの docker-compose の自動インストール
//!
//! 3 は podman を選んだときだけ候補になる。docker を選んだ場合に podman ソケットへ
//! 向ける組み合わせは扱わない（docker ではネイティブプラグインかスタンドアロンを使う）。

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::engine::{EngineId, find_podman_socket, podman_socket_candidates};
use crate::error::{ContainerError, Result};
use crate::installer::Installer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// compose ドライバの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComposeDriverKind {
    NativePlugin,
    StandaloneBinary,
    CrossEngine,
    AutoInstalledFallback,
}

impl ComposeDriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NativePlugin => "native-plugin",
            Self::StandaloneBinary => "standalone-binary",
            Self::CrossEngine => "cross-engine",
            Self::AutoInstalledFallback => "auto-installed-fallback",
        }
    }
}

impl fmt::Display for ComposeDriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// compose を呼び出す際の固定部分（プログラム・先頭引数・環境変数）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationTemplate {
    pub program: String,
    pub base_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
}

impl InvocationTemplate {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn with_base_arg(mut self, arg: impl Into<String>) -> Self {
        self.base_args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// サブコマンド引数を付けたコマンドを組み立てる
    pub fn command<I, S>(&self, args: I, timeout: Duration) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(&self.program)
            .args(self.base_args.iter().cloned())
            .args(args)
            .timeout(timeout);
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        spec
    }
}

impl fmt::Display for InvocationTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command(Vec::<String>::new(), Duration::ZERO).display())
    }
}

/// プローブ時に共有する情報
pub struct ProbeContext<'a> {
    pub engine: EngineId,
    pub runner: &'a dyn CommandRunner,
    pub timeout: Duration,
}

impl ProbeContext<'_> {
    /// `version` の no-op 実行で機能確認する
    pub async fn probe_version(&self, template: &InvocationTemplate) -> Result<CommandOutput> {
        let spec = template.command(["version"], self.timeout);
        run_probe(self.runner, &spec).await
    }
}

/// プローブ用にコマンドを実行し、失敗を `ProbeFailed` にまとめる
pub async fn run_probe(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutput> {
    let command = spec.display();
    match runner.run(spec).await {
        Ok(output) if output.success() => Ok(output),
        Ok(output) => Err(ContainerError::ProbeFailed {
            command,
            reason: output.failure_reason(),
        }),
        Err(ContainerError::Spawn { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            Err(ContainerError::ProbeFailed {
                command,
                reason: "コマンドが見つかりません".to_string(),
            })
        }
        Err(e) => Err(ContainerError::ProbeFailed {
            command,
            reason: e.to_string(),
        }),
    }
}

/// compose ドライバの提供元
#[async_trait]
pub trait ComposeProvider: Send + Sync {
    fn kind(&self) -> ComposeDriverKind;

    /// プローブ記録に使う説明（例: `docker compose version`）
    fn describe(&self, engine: EngineId) -> String;

    /// このエンジンで試す価値があるか
    fn applies_to(&self, _engine: EngineId) -> bool {
        true
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<InvocationTemplate>;
}

/// `<engine> compose`
pub struct NativePluginProvider;

#[async_trait]
impl ComposeProvider for NativePluginProvider {
    fn kind(&self) -> ComposeDriverKind {
        ComposeDriverKind::NativePlugin
    }

    fn describe(&self, engine: EngineId) -> String {
        format!("{} compose version", engine.binary())
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<InvocationTemplate> {
        let template = InvocationTemplate::new(ctx.engine.binary()).with_base_arg("compose");
        ctx.probe_version(&template).await?;
        Ok(template)
    }
}

/// `docker-compose` / `podman-compose`
pub struct StandaloneProvider;

#[async_trait]
impl ComposeProvider for StandaloneProvider {
    fn kind(&self) -> ComposeDriverKind {
        ComposeDriverKind::StandaloneBinary
    }

    fn describe(&self, engine: EngineId) -> String {
        format!("{} version", engine.standalone_compose())
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<InvocationTemplate> {
        let template = InvocationTemplate::new(ctx.engine.standalone_compose());
        ctx.probe_version(&template).await?;
        Ok(template)
    }
}

/// podman ソケットに向けた `docker-compose`
pub struct CrossEngineProvider {
    sockets: Vec<PathBuf>,
}

impl CrossEngineProvider {
    pub fn new(sockets: Vec<PathBuf>) -> Self {
        Self { sockets }
    }
}

impl Default for CrossEngineProvider {
    fn default() -> Self {
        Self::new(podman_socket_candidates())
    }
}

#[async_trait]
impl ComposeProvider for CrossEngineProvider {
    fn kind(&self) -> ComposeDriverKind {
        ComposeDriverKind::CrossEngine
    }

    fn describe(&self, _engine: EngineId) -> String {
        "DOCKER_HOST=<podman socket> docker-compose version".to_string()
    }

    fn applies_to(&self, engine: EngineId) -> bool {
        engine == EngineId::Podman
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<InvocationTemplate> {
        let socket = find_podman_socket(&self.sockets).ok_or_else(|| {
            ContainerError::ProbeFailed {
                command: self.describe(ctx.engine),
                reason: format!(
                    "podman ソケットが見つかりません（{}）",
                    self.sockets
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }
        })?;
        let template = InvocationTemplate::new(EngineId::Docker.standalone_compose())
            .with_env("DOCKER_HOST", format!("unix://{}", socket.display()));
        ctx.probe_version(&template).await?;
        Ok(template)
    }
}

/// 固定バージョンの docker-compose を必要時にインストール
pub struct AutoInstallProvider {
    installer: Box<dyn Installer>,
    enabled: bool,
}

impl AutoInstallProvider {
    pub fn new(installer: Box<dyn Installer>, enabled: bool) -> Self {
        Self { installer, enabled }
    }

    fn template(&self, ctx: &ProbeContext<'_>, program: PathBuf) -> InvocationTemplate {
        let template = InvocationTemplate::new(program.display().to_string());
        // podman 選択時は docker-compose を podman ソケットへ向ける
        match ctx.engine {
            EngineId::Podman => match find_podman_socket(&podman_socket_candidates()) {
                Some(socket) => {
                    template.with_env("DOCKER_HOST", format!("unix://{}", socket.display()))
                }
                None => template,
            },
            EngineId::Docker => template,
        }
    }
}

#[async_trait]
impl ComposeProvider for AutoInstallProvider {
    fn kind(&self) -> ComposeDriverKind {
        ComposeDriverKind::AutoInstalledFallback
    }

    fn describe(&self, _engine: EngineId) -> String {
        format!("install {}", self.installer.target().display())
    }

    async fn probe(&self, ctx: &ProbeContext<'_>) -> Result<InvocationTemplate> {
        let target = self.installer.target();

        // 既に配置済みで動作するならインストールしない
        if target.exists() {
            let template = self.template(ctx, target.clone());
            match ctx.probe_version(&template).await {
                Ok(_) => {
                    debug!(path = %target.display(), "Using previously installed docker-compose");
                    return Ok(template);
                }
                Err(e) => debug!(error = %e, "Installed docker-compose is not functional"),
            }
        }

        if !self.enabled {
            return Err(ContainerError::ProbeFailed {
                command: self.describe(ctx.engine),
                reason: "自動インストールは無効です（compose.allow_install: false）".to_string(),
            });
        }

        let installed = self.installer.install().await?;
        let template = self.template(ctx, installed);
        ctx.probe_version(&template).await?;
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_template_command() {
        let template = InvocationTemplate::new("docker").with_base_arg("compose");
        let spec = template.command(["-p", "demo", "up", "-d"], Duration::from_secs(30));
        assert_eq!(spec.display(), "docker compose -p demo up -d");
        assert_eq!(spec.timeout, Duration::from_secs(30));
        assert_eq!(template.to_string(), "docker compose");
    }

    #[test]
    fn test_cross_engine_applies_only_to_podman() {
        let provider = CrossEngineProvider::new(vec![]);
        assert!(provider.applies_to(EngineId::Podman));
        assert!(!provider.applies_to(EngineId::Docker));
    }

    #[test]
    fn test_driver_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ComposeDriverKind::AutoInstalledFallback).unwrap(),
            "\"auto-installed-fallback\""
        );
    }
}

//! コンテナエンジンと compose ドライバの検出

use crate::command::{CommandRunner, CommandSpec};
use crate::compose::{
    AutoInstallProvider, ComposeDriverKind, ComposeProvider, CrossEngineProvider,
    InvocationTemplate, NativePluginProvider, ProbeContext, StandaloneProvider, run_probe,
};
use crate::engine::{EngineId, default_engine_order};
use crate::error::{ContainerError, Result};
use crate::installer::Installer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 1回分のプローブ記録
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeAttempt {
    pub command: String,
    pub ok: bool,
    pub detail: String,
}

impl ProbeAttempt {
    fn passed(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            detail: "ok".to_string(),
        }
    }

    fn failed(command: impl Into<String>, error: &ContainerError) -> Self {
        let detail = match error {
            ContainerError::ProbeFailed { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        Self {
            command: command.into(),
            ok: false,
            detail,
        }
    }
}

/// 検出結果（1回の実行につき1度だけ作られ、以降は変更しない）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeProfile {
    pub engine_present: BTreeMap<EngineId, bool>,
    pub chosen_engine: EngineId,
    pub compose_driver: ComposeDriverKind,
    pub invocation: InvocationTemplate,
    pub installable: bool,
    pub probes: Vec<ProbeAttempt>,
}

impl RuntimeProfile {
    /// compose コマンドを組み立てる
    pub fn compose_command<I, S>(&self, args: I, timeout: Duration) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invocation.command(args, timeout)
    }
}

/// エンジンと compose ドライバを検出する
pub struct RuntimeResolver<'a> {
    runner: &'a dyn CommandRunner,
    providers: Vec<Box<dyn ComposeProvider>>,
    probe_timeout: Duration,
    installable: bool,
}

impl<'a> RuntimeResolver<'a> {
    /// 標準のプロバイダチェーンで作成
    ///
    /// `installer` が None の場合、自動インストールはチェーンに含めない。
    pub fn new(
        runner: &'a dyn CommandRunner,
        probe_timeout: Duration,
        installer: Option<Box<dyn Installer>>,
        installable: bool,
    ) -> Self {
        let mut providers: Vec<Box<dyn ComposeProvider>> = vec![
            Box::new(NativePluginProvider),
            Box::new(StandaloneProvider),
            Box::new(CrossEngineProvider::default()),
        ];
        if let Some(installer) = installer {
            providers.push(Box::new(AutoInstallProvider::new(installer, installable)));
        }
        Self {
            runner,
            providers,
            probe_timeout,
            installable,
        }
    }

    /// プロバイダチェーンを差し替える
    pub fn with_providers(mut self, providers: Vec<Box<dyn ComposeProvider>>) -> Self {
        self.providers = providers;
        self
    }

    /// 候補順にエンジンを試し、選ばれたエンジンで compose ドライバを探す
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, candidate_order: Option<&[EngineId]>) -> Result<RuntimeProfile> {
        let order = match candidate_order {
            Some(order) if !order.is_empty() => order.to_vec(),
            _ => default_engine_order(),
        };
        debug!(order = ?order, "Engine candidate order");

        let mut probes = Vec::new();
        let mut engine_present = BTreeMap::new();
        let mut chosen = None;

        for engine in &order {
            let spec = CommandSpec::new(engine.binary())
                .arg("info")
                .timeout(self.probe_timeout);
            let command = spec.display();
            match run_probe(self.runner, &spec).await {
                Ok(_) => {
                    probes.push(ProbeAttempt::passed(command));
                    engine_present.insert(*engine, true);
                    if chosen.is_none() {
                        chosen = Some(*engine);
                    }
                }
                Err(e) => {
                    debug!(engine = %engine, error = %e, "Engine probe failed");
                    probes.push(ProbeAttempt::failed(command, &e));
                    engine_present.insert(*engine, false);
                }
            }
        }

        let Some(engine) = chosen else {
            warn!("No functional container engine found");
            return Err(ContainerError::RuntimeDetectionFailed { attempts: probes });
        };

        let ctx = ProbeContext {
            engine,
            runner: self.runner,
            timeout: self.probe_timeout,
        };

        for provider in self.providers.iter().filter(|p| p.applies_to(engine)) {
            let command = provider.describe(engine);
            match provider.probe(&ctx).await {
                Ok(invocation) => {
                    probes.push(ProbeAttempt::passed(command));
                    info!(
                        engine = %engine,
                        driver = %provider.kind(),
                        invocation = %invocation,
                        "Container runtime resolved"
                    );
                    return Ok(RuntimeProfile {
                        engine_present,
                        chosen_engine: engine,
                        compose_driver: provider.kind(),
                        invocation,
                        installable: self.installable,
                        probes,
                    });
                }
                Err(e) => {
                    debug!(driver = %provider.kind(), error = %e, "Compose provider probe failed");
                    probes.push(ProbeAttempt::failed(command, &e));
                }
            }
        }

        warn!(engine = %engine, "No functional compose driver found");
        Err(ContainerError::RuntimeDetectionFailed { attempts: probes })
    }
}

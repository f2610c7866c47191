//! 実行全体の制御
//!
//! 事前チェック → ランタイム検出 → 記述子の生成・検証 → `compose up -d` →
//! ヘルス待機 の順に進め、どこかで失敗したらそこで打ち切る。
//! 検出したランタイムは実行コンテキストとともに各段階へ明示的に渡す。

use crate::context::RunContext;
use crate::error::{DeployError, Result};
use crate::lock::RunLock;
use crate::preflight::Preflight;
use crate::report::{Stage, StepLogger};
use stackflow_container::{
    BollardInspector, ClusterHealthMonitor, CommandRunner, ComposeConfigValidator,
    ComposeInstaller, ContainerError, ContainerInspector, Installer, MonitorTarget,
    RuntimeProfile, RuntimeResolver, compose_file_args, run_with_deadline,
};
use stackflow_core::{
    HealthSnapshot, StackSpec, StackSpecBuilder, VersionManifest, load_descriptor,
};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// 検出したランタイムに合わせてコンテナ観測器を作る
pub trait InspectorFactory: Send + Sync {
    fn connect(
        &self,
        profile: &RuntimeProfile,
    ) -> stackflow_container::Result<Box<dyn ContainerInspector>>;
}

/// エンジンの API ソケットへ接続する
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineInspectors;

impl InspectorFactory for EngineInspectors {
    fn connect(
        &self,
        profile: &RuntimeProfile,
    ) -> stackflow_container::Result<Box<dyn ContainerInspector>> {
        Ok(Box::new(BollardInspector::connect(profile.chosen_engine)?))
    }
}

/// `up` の結果
#[derive(Debug)]
pub struct UpOutcome {
    pub profile: RuntimeProfile,
    pub spec: StackSpec,
    /// `compose up -d` の試行回数
    pub attempts: u32,
    /// 待機しなかった場合は None
    pub snapshot: Option<HealthSnapshot>,
}

/// 各コンポーネントを順に呼び出すコントローラ
pub struct Orchestrator<'a> {
    runner: &'a dyn CommandRunner,
    preflight: &'a dyn Preflight,
    inspectors: &'a dyn InspectorFactory,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        preflight: &'a dyn Preflight,
        inspectors: &'a dyn InspectorFactory,
    ) -> Self {
        Self {
            runner,
            preflight,
            inspectors,
        }
    }

    /// エンジンと compose ドライバを検出する
    pub async fn resolve(&self, ctx: &RunContext) -> Result<RuntimeProfile> {
        let installer = ctx.install_dir.as_ref().map(|dir| {
            Box::new(ComposeInstaller::new(ctx.compose_version.clone(), dir.clone()))
                as Box<dyn Installer>
        });
        let resolver =
            RuntimeResolver::new(self.runner, ctx.probe_timeout, installer, ctx.allow_install);
        Ok(resolver.resolve(ctx.engine_candidates()).await?)
    }

    /// スタックを起動し、必要なら全サービスの準備完了まで待つ
    #[tracing::instrument(skip_all, fields(project = %ctx.project))]
    pub async fn up(&self, ctx: &RunContext, log: &mut StepLogger) -> Result<UpOutcome> {
        let (lock, manifest) = self.prepare(ctx, log).await?;
        let profile = self.resolve_step(ctx, log).await?;
        let spec = self.build_step(ctx, &profile, &manifest, log).await?;

        let inspector = self.inspectors.connect(&profile);

        log.start_step(Stage::CheckPorts);
        let existing = match &inspector {
            Ok(inspector) => existing_services(inspector.as_ref(), &ctx.project).await,
            Err(e) => {
                warn!(error = %e, "Cannot inspect existing containers; checking every port");
                BTreeSet::new()
            }
        };
        let ports: Vec<(String, u16)> = spec
            .published_ports()
            .into_iter()
            .filter(|(service, _)| !existing.contains(service))
            .collect();
        checked(log, self.preflight.check_ports(&ports).await)?;
        log.step_success(Some(&format!("{} 個のホストポートが利用可能", ports.len())));

        log.start_step(Stage::StartStack);
        let args = start_args(ctx, &spec);
        let last_command = profile
            .compose_command(args.clone(), ctx.start_policy.deadline())
            .display();
        let started = match self.start(ctx, &profile, &args, &last_command, log).await {
            Err(e) => {
                let observer = inspector.as_deref().ok();
                let observed = with_failure_snapshot(e, observer, &spec, &last_command, ctx).await;
                Err(DeployError::from(observed))
            }
            Ok(attempts) => Ok(attempts),
        };
        let attempts = checked(log, started)?;
        if attempts > 1 {
            log.step_success_with_retry(attempts - 1, Some("スタックを起動しました"));
        } else {
            log.step_success(Some("スタックを起動しました"));
        }

        log.start_step(Stage::AwaitHealth);
        let snapshot = if ctx.wait {
            let inspector = checked(log, inspector.map_err(DeployError::from))?;
            let monitor =
                ClusterHealthMonitor::new(inspector.as_ref()).with_last_command(last_command);
            let snapshot = checked(
                log,
                monitor
                    .await_healthy(&monitor_target(&spec), ctx.health_timeout, ctx.poll_interval)
                    .await
                    .map_err(DeployError::from),
            )?;
            log.step_success(Some("すべてのサービスが準備完了"));
            Some(snapshot)
        } else {
            log.step_skipped("--no-wait");
            None
        };

        lock.release()?;
        info!(attempts, "Stack is up");
        Ok(UpOutcome {
            profile,
            spec,
            attempts,
            snapshot,
        })
    }

    /// 記述子を生成・検証するだけで起動しない
    #[tracing::instrument(skip_all, fields(project = %ctx.project))]
    pub async fn validate(
        &self,
        ctx: &RunContext,
        log: &mut StepLogger,
    ) -> Result<(RuntimeProfile, StackSpec)> {
        let (lock, manifest) = self.prepare(ctx, log).await?;
        let profile = self.resolve_step(ctx, log).await?;
        let spec = self.build_step(ctx, &profile, &manifest, log).await?;
        lock.release()?;
        Ok((profile, spec))
    }

    /// 書き出し済みの記述子に対して1回だけ観測する
    pub async fn status(&self, ctx: &RunContext) -> Result<(RuntimeProfile, HealthSnapshot)> {
        let profile = self.resolve(ctx).await?;
        let spec = StackSpec {
            project: ctx.project.clone(),
            document: load_descriptor(&ctx.descriptor_path)?,
            profiles: ctx.profiles.clone(),
            path: ctx.descriptor_path.clone(),
        };
        let inspector = self.inspectors.connect(&profile)?;
        let snapshot = ClusterHealthMonitor::new(inspector.as_ref())
            .snapshot_within(&monitor_target(&spec), ctx.probe_timeout)
            .await?;
        Ok((profile, snapshot))
    }

    async fn prepare(
        &self,
        ctx: &RunContext,
        log: &mut StepLogger,
    ) -> Result<(RunLock, VersionManifest)> {
        log.start_step(Stage::Preflight);
        let result = async {
            self.preflight.check_workdir(&ctx.workdir).await?;
            let lock = RunLock::acquire(&ctx.state_dir())?;
            let manifest = VersionManifest::from_path(&ctx.manifest_path)?;
            Ok::<_, DeployError>((lock, manifest))
        }
        .await;
        let (lock, manifest) = checked(log, result)?;
        log.step_success(Some(&format!(
            "マニフェスト: {} コンポーネント",
            manifest.len()
        )));
        Ok((lock, manifest))
    }

    async fn resolve_step(&self, ctx: &RunContext, log: &mut StepLogger) -> Result<RuntimeProfile> {
        log.start_step(Stage::ResolveRuntime);
        let profile = checked(log, self.resolve(ctx).await)?;
        log.step_success(Some(&format!(
            "{} / {} ({})",
            profile.chosen_engine, profile.compose_driver, profile.invocation
        )));
        Ok(profile)
    }

    async fn build_step(
        &self,
        ctx: &RunContext,
        profile: &RuntimeProfile,
        manifest: &VersionManifest,
        log: &mut StepLogger,
    ) -> Result<StackSpec> {
        log.start_step(Stage::BuildSpec);
        let validator = ComposeConfigValidator::new(profile, self.runner, ctx.probe_timeout);
        let builder = StackSpecBuilder::new(&validator);
        let spec = checked(
            log,
            builder
                .build(&ctx.build_request(), manifest)
                .await
                .map_err(DeployError::from),
        )?;
        log.step_success(Some(&format!(
            "{} ({} サービス)",
            spec.path().display(),
            spec.active_services().len()
        )));
        Ok(spec)
    }

    /// `compose up -d` を期限付きで繰り返し、試行回数を返す
    async fn start(
        &self,
        ctx: &RunContext,
        profile: &RuntimeProfile,
        args: &[String],
        command: &str,
        log: &StepLogger,
    ) -> stackflow_container::Result<u32> {
        let policy = ctx.start_policy;
        let runner = self.runner;
        let started = Instant::now();
        let mut attempts = 0;
        run_with_deadline(&policy, command, |attempt| {
            attempts = attempt;
            if attempt > 1 {
                log.log_retry(attempt, policy.max_attempts(), command);
            }
            // 1回の試行が全体の期限を越えないように残り時間で打ち切る
            let remaining = policy
                .deadline()
                .saturating_sub(started.elapsed())
                .max(Duration::from_secs(1));
            let spec = profile.compose_command(args.to_vec(), remaining);
            async move {
                let output = runner.run(&spec).await?;
                output.into_result(&spec)
            }
        })
        .await?;

        Ok(attempts)
    }
}

/// `compose -f <記述子> -p <プロジェクト> [--profile ..] up -d` の引数
fn start_args(ctx: &RunContext, spec: &StackSpec) -> Vec<String> {
    let mut args = compose_file_args(spec.path(), &ctx.project, &ctx.profiles);
    args.extend(["up".to_string(), "-d".to_string()]);
    args
}

/// 起動に失敗した時点のサービス状態を1回だけ観測してエラーに添える
async fn with_failure_snapshot(
    error: ContainerError,
    inspector: Option<&dyn ContainerInspector>,
    spec: &StackSpec,
    command: &str,
    ctx: &RunContext,
) -> ContainerError {
    let Some(inspector) = inspector else {
        return error;
    };
    let monitor = ClusterHealthMonitor::new(inspector).with_last_command(command);
    match monitor
        .snapshot_within(&monitor_target(spec), ctx.probe_timeout)
        .await
    {
        Ok(snapshot) => error.with_snapshot(snapshot),
        Err(e) => {
            warn!(error = %e, "Could not record service state after start failure");
            error
        }
    }
}

/// 準備完了を待つサービスと、スナップショットに含めるサービス
///
/// プロファイル付きのサービス（monitoring など）は待機の対象にしない。
pub fn monitor_target(spec: &StackSpec) -> MonitorTarget {
    let required = spec
        .services()
        .filter(|(_, svc)| svc.is_active(&spec.profiles) && svc.profiles.is_empty())
        .map(|(name, _)| name.clone())
        .collect();
    MonitorTarget {
        project: spec.project.clone(),
        required,
        managed: spec.active_services(),
    }
}

async fn existing_services(inspector: &dyn ContainerInspector, project: &str) -> BTreeSet<String> {
    match inspector.observe(project).await {
        Ok(observations) => observations.into_iter().map(|o| o.service).collect(),
        Err(e) => {
            warn!(error = %e, "Failed to list existing containers");
            BTreeSet::new()
        }
    }
}

fn checked<T>(log: &mut StepLogger, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        log.step_failed(&e.to_string());
    }
    result
}

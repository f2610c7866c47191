//! 1回の実行に必要な値をまとめた実行コンテキスト
//!
//! 設定ファイル → 環境変数 → CLI フラグの順に上書きした結果を保持する。
//! 各コンポーネントにはここから必要な値だけを渡す。

use crate::error::Result;
use stackflow_config::{Settings, state_dir};
use stackflow_container::{EngineId, parse_engine_order};
use stackflow_core::{BuildRequest, RetryPolicy, TemplateSource};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// monitoring プロファイル名
pub const MONITORING_PROFILE: &str = "monitoring";

/// CLI フラグによる上書き
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub size: Option<String>,
    pub template: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub engine: Option<String>,
    pub skip_digests: bool,
    pub no_monitoring: bool,
    /// ヘルス待機の上限（秒）
    pub timeout: Option<u64>,
    pub wait: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub workdir: PathBuf,
    pub project: String,
    pub template: TemplateSource,
    pub manifest_path: PathBuf,
    pub descriptor_path: PathBuf,
    pub pin_digests: bool,
    pub profiles: BTreeSet<String>,
    /// 空ならプラットフォーム既定の順序
    pub engine_order: Vec<EngineId>,
    pub probe_timeout: Duration,
    pub start_policy: RetryPolicy,
    pub health_timeout: Duration,
    pub poll_interval: Duration,
    pub wait: bool,
    pub install_dir: Option<PathBuf>,
    pub compose_version: String,
    pub allow_install: bool,
}

impl RunContext {
    pub fn new(workdir: &Path, settings: &Settings, overrides: &Overrides) -> Result<Self> {
        let template = match (&overrides.template, &overrides.size, &settings.template) {
            (Some(path), _, _) => TemplateSource::File(resolve(workdir, path)),
            (None, Some(size), _) => TemplateSource::builtin(size)?,
            (None, None, Some(path)) => TemplateSource::File(resolve(workdir, path)),
            (None, None, None) => TemplateSource::builtin(&settings.size)?,
        };

        let engine_order = match &overrides.engine {
            Some(engine) => parse_engine_order(&stackflow_config::parse_engine_list(engine))?,
            None => parse_engine_order(&settings.engines)?,
        };

        let mut profiles = BTreeSet::new();
        if settings.monitoring && !overrides.no_monitoring {
            profiles.insert(MONITORING_PROFILE.to_string());
        }

        let start = &settings.start;
        let start_policy = RetryPolicy::new(
            start.max_attempts,
            Duration::from_millis(start.base_delay_ms),
            Duration::from_millis(start.max_delay_ms),
            Duration::from_secs(start.deadline_secs),
        )?;

        let manifest = overrides.manifest.as_ref().unwrap_or(&settings.manifest);

        Ok(Self {
            workdir: workdir.to_path_buf(),
            project: settings.project.clone(),
            template,
            manifest_path: resolve(workdir, manifest),
            descriptor_path: resolve(workdir, &settings.descriptor),
            pin_digests: settings.pin_digests && !overrides.skip_digests,
            profiles,
            engine_order,
            probe_timeout: Duration::from_secs(settings.probe_timeout_secs),
            start_policy,
            health_timeout: Duration::from_secs(
                overrides.timeout.unwrap_or(settings.health.timeout_secs),
            ),
            poll_interval: Duration::from_secs(settings.health.poll_interval_secs),
            wait: overrides.wait.unwrap_or(settings.wait),
            install_dir: settings.install_dir(),
            compose_version: settings.compose.version.clone(),
            allow_install: settings.compose.allow_install,
        })
    }

    pub fn state_dir(&self) -> PathBuf {
        state_dir(&self.workdir)
    }

    pub fn engine_candidates(&self) -> Option<&[EngineId]> {
        if self.engine_order.is_empty() {
            None
        } else {
            Some(&self.engine_order)
        }
    }

    pub fn build_request(&self) -> BuildRequest {
        BuildRequest {
            project: self.project.clone(),
            template: self.template.clone(),
            pin_digests: self.pin_digests,
            profiles: self.profiles.clone(),
            output: self.descriptor_path.clone(),
        }
    }
}

fn resolve(workdir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}

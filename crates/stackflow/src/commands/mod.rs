pub mod runtime;
pub mod status;
pub mod up;
pub mod validate;

use crate::context::{Overrides, RunContext};
use crate::error::DeployError;
use crate::report::{Diagnostics, log_snapshot};
use colored::Colorize;
use stackflow_config::Settings;
use std::path::Path;

/// 設定を読み込み、CLI フラグを重ねた実行コンテキストを作る
pub fn load_context(workdir: &Path, overrides: &Overrides) -> Result<RunContext, DeployError> {
    let (settings, path) = Settings::load_from_dir(workdir)?;
    match &path {
        Some(path) => tracing::info!(path = %path.display(), "Loaded settings"),
        None => tracing::debug!("Using default settings"),
    }
    RunContext::new(workdir, &settings, overrides)
}

/// 失敗時の診断情報を残す
pub fn record_failure(command: &str, ctx: &RunContext, error: &DeployError) {
    if let Some(snapshot) = error.snapshot() {
        log_snapshot(snapshot);
    }
    if matches!(error, DeployError::WorkdirNotWritable { .. }) {
        return;
    }
    let diagnostics = Diagnostics::new(command, error.exit_code(), error.to_string())
        .with_snapshot(error.snapshot());
    match diagnostics.write(&ctx.state_dir()) {
        Ok(path) => eprintln!(
            "{} {}",
            "診断情報:".dimmed(),
            path.display().to_string().cyan()
        ),
        Err(e) => tracing::warn!(error = %e, "Failed to write diagnostics"),
    }
}

//! 実行の進捗表示と診断情報の出力
//!
//! 各ステージの開始・成功・失敗を時刻と所要時間つきで表示し、
//! 失敗時には `.stackflow/diagnostics.json` に状態を書き残す。

use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use serde::Serialize;
use stackflow_core::HealthSnapshot;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DIAGNOSTICS_FILE: &str = "diagnostics.json";

/// 実行のステージ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 作業ディレクトリ・ロック・入力の確認
    Preflight,
    /// エンジンと compose ドライバの検出
    ResolveRuntime,
    /// 記述子の生成と検証
    BuildSpec,
    /// ホストポートの確認
    CheckPorts,
    /// `compose up -d`
    StartStack,
    /// 全サービスの準備完了待ち
    AwaitHealth,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preflight => "事前チェック",
            Self::ResolveRuntime => "ランタイム検出",
            Self::BuildSpec => "記述子の生成・検証",
            Self::CheckPorts => "ポート確認",
            Self::StartStack => "スタック起動",
            Self::AwaitHealth => "ヘルスチェック待機",
        }
    }
}

/// ステージの実行結果
#[derive(Debug, Clone)]
pub enum StepResult {
    Success {
        duration: Duration,
        message: Option<String>,
    },
    /// スキップ（--no-wait など）
    Skipped { reason: String },
    Failed { error: String, duration: Duration },
    /// リトライ後に成功
    SuccessWithRetry { duration: Duration, retries: u32 },
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Success { .. } | Self::SuccessWithRetry { .. } | Self::Skipped { .. }
        )
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Success { duration, .. } => Some(*duration),
            Self::Failed { duration, .. } => Some(*duration),
            Self::SuccessWithRetry { duration, .. } => Some(*duration),
            Self::Skipped { .. } => None,
        }
    }
}

/// ステージごとの進捗表示
pub struct StepLogger {
    start_time: Instant,
    step_results: Vec<(Stage, StepResult)>,
    current_step: Option<(Stage, Instant)>,
    quiet: bool,
}

impl Default for StepLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl StepLogger {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            step_results: Vec::new(),
            current_step: None,
            quiet: false,
        }
    }

    /// 表示せず結果だけを記録する
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::new()
        }
    }

    fn print(&self, line: String) {
        if !self.quiet {
            println!("{}", line);
        }
    }

    pub fn start_step(&mut self, stage: Stage) {
        // 前のステージが閉じられていなければ失敗として記録する
        if self.current_step.is_some() {
            self.step_failed("中断");
        }
        self.print(format!("[{}] {} {}", timestamp().dimmed(), "▶".cyan(), stage.name()));
        self.current_step = Some((stage, Instant::now()));
    }

    pub fn step_success(&mut self, message: Option<&str>) {
        if let Some((stage, start)) = self.current_step.take() {
            let duration = start.elapsed();
            let duration_str = format_duration(duration);
            let line = match message {
                Some(msg) => format!(
                    "[{}] {} {} ({})",
                    timestamp().dimmed(),
                    "✓".green().bold(),
                    msg,
                    duration_str.dimmed()
                ),
                None => format!(
                    "[{}] {} {} 完了 ({})",
                    timestamp().dimmed(),
                    "✓".green().bold(),
                    stage.name(),
                    duration_str.dimmed()
                ),
            };
            self.print(line);
            self.step_results.push((
                stage,
                StepResult::Success {
                    duration,
                    message: message.map(String::from),
                },
            ));
        }
    }

    pub fn step_success_with_retry(&mut self, retries: u32, message: Option<&str>) {
        if let Some((stage, start)) = self.current_step.take() {
            let duration = start.elapsed();
            let msg = message.unwrap_or("完了");
            self.print(format!(
                "[{}] {} {} ({}, {} retries)",
                timestamp().dimmed(),
                "✓".green().bold(),
                msg,
                format_duration(duration).dimmed(),
                retries
            ));
            self.step_results
                .push((stage, StepResult::SuccessWithRetry { duration, retries }));
        }
    }

    pub fn step_skipped(&mut self, reason: &str) {
        if let Some((stage, _)) = self.current_step.take() {
            self.print(format!(
                "[{}] {} {} ({})",
                timestamp().dimmed(),
                "⏭".yellow(),
                stage.name(),
                reason.dimmed()
            ));
            self.step_results.push((
                stage,
                StepResult::Skipped {
                    reason: reason.to_string(),
                },
            ));
        }
    }

    pub fn step_failed(&mut self, error: &str) {
        if let Some((stage, start)) = self.current_step.take() {
            let duration = start.elapsed();
            // 詳細はエラー本体で表示するので1行目だけ
            let headline = error.lines().next().unwrap_or(error);
            self.print(format!(
                "[{}] {} {}: {}",
                timestamp().dimmed(),
                "✗".red().bold(),
                stage.name(),
                headline.red()
            ));
            self.step_results.push((
                stage,
                StepResult::Failed {
                    error: error.to_string(),
                    duration,
                },
            ));
        }
    }

    pub fn log_retry(&self, attempt: u32, max_attempts: u32, command: &str) {
        self.print(format!(
            "[{}] {} リトライ {}/{}: {}",
            timestamp().dimmed(),
            "⟳".yellow(),
            attempt,
            max_attempts,
            command.dimmed()
        ));
    }

    pub fn results(&self) -> &[(Stage, StepResult)] {
        &self.step_results
    }

    pub fn all_success(&self) -> bool {
        self.step_results
            .iter()
            .all(|(_, result)| result.is_success())
    }

    pub fn print_summary(&self, title: &str) {
        if self.quiet {
            return;
        }
        let total_retries: u32 = self
            .step_results
            .iter()
            .filter_map(|(_, result)| match result {
                StepResult::SuccessWithRetry { retries, .. } => Some(*retries),
                _ => None,
            })
            .sum();
        let error_count = self
            .step_results
            .iter()
            .filter(|(_, result)| matches!(result, StepResult::Failed { .. }))
            .count();
        let slowest = self
            .step_results
            .iter()
            .filter_map(|(stage, result)| result.duration().map(|d| (stage, d)))
            .max_by_key(|(_, d)| *d);

        println!();
        println!("{}", "═".repeat(44));
        println!("Run Summary: {}", title.cyan().bold());
        println!("{}", "─".repeat(44));
        println!(
            "Total time:    {}",
            format_duration(self.start_time.elapsed()).green()
        );
        if let Some((stage, duration)) = slowest {
            println!("Slowest step:  {} ({})", stage.name(), format_duration(duration));
        }
        if total_retries > 0 {
            println!("Retries:       {}", total_retries.to_string().yellow());
        } else {
            println!("Retries:       0");
        }
        if error_count > 0 {
            println!("Errors:        {}", error_count.to_string().red().bold());
        } else {
            println!("Errors:        {}", "0".green());
        }
        println!("{}", "═".repeat(44));
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}.{}s", secs, duration.subsec_millis() / 100)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// スナップショットをログに残す（標準エラーにはエラー本文として表示される）
pub fn log_snapshot(snapshot: &HealthSnapshot) {
    for record in &snapshot.records {
        tracing::error!(
            service = %record.name,
            status = %record.status,
            container = record.container_id.as_deref().unwrap_or("-"),
            "Service state at failure"
        );
    }
    if let Some(command) = &snapshot.last_command {
        tracing::error!(command = %command, "Last external command");
    }
}

/// `.stackflow/diagnostics.json` の内容
#[derive(Debug, Serialize)]
pub struct Diagnostics<'a> {
    pub command: &'a str,
    pub recorded_at: DateTime<Utc>,
    pub exit_code: u8,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<&'a HealthSnapshot>,
}

impl<'a> Diagnostics<'a> {
    pub fn new(command: &'a str, exit_code: u8, error: String) -> Self {
        Self {
            command,
            recorded_at: Utc::now(),
            exit_code,
            error,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: Option<&'a HealthSnapshot>) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// 状態ディレクトリに書き出し、書き出したパスを返す
    pub fn write(&self, state_dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(DIAGNOSTICS_FILE);
        let content = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::{HealthStatus, ServiceHealthRecord};
    use tempfile::tempdir;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn test_step_results_are_recorded() {
        let mut log = StepLogger::quiet();
        log.start_step(Stage::ResolveRuntime);
        log.step_success(Some("docker / native-plugin"));
        log.start_step(Stage::StartStack);
        log.step_success_with_retry(2, None);
        log.start_step(Stage::AwaitHealth);
        log.step_skipped("--no-wait");
        assert!(log.all_success());

        log.start_step(Stage::Preflight);
        log.step_failed("boom\ndetail");
        assert!(!log.all_success());
        assert_eq!(log.results().len(), 4);
    }

    #[test]
    fn test_unclosed_step_is_marked_failed() {
        let mut log = StepLogger::quiet();
        log.start_step(Stage::BuildSpec);
        log.start_step(Stage::StartStack);
        assert!(matches!(
            log.results()[0],
            (Stage::BuildSpec, StepResult::Failed { .. })
        ));
    }

    #[test]
    fn test_diagnostics_file() {
        let temp_dir = tempdir().unwrap();
        let snapshot = HealthSnapshot::new(
            vec![ServiceHealthRecord::new("cache", HealthStatus::Starting)],
            Some("docker compose up -d".to_string()),
        );
        let path = Diagnostics::new("up", 6, "timeout".to_string())
            .with_snapshot(Some(&snapshot))
            .write(&temp_dir.path().join(".stackflow"))
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["exit_code"], 6);
        assert_eq!(value["snapshot"]["records"][0]["status"], "starting");
        assert_eq!(value["snapshot"]["last_command"], "docker compose up -d");
    }
}

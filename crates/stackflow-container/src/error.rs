use crate::resolver::ProbeAttempt;
use stackflow_core::HealthSnapshot;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(
        "利用可能なコンテナエンジン / compose ドライバが見つかりません\n\n試行したプローブ:\n{}\nヒント:\n  • docker または podman がインストールされ、起動しているか確認してください\n  • docker compose プラグインか docker-compose / podman-compose をインストールしてください\n  • STACKFLOW_ENGINE=podman のようにエンジンを明示できます",
        format_attempts(.attempts)
    )]
    RuntimeDetectionFailed { attempts: Vec<ProbeAttempt> },

    #[error("未対応のコンテナエンジン '{value}'（docker / podman のいずれかを指定してください）")]
    InvalidEngine { value: String },

    #[error("プローブ失敗: {command}: {reason}")]
    ProbeFailed { command: String, reason: String },

    #[error(
        "'{command}' が期限 {deadline:?} 内に成功しませんでした（{attempts}回試行、経過 {elapsed:?}）\n最後の失敗: {}{}",
        .last_failure.as_deref().unwrap_or("（試行前に期限切れ）"),
        format_snapshot(.snapshot)
    )]
    DeadlineExceeded {
        /// 実行したコマンド（表示用の完全なコマンドライン）
        command: String,
        attempts: u32,
        elapsed: Duration,
        deadline: Duration,
        last_failure: Option<String>,
        /// 失敗時点のサービス状態（取得できた場合のみ）
        snapshot: Option<HealthSnapshot>,
    },

    #[error(
        "'{command}' が{attempts}回すべて失敗しました\n最後の失敗: {last_failure}{}",
        format_snapshot(.snapshot)
    )]
    CommandFailed {
        command: String,
        attempts: u32,
        last_failure: String,
        snapshot: Option<HealthSnapshot>,
    },

    #[error(
        "サービスの準備完了を待機中にタイムアウトしました（{timeout:?}）: 未完了 [{}]\n\n{snapshot}\n\nヒント:\n  • `stackflow status` で現在の状態を確認してください\n  • --timeout で待機時間を延ばせます",
        .pending.join(", ")
    )]
    HealthCheckTimeout {
        timeout: Duration,
        pending: Vec<String>,
        snapshot: HealthSnapshot,
    },

    #[error("プロジェクト '{project}' のコンテナ状態の取得がタイムアウトしました（{timeout:?}）")]
    ObservationTimedOut { project: String, timeout: Duration },

    #[error(
        "コンテナエンジンに接続できません: {0}\n\nヒント:\n  • Docker / Podman が起動しているか確認してください\n  • podman の場合は `systemctl --user start podman.socket` でソケットを有効にしてください"
    )]
    DockerConnectionFailed(String),

    #[error("Docker APIエラー: {0}")]
    DockerApiError(String),

    #[error("コマンドを起動できません: {program}\n理由: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("コマンドがタイムアウトしました（{timeout:?}）: {command}")]
    CommandTimedOut { command: String, timeout: Duration },

    #[error("コマンドが失敗しました（終了コード {code}）: {command}\n{stderr}")]
    NonZeroExit {
        command: String,
        code: String,
        stderr: String,
    },

    #[error(
        "docker-compose {version} のインストールに失敗しました\n取得元: {url}\n理由: {message}"
    )]
    InstallFailed {
        version: String,
        url: String,
        message: String,
    },

    #[error("IO エラー: {path}\n理由: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_snapshot(snapshot: &Option<HealthSnapshot>) -> String {
    match snapshot {
        Some(snapshot) => format!("\n\n{snapshot}"),
        None => String::new(),
    }
}

impl ContainerError {
    /// 診断用のサービス状態
    pub fn snapshot(&self) -> Option<&HealthSnapshot> {
        match self {
            ContainerError::HealthCheckTimeout { snapshot, .. } => Some(snapshot),
            ContainerError::DeadlineExceeded { snapshot, .. }
            | ContainerError::CommandFailed { snapshot, .. } => snapshot.as_ref(),
            _ => None,
        }
    }

    /// 起動失敗にサービス状態を添える（他のエラーはそのまま返す）
    pub fn with_snapshot(mut self, observed: HealthSnapshot) -> Self {
        if let ContainerError::DeadlineExceeded { snapshot, .. }
        | ContainerError::CommandFailed { snapshot, .. } = &mut self
        {
            *snapshot = Some(observed);
        }
        self
    }
}

fn format_attempts(attempts: &[ProbeAttempt]) -> String {
    attempts
        .iter()
        .map(|a| {
            let mark = if a.ok { "✓" } else { "✗" };
            format!("  {} {}: {}\n", mark, a.command, a.detail)
        })
        .collect()
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        let err_str = err.to_string();
        if err_str.contains("Connection refused") || err_str.contains("No such file or directory")
        {
            ContainerError::DockerConnectionFailed(err_str)
        } else {
            ContainerError::DockerApiError(err_str)
        }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;

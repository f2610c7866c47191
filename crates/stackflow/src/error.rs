use stackflow_config::ConfigError;
use stackflow_container::ContainerError;
use stackflow_core::{HealthSnapshot, StackError};
use std::path::PathBuf;
use thiserror::Error;

/// 1回の実行で起こりうるエラー（終了コードへの対応付けを持つ）
#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(
        "作業ディレクトリに書き込めません: {path}\n理由: {message}\n\nヒント: ディレクトリの所有者と権限を確認してください"
    )]
    WorkdirNotWritable { path: PathBuf, message: String },

    #[error(
        "ポート {port} は既に使用されています（サービス: {service}）\n\nヒント:\n  • 使用中のプロセスを確認: lsof -i :{port}\n  • 既存のスタックを停止してから再実行してください"
    )]
    PortInUse { service: String, port: u16 },

    #[error(
        "別の stackflow がこのディレクトリで実行中です（{holder}, {since} から）\n\nヒント: 実行中のプロセスがない場合は {} を削除してください",
        .path.display()
    )]
    Locked {
        holder: String,
        since: String,
        path: PathBuf,
    },

    #[error("中断されました")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// プロセスの終了コード
    pub fn exit_code(&self) -> u8 {
        match self {
            DeployError::Config(_) => 2,
            DeployError::Stack(e) => stack_exit_code(e),
            DeployError::Container(e) => container_exit_code(e),
            DeployError::WorkdirNotWritable { .. } => 7,
            DeployError::PortInUse { .. } => 2,
            DeployError::Locked { .. } => 2,
            DeployError::Interrupted => 130,
        }
    }

    /// 診断用のヘルススナップショット（起動・待機の失敗時）
    pub fn snapshot(&self) -> Option<&HealthSnapshot> {
        match self {
            DeployError::Container(e) => e.snapshot(),
            _ => None,
        }
    }
}

fn stack_exit_code(error: &StackError) -> u8 {
    if error.is_validation_failure() {
        return 4;
    }
    match error {
        StackError::InvalidInput(_)
        | StackError::ManifestLoad { .. }
        | StackError::TemplateNotFound { .. } => 2,
        StackError::PermissionDenied { .. } => 7,
        _ => 1,
    }
}

fn container_exit_code(error: &ContainerError) -> u8 {
    match error {
        ContainerError::RuntimeDetectionFailed { .. } => 3,
        ContainerError::InvalidEngine { .. } => 2,
        ContainerError::DeadlineExceeded { .. } => 5,
        ContainerError::HealthCheckTimeout { .. } => 6,
        ContainerError::CommandFailed { .. } => 8,
        ContainerError::Io { source, .. }
            if source.kind() == std::io::ErrorKind::PermissionDenied =>
        {
            7
        }
        _ => 1,
    }
}

/// anyhow のエラーから終了コードを取り出す
pub fn exit_code_of(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<DeployError>()
        .map(DeployError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        let cases: Vec<(DeployError, u8)> = vec![
            (StackError::InvalidInput("x".into()).into(), 2),
            (StackError::EmptyDescriptor.into(), 4),
            (
                StackError::MissingDigest {
                    component: "app".into(),
                    reference: "registry.local/app:1.4.2".into(),
                }
                .into(),
                4,
            ),
            (
                StackError::PermissionDenied {
                    path: PathBuf::from("/x"),
                    message: "denied".into(),
                }
                .into(),
                7,
            ),
            (
                ContainerError::RuntimeDetectionFailed { attempts: vec![] }.into(),
                3,
            ),
            (
                ContainerError::InvalidEngine {
                    value: "lxc".into(),
                }
                .into(),
                2,
            ),
            (
                ContainerError::DeadlineExceeded {
                    command: "docker compose -f stack.compose.yml -p demo up -d".into(),
                    attempts: 4,
                    elapsed: Duration::from_secs(14),
                    deadline: Duration::from_secs(30),
                    last_failure: None,
                    snapshot: None,
                }
                .into(),
                5,
            ),
            (
                ContainerError::HealthCheckTimeout {
                    timeout: Duration::from_secs(60),
                    pending: vec![],
                    snapshot: HealthSnapshot::new(vec![], None),
                }
                .into(),
                6,
            ),
            (
                ContainerError::CommandFailed {
                    command: "docker compose -f stack.compose.yml -p demo up -d".into(),
                    attempts: 3,
                    last_failure: "boom".into(),
                    snapshot: None,
                }
                .into(),
                8,
            ),
            (
                DeployError::PortInUse {
                    service: "app".into(),
                    port: 8080,
                },
                2,
            ),
            (DeployError::Interrupted, 130),
        ];

        for (error, code) in cases {
            assert_eq!(error.exit_code(), code, "{}", error);
        }
    }

    #[test]
    fn test_exit_code_through_anyhow() {
        let err: anyhow::Error = DeployError::Interrupted.into();
        assert_eq!(exit_code_of(&err), 130);
        assert_eq!(exit_code_of(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_snapshot_for_health_timeout() {
        let err: DeployError = ContainerError::HealthCheckTimeout {
            timeout: Duration::from_secs(60),
            pending: vec!["cache".into()],
            snapshot: HealthSnapshot::new(vec![], Some("docker compose up -d".into())),
        }
        .into();
        assert!(err.snapshot().is_some());
        assert!(DeployError::Interrupted.snapshot().is_none());
    }

    #[test]
    fn test_snapshot_for_start_failures() {
        let command = "docker compose -f stack.compose.yml -p demo up -d";
        let bare: DeployError = ContainerError::DeadlineExceeded {
            command: command.into(),
            attempts: 4,
            elapsed: Duration::from_secs(14),
            deadline: Duration::from_secs(30),
            last_failure: Some("connection refused".into()),
            snapshot: None,
        }
        .into();
        assert!(bare.snapshot().is_none());
        assert!(bare.to_string().contains(command));

        let observed = HealthSnapshot::new(vec![], Some(command.into()));
        let err: DeployError = ContainerError::CommandFailed {
            command: command.into(),
            attempts: 3,
            last_failure: "exit status 1".into(),
            snapshot: None,
        }
        .with_snapshot(observed)
        .into();
        let snapshot = err.snapshot().unwrap();
        assert_eq!(snapshot.last_command.as_deref(), Some(command));
    }
}

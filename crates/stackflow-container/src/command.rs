//! 外部コマンドの実行
//!
//! すべての外部プロセスは明示的なタイムアウトを持ち、Future が drop されると kill される。

use crate::error::{ContainerError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// タイムアウト未指定時の上限
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// 実行するコマンドの記述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// ログ・診断用の1行表現（`KEY=VALUE program args...`）
    pub fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// 実行結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// シグナル終了時は None
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// 失敗理由として表示する stderr（空なら stdout）の末尾
    pub fn failure_reason(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = text.trim().lines().collect();
        let tail = &lines[lines.len().saturating_sub(5)..];
        if tail.is_empty() {
            match self.code {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            }
        } else {
            tail.join("\n")
        }
    }

    /// 非ゼロ終了をエラーに変換
    pub fn into_result(self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(ContainerError::NonZeroExit {
                command: spec.display(),
                code: self
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: self.failure_reason(),
            })
        }
    }
}

/// 外部コマンド実行の抽象
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// 実プロセスを起動するランナー
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec.display(), timeout = ?spec.timeout, "Running external command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(spec.timeout, cmd.output())
            .await
            .map_err(|_| ContainerError::CommandTimedOut {
                command: spec.display(),
                timeout: spec.timeout,
            })?
            .map_err(|e| ContainerError::Spawn {
                program: spec.program.clone(),
                source: e,
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!(command = %spec.display(), code = ?result.code, "External command finished");
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! テスト用のスクリプト化されたランナー

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum Reply {
        Ok(String),
        Fail(String),
        Missing,
    }

    /// コマンドライン（`display()`）の前方一致で応答を返す
    #[derive(Default)]
    pub struct FakeRunner {
        replies: Mutex<HashMap<String, Reply>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, command: &str, reply: Reply) -> Self {
            self.replies
                .lock()
                .unwrap()
                .insert(command.to_string(), reply);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            let line = spec.display();
            self.calls.lock().unwrap().push(line.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .iter()
                .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(_, reply)| reply.clone())
                .unwrap_or(Reply::Missing);
            match reply {
                Reply::Ok(stdout) => Ok(CommandOutput {
                    code: Some(0),
                    stdout,
                    stderr: String::new(),
                }),
                Reply::Fail(stderr) => Ok(CommandOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr,
                }),
                Reply::Missing => Err(ContainerError::Spawn {
                    program: spec.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_env() {
        let spec = CommandSpec::new("docker-compose")
            .arg("version")
            .env("DOCKER_HOST", "unix:///run/podman/podman.sock");
        assert_eq!(
            spec.display(),
            "DOCKER_HOST=unix:///run/podman/podman.sock docker-compose version"
        );
    }

    #[test]
    fn test_failure_reason_prefers_stderr_tail() {
        let output = CommandOutput {
            code: Some(1),
            stdout: "ignored".to_string(),
            stderr: "a\nb\nc\nd\ne\nf\nservice \"app\" refers to undefined network\n".to_string(),
        };
        let reason = output.failure_reason();
        assert!(reason.starts_with("c\n"));
        assert!(reason.ends_with("undefined network"));
        assert_eq!(reason.lines().count(), 5);
    }

    #[test]
    fn test_into_result_maps_non_zero_exit() {
        let spec = CommandSpec::new("docker").arg("info");
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
        };
        match output.into_result(&spec) {
            Err(ContainerError::NonZeroExit { command, stderr, .. }) => {
                assert_eq!(command, "docker info");
                assert_eq!(stderr, "exit status 1");
            }
            other => panic!("Expected NonZeroExit, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let spec = CommandSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = SystemRunner.run(&spec).await.unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_times_out() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));
        assert!(matches!(
            SystemRunner.run(&spec).await,
            Err(ContainerError::CommandTimedOut { .. })
        ));
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let spec = CommandSpec::new("stackflow-definitely-missing-binary");
        assert!(matches!(
            SystemRunner.run(&spec).await,
            Err(ContainerError::Spawn { .. })
        ));
    }
}

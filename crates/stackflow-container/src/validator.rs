//! compose ドライバによる記述子の検証

use crate::command::CommandRunner;
use crate::resolver::RuntimeProfile;
use async_trait::async_trait;
use stackflow_core::{DescriptorValidator, StackError};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// compose の共通引数 `-f <file> -p <project> [--profile <p>]...`
pub fn compose_file_args(path: &Path, project: &str, profiles: &BTreeSet<String>) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        path.display().to_string(),
        "-p".to_string(),
        project.to_string(),
    ];
    for profile in profiles {
        args.push("--profile".to_string());
        args.push(profile.clone());
    }
    args
}

/// `<compose> ... config --quiet` で検証する
pub struct ComposeConfigValidator<'a> {
    profile: &'a RuntimeProfile,
    runner: &'a dyn CommandRunner,
    timeout: Duration,
}

impl<'a> ComposeConfigValidator<'a> {
    pub fn new(profile: &'a RuntimeProfile, runner: &'a dyn CommandRunner, timeout: Duration) -> Self {
        Self {
            profile,
            runner,
            timeout,
        }
    }
}

#[async_trait]
impl DescriptorValidator for ComposeConfigValidator<'_> {
    fn name(&self) -> String {
        self.profile.invocation.to_string()
    }

    async fn validate(
        &self,
        path: &Path,
        project: &str,
        profiles: &BTreeSet<String>,
    ) -> stackflow_core::Result<()> {
        let mut args = compose_file_args(path, project, profiles);
        args.extend(["config".to_string(), "--quiet".to_string()]);
        let spec = self.profile.compose_command(args, self.timeout);
        let command = spec.display();
        debug!(command = %command, "Validating descriptor");

        let rejected = |message: String| StackError::ValidationRejected {
            driver: self.profile.compose_driver.to_string(),
            command: command.clone(),
            message,
        };

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| rejected(e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            Err(rejected(output.failure_reason()))
        }
    }
}

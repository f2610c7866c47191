//! コンテナ状態の観測
//!
//! compose プロジェクトのラベルでコンテナを引き直し、サービス単位の状態に変換する。

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::engine::{EngineId, find_podman_socket, podman_socket_candidates};
use crate::error::{ContainerError, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::{ContainerStateStatusEnum, HealthStatusEnum};
use stackflow_core::HealthStatus;
use std::collections::HashMap;
use tracing::debug;

/// compose が付与するプロジェクト名ラベル
pub const PROJECT_LABEL: &str = "com.docker.compose.project";
/// compose が付与するサービス名ラベル
pub const SERVICE_LABEL: &str = "com.docker.compose.service";

/// コンテナのライフサイクル状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Removing,
}

/// コンテナのヘルスチェック結果（ヘルスチェック未定義なら None）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeHealth {
    Starting,
    Healthy,
    Unhealthy,
}

/// 1コンテナの観測結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerObservation {
    pub id: String,
    pub service: String,
    pub state: RunState,
    pub health: Option<ProbeHealth>,
}

impl ContainerObservation {
    /// サービスの状態遷移 `Absent → Starting → {Running | Unhealthy} → Healthy` に写す
    pub fn classify(&self) -> HealthStatus {
        match (self.state, self.health) {
            (RunState::Running, None) => HealthStatus::Healthy,
            (RunState::Running, Some(ProbeHealth::Healthy)) => HealthStatus::Healthy,
            (RunState::Running, Some(ProbeHealth::Starting)) => HealthStatus::Running,
            (RunState::Running, Some(ProbeHealth::Unhealthy)) => HealthStatus::Unhealthy,
            (RunState::Created | RunState::Restarting, _) => HealthStatus::Starting,
            (RunState::Paused | RunState::Exited | RunState::Dead | RunState::Removing, _) => {
                HealthStatus::Unhealthy
            }
        }
    }
}

/// コンテナ状態の取得元
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    /// プロジェクトに属する全コンテナを観測する
    async fn observe(&self, project: &str) -> Result<Vec<ContainerObservation>>;
}

/// Docker 互換 API で観測する
pub struct BollardInspector {
    docker: Docker,
}

impl BollardInspector {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// エンジンに合わせて API に接続する
    ///
    /// podman の場合は Docker 互換ソケットへ接続する。
    pub fn connect(engine: EngineId) -> Result<Self> {
        let docker = match engine {
            EngineId::Docker => Docker::connect_with_local_defaults()?,
            EngineId::Podman => {
                let socket = find_podman_socket(&podman_socket_candidates()).ok_or_else(|| {
                    ContainerError::DockerConnectionFailed(
                        "podman ソケットが見つかりません".to_string(),
                    )
                })?;
                Docker::connect_with_unix(
                    &socket.display().to_string(),
                    120,
                    bollard::API_DEFAULT_VERSION,
                )?
            }
        };
        Ok(Self::new(docker))
    }

    /// 一覧取得後に削除されたコンテナは None
    async fn inspect(&self, id: &str, service: String) -> Result<Option<ContainerObservation>> {
        let info = match self
            .docker
            .inspect_container(id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
        {
            Ok(info) => info,
            Err(e) if is_not_found(&e) => {
                debug!(container = %id, "Container disappeared during inspection");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(state) = info.state else {
            return Ok(None);
        };

        let run_state = match state.status {
            Some(ContainerStateStatusEnum::RUNNING) => RunState::Running,
            Some(ContainerStateStatusEnum::RESTARTING) => RunState::Restarting,
            Some(ContainerStateStatusEnum::PAUSED) => RunState::Paused,
            Some(ContainerStateStatusEnum::EXITED) => RunState::Exited,
            Some(ContainerStateStatusEnum::DEAD) => RunState::Dead,
            Some(ContainerStateStatusEnum::REMOVING) => RunState::Removing,
            Some(ContainerStateStatusEnum::CREATED) => RunState::Created,
            _ if state.running.unwrap_or(false) => RunState::Running,
            _ => RunState::Created,
        };

        let health = state
            .health
            .and_then(|h| h.status)
            .and_then(|status| match status {
                HealthStatusEnum::STARTING => Some(ProbeHealth::Starting),
                HealthStatusEnum::HEALTHY => Some(ProbeHealth::Healthy),
                HealthStatusEnum::UNHEALTHY => Some(ProbeHealth::Unhealthy),
                _ => None,
            });

        Ok(Some(ContainerObservation {
            id: id.to_string(),
            service,
            state: run_state,
            health,
        }))
    }
}

#[async_trait]
impl ContainerInspector for BollardInspector {
    async fn observe(&self, project: &str) -> Result<Vec<ContainerObservation>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", PROJECT_LABEL, project)],
        );

        let options = bollard::container::ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        debug!(project, count = containers.len(), "Listed project containers");

        let mut observations = Vec::with_capacity(containers.len());
        for container in containers {
            let (Some(id), Some(service)) = (
                container.id,
                container
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(SERVICE_LABEL))
                    .cloned(),
            ) else {
                continue;
            };
            if let Some(observation) = self.inspect(&id, service).await? {
                observations.push(observation);
            }
        }
        Ok(observations)
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(state: RunState, health: Option<ProbeHealth>) -> ContainerObservation {
        ContainerObservation {
            id: "c0ffee".to_string(),
            service: "app".to_string(),
            state,
            health,
        }
    }

    #[test]
    fn test_running_without_healthcheck_is_healthy() {
        assert_eq!(
            observation(RunState::Running, None).classify(),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_health_probe_states() {
        assert_eq!(
            observation(RunState::Running, Some(ProbeHealth::Starting)).classify(),
            HealthStatus::Running
        );
        assert_eq!(
            observation(RunState::Running, Some(ProbeHealth::Healthy)).classify(),
            HealthStatus::Healthy
        );
        assert_eq!(
            observation(RunState::Running, Some(ProbeHealth::Unhealthy)).classify(),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_missing_container_is_recognized_by_status() {
        let gone = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: c0ffee".to_string(),
        };
        assert!(is_not_found(&gone));

        // 本文に 404 を含んでいても状態コードが違えば別の失敗
        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "container c0ffee404 is being removed".to_string(),
        };
        assert!(!is_not_found(&conflict));
        assert!(matches!(
            ContainerError::from(conflict),
            ContainerError::DockerApiError(_)
        ));
    }

    #[test]
    fn test_lifecycle_states() {
        assert_eq!(
            observation(RunState::Created, None).classify(),
            HealthStatus::Starting
        );
        assert_eq!(
            observation(RunState::Restarting, Some(ProbeHealth::Healthy)).classify(),
            HealthStatus::Starting
        );
        assert_eq!(
            observation(RunState::Exited, None).classify(),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            observation(RunState::Dead, None).classify(),
            HealthStatus::Unhealthy
        );
    }
}

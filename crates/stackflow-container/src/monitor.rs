//! クラスタのヘルス監視
//!
//! ポーリングのたびにコンテナを引き直してサービスの記録を作り直す。
//! 準備完了の判定は最新の記録集合だけで決まる。
//! 1回の観測はポーリング間隔と残り時間の短い方で打ち切る。

use crate::error::{ContainerError, Result};
use crate::inspector::{ContainerInspector, ContainerObservation};
use stackflow_core::{HealthSnapshot, HealthStatus, ServiceHealthRecord, all_healthy};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// 1回の観測に与える最短の時間
const MIN_OBSERVE_TIMEOUT: Duration = Duration::from_secs(1);

/// 監視対象
#[derive(Debug, Clone)]
pub struct MonitorTarget {
    pub project: String,
    /// Healthy になるまで待つサービス
    pub required: Vec<String>,
    /// スナップショットに含めるサービス（required を含む）
    pub managed: Vec<String>,
}

/// ヘルス監視
pub struct ClusterHealthMonitor<'a> {
    inspector: &'a dyn ContainerInspector,
    last_command: Option<String>,
}

impl<'a> ClusterHealthMonitor<'a> {
    pub fn new(inspector: &'a dyn ContainerInspector) -> Self {
        Self {
            inspector,
            last_command: None,
        }
    }

    /// スナップショットに記録する直前の外部コマンド
    pub fn with_last_command(mut self, command: impl Into<String>) -> Self {
        self.last_command = Some(command.into());
        self
    }

    /// 1回分の観測（観測エラーはそのまま返す）
    pub async fn snapshot(&self, target: &MonitorTarget) -> Result<HealthSnapshot> {
        let observations = self.inspector.observe(&target.project).await?;
        Ok(HealthSnapshot::new(
            build_records(&target.managed, &observations),
            self.last_command.clone(),
        ))
    }

    /// `limit` 内に終わらない観測は `ObservationTimedOut`
    pub async fn snapshot_within(
        &self,
        target: &MonitorTarget,
        limit: Duration,
    ) -> Result<HealthSnapshot> {
        tokio::time::timeout(limit, self.snapshot(target))
            .await
            .map_err(|_| ContainerError::ObservationTimedOut {
                project: target.project.clone(),
                timeout: limit,
            })?
    }

    /// 必須サービスがすべて Healthy になるまで待つ
    ///
    /// `timeout` を過ぎると最後のスナップショットを含む `HealthCheckTimeout` を返す。
    /// 観測エラーは一時的なものとして扱い、ポーリングを続ける。
    #[tracing::instrument(skip(self, target), fields(project = %target.project))]
    pub async fn await_healthy(
        &self,
        target: &MonitorTarget,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<HealthSnapshot> {
        let started = Instant::now();
        let mut last = HealthSnapshot::new(
            target
                .managed
                .iter()
                .map(ServiceHealthRecord::absent)
                .collect(),
            self.last_command.clone(),
        );

        loop {
            let limit = poll_interval
                .min(timeout.saturating_sub(started.elapsed()))
                .max(MIN_OBSERVE_TIMEOUT);
            match self.snapshot_within(target, limit).await {
                Ok(snapshot) => {
                    if all_healthy(&target.required, &snapshot.records) {
                        info!(elapsed = ?started.elapsed(), "All required services are healthy");
                        return Ok(snapshot);
                    }
                    debug!(
                        pending = ?snapshot.pending(&target.required),
                        "Waiting for services"
                    );
                    last = snapshot;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to observe containers; will retry");
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                let pending = last
                    .pending(&target.required)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                return Err(ContainerError::HealthCheckTimeout {
                    timeout,
                    pending,
                    snapshot: last,
                });
            }
            sleep(poll_interval.min(timeout - elapsed)).await;
        }
    }
}

/// 観測結果からサービスごとの記録を作る
///
/// 複数コンテナを持つサービスは最も悪い状態を採用する。
pub fn build_records(
    managed: &[String],
    observations: &[ContainerObservation],
) -> Vec<ServiceHealthRecord> {
    let mut by_service: BTreeMap<&str, (HealthStatus, &str)> = BTreeMap::new();
    for obs in observations {
        let status = obs.classify();
        by_service
            .entry(obs.service.as_str())
            .and_modify(|(current, id)| {
                let worst = current.worst(status);
                if worst != *current {
                    *current = worst;
                    *id = obs.id.as_str();
                }
            })
            .or_insert((status, obs.id.as_str()));
    }

    managed
        .iter()
        .map(|name| match by_service.get(name.as_str()) {
            Some((status, id)) => ServiceHealthRecord::new(name, *status).with_container(*id),
            None => ServiceHealthRecord::absent(name),
        })
        .collect()
}

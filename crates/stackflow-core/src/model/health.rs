//! サービスのヘルス記録
//!
//! 記録はポーリングのたびに新しく作られ、永続化されない。
//! クラスタの準備完了判定は現在の記録集合だけから決まる純粋関数。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// サービスの観測状態
///
/// `Absent → Starting → {Running | Unhealthy} → Healthy`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// コンテナがまだ存在しない
    Absent,
    /// 作成済みだが起動途中
    Starting,
    /// 起動中（ヘルスチェック未通過）
    Running,
    /// ヘルスチェック失敗、または停止
    Unhealthy,
    /// 準備完了
    Healthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Unhealthy => "unhealthy",
            Self::Healthy => "healthy",
        }
    }

    /// 複数コンテナを束ねるときの優先度（小さいほど悪い）
    fn rank(&self) -> u8 {
        match self {
            Self::Unhealthy => 0,
            Self::Absent => 1,
            Self::Starting => 2,
            Self::Running => 3,
            Self::Healthy => 4,
        }
    }

    /// より悪い方を返す
    pub fn worst(self, other: Self) -> Self {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1サービス分の時点観測
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealthRecord {
    pub name: String,
    pub container_id: Option<String>,
    pub status: HealthStatus,
    pub last_observed_at: DateTime<Utc>,
}

impl ServiceHealthRecord {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            container_id: None,
            status,
            last_observed_at: Utc::now(),
        }
    }

    pub fn absent(name: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Absent)
    }

    pub fn with_container(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(id.into());
        self
    }
}

/// 必須サービスがすべて Healthy か
///
/// 記録が存在しない必須サービスは Healthy とみなさない。
pub fn all_healthy(required: &[String], records: &[ServiceHealthRecord]) -> bool {
    required.iter().all(|name| {
        records
            .iter()
            .find(|r| &r.name == name)
            .is_some_and(|r| r.status == HealthStatus::Healthy)
    })
}

/// 障害調査用のスナップショット
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// 管理対象の全サービス（必須でないものも含む）
    pub records: Vec<ServiceHealthRecord>,
    /// 最後に実行した外部コマンド
    pub last_command: Option<String>,
    pub taken_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn new(records: Vec<ServiceHealthRecord>, last_command: Option<String>) -> Self {
        Self {
            records,
            last_command,
            taken_at: Utc::now(),
        }
    }

    pub fn status_of(&self, name: &str) -> Option<HealthStatus> {
        self.records.iter().find(|r| r.name == name).map(|r| r.status)
    }

    /// 必須サービスのうち Healthy でないもの
    pub fn pending<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| self.status_of(name) != Some(HealthStatus::Healthy))
            .map(String::as_str)
            .collect()
    }
}

impl fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<28} {:<12} {:<14}", "SERVICE", "STATUS", "CONTAINER")?;
        for record in &self.records {
            let id = record
                .container_id
                .as_deref()
                .map(|id| &id[..id.len().min(12)])
                .unwrap_or("-");
            writeln!(f, "{:<28} {:<12} {:<14}", record.name, record.status, id)?;
        }
        match &self.last_command {
            Some(cmd) => write!(f, "last command: {}", cmd),
            None => write!(f, "last command: -"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_all_healthy_true_when_every_required_is_healthy() {
        let records = vec![
            ServiceHealthRecord::new("app", HealthStatus::Healthy),
            ServiceHealthRecord::new("cache", HealthStatus::Healthy),
            ServiceHealthRecord::new("dashboard", HealthStatus::Starting),
        ];
        // dashboard は必須ではない
        assert!(all_healthy(&required(&["app", "cache"]), &records));
    }

    #[test]
    fn test_single_unhealthy_or_absent_breaks_predicate() {
        for bad in [
            HealthStatus::Unhealthy,
            HealthStatus::Absent,
            HealthStatus::Starting,
            HealthStatus::Running,
        ] {
            let records = vec![
                ServiceHealthRecord::new("app", HealthStatus::Healthy),
                ServiceHealthRecord::new("cache", bad),
            ];
            assert!(!all_healthy(&required(&["app", "cache"]), &records), "{bad}");
        }
    }

    #[test]
    fn test_missing_record_is_not_healthy() {
        let records = vec![ServiceHealthRecord::new("app", HealthStatus::Healthy)];
        assert!(!all_healthy(&required(&["app", "cache"]), &records));
    }

    #[test]
    fn test_worst_status() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Starting),
            HealthStatus::Starting
        );
        assert_eq!(
            HealthStatus::Absent.worst(HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Running.worst(HealthStatus::Healthy),
            HealthStatus::Running
        );
    }

    #[test]
    fn test_snapshot_table() {
        let snapshot = HealthSnapshot::new(
            vec![
                ServiceHealthRecord::new("app", HealthStatus::Healthy)
                    .with_container("0123456789abcdef"),
                ServiceHealthRecord::absent("cache"),
            ],
            Some("docker inspect 0123456789ab".to_string()),
        );
        let table = snapshot.to_string();
        assert!(table.contains("0123456789ab "));
        assert!(table.contains("absent"));
        assert!(table.contains("last command: docker inspect"));
        assert_eq!(snapshot.pending(&required(&["app", "cache"])), vec!["cache"]);
    }
}

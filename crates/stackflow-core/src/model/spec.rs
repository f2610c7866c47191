//! スタック記述子（compose 形式）のモデル

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// 生成記録を格納する拡張フィールド名
pub const METADATA_KEY: &str = "x-stackflow";

/// 検証状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Passed,
}

/// 生成の出自
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecMetadata {
    pub generated_at: DateTime<Utc>,
    pub generator: String,
    pub validation_status: ValidationStatus,
    pub template: String,
    pub pinned: bool,
}

/// compose サービス定義
///
/// stackflow が解釈するフィールド以外は `extra` にそのまま保持する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDef {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<serde_yaml::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ServiceDef {
    /// 有効なプロファイル集合のもとで起動対象になるか
    pub fn is_active(&self, active_profiles: &BTreeSet<String>) -> bool {
        self.profiles.is_empty() || self.profiles.iter().any(|p| active_profiles.contains(p))
    }

    pub fn has_healthcheck(&self) -> bool {
        match &self.healthcheck {
            Some(serde_yaml::Value::Mapping(map)) => !map
                .get("disable")
                .and_then(serde_yaml::Value::as_bool)
                .unwrap_or(false),
            Some(_) => true,
            None => false,
        }
    }

    /// ホスト側に公開されるポート
    ///
    /// 短縮形 `"8080:80"` / `"127.0.0.1:8080:80/tcp"` と
    /// 長形式 `{ published: 8080 }` を解釈する。範囲指定は対象外。
    pub fn published_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter_map(|port| match port {
                serde_yaml::Value::String(s) => parse_short_port(s),
                serde_yaml::Value::Mapping(map) => match map.get("published") {
                    Some(serde_yaml::Value::Number(n)) => {
                        n.as_u64().and_then(|n| u16::try_from(n).ok())
                    }
                    Some(serde_yaml::Value::String(s)) => s.parse().ok(),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }
}

fn parse_short_port(spec: &str) -> Option<u16> {
    let spec = spec.split('/').next()?;
    let parts: Vec<&str> = spec.rsplitn(3, ':').collect();
    // rsplitn なので [container, host, ip] の順
    match parts.as_slice() {
        [_container, host] | [_container, host, _] => host.parse().ok(),
        _ => None,
    }
}

/// compose ドキュメント全体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeDocument {
    pub services: BTreeMap<String, ServiceDef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, serde_yaml::Value>,
    #[serde(
        rename = "x-stackflow",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata: Option<SpecMetadata>,
    /// configs / secrets など stackflow が解釈しないトップレベル要素
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// ビルド済みのスタック仕様
///
/// 書き出し後は変更しない。再生成のたびに新しい値で上書きされる。
#[derive(Debug, Clone, PartialEq)]
pub struct StackSpec {
    pub project: String,
    pub document: ComposeDocument,
    pub profiles: BTreeSet<String>,
    pub path: PathBuf,
}

impl StackSpec {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> Option<&SpecMetadata> {
        self.document.metadata.as_ref()
    }

    pub fn services(&self) -> impl Iterator<Item = (&String, &ServiceDef)> {
        self.document.services.iter()
    }

    /// 記述子に定義された全サービス
    pub fn service_names(&self) -> Vec<String> {
        self.document.services.keys().cloned().collect()
    }

    /// 有効プロファイルのもとで起動されるサービス
    pub fn active_services(&self) -> Vec<String> {
        self.document
            .services
            .iter()
            .filter(|(_, svc)| svc.is_active(&self.profiles))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// 起動対象サービスが公開するホストポート
    pub fn published_ports(&self) -> Vec<(String, u16)> {
        self.document
            .services
            .iter()
            .filter(|(_, svc)| svc.is_active(&self.profiles))
            .flat_map(|(name, svc)| {
                svc.published_ports()
                    .into_iter()
                    .map(move |port| (name.clone(), port))
            })
            .collect()
    }
}

//! バージョンマニフェスト
//!
//! 論理コンポーネント名（app, cache, metrics-collector など）から
//! イメージのリポジトリ・タグ・ダイジェストへの対応表。

use crate::error::{Result, StackError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const DIGEST_PREFIX: &str = "sha256:";
const DIGEST_HEX_LEN: usize = 64;

/// 1コンポーネント分のイメージ情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub repository: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ImageEntry {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
            digest: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// 可変なタグ参照 `repository:tag`
    pub fn tagged_reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    /// 固定参照 `repository@sha256:<hex>`
    pub fn pinned_reference(&self, component: &str) -> Result<String> {
        let digest = self
            .digest
            .as_deref()
            .ok_or_else(|| StackError::MissingDigest {
                component: component.to_string(),
                reference: self.tagged_reference(),
            })?;
        let hex = normalize_digest(digest).ok_or_else(|| StackError::MalformedDigest {
            component: component.to_string(),
            digest: digest.to_string(),
        })?;
        Ok(format!("{}@{}{}", self.repository, DIGEST_PREFIX, hex))
    }

    fn check(&self, component: &str) -> Result<()> {
        if self.repository.trim().is_empty() {
            return Err(StackError::InvalidInput(format!(
                "コンポーネント '{}' の repository が空です",
                component
            )));
        }
        if self.repository.contains('@') || self.repository.chars().any(char::is_whitespace) {
            return Err(StackError::InvalidInput(format!(
                "コンポーネント '{}' の repository '{}' にタグやダイジェストを含めないでください",
                component, self.repository
            )));
        }
        if self.tag.trim().is_empty() || self.tag.contains(':') || self.tag.contains('@') {
            return Err(StackError::InvalidInput(format!(
                "コンポーネント '{}' の tag '{}' が不正です",
                component, self.tag
            )));
        }
        Ok(())
    }
}

/// `sha256:<hex>` または `<hex>` を小文字の64桁16進に正規化
pub fn normalize_digest(digest: &str) -> Option<String> {
    let hex = digest.trim();
    let hex = hex.strip_prefix(DIGEST_PREFIX).unwrap_or(hex);
    let hex = hex.to_ascii_lowercase();
    if hex.len() == DIGEST_HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hex)
    } else {
        None
    }
}

/// 参照が `repo@sha256:<64桁の小文字16進>` 形式か
pub fn is_pinned_reference(reference: &str) -> bool {
    match reference.split_once('@') {
        Some((repo, digest)) => {
            !repo.is_empty()
                && digest
                    .strip_prefix(DIGEST_PREFIX)
                    .is_some_and(|hex| {
                        hex.len() == DIGEST_HEX_LEN
                            && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
                    })
        }
        None => false,
    }
}

/// バージョンマニフェスト（読み取り専用の入力）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionManifest {
    entries: BTreeMap<String, ImageEntry>,
}

impl VersionManifest {
    pub fn new(entries: BTreeMap<String, ImageEntry>) -> Result<Self> {
        let manifest = Self { entries };
        manifest.check()?;
        Ok(manifest)
    }

    /// YAML（JSON も可）のファイルから読み込む
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StackError::ManifestLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            StackError::InvalidInput(message) => StackError::ManifestLoad {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let entries: BTreeMap<String, ImageEntry> = serde_yaml::from_str(content)
            .map_err(|e| StackError::InvalidInput(format!("マニフェストの形式が不正です: {}", e)))?;
        Self::new(entries)
    }

    fn check(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(StackError::InvalidInput(
                "マニフェストにコンポーネントがありません".to_string(),
            ));
        }
        for (component, entry) in &self.entries {
            entry.check(component)?;
        }
        Ok(())
    }

    pub fn get(&self, component: &str) -> Option<&ImageEntry> {
        self.entries.get(component)
    }

    pub fn contains(&self, component: &str) -> bool {
        self.entries.contains_key(component)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ImageEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 全コンポーネントのイメージ参照を解決する
    ///
    /// `pin` が true の場合、ダイジェストのないエントリが1つでもあれば失敗する
    /// （タグ参照へ黙ってフォールバックしない）。
    pub fn resolve_references(&self, pin: bool) -> Result<BTreeMap<String, String>> {
        self.entries
            .iter()
            .map(|(component, entry)| {
                let reference = if pin {
                    entry.pinned_reference(component)?
                } else {
                    entry.tagged_reference()
                };
                Ok((component.clone(), reference))
            })
            .collect()
    }
}

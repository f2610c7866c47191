//! stackflow の設定管理
//!
//! 設定ファイルの探索・読み込みと、環境変数による上書きを提供します。

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 設定ファイルパスを直接指定する環境変数
pub const CONFIG_PATH_ENV: &str = "STACKFLOW_CONFIG_PATH";
/// エンジン候補順の上書き（カンマ区切り: `podman,docker`）
pub const ENGINE_ENV: &str = "STACKFLOW_ENGINE";
/// プロジェクト名の上書き
pub const PROJECT_ENV: &str = "STACKFLOW_PROJECT";
/// サイズテンプレートの上書き
pub const SIZE_ENV: &str = "STACKFLOW_SIZE";
/// バージョンマニフェストパスの上書き
pub const MANIFEST_ENV: &str = "STACKFLOW_MANIFEST";

/// 作業ディレクトリ内の状態ディレクトリ名
pub const STATE_DIR: &str = ".stackflow";

const CANDIDATES: [&str; 2] = ["stackflow.local.yml", "stackflow.yml"];

/// stackflow 全体の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// compose プロジェクト名（コンテナのラベルにも使われる）
    pub project: String,
    /// サイズテンプレート名（small / medium / large）
    pub size: String,
    /// 独自テンプレートのパス（指定時は size より優先）
    pub template: Option<PathBuf>,
    /// バージョンマニフェストのパス
    pub manifest: PathBuf,
    /// 生成するスタック記述子のファイル名
    pub descriptor: PathBuf,
    /// エンジン候補順（空ならプラットフォーム既定）
    pub engines: Vec<String>,
    /// イメージをダイジェストで固定するか
    pub pin_digests: bool,
    /// monitoring プロファイルを有効にするか
    pub monitoring: bool,
    /// 起動後にヘルス確認まで待機するか
    pub wait: bool,
    /// エンジン・ドライバのプローブ1回あたりのタイムアウト（秒）
    pub probe_timeout_secs: u64,
    pub health: HealthSettings,
    pub start: RetrySettings,
    pub compose: ComposeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project: "stackflow".to_string(),
            size: "small".to_string(),
            template: None,
            manifest: PathBuf::from("versions.yml"),
            descriptor: PathBuf::from("stack.compose.yml"),
            engines: Vec::new(),
            pin_digests: true,
            monitoring: true,
            wait: true,
            probe_timeout_secs: 15,
            health: HealthSettings::default(),
            start: RetrySettings::default(),
            compose: ComposeSettings::default(),
        }
    }
}

/// ヘルス待機の設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// 全サービスが healthy になるまでの上限（秒）
    pub timeout_secs: u64,
    /// ポーリング間隔（秒）
    pub poll_interval_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

/// 起動コマンドのリトライ設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// 最大試行回数
    pub max_attempts: u32,
    /// 初期待機時間（ミリ秒）
    pub base_delay_ms: u64,
    /// 最大待機時間（ミリ秒）
    pub max_delay_ms: u64,
    /// 全体の期限（秒）
    pub deadline_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2000,
            max_delay_ms: 20000,
            deadline_secs: 300,
        }
    }
}

/// compose ドライバの設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeSettings {
    /// 他の候補がすべて失敗した場合に固定バージョンを自動インストールするか
    pub allow_install: bool,
    /// 自動インストール先（未指定なら `default_install_dir()`）
    pub install_dir: Option<PathBuf>,
    /// 自動インストールする docker-compose のバージョン
    pub version: String,
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            allow_install: true,
            install_dir: None,
            version: "2.29.7".to_string(),
        }
    }
}

impl Settings {
    /// 指定ディレクトリを起点に設定を探索して読み込み、環境変数の上書きを適用する
    ///
    /// 設定ファイルが見つからない場合は既定値を使う。
    pub fn load_from_dir(dir: &Path) -> Result<(Self, Option<PathBuf>)> {
        let path = find_settings_file_in(dir);
        let mut settings = match &path {
            Some(p) => Self::from_path(p)?,
            None => {
                debug!("No settings file found, using defaults");
                Self::default()
            }
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok((settings, path))
    }

    /// ファイルから読み込む（環境変数は適用しない）
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    fn from_yaml_str(content: &str) -> std::result::Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    /// STACKFLOW_* 環境変数で上書き
    pub fn apply_env_overrides(&mut self) {
        if let Ok(engines) = std::env::var(ENGINE_ENV) {
            let parsed = parse_engine_list(&engines);
            if !parsed.is_empty() {
                debug!(engines = ?parsed, "Engine order overridden by environment");
                self.engines = parsed;
            }
        }
        if let Ok(project) = std::env::var(PROJECT_ENV)
            && !project.trim().is_empty()
        {
            self.project = project.trim().to_string();
        }
        if let Ok(size) = std::env::var(SIZE_ENV)
            && !size.trim().is_empty()
        {
            self.size = size.trim().to_string();
        }
        if let Ok(manifest) = std::env::var(MANIFEST_ENV)
            && !manifest.trim().is_empty()
        {
            self.manifest = PathBuf::from(manifest.trim());
        }
    }

    /// 値の整合性を検証
    pub fn validate(&self) -> Result<()> {
        if self.project.is_empty()
            || !self
                .project
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidValue {
                field: "project",
                value: self.project.clone(),
                reason: "英小文字・数字・'-'・'_' のみ使用できます".to_string(),
            });
        }
        if self.start.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "start.max_attempts",
                value: "0".to_string(),
                reason: "1 以上を指定してください".to_string(),
            });
        }
        if self.start.base_delay_ms > self.start.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "start.base_delay_ms",
                value: self.start.base_delay_ms.to_string(),
                reason: format!(
                    "max_delay_ms ({}) 以下である必要があります",
                    self.start.max_delay_ms
                ),
            });
        }
        if self.health.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health.poll_interval_secs",
                value: "0".to_string(),
                reason: "1 以上を指定してください".to_string(),
            });
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "probe_timeout_secs",
                value: "0".to_string(),
                reason: "1 以上を指定してください".to_string(),
            });
        }
        Ok(())
    }

    /// 自動インストール先ディレクトリ
    pub fn install_dir(&self) -> Option<PathBuf> {
        self.compose.install_dir.clone().or_else(default_install_dir)
    }
}

/// カンマ区切りのエンジン名リストを正規化
pub fn parse_engine_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// stackflow のグローバル設定ディレクトリ（~/.config/stackflow）
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow"))
}

/// compose フォールバックバイナリの既定インストール先
pub fn default_install_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("stackflow").join("bin"))
}

/// 作業ディレクトリ内の状態ディレクトリ
pub fn state_dir(workdir: &Path) -> PathBuf {
    workdir.join(STATE_DIR)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STACKFLOW_CONFIG_PATH (直接パス指定)
/// 2. 指定ディレクトリ: stackflow.local.yml, stackflow.yml
/// 3. ./.stackflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/stackflow/stackflow.yml (グローバル設定)
pub fn find_settings_file_in(dir: &Path) -> Option<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Some(path);
        }
    }

    for filename in &CANDIDATES {
        let path = dir.join(filename);
        if path.exists() {
            return Some(path);
        }
    }

    let state = state_dir(dir);
    if state.is_dir() {
        for filename in &CANDIDATES {
            let path = state.join(filename);
            if path.exists() {
                return Some(path);
            }
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global = config_dir.join("stackflow.yml");
        if global.exists() {
            return Some(global);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.pin_digests);
        assert_eq!(settings.start.max_attempts, 5);
    }

    #[test]
    #[serial]
    fn test_find_settings_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("stackflow.yml"), "project: base\n").unwrap();
        fs::write(temp_dir.path().join("stackflow.local.yml"), "project: local\n").unwrap();

        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            let found = find_settings_file_in(temp_dir.path()).unwrap();
            assert!(found.ends_with("stackflow.local.yml"));
        });
    }

    #[test]
    #[serial]
    fn test_find_settings_in_state_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = temp_dir.path().join(STATE_DIR);
        fs::create_dir(&state).unwrap();
        fs::write(state.join("stackflow.yml"), "size: medium\n").unwrap();

        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            let found = find_settings_file_in(temp_dir.path()).unwrap();
            assert!(found.ends_with(".stackflow/stackflow.yml"));
        });
    }

    #[test]
    #[serial]
    fn test_env_path_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom = temp_dir.path().join("custom.yml");
        fs::write(&custom, "project: custom\n").unwrap();
        fs::write(temp_dir.path().join("stackflow.yml"), "project: base\n").unwrap();

        temp_env::with_var(CONFIG_PATH_ENV, Some(custom.to_str().unwrap()), || {
            let found = find_settings_file_in(temp_dir.path()).unwrap();
            assert_eq!(found, custom);
        });
    }

    #[test]
    #[serial]
    fn test_load_partial_file_keeps_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(
            temp_dir.path().join("stackflow.yml"),
            "project: search\nstart:\n  max_attempts: 3\n",
        )
        .unwrap();

        temp_env::with_vars_unset(
            [CONFIG_PATH_ENV, ENGINE_ENV, PROJECT_ENV, SIZE_ENV, MANIFEST_ENV],
            || {
                let (settings, path) = Settings::load_from_dir(temp_dir.path()).unwrap();
                assert!(path.is_some());
                assert_eq!(settings.project, "search");
                assert_eq!(settings.start.max_attempts, 3);
                assert_eq!(settings.start.base_delay_ms, 2000);
                assert_eq!(settings.size, "small");
            },
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let temp_dir = tempfile::tempdir().unwrap();

        temp_env::with_vars(
            [
                (CONFIG_PATH_ENV, None),
                (ENGINE_ENV, Some("Podman, docker")),
                (PROJECT_ENV, Some("override")),
                (SIZE_ENV, Some("large")),
                (MANIFEST_ENV, None),
            ],
            || {
                let (settings, _) = Settings::load_from_dir(temp_dir.path()).unwrap();
                assert_eq!(settings.engines, vec!["podman", "docker"]);
                assert_eq!(settings.project, "override");
                assert_eq!(settings.size, "large");
            },
        );
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut settings = Settings::default();
        settings.start.base_delay_ms = 30_000;
        settings.start.max_delay_ms = 1_000;

        match settings.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "start.base_delay_ms")
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_project_name() {
        let settings = Settings {
            project: "My Project".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_error_reports_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("stackflow.yml");
        fs::write(&path, "start: [not, a, map]\n").unwrap();

        let err = Settings::from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("stackflow.yml"));
    }

    #[test]
    fn test_parse_engine_list() {
        assert_eq!(parse_engine_list("docker"), vec!["docker"]);
        assert_eq!(parse_engine_list(" PODMAN ,,docker "), vec!["podman", "docker"]);
        assert!(parse_engine_list("").is_empty());
    }
}

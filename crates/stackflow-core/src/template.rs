//! テンプレート展開機能
//!
//! Teraを使用してスタック記述子のテンプレートを展開します。

use crate::error::{Result, StackError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use tracing::debug;

/// 組み込みのサイズテンプレート
pub const BUILTIN_SIZES: &[&str] = &["small", "medium", "large"];

const SMALL: &str = include_str!("../templates/small.yml");
const MEDIUM: &str = include_str!("../templates/medium.yml");
const LARGE: &str = include_str!("../templates/large.yml");

/// 組み込みテンプレートのソースを取得
pub fn builtin_template(size: &str) -> Option<&'static str> {
    match size {
        "small" => Some(SMALL),
        "medium" => Some(MEDIUM),
        "large" => Some(LARGE),
        _ => None,
    }
}

/// テンプレートの取得元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// 組み込みのサイズテンプレート
    Builtin(String),
    /// ユーザー指定のテンプレートファイル
    File(PathBuf),
}

impl TemplateSource {
    /// サイズ名から組み込みテンプレートを選ぶ
    pub fn builtin(size: impl Into<String>) -> Result<Self> {
        let size = size.into();
        if builtin_template(&size).is_none() {
            return Err(StackError::TemplateNotFound {
                template: size,
                available: BUILTIN_SIZES.join(", "),
            });
        }
        Ok(Self::Builtin(size))
    }

    /// 記録用の名前（`builtin:<size>` またはファイルパス）
    pub fn name(&self) -> String {
        match self {
            Self::Builtin(size) => format!("builtin:{}", size),
            Self::File(path) => path.display().to_string(),
        }
    }

    /// テンプレート本文を読み込む
    pub fn load(&self) -> Result<String> {
        match self {
            Self::Builtin(size) => builtin_template(size)
                .map(str::to_string)
                .ok_or_else(|| StackError::TemplateNotFound {
                    template: size.clone(),
                    available: BUILTIN_SIZES.join(", "),
                }),
            Self::File(path) => read_template_file(path),
        }
    }
}

fn read_template_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StackError::TemplateNotFound {
                template: path.display().to_string(),
                available: BUILTIN_SIZES.join(", "),
            }
        } else {
            StackError::io(path, e)
        }
    })
}

/// テンプレートプロセッサ
pub struct TemplateProcessor {
    tera: Tera,
    context: Context,
}

impl TemplateProcessor {
    /// 新しいテンプレートプロセッサを作成
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    /// 変数を追加
    pub fn add_variable(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.context.insert(key.into(), &value);
    }

    /// コンポーネント名 → イメージ参照を `images` として公開
    pub fn set_images(&mut self, images: &BTreeMap<String, String>) {
        debug!(count = images.len(), "Setting image references");
        self.context.insert("images", images);
    }

    /// 文字列をテンプレートとして展開
    pub fn render_str(&mut self, template_name: &str, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| StackError::TemplateRender {
                template: template_name.to_string(),
                message: extract_tera_error_detail(&e),
            })
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Teraエラーから詳細情報を抽出
fn extract_tera_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    let full_error = details.join(" | ");

    if full_error.contains("not found in context")
        && let Some(start) = full_error.find("Variable `")
        && let Some(end) = full_error[start..].find("` not found")
    {
        let var_name = &full_error[start + 10..start + end];
        if var_name.starts_with("images") {
            return format!(
                "未定義のイメージ参照: `{}`\nヒント: バージョンマニフェストにコンポーネントを追加してください",
                var_name
            );
        }
        return format!("未定義の変数: `{}`", var_name);
    }

    full_error
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor_with_images() -> TemplateProcessor {
        let mut processor = TemplateProcessor::new();
        let images: BTreeMap<String, String> = [
            ("app", "x:1.0"),
            ("cache", "redis:7"),
            ("metrics-collector", "prom/prometheus:v2.54.1"),
            ("dashboard", "grafana/grafana:11.2.0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        processor.set_images(&images);
        processor.add_variable("project", serde_json::json!("demo"));
        processor.add_variable("size", serde_json::json!("small"));
        processor.add_variable("monitoring", serde_json::json!(true));
        processor
    }

    #[test]
    fn test_simple_variable_expansion() {
        let mut processor = TemplateProcessor::new();
        processor.add_variable("name", serde_json::Value::String("world".to_string()));

        let result = processor.render_str("inline", "Hello {{ name }}!").unwrap();
        assert_eq!(result, "Hello world!");
    }

    #[test]
    fn test_bracket_image_lookup() {
        let mut processor = processor_with_images();
        let result = processor
            .render_str("inline", r#"image: {{ images["metrics-collector"] }}"#)
            .unwrap();
        assert_eq!(result, "image: prom/prometheus:v2.54.1");
    }

    #[test]
    fn test_undefined_image_error() {
        let mut processor = processor_with_images();
        let err = processor
            .render_str("inline", "image: {{ images.database }}")
            .unwrap_err();
        match err {
            StackError::TemplateRender { template, .. } => assert_eq!(template, "inline"),
            other => panic!("Expected TemplateRender, got {:?}", other),
        }
    }

    #[test]
    fn test_builtin_templates_render_to_yaml() {
        for size in BUILTIN_SIZES {
            let mut processor = processor_with_images();
            let source = builtin_template(size).unwrap();
            let rendered = processor.render_str(size, source).unwrap();
            let value: serde_yaml::Value = serde_yaml::from_str(&rendered)
                .unwrap_or_else(|e| panic!("{size} did not render to YAML: {e}\n{rendered}"));
            assert!(value.get("services").is_some(), "{size}");
        }
    }

    #[test]
    fn test_medium_has_three_app_nodes() {
        let mut processor = processor_with_images();
        let rendered = processor.render_str("medium", MEDIUM).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        let services = value["services"].as_mapping().unwrap();

        for i in 1..=3 {
            assert!(services.contains_key(format!("app-node-{i}")));
        }
        assert!(!services.contains_key("app-node-4"));
        assert_eq!(
            value["services"]["app-node-2"]["environment"]["SEED_HOSTS"].as_str(),
            Some("app-node-1,app-node-2,app-node-3")
        );
    }

    #[test]
    fn test_unknown_builtin_is_rejected() {
        assert!(matches!(
            TemplateSource::builtin("huge"),
            Err(StackError::TemplateNotFound { .. })
        ));
        assert_eq!(
            TemplateSource::builtin("large").unwrap().name(),
            "builtin:large"
        );
    }

    #[test]
    fn test_missing_template_file() {
        let source = TemplateSource::File(PathBuf::from("/nonexistent/stack.yml.tera"));
        assert!(matches!(
            source.load(),
            Err(StackError::TemplateNotFound { .. })
        ));
    }
}

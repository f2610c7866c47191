//! スタック記述子のビルド
//!
//! テンプレート展開 → 参照の衛生チェック → ダイジェスト固定 → メタデータ付与 →
//! ドライバによる検証 → アトミックな書き出し、の順に処理する。
//! 正規パスには検証を通過した記述子だけが書かれる。

use crate::error::{Result, StackError};
use crate::hygiene::{
    check_rendered_images, check_template_images, drop_unresolved_services, unresolved_reference,
};
use crate::model::{
    ComposeDocument, METADATA_KEY, SpecMetadata, StackSpec, ValidationStatus, VersionManifest,
};
use crate::template::{TemplateProcessor, TemplateSource};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// 記述子に記録する生成元
pub fn generator_identity() -> String {
    format!("stackflow/{}", env!("CARGO_PKG_VERSION"))
}

/// 記述子の検証器（compose ドライバの `config --quiet` など）
#[async_trait]
pub trait DescriptorValidator: Send + Sync {
    /// ログ・エラー表示用の名前
    fn name(&self) -> String;

    /// `path` の記述子を検証する。失敗時は `StackError::ValidationRejected`
    async fn validate(&self, path: &Path, project: &str, profiles: &BTreeSet<String>)
    -> Result<()>;
}

/// ビルド要求
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub project: String,
    pub template: TemplateSource,
    pub pin_digests: bool,
    /// 有効にする compose プロファイル
    pub profiles: BTreeSet<String>,
    /// 書き出し先（正規パス）
    pub output: PathBuf,
}

impl BuildRequest {
    /// テンプレートに渡すサイズ名
    fn size(&self) -> String {
        match &self.template {
            TemplateSource::Builtin(size) => size.clone(),
            TemplateSource::File(_) => "custom".to_string(),
        }
    }
}

/// スタック記述子ビルダー
pub struct StackSpecBuilder<'a> {
    validator: &'a dyn DescriptorValidator,
}

impl<'a> StackSpecBuilder<'a> {
    pub fn new(validator: &'a dyn DescriptorValidator) -> Self {
        Self { validator }
    }

    /// 記述子を生成・検証し、正規パスへアトミックに書き出す
    #[tracing::instrument(skip(self, request, manifest), fields(project = %request.project, template = %request.template.name()))]
    pub async fn build(
        &self,
        request: &BuildRequest,
        manifest: &VersionManifest,
    ) -> Result<StackSpec> {
        let document = render_document(request, manifest)?;
        self.finalize(request, document).await
    }

    /// 展開済みのドキュメントにメタデータを付与し、検証してから書き出す
    pub async fn finalize(
        &self,
        request: &BuildRequest,
        mut document: ComposeDocument,
    ) -> Result<StackSpec> {
        let target_dir = target_dir(&request.output);
        let template_name = request.template.name();

        document.metadata = Some(SpecMetadata {
            generated_at: Utc::now(),
            generator: generator_identity(),
            validation_status: ValidationStatus::Pending,
            template: template_name.clone(),
            pinned: request.pin_digests,
        });

        // 検証は正規パスと同じディレクトリの一時ファイルに対して行う
        let candidate = write_temp(&target_dir, &document)?;
        debug!(
            path = %candidate.path().display(),
            validator = %self.validator.name(),
            "Validating candidate descriptor"
        );
        self.validator
            .validate(candidate.path(), &request.project, &request.profiles)
            .await?;
        drop(candidate);

        if let Some(metadata) = document.metadata.as_mut() {
            metadata.validation_status = ValidationStatus::Passed;
        }
        let validated = write_temp(&target_dir, &document)?;
        validated
            .persist(&request.output)
            .map_err(|e| StackError::io(&request.output, e.error))?;

        info!(
            path = %request.output.display(),
            services = document.services.len(),
            pinned = request.pin_digests,
            "Stack descriptor written"
        );

        Ok(StackSpec {
            project: request.project.clone(),
            document,
            profiles: request.profiles.clone(),
            path: request.output.clone(),
        })
    }
}

/// テンプレートを展開し、参照ポリシーを確認したドキュメントを返す（書き出しなし）
///
/// マニフェストにないコンポーネントを参照するサービスは、
/// 無効なプロファイルに属する場合だけ記述子から省く。
pub fn render_document(request: &BuildRequest, manifest: &VersionManifest) -> Result<ComposeDocument> {
    let template_name = request.template.name();
    let source = request.template.load()?;

    let referenced = check_template_images(&template_name, &source)?;
    debug!(components = ?referenced.keys().collect::<Vec<_>>(), "Template image references are sanctioned");

    let images = manifest.resolve_references(request.pin_digests)?;
    let mut context_images = images.clone();
    for component in referenced.keys().filter(|c| !manifest.contains(c)) {
        context_images.insert(component.clone(), unresolved_reference(component));
    }

    let mut processor = TemplateProcessor::new();
    processor.set_images(&context_images);
    processor.add_variable("project", serde_json::json!(request.project));
    processor.add_variable("size", serde_json::json!(request.size()));
    processor.add_variable(
        "monitoring",
        serde_json::json!(request.profiles.contains("monitoring")),
    );
    let rendered = processor.render_str(&template_name, &source)?;

    let mut document = parse_document(&rendered)?;
    if document.metadata.is_some() {
        return Err(StackError::DescriptorParse(format!(
            "テンプレートに予約済みのセクション '{}' を含めることはできません",
            METADATA_KEY
        )));
    }

    let dropped =
        drop_unresolved_services(&mut document, &template_name, &referenced, &request.profiles)?;
    if !dropped.is_empty() {
        info!(services = ?dropped, "Omitted inactive services without manifest entries");
    }
    if document.services.is_empty() {
        return Err(StackError::EmptyDescriptor);
    }

    let sanctioned: BTreeSet<String> = images.into_values().collect();
    check_rendered_images(&document, &sanctioned, request.pin_digests)?;

    Ok(document)
}

/// YAML 文字列を記述子として解析
pub fn parse_document(content: &str) -> Result<ComposeDocument> {
    let document: ComposeDocument =
        serde_yaml::from_str(content).map_err(|e| StackError::DescriptorParse(e.to_string()))?;
    if document.services.is_empty() {
        return Err(StackError::EmptyDescriptor);
    }
    Ok(document)
}

/// 書き出し済みの記述子を読み込む
pub fn load_descriptor(path: &Path) -> Result<ComposeDocument> {
    let content = std::fs::read_to_string(path).map_err(|e| StackError::io(path, e))?;
    parse_document(&content)
}

fn target_dir(output: &Path) -> PathBuf {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn header(document: &ComposeDocument) -> String {
    match &document.metadata {
        Some(meta) => format!(
            "# Generated by {} at {} from {}\n# Do not edit: regenerate with `stackflow up` or `stackflow validate`\n",
            meta.generator,
            meta.generated_at.to_rfc3339(),
            meta.template
        ),
        None => String::new(),
    }
}

fn write_temp(dir: &Path, document: &ComposeDocument) -> Result<NamedTempFile> {
    let body =
        serde_yaml::to_string(document).map_err(|e| StackError::DescriptorParse(e.to_string()))?;

    let mut file = tempfile::Builder::new()
        .prefix(".stackflow-")
        .suffix(".yml")
        .tempfile_in(dir)
        .map_err(|e| StackError::io(dir, e))?;
    let path = file.path().to_path_buf();
    file.write_all(header(document).as_bytes())
        .map_err(|e| StackError::io(&path, e))?;
    file.write_all(body.as_bytes())
        .map_err(|e| StackError::io(&path, e))?;
    file.as_file()
        .sync_all()
        .map_err(|e| StackError::io(&path, e))?;
    Ok(file)
}

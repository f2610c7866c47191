use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("無効な入力: {0}")]
    InvalidInput(String),

    #[error("バージョンマニフェストの読み込みに失敗しました: {path}\n理由: {message}")]
    ManifestLoad { path: PathBuf, message: String },

    #[error(
        "コンポーネント '{component}' にダイジェストがありません（{reference}）\n\nヒント:\n  • マニフェストに digest: sha256:<64桁の16進数> を追加してください\n  • 検証用途であれば --skip-digests でタグ参照のまま生成できます"
    )]
    MissingDigest {
        component: String,
        reference: String,
    },

    #[error(
        "コンポーネント '{component}' のダイジェストが不正です: '{digest}'\n（sha256:<64桁の16進数> 形式で指定してください）"
    )]
    MalformedDigest { component: String, digest: String },

    #[error(
        "{template}:{line}: 承認されていないイメージ参照 '{reference}'\n\nヒント:\n  • image には {{{{ images.<component> }}}} のみ使用できます"
    )]
    UnsanctionedImage {
        template: String,
        line: usize,
        reference: String,
    },

    #[error(
        "{template}:{line}: マニフェストに存在しないコンポーネント '{component}' を参照しています"
    )]
    UnknownComponent {
        template: String,
        line: usize,
        component: String,
    },

    #[error("サービス '{service}' のイメージ '{image}' はマニフェスト由来ではありません")]
    ImageDrift { service: String, image: String },

    #[error("サービス '{service}' のイメージ '{image}' がダイジェストで固定されていません")]
    UnpinnedImage { service: String, image: String },

    #[error("テンプレート '{template}' が見つかりません（利用可能: {available}）")]
    TemplateNotFound { template: String, available: String },

    #[error("テンプレートエラー: {template}\n理由: {message}")]
    TemplateRender { template: String, message: String },

    #[error("スタック記述子の解析に失敗しました: {0}")]
    DescriptorParse(String),

    #[error("スタック記述子にサービスが定義されていません")]
    EmptyDescriptor,

    #[error("{driver} による記述子の検証に失敗しました\nコマンド: {command}\n理由: {message}")]
    ValidationRejected {
        driver: String,
        command: String,
        message: String,
    },

    #[error("書き込み権限がありません: {path}\n理由: {message}")]
    PermissionDenied { path: PathBuf, message: String },

    #[error("IO エラー: {path}\n理由: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StackError {
    /// IO エラーを権限エラーとそれ以外に振り分ける
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            StackError::PermissionDenied {
                path,
                message: source.to_string(),
            }
        } else {
            StackError::Io { path, source }
        }
    }

    /// 記述子のスキーマ・参照ポリシー違反か
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            StackError::MissingDigest { .. }
                | StackError::MalformedDigest { .. }
                | StackError::UnsanctionedImage { .. }
                | StackError::UnknownComponent { .. }
                | StackError::ImageDrift { .. }
                | StackError::UnpinnedImage { .. }
                | StackError::TemplateRender { .. }
                | StackError::DescriptorParse(_)
                | StackError::EmptyDescriptor
                | StackError::ValidationRejected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StackError>;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error("設定ファイルの読み込みに失敗しました: {path}\n理由: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "設定ファイルの形式が正しくありません: {path}\n理由: {message}\n\nヒント:\n  • YAML のインデントとキー名を確認してください"
    )]
    Parse { path: PathBuf, message: String },

    #[error("無効な設定値: {field} = {value}\n理由: {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

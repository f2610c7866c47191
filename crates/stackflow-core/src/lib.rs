//! stackflow のスタック記述子まわりの中核
//!
//! - バージョンマニフェストとダイジェスト固定
//! - サイズテンプレートの展開と参照の衛生チェック
//! - 記述子の検証・アトミックな書き出し
//! - リトライ方針とヘルス記録のモデル

pub mod builder;
pub mod error;
pub mod hygiene;
pub mod model;
pub mod template;

pub use builder::{
    BuildRequest, DescriptorValidator, StackSpecBuilder, generator_identity, load_descriptor,
    parse_document, render_document,
};
pub use error::{Result, StackError};
pub use model::*;
pub use template::{BUILTIN_SIZES, TemplateProcessor, TemplateSource, builtin_template};

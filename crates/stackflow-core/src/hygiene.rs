//! イメージ参照の衛生チェック
//!
//! テンプレート中の `image:` はマニフェスト由来の変数
//! （`{{ images.<component> }}` / `{{ images["<component>"] }}`）でなければならない。
//! レンダリング後にも、各サービスのイメージが承認済み参照の集合に含まれるかを確認する。
//! マニフェストにないコンポーネントは、無効なプロファイルのサービスに限って許す。

use crate::error::{Result, StackError};
use crate::model::{ComposeDocument, is_pinned_reference};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// 未解決コンポーネントの仮参照の接頭辞（`.invalid` は解決されない TLD）
const UNRESOLVED_PREFIX: &str = "unresolved.stackflow.invalid/";

static IMAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:-\s+)?image\s*:\s*(?P<value>.*?)\s*(?:#.*)?$").expect("valid regex")
});

static SANCTIONED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\{\{\s*images\s*(?:\.\s*(?P<dot>[A-Za-z0-9_]+)|\[\s*["'](?P<key>[A-Za-z0-9_.-]+)["']\s*\])\s*\}\}$"#,
    )
    .expect("valid regex")
});

/// テンプレートソースの `image:` 行がすべて承認済み変数か検査する
///
/// 戻り値はテンプレートが参照するコンポーネント名と、最初に現れた行番号。
pub fn check_template_images(template_name: &str, source: &str) -> Result<BTreeMap<String, usize>> {
    let mut referenced = BTreeMap::new();

    for (idx, line) in source.lines().enumerate() {
        let Some(caps) = IMAGE_LINE.captures(line) else {
            continue;
        };
        let raw = caps.name("value").map(|m| m.as_str()).unwrap_or_default();
        let value = strip_quotes(raw);

        let component = SANCTIONED
            .captures(value)
            .and_then(|c| c.name("dot").or_else(|| c.name("key")))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| StackError::UnsanctionedImage {
                template: template_name.to_string(),
                line: idx + 1,
                reference: value.to_string(),
            })?;

        referenced.entry(component).or_insert(idx + 1);
    }

    Ok(referenced)
}

/// マニフェストにないコンポーネントを展開するための仮参照
pub fn unresolved_reference(component: &str) -> String {
    format!("{UNRESOLVED_PREFIX}{component}")
}

/// 仮参照を持つサービスを記述子から取り除き、取り除いたサービス名を返す
///
/// 有効なプロファイルで起動されるサービスが仮参照を持つ場合は `UnknownComponent`。
pub fn drop_unresolved_services(
    document: &mut ComposeDocument,
    template_name: &str,
    referenced: &BTreeMap<String, usize>,
    active_profiles: &BTreeSet<String>,
) -> Result<Vec<String>> {
    let mut dropped = Vec::new();
    for (name, service) in &document.services {
        let Some(component) = service.image.strip_prefix(UNRESOLVED_PREFIX) else {
            continue;
        };
        if service.is_active(active_profiles) {
            return Err(StackError::UnknownComponent {
                template: template_name.to_string(),
                line: referenced.get(component).copied().unwrap_or_default(),
                component: component.to_string(),
            });
        }
        dropped.push(name.clone());
    }

    for name in &dropped {
        document.services.remove(name);
    }
    Ok(dropped)
}

/// レンダリング後の全サービスのイメージが承認済み参照か検査する
///
/// `pinned` の場合はさらに `repo@sha256:<hex>` 形式であることを要求する。
pub fn check_rendered_images(
    document: &ComposeDocument,
    sanctioned: &BTreeSet<String>,
    pinned: bool,
) -> Result<()> {
    for (name, service) in &document.services {
        if !sanctioned.contains(&service.image) {
            return Err(StackError::ImageDrift {
                service: name.clone(),
                image: service.image.clone(),
            });
        }
        if pinned && !is_pinned_reference(&service.image) {
            return Err(StackError::UnpinnedImage {
                service: name.clone(),
                image: service.image.clone(),
            });
        }
    }
    Ok(())
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

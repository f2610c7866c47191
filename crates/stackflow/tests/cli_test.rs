#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

mod common;

use assert_cmd::Command;
use common::TestProject;
use predicates::prelude::*;

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("stackflow").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("runtime"))
        .stdout(predicate::str::contains("status"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("stackflow").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "stackflow {}",
            env!("CARGO_PKG_VERSION")
        )));
}

/// upコマンドのヘルプに主要なフラグが出ることを確認
#[test]
fn test_up_help() {
    let mut cmd = Command::cargo_bin("stackflow").unwrap();
    cmd.arg("up")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--size"))
        .stdout(predicate::str::contains("--skip-digests"))
        .stdout(predicate::str::contains("--no-monitoring"))
        .stdout(predicate::str::contains("--timeout"))
        .stdout(predicate::str::contains("--no-wait"))
        .stdout(predicate::str::contains("--engine"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("stackflow").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// マニフェストがなければ入力エラー（終了コード 2）
#[test]
fn test_validate_without_manifest() {
    let project = TestProject::new();
    project
        .cmd()
        .arg("validate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("versions.yml"));

    // 失敗時は診断情報が残り、ロックは残らない
    let state = project.path().join(".stackflow");
    assert!(state.join("diagnostics.json").exists());
    assert!(!state.join("run.lock").exists());
}

/// 存在しないサイズは入力エラー
#[test]
fn test_unknown_size() {
    let project = TestProject::new();
    project.write_manifest();
    project
        .cmd()
        .args(["validate", "--size", "huge"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("huge"))
        .stderr(predicate::str::contains("small"));
}

/// 未対応のエンジン名は入力エラー
#[test]
fn test_runtime_with_unknown_engine() {
    let project = TestProject::new();
    project
        .cmd()
        .env("STACKFLOW_ENGINE", "bogus")
        .arg("runtime")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("bogus"));
}

/// 設定ファイルの値が不正なら入力エラー
#[test]
fn test_invalid_settings() {
    let project = TestProject::new();
    project.write_settings("project: Demo Stack\n");
    project
        .cmd()
        .arg("validate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("project"));
}

/// 解析できない設定ファイルは入力エラー
#[test]
fn test_unparsable_settings() {
    let project = TestProject::new();
    project.write_settings("start: [unterminated\n");
    project
        .cmd()
        .arg("up")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("stackflow.yml"));
}

/// 存在しない作業ディレクトリは権限エラー（終了コード 7）
#[test]
fn test_missing_workdir() {
    let project = TestProject::new();
    let missing = project.path().join("missing");
    project
        .cmd()
        .arg("-C")
        .arg(&missing)
        .arg("validate")
        .assert()
        .code(7);
    assert!(!missing.exists());
}

/// 実行中のロックがあれば2つ目の実行は拒否される
#[test]
fn test_concurrent_run_is_refused() {
    let project = TestProject::new();
    project.write_manifest();
    let state = project.path().join(".stackflow");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(
        state.join("run.lock"),
        format!(
            r#"{{"holder": "other-host:42", "acquired_at": "{}"}}"#,
            chrono::Utc::now().to_rfc3339()
        ),
    )
    .unwrap();

    project
        .cmd()
        .arg("validate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("other-host:42"));
    // 他の実行のロックは消さない
    assert!(state.join("run.lock").exists());
}


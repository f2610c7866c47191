use super::record_failure;
use crate::context::RunContext;
use crate::controller::{EngineInspectors, Orchestrator};
use crate::preflight::HostPreflight;
use crate::report::StepLogger;
use colored::Colorize;
use stackflow_container::SystemRunner;

pub async fn handle(ctx: &RunContext) -> anyhow::Result<()> {
    println!("{}", "スタックを起動中...".blue());
    println!("プロジェクト: {}", ctx.project.cyan());
    println!("テンプレート: {}", ctx.template.name().cyan());
    if !ctx.pin_digests {
        println!(
            "{}",
            "⚠ ダイジェスト固定を無効にしています（--skip-digests）".yellow()
        );
    }
    println!();

    let runner = SystemRunner;
    let preflight = HostPreflight;
    let inspectors = EngineInspectors;
    let orchestrator = Orchestrator::new(&runner, &preflight, &inspectors);

    let mut log = StepLogger::new();
    let result = orchestrator.up(ctx, &mut log).await;
    log.print_summary("up");

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            record_failure("up", ctx, &e);
            return Err(e.into());
        }
    };

    println!();
    println!("{}", "✓ スタックが起動しました".green().bold());
    println!(
        "  記述子: {}",
        outcome.spec.path().display().to_string().cyan()
    );
    println!(
        "  ランタイム: {} / {}",
        outcome.profile.chosen_engine, outcome.profile.compose_driver
    );
    match &outcome.snapshot {
        Some(snapshot) => {
            println!();
            println!("{}", snapshot);
        }
        None => {
            println!(
                "  {}",
                "準備完了は待機していません。`stackflow status` で確認できます".dimmed()
            );
        }
    }
    Ok(())
}

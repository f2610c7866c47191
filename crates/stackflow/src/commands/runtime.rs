use crate::context::RunContext;
use crate::controller::{EngineInspectors, Orchestrator};
use crate::preflight::HostPreflight;
use colored::Colorize;
use stackflow_container::SystemRunner;

pub async fn handle(ctx: &RunContext, json: bool) -> anyhow::Result<()> {
    let runner = SystemRunner;
    let preflight = HostPreflight;
    let inspectors = EngineInspectors;
    let orchestrator = Orchestrator::new(&runner, &preflight, &inspectors);

    let profile = orchestrator.resolve(ctx).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
        return Ok(());
    }

    println!("{}", "コンテナランタイム".bold());
    println!("{}", "─".repeat(44).dimmed());
    for (engine, present) in &profile.engine_present {
        let mark = if *present {
            "✓".green()
        } else {
            "✗".red()
        };
        println!("  {} {}", mark, engine);
    }
    println!();
    println!("エンジン:     {}", profile.chosen_engine.to_string().cyan());
    println!("ドライバ:     {}", profile.compose_driver.to_string().cyan());
    println!("呼び出し:     {}", profile.invocation.to_string().cyan());
    println!(
        "自動インストール: {}",
        if profile.installable {
            "許可".green()
        } else {
            "無効".yellow()
        }
    );
    println!();
    println!("{}", "プローブ履歴:".bold());
    for probe in &profile.probes {
        if probe.ok {
            println!("  {} {}", "✓".green(), probe.command);
        } else {
            println!(
                "  {} {} {}",
                "✗".red(),
                probe.command,
                format!("({})", probe.detail).dimmed()
            );
        }
    }
    Ok(())
}

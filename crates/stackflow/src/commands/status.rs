use crate::context::RunContext;
use crate::controller::{EngineInspectors, Orchestrator};
use crate::preflight::HostPreflight;
use colored::Colorize;
use stackflow_container::SystemRunner;
use stackflow_core::HealthStatus;

pub async fn handle(ctx: &RunContext) -> anyhow::Result<()> {
    println!("{}", "サービスの状態を取得中...".blue());
    println!("プロジェクト: {}", ctx.project.cyan());

    let runner = SystemRunner;
    let preflight = HostPreflight;
    let inspectors = EngineInspectors;
    let orchestrator = Orchestrator::new(&runner, &preflight, &inspectors);

    let (profile, snapshot) = orchestrator.status(ctx).await?;
    println!(
        "ランタイム: {} / {}",
        profile.chosen_engine, profile.compose_driver
    );
    println!();

    println!(
        "{}",
        format!("{:<28} {:<12} {:<14}", "SERVICE", "STATUS", "CONTAINER").bold()
    );
    println!("{}", "─".repeat(56).dimmed());
    for record in &snapshot.records {
        let status = format!("{:<12}", record.status.to_string());
        let status = match record.status {
            HealthStatus::Healthy => status.green(),
            HealthStatus::Running | HealthStatus::Starting => status.yellow(),
            HealthStatus::Unhealthy => status.red(),
            HealthStatus::Absent => status.dimmed(),
        };
        let id = record
            .container_id
            .as_deref()
            .map(|id| &id[..id.len().min(12)])
            .unwrap_or("-");
        println!("{:<28} {} {:<14}", record.name, status, id);
    }
    Ok(())
}

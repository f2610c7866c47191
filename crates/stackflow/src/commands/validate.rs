use super::record_failure;
use crate::context::RunContext;
use crate::controller::{EngineInspectors, Orchestrator};
use crate::preflight::HostPreflight;
use crate::report::StepLogger;
use colored::Colorize;
use stackflow_container::SystemRunner;

pub async fn handle(ctx: &RunContext) -> anyhow::Result<()> {
    println!("{}", "スタック記述子を検証中...".blue());
    println!("テンプレート: {}", ctx.template.name().cyan());
    println!("マニフェスト: {}", ctx.manifest_path.display().to_string().cyan());
    println!();

    let runner = SystemRunner;
    let preflight = HostPreflight;
    let inspectors = EngineInspectors;
    let orchestrator = Orchestrator::new(&runner, &preflight, &inspectors);

    let mut log = StepLogger::new();
    let (profile, spec) = match orchestrator.validate(ctx, &mut log).await {
        Ok(result) => result,
        Err(e) => {
            record_failure("validate", ctx, &e);
            return Err(e.into());
        }
    };

    println!();
    println!("{}", "✓ スタック記述子は正常です！".green().bold());
    println!("  検証: {}", profile.invocation.to_string().cyan());
    println!("  記述子: {}", spec.path().display().to_string().cyan());
    println!();
    println!("サマリー:");
    let active = spec.active_services();
    println!("  サービス: {}個", active.len());
    for (name, service) in spec.services() {
        if !active.contains(name) {
            continue;
        }
        let profiles = if service.profiles.is_empty() {
            String::new()
        } else {
            format!(" [{}]", service.profiles.join(", "))
        };
        println!("    - {} ({}){}", name.cyan(), service.image, profiles.dimmed());
    }
    Ok(())
}

mod commands;
mod context;
mod controller;
mod error;
mod lock;
mod preflight;
mod report;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use context::Overrides;
use error::{DeployError, exit_code_of};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "どのホストでも、同じスタックを同じ手順で。", long_about = None)]
struct Cli {
    /// 作業ディレクトリ（記述子・状態ディレクトリの置き場所）
    #[arg(short = 'C', long, global = true, env = "STACKFLOW_WORKDIR")]
    workdir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// 記述子の生成に関わるフラグ
#[derive(Args, Debug, Clone, Default)]
struct StackArgs {
    /// サイズテンプレート (small, medium, large)
    #[arg(short, long)]
    size: Option<String>,
    /// 独自テンプレートのパス（--size より優先）
    #[arg(long)]
    template: Option<PathBuf>,
    /// バージョンマニフェストのパス
    #[arg(short, long)]
    manifest: Option<PathBuf>,
    /// イメージをダイジェストで固定しない（検証用途のみ）
    #[arg(long)]
    skip_digests: bool,
    /// monitoring プロファイルを無効にする
    #[arg(long)]
    no_monitoring: bool,
    /// エンジン候補順（例: podman,docker）
    #[arg(short, long)]
    engine: Option<String>,
}

impl StackArgs {
    fn into_overrides(self) -> Overrides {
        Overrides {
            size: self.size,
            template: self.template,
            manifest: self.manifest,
            engine: self.engine,
            skip_digests: self.skip_digests,
            no_monitoring: self.no_monitoring,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// スタックを生成・検証して起動し、準備完了まで待つ
    Up {
        #[command(flatten)]
        stack: StackArgs,
        /// ヘルスチェック待機の上限（秒）
        #[arg(short, long)]
        timeout: Option<u64>,
        /// 準備完了まで待機する
        #[arg(long, overrides_with = "no_wait")]
        wait: bool,
        /// 起動後すぐに終了する
        #[arg(long, overrides_with = "wait")]
        no_wait: bool,
    },
    /// スタック記述子を生成・検証する（起動しない）
    Validate {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// 検出したコンテナランタイムを表示
    Runtime {
        /// エンジン候補順（例: podman,docker）
        #[arg(short, long)]
        engine: Option<String>,
        /// JSON で出力
        #[arg(long)]
        json: bool,
    },
    /// サービスの状態を表示
    Status {
        /// エンジン候補順（例: podman,docker）
        #[arg(short, long)]
        engine: Option<String>,
        /// monitoring プロファイルのサービスを表示しない
        #[arg(long)]
        no_monitoring: bool,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stackflow=info")),
        )
        .init();

    let result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            // 実行中のフューチャはここで破棄され、ロックと一時ファイルも片付く
            Err(DeployError::Interrupted.into())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "✗".red().bold(), e);
            ExitCode::from(exit_code_of(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli { workdir, command } = cli;

    match command {
        // Versionコマンドは設定ファイル不要
        Commands::Version => {
            println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Up {
            stack,
            timeout,
            wait,
            no_wait,
        } => {
            let overrides = Overrides {
                timeout,
                wait: wait_flag(wait, no_wait),
                ..stack.into_overrides()
            };
            let ctx = commands::load_context(&resolve_workdir(workdir)?, &overrides)?;
            commands::up::handle(&ctx).await?;
        }
        Commands::Validate { stack } => {
            let ctx = commands::load_context(&resolve_workdir(workdir)?, &stack.into_overrides())?;
            commands::validate::handle(&ctx).await?;
        }
        Commands::Runtime { engine, json } => {
            let overrides = Overrides {
                engine,
                ..Default::default()
            };
            let ctx = commands::load_context(&resolve_workdir(workdir)?, &overrides)?;
            commands::runtime::handle(&ctx, json).await?;
        }
        Commands::Status {
            engine,
            no_monitoring,
        } => {
            let overrides = Overrides {
                engine,
                no_monitoring,
                ..Default::default()
            };
            let ctx = commands::load_context(&resolve_workdir(workdir)?, &overrides)?;
            commands::status::handle(&ctx).await?;
        }
    }

    Ok(())
}

fn resolve_workdir(workdir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match workdir {
        Some(dir) => Ok(dir),
        None => Ok(std::env::current_dir()?),
    }
}

/// `--wait` / `--no-wait` を設定への上書きに変換（どちらもなければ設定に従う）
fn wait_flag(wait: bool, no_wait: bool) -> Option<bool> {
    match (wait, no_wait) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

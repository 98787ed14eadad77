mod commands;
mod docker;
mod host;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "devflow")]
#[command(about = "宣言して、つながる。ローカル開発環境をひとつのコマンドで。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 依存サービスとサービスを起動し、Ctrl+C で停止
    Run {
        /// 設定ファイル（複数指定可、省略時はカレントディレクトリの devflow.yaml）
        #[arg(short = 'f', long = "file")]
        files: Vec<PathBuf>,
        /// この名前の環境を持つ remote runner を優先する
        #[arg(long, env = "DEVFLOW_REMOTE_ENV")]
        remote_env: Option<String>,
        /// サービスのワークロードを自動起動しない
        #[arg(long)]
        start_services_manually: bool,
    },
    /// 設定を検証
    Validate {
        /// 設定ファイル（複数指定可、省略時はカレントディレクトリの devflow.yaml）
        #[arg(short = 'f', long = "file")]
        files: Vec<PathBuf>,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // ログは stderr に出力
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run {
            files,
            remote_env,
            start_services_manually,
        } => commands::run::handle(files, remote_env, start_services_manually).await,
        Commands::Validate { files } => commands::validate::handle(files),
        Commands::Version => {
            println!("devflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!();
        eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
        std::process::exit(1);
    }
}

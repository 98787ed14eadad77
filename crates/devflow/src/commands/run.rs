use crate::docker;
use crate::host::ComposeHost;
use colored::Colorize;
use devflow_config::{UserPreferences, UserSettings};
use devflow_container::{ContainerExec, DockerExec};
use devflow_pipeline::{ApplicationState, GeneratedPaths, RunOptions, ToolPaths};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn handle(
    files: Vec<PathBuf>,
    remote_env: Option<String>,
    start_services_manually: bool,
) -> anyhow::Result<()> {
    let settings = UserSettings::load()?;
    let preferences = UserPreferences::load()?;
    let generated_dir = settings.generated_dir()?;
    let tools = ToolPaths::default();

    println!("{}", "devflow を起動中...".blue());
    if let Some(env) = &remote_env {
        println!("リモート環境: {}", env.cyan());
    }

    let docker_conn = docker::init_docker_with_error_handling()?;
    let exec: Arc<dyn ContainerExec> = Arc::new(DockerExec::new(docker_conn));
    let host = Arc::new(ComposeHost::new(tools.docker.clone()));

    let options = RunOptions {
        config_paths: files,
        search_dir: None,
        remote_env,
        start_services_manually,
        preferences,
    };
    let mut state = ApplicationState::new(options, settings, GeneratedPaths::new(generated_dir))
        .with_tools(tools);

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl+C received");
                println!();
                println!("{}", "停止中...".yellow());
                token.cancel();
            }
        });
    }

    let mut pipeline = devflow_pipeline::standard_pipeline(exec, host);
    pipeline.run(&mut state, &token).await?;

    if !state.degraded.is_empty() {
        let names: Vec<String> = state.degraded.iter().map(|d| d.to_string()).collect();
        println!(
            "{} 準備完了を確認できなかった依存サービス: {}",
            "⚠".yellow(),
            names.join(", ")
        );
    }
    println!("{}", "✓ 停止しました".green());
    Ok(())
}

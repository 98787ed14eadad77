use colored::Colorize;
use devflow_core::ConfigAggregator;
use std::path::PathBuf;

pub fn handle(files: Vec<PathBuf>) -> anyhow::Result<()> {
    println!("{}", "設定を検証中...".blue());

    let aggregator = ConfigAggregator::new(files);
    let documents = aggregator.documents_required()?;
    for loaded in documents.iter() {
        println!("設定ファイル: {}", loaded.path.display().to_string().cyan());
    }

    let dependencies = aggregator.dependencies()?;
    let services = aggregator.services();
    let declared: usize = documents.iter().map(|d| d.document.services.len()).sum();

    println!("{}", "✓ 設定ファイルを読み込みました".green().bold());
    println!();
    println!("サマリー:");
    println!("  サービス: {}個", services.len());
    for service in &services {
        let host = service
            .ingress_config
            .host
            .as_deref()
            .unwrap_or(devflow_core::LOOPBACK_HOST);
        println!(
            "    - {} ({}, {}{})",
            service.name.cyan(),
            service.active_runner().kind(),
            host,
            service.declared_path()
        );
    }
    println!("  依存サービス: {}個", dependencies.len());
    for dependency in &dependencies {
        println!("    - {}", dependency.dependency_type().to_string().cyan());
    }

    if services.len() < declared {
        anyhow::bail!(
            "{}個のサービス定義が不正または重複のため除外されました（詳細はログを確認してください）",
            declared - services.len()
        );
    }

    Ok(())
}

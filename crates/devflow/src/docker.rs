use colored::Colorize;

/// Dockerクライアントを生成（失敗時は解決方法を表示）
pub fn init_docker_with_error_handling() -> anyhow::Result<bollard::Docker> {
    match devflow_container::connect() {
        Ok(docker) => Ok(docker),
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Docker接続エラー".red().bold());
            eprintln!();
            eprintln!("{}", "原因:".yellow());
            eprintln!("  {}", e);
            eprintln!();
            eprintln!("{}", "解決方法:".yellow());
            eprintln!("  • Dockerが起動しているか確認してください");
            eprintln!("  • OrbStackまたはDocker Desktopがインストールされているか確認してください");
            eprintln!("  • DOCKER_HOST が正しいソケットを指しているか確認してください");
            Err(anyhow::anyhow!("Docker接続に失敗しました"))
        }
    }
}

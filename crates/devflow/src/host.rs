//! docker compose とローカルプロセスによるオーケストレーションホスト

use async_trait::async_trait;
use colored::Colorize;
use devflow_container::{ContainerError, ProcessDefinition, kill_process_gracefully};
use devflow_pipeline::{HostPlan, OrchestrationHost, PipelineError, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

pub struct ComposeHost {
    docker: PathBuf,
    compose_file: Mutex<Option<PathBuf>>,
    children: Mutex<Vec<(String, Child)>>,
}

impl ComposeHost {
    pub fn new(docker: impl Into<PathBuf>) -> Self {
        Self {
            docker: docker.into(),
            compose_file: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        }
    }

    async fn compose(&self, file: &Path, args: &[&str]) -> Result<()> {
        debug!(file = %file.display(), args = ?args, "Running docker compose");
        let output = Command::new(&self.docker)
            .arg("compose")
            .arg("-f")
            .arg(file)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                PipelineError::precondition(
                    format!("docker コマンドを実行できません: {}", e),
                    "Docker CLI (docker compose) がインストールされているか確認してください",
                )
            })?;

        if !output.status.success() {
            return Err(PipelineError::Unhandled(anyhow::anyhow!(
                "docker compose {} に失敗しました: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn spawn(&self, process: &ProcessDefinition) -> Result<()> {
        let child = Command::new(&process.command)
            .args(&process.args)
            .current_dir(&process.working_directory)
            .envs(&process.env)
            .spawn()
            .map_err(|e| ContainerError::ProcessSpawnFailed {
                command: format!("{} ({})", process.name, process.command),
                message: e.to_string(),
            })?;

        info!(name = %process.name, pid = ?child.id(), "Process started");
        self.children.lock().push((process.name.clone(), child));
        Ok(())
    }
}

#[async_trait]
impl OrchestrationHost for ComposeHost {
    async fn start(&self, plan: &HostPlan) -> Result<()> {
        if plan.has_containers() {
            *self.compose_file.lock() = Some(plan.compose_file.clone());

            let mut targets: Vec<&str> = plan.dependency_services.iter().map(String::as_str).collect();
            if !plan.start_services_manually {
                targets.extend(plan.service_containers.iter().map(String::as_str));
            }

            if !targets.is_empty() {
                println!("{}", "コンテナを起動中...".blue());
                let mut args = vec!["up", "-d", "--wait"];
                args.extend(targets.iter().copied());
                self.compose(&plan.compose_file, &args).await?;
                for target in &targets {
                    println!("  {} {}", "✓".green(), target.cyan());
                }
            }
        }

        if plan.start_services_manually {
            print_manual_instructions(plan);
        } else {
            for process in &plan.processes {
                self.spawn(process)?;
                println!("  {} {} ({})", "▶".green(), process.name.cyan(), process.command);
            }
        }

        for (id, route) in plan.proxy.routes() {
            for host in &route.route_match.hosts {
                println!("  {} {} → {}{}", "🌐".blue(), id.cyan(), host, route.route_match.path);
            }
        }
        if let Some(certificate) = &plan.certificate {
            info!(
                cert = %certificate.cert_file.display(),
                key = %certificate.key_file.display(),
                "Proxy TLS certificate"
            );
            println!("  {} 証明書: {}", "🔒".blue(), certificate.cert_file.display());
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let children = std::mem::take(&mut *self.children.lock());
        for (name, mut child) in children {
            match child.id() {
                Some(pid) => {
                    kill_process_gracefully(pid as i32).await;
                    if let Err(e) = child.wait().await {
                        warn!(name = %name, error = %e, "Failed to reap process");
                    }
                }
                None => debug!(name = %name, "Process already exited"),
            }
        }

        let compose_file = self.compose_file.lock().take();
        if let Some(file) = compose_file {
            println!("{}", "コンテナを停止中...".blue());
            self.compose(&file, &["down"]).await?;
        }
        Ok(())
    }
}

fn print_manual_instructions(plan: &HostPlan) {
    if plan.processes.is_empty() && plan.service_containers.is_empty() {
        return;
    }

    println!();
    println!("{}", "サービスは手動で起動してください:".yellow());
    for process in &plan.processes {
        println!(
            "  • {}: (cd {} && {} {})",
            process.name.cyan(),
            process.working_directory.display(),
            process.command,
            process.args.join(" ")
        );
    }
    for name in &plan.service_containers {
        println!(
            "  • {}: docker compose -f {} up -d {}",
            name.cyan(),
            plan.compose_file.display(),
            name
        );
    }
}

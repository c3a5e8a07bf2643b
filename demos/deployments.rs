use std::time::Duration;

use rockkit::syskit::Connection;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rockkit=info".into()),
        )
        .init();

    let config = rockkit::Config::from_env()?;
    let connection = Connection::new(&config.syskit_url)?.with_poll_interval(config.poll_interval());

    let token = CancellationToken::new();
    let timeout = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        timeout.cancel();
    });
    connection.connect(&token).await?;

    let mut deployments = connection.available_deployments().await?;
    deployments.sort_by(|a, b| a.name.cmp(&b.name));
    for deployment in &deployments {
        println!("{} ({})", deployment.name, deployment.project_name);
        for task in &deployment.tasks {
            println!("  {:<30} {}", task.task_name, task.task_model_name);
        }
    }

    // `deployments <model> <task>` registers and starts one deployment.
    let mut args = std::env::args().skip(1);
    if let (Some(model), Some(task)) = (args.next(), args.next()) {
        let id = connection.register_deployment(&model, &task).await?;
        let command_line = connection.command_line(id).await?;
        println!("\n{} {}", command_line.command, command_line.args.join(" "));

        let mut process = rockkit::process::spawn_command_line(&command_line)?;
        while let Some(line) = process.output_rx.recv().await {
            println!("{line}");
        }
        let status = process.child.wait().await?;
        eprintln!("[status] {task} exited: {status}");
    }

    Ok(())
}

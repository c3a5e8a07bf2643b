use std::path::PathBuf;

use rockkit::{TaskProvider, TaskStatus, Workspaces};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rockkit=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let folder = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().expect("failed to get current directory"));
    let run = args.next();

    let config = rockkit::Config::from_env()?;
    let registry = Workspaces::new(config.naming());
    if registry.add_folder(&folder).workspace().is_none() {
        anyhow::bail!("{} is not inside an autoproj workspace", folder.display());
    }

    let mut provider = TaskProvider::new();
    provider.reload(&registry);
    for task in provider.tasks() {
        println!("{:<60} {}", task.name, task.command_line());
    }

    // `tasks <folder> build` runs the folder's build task.
    if let Some(mode) = run {
        let task = match mode.as_str() {
            "build" => provider.build_task(&folder)?,
            "update" => provider.update_task(&folder)?,
            "checkout" => provider.checkout_task(&folder)?,
            other => anyhow::bail!("unknown task {other}"),
        };

        let mut run = task.spawn()?;
        loop {
            tokio::select! {
                Some(line) = run.output_rx.recv() => {
                    println!("{line}");
                }
                Ok(()) = run.status_rx.changed() => {
                    if let TaskStatus::Finished { success, duration } = *run.status_rx.borrow_and_update() {
                        eprintln!("[status] finished: success={success}, duration={duration:.1?}");
                        break;
                    }
                }
                else => break,
            }
        }

        while let Some(line) = run.output_rx.recv().await {
            println!("{line}");
        }
    }

    Ok(())
}

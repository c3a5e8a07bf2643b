use std::path::PathBuf;

use rockkit::{PackageKind, Workspace};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rockkit=info".into()),
        )
        .init();

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().expect("failed to get current directory"));

    let Some(ws) = Workspace::from_dir(&dir) else {
        anyhow::bail!("{} is not inside an autoproj workspace", dir.display());
    };
    println!("workspace {} at {}", ws.name(), ws.root().display());

    let info = ws.info().await?;

    let mut sets: Vec<_> = info.package_sets.values().collect();
    sets.sort_by(|a, b| a.name.cmp(&b.name));
    println!("\n{} package sets:", sets.len());
    for set in sets {
        println!("  {:<40} {}", set.name, set.user_local_dir.display());
    }

    let mut packages: Vec<_> = info.packages.values().collect();
    packages.sort_by(|a, b| a.name.cmp(&b.name));
    println!("\n{} packages:", packages.len());
    for pkg in packages {
        let kind = PackageKind::classify(&pkg.build_type);
        println!("  {:<40} {:<8} {}", pkg.name, kind, pkg.srcdir.display());
    }

    match ws.which("ruby").await {
        Ok(ruby) => println!("\nruby: {}", ruby.display()),
        Err(e) => eprintln!("\n{e}"),
    }

    Ok(())
}

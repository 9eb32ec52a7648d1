use anyhow::{Context, Result};
use clap::Parser;
use resetfs::client::localfs::LocalDirConnector;
use resetfs::endpoint::EndpointIdentity;
use resetfs::fixture::Fixture;
use std::path::PathBuf;

/// Reset the root namespace of a local-directory backed container.
///
/// The backend root holds one directory per pool, each holding one directory
/// per container. Pool/container default to the environment overrides
/// (RESETFS_POOL_ID, RESETFS_CONTAINER_ID) or the built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "reset-local")]
struct Args {
    /// Backend root directory holding <pool>/<container> trees.
    root: PathBuf,

    /// Pool id override.
    #[arg(long)]
    pool: Option<String>,

    /// Container id override.
    #[arg(long)]
    container: Option<String>,

    /// Create the pool/container directories if missing.
    #[arg(long)]
    create: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut identity = EndpointIdentity::from_env();
    if let Some(pool) = args.pool {
        identity = identity.with_pool_id(pool);
    }
    if let Some(container) = args.container {
        identity = identity.with_container_id(container);
    }

    if args.create {
        let dir = args
            .root
            .join(identity.pool_id())
            .join(identity.container_id());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let fixture = Fixture::with_identity(LocalDirConnector::new(&args.root), identity);
    let (_view, report) = fixture
        .fs_view()
        .await
        .with_context(|| {
            format!(
                "provisioning pool {} container {}",
                fixture.pool_id(),
                fixture.container_id()
            )
        })?;

    println!(
        "pool {} container {}: {} deleted, {} failed",
        fixture.pool_id(),
        fixture.container_id(),
        report.deleted.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        eprintln!("failed to delete /{}: {}", failure.name, failure.reason);
    }
    Ok(())
}

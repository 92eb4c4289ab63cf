mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::disk_name::DiskNameArgs;
use commands::serve::ServeArgs;
use commands::version::VersionArgs;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "warmpool")]
#[command(about = "Keeps a pool of warm VMs and hands each user one with their own disk")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the VM pool and the request dispatcher
    Serve(ServeArgs),

    /// Print the disk name a user maps to
    DiskName(DiskNameArgs),

    /// Show version information
    Version(VersionArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await,
        Commands::DiskName(args) => {
            commands::disk_name::run(args);
            Ok(())
        }
        Commands::Version(args) => {
            commands::version::run(args);
            Ok(())
        }
    }
}

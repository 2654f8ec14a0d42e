use clap::{Parser, Subcommand};
use ember_vmm::{Executor, VmConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "emberd")]
#[command(about = "Runs commands in one-shot Firecracker microVMs over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Start {
        /// Host address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value_t = 7777)]
        port: u16,

        /// Guest kernel image
        #[arg(long, default_value = "/var/lib/ember/vmlinux")]
        kernel: PathBuf,

        /// Canonical root filesystem image, copied per execution
        #[arg(long, default_value = "/var/lib/ember/rootfs.ext4")]
        rootfs: PathBuf,

        /// Firecracker binary to spawn
        #[arg(long, default_value = "firecracker")]
        firecracker_bin: PathBuf,

        /// Scratch directory for per-execution artifacts
        #[arg(long, default_value = "/tmp/emberd")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ember=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            host,
            port,
            kernel,
            rootfs,
            firecracker_bin,
            data_dir,
        } => {
            let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

            tokio::fs::create_dir_all(&data_dir).await?;

            tracing::info!(
                kernel = %kernel.display(),
                rootfs = %rootfs.display(),
                data_dir = %data_dir.display(),
                "Initializing executor"
            );
            let executor = Arc::new(Executor::new(VmConfig {
                firecracker_bin,
                kernel_image: kernel,
                rootfs_image: rootfs,
                data_dir,
            }));

            ember_daemon::server::serve(addr, executor).await?;
        }
    }

    Ok(())
}

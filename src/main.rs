#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use grx::{bootstrap, server};

#[derive(Parser)]
#[command(name = "grx", about = "Multi-tenant HTTP reverse proxy and static file server")]
struct Cli {
    /// Path to the server configuration file
    #[arg(long, default_value = "grx.yml")]
    file: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(server::runtime::worker_threads())
        .enable_all()
        .build()?;

    rt.block_on(bootstrap::run(bootstrap::BootstrapArgs {
        config_path: cli.file,
    }))
}

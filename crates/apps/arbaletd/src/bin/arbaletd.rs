#[path = "arbaletd/bootstrap.rs"]
mod bootstrap;
#[path = "arbaletd/simulate.rs"]
mod simulate;

use arbalet_mesh::Address;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "arbaletd")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one node over the UDP mesh.
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Override the node address from the config file.
        #[arg(long)]
        address: Option<Address>,
        /// Act as mesh root regardless of the config file.
        #[arg(long)]
        root: bool,
    },
    /// Run several nodes in-process against a backend.
    Simulate {
        #[arg(long, default_value_t = 3)]
        nodes: usize,
        #[arg(long, default_value = "127.0.0.1:8080")]
        server: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match Args::parse().command {
        Command::Run { config, address, root } => bootstrap::run(config, address, root).await,
        Command::Simulate { nodes, server } => simulate::run(nodes, server).await,
    }
}
